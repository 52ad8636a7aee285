// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration and constants shared by the collector and the report pipeline.

pub(crate) mod configuration;
pub mod constants;
