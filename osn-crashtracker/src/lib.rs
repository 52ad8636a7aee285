// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! In-process crash reporting for a media engine host.
//!
//! Failures reach the crate from four sources: the engine's fatal-error facility
//! ([`handle_fatal_error`]), unhandled panics, fatal signals (or the unhandled exception filter
//! on Windows) and process exit. Each one is turned into a [`Trigger`] and dispatched by the
//! [`CrashSubsystem`]:
//!
//! 1. Known failures (matched on the raw fatal-error format) exit cleanly with status 0 after an
//!    orderly engine shutdown.
//! 2. Everything else is unwound, enriched with a resource snapshot, the process list, the host
//!    log and the breadcrumb ledger, then delivered to the configured [`Endpoint`] as a
//!    [`CrashReport`].
//! 3. Re-entrant faults abort immediately without a report.
//!
//! ```no_run
//! use osn_crashtracker::*;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut config = CrashtrackerConfiguration::default();
//! config.set_endpoint(Some(Endpoint::from_slice("file:///tmp/crash.json")?));
//! config.add_known_failure("Failed to initialize video")?;
//!
//! let subsystem = Arc::new(CrashSubsystem::new(config.clone(), Box::new(NoEngine)));
//! subsystem.install(&mut OsHookRegistry::new(&config))?;
//! # Ok(())
//! # }
//! ```

mod collector;
mod crash_info;
mod shared;

pub use collector::*;
pub use crash_info::*;
pub use shared::configuration::*;
pub use shared::constants::*;
