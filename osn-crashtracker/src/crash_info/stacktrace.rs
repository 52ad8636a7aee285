// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Serialize, Serializer};
use std::path::Path;

/// One emitted frame of the faulting thread's stack. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackFrame {
    pub instruction_address: usize,
    pub symbol_address: usize,
    pub function_name: String,
    pub source_file: String,
    pub line_number: u32,
    /// Raw capture indices of the unresolvable frames collapsed just before this one.
    pub frames_omitted: Option<(usize, usize)>,
    pub in_app: bool,
}

impl StackFrame {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            in_app: true,
            ..Default::default()
        }
    }

    /// Last path component of the source file, as shown by the crash-reporting service.
    pub fn file_name(&self) -> &str {
        Path::new(&self.source_file)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(&self.source_file)
    }
}

/// Lowercase hex with a `0x` prefix. The 16-digit zero padding is dropped when it is at most
/// four characters long, which is the case for every user-space address on 64-bit targets.
pub fn format_instruction_addr(address: usize) -> String {
    let padded = format!("{address:016x}");
    let zeros = padded.len() - padded.trim_start_matches('0').len();
    if zeros <= 4 && zeros < padded.len() {
        format!("0x{}", &padded[zeros..])
    } else {
        format!("0x{padded}")
    }
}

pub fn format_symbol_addr(address: usize) -> String {
    format!("{address:#x}")
}

// The sink's frame schema. `filename` carries the function name and `function` the source file;
// the crash-reporting dashboards group on those swapped fields.
#[derive(Serialize)]
struct SinkFrame<'a> {
    filename: &'a str,
    function: &'a str,
    lineno: u32,
    instruction_addr: String,
    symbol_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_app: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frames_omitted: Option<[String; 2]>,
}

impl Serialize for StackFrame {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        SinkFrame {
            filename: &self.function_name,
            function: self.file_name(),
            lineno: self.line_number,
            instruction_addr: format_instruction_addr(self.instruction_address),
            symbol_addr: format_symbol_addr(self.symbol_address),
            in_app: (!self.in_app).then_some(false),
            frames_omitted: self
                .frames_omitted
                .map(|(first, last)| [first.to_string(), last.to_string()]),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instruction_addr() {
        assert_eq!(format_instruction_addr(0x7ff6_1234_abcd), "0x7ff61234abcd");
        assert_eq!(format_instruction_addr(0x5555_5555_0000), "0x555555550000");
        // Five or more leading zeros keep the padding.
        assert_eq!(format_instruction_addr(0xabc), "0x0000000000000abc");
        assert_eq!(format_instruction_addr(0), "0x0000000000000000");
        assert_eq!(
            format_instruction_addr(0xffff_8000_0000_0000),
            "0xffff800000000000"
        );
    }

    #[test]
    fn test_symbol_addr() {
        assert_eq!(format_symbol_addr(0x7FF6_1234_0000), "0x7ff612340000");
        assert_eq!(format_symbol_addr(0), "0x0");
    }

    #[test]
    fn test_sink_schema() -> anyhow::Result<()> {
        let frame = StackFrame {
            instruction_address: 0x7ff6_1234_abcd,
            symbol_address: 0x7ff6_1234_ab00,
            function_name: "obs::video::render".to_string(),
            source_file: "/build/src/video/render.rs".to_string(),
            line_number: 42,
            frames_omitted: Some((3, 5)),
            in_app: true,
        };
        assert_eq!(
            serde_json::to_value(&frame)?,
            json!({
                "filename": "obs::video::render",
                "function": "render.rs",
                "lineno": 42,
                "instruction_addr": "0x7ff61234abcd",
                "symbol_addr": "0x7ff61234ab00",
                "frames_omitted": ["3", "5"],
            })
        );

        let std_frame = StackFrame {
            in_app: false,
            ..StackFrame::new("std::rt::lang_start")
        };
        let value = serde_json::to_value(&std_frame)?;
        assert_eq!(value["in_app"], json!(false));
        assert_eq!(value["function"], json!(""));
        assert!(value.get("frames_omitted").is_none());
        Ok(())
    }
}
