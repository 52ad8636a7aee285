// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::crash_info::StackFrame;
use crate::shared::configuration::CrashtrackerConfiguration;
use crate::shared::constants::OSN_CRASHTRACK_MAX_CAPTURED_FRAMES;
use std::ffi::c_void;

/// A return address as captured, before any symbolization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawFrame {
    pub ip: usize,
    pub symbol_address: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedSymbol {
    pub name: String,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub address: Option<usize>,
}

/// Maps an address to debug info. `None` means the frame is unresolvable.
pub trait SymbolResolver {
    fn resolve(&self, frame: &RawFrame) -> Option<ResolvedSymbol>;
}

/// In-process symbolization with the `backtrace` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceResolver;

impl SymbolResolver for BacktraceResolver {
    fn resolve(&self, frame: &RawFrame) -> Option<ResolvedSymbol> {
        let mut resolved = None;
        // SAFETY: only the thread holding the recursion guard unwinds, so there is no concurrent
        // use of the unsynchronized resolver from the crash path.
        unsafe {
            backtrace::resolve_unsynchronized(frame.ip as *mut c_void, |symbol| {
                // Inlined frames resolve to several symbols; keep the innermost.
                if resolved.is_some() {
                    return;
                }
                if let Some(name) = symbol.name() {
                    resolved = Some(ResolvedSymbol {
                        // The alternate form drops the trailing `::h<hash>`.
                        name: format!("{name:#}"),
                        filename: symbol.filename().map(|f| f.display().to_string()),
                        lineno: symbol.lineno(),
                        address: symbol.addr().map(|a| a as usize),
                    });
                }
            });
        }
        resolved
    }
}

/// Result of one unwinding pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnwoundStack {
    /// Innermost frame first.
    pub frames: Vec<StackFrame>,
    pub crashed_function_name: Option<String>,
}

/// Walks the calling thread's stack into a fixed buffer of return addresses, innermost first.
/// Never allocates while walking. An empty result means the platform could not capture a stack.
pub fn capture_raw() -> Vec<RawFrame> {
    let mut buffer = [RawFrame::default(); OSN_CRASHTRACK_MAX_CAPTURED_FRAMES];
    let mut len = 0;
    // SAFETY: see `BacktraceResolver::resolve`.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            buffer[len] = RawFrame {
                ip: frame.ip() as usize,
                symbol_address: frame.symbol_address() as usize,
            };
            len += 1;
            len < buffer.len()
        });
    }
    buffer[..len].to_vec()
}

/// Captures and symbolizes the current thread's stack according to `config`.
pub fn capture(config: &CrashtrackerConfiguration) -> UnwoundStack {
    collapse(
        &capture_raw(),
        config.skip_frames(),
        &BacktraceResolver,
        config,
    )
}

/// Turns raw addresses into emitted frames.
///
/// - the first `skip` raw frames are dropped before anything else;
/// - frames whose symbol starts with an excluded prefix (the crash machinery) vanish silently,
///   together with any unresolved run directly before them;
/// - each run of consecutive unresolvable frames becomes one `frames_omitted` range on the next
///   emitted frame, and a trailing run is dropped;
/// - at most `config.max_frames()` frames are emitted, the outermost ones are lost.
pub fn collapse(
    raw: &[RawFrame],
    skip: usize,
    resolver: &impl SymbolResolver,
    config: &CrashtrackerConfiguration,
) -> UnwoundStack {
    let mut stack = UnwoundStack::default();
    let mut omitted: Option<(usize, usize)> = None;

    for (index, frame) in raw.iter().enumerate().skip(skip) {
        if stack.frames.len() >= config.max_frames() {
            break;
        }
        let Some(symbol) = resolver.resolve(frame) else {
            omitted = Some(match omitted {
                Some((first, _)) => (first, index),
                None => (index, index),
            });
            continue;
        };
        if has_prefix(&symbol.name, config.excluded_prefixes()) {
            // Unresolved frames wedged between our own frames are ours too.
            omitted = None;
            continue;
        }
        let in_app = !has_prefix(&symbol.name, config.not_in_app_prefixes());
        if stack.crashed_function_name.is_none() {
            stack.crashed_function_name = Some(symbol.name.clone());
        }
        stack.frames.push(StackFrame {
            instruction_address: frame.ip,
            symbol_address: symbol.address.unwrap_or(frame.symbol_address),
            function_name: symbol.name,
            source_file: symbol.filename.unwrap_or_default(),
            line_number: symbol.lineno.unwrap_or(0),
            frames_omitted: omitted.take(),
            in_app,
        });
    }
    stack
}

fn has_prefix(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| name.starts_with(p.as_str()))
}
