//! Shared vocabulary for stack-trace capture and symbolication.
//!
//! This crate is dependency-free on purpose: both the capture backend (which
//! must stay usable inside signal and exception handlers) and the
//! symbolication engine speak these types without pulling each other in.

use std::fmt;

/// Maximum number of frames recorded by a single capture.
///
/// Captures are fixed-capacity and stack-allocated; a stack deeper than this
/// is truncated, never reallocated.
pub const MAX_FRAMES: usize = 64;

/// Marker printed in place of a function name that could not be resolved
/// (or whose mangled name failed to demangle).
pub const UNKNOWN_FUNCTION: &str = "<unknown function>";

/// Marker printed in place of a source location that could not be resolved.
pub const UNKNOWN_LOCATION: &str = "(unknown file/line)";

/// The capture strategy compiled in for the current target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    /// Unix: walk the frame-pointer chain from the current execution point.
    FramePointerWalk,
    /// Windows: `RtlCaptureStackBackTrace` / `StackWalk64` via dbghelp.
    DbgHelpStackWalk,
    /// No frame-walking facility; every capture is empty.
    Unavailable,
}

impl CaptureBackend {
    pub fn name(self) -> &'static str {
        match self {
            Self::FramePointerWalk => "frame-pointer-walk",
            Self::DbgHelpStackWalk => "dbghelp-stackwalk",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for CaptureBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the current build of the facility can actually do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceCapabilities {
    pub backend: CaptureBackend,
    /// Whether a trace can be reconstructed from a platform fault context.
    pub fault_context: bool,
    /// Whether addresses can be mapped to names/locations at all.
    pub symbolication: bool,
    /// Frame-pointer walking needs `-C force-frame-pointers=yes` (or an
    /// unoptimized build) to see past the first frame.
    pub requires_frame_pointers: bool,
}

/// Best-effort description of one captured address.
///
/// Produced on demand while formatting and never stored. Every field other
/// than the address itself may legitimately be absent; absent fields are
/// rendered as explicit markers, never as empty strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFrame {
    pub addr: usize,
    /// Demangled function name. `None` covers both "no symbol found" and
    /// "symbol found but demangling failed" — mangled text is never exposed.
    pub function: Option<String>,
    /// Byte offset of `addr` from the start of `function`.
    pub displacement: Option<u64>,
    pub file: Option<String>,
    pub line: Option<u32>,
    /// Path of the object (executable or shared library) containing `addr`.
    pub module: Option<String>,
    /// `addr` relative to that object's runtime load base.
    pub module_offset: Option<u64>,
}

impl ResolvedFrame {
    pub fn unresolved(addr: usize) -> Self {
        Self {
            addr,
            function: None,
            displacement: None,
            file: None,
            line: None,
            module: None,
            module_offset: None,
        }
    }

    pub fn has_symbol(&self) -> bool {
        self.function.is_some()
    }

    pub fn has_location(&self) -> bool {
        self.file.is_some()
    }
}
