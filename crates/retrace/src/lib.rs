//! Stack-trace capture and symbolication for diagnostics.
//!
//! A [`StackTrace`] snapshots the call stack at construction time — either
//! from the current execution point or from a platform fault context inside
//! a signal handler / exception filter — and renders it later as a numbered,
//! human-readable report. Capture is allocation-free and lock-free (beyond a
//! one-time initialization guard) so it stays safe in constrained contexts;
//! all the expensive work (symbol lookup, demangling, formatting) happens at
//! render time.
//!
//! ```
//! use retrace::StackTrace;
//!
//! fn failing_path() {
//!     let trace = StackTrace::capture();
//!
//!     let mut report = String::new();
//!     trace.write_to(&mut report, 0).unwrap();
//!     eprint!("{report}");
//! }
//! # failing_path();
//! ```
//!
//! The rendered report is a header line, one `\t(<n>) <descriptor>` line per
//! frame, and a trailing blank line. Descriptors are always printable text:
//! fields that cannot be resolved show explicit `<unknown function>` /
//! `(unknown file/line)` markers, never mangled or empty strings.
//!
//! # Platform backends
//!
//! | Target | Capture | Fault context | Symbolication |
//! |--------|---------|---------------|---------------|
//! | Unix (x86_64 / aarch64) | frame-pointer walk | Linux `ucontext_t` | `dladdr` + `addr2line` |
//! | Windows (x86_64) | `RtlCaptureStackBackTrace` | `StackWalk64` | dbghelp |
//! | everything else | empty traces | — | `(not available)` |
//!
//! Frame-pointer walking sees past the first frame only when the binary
//! keeps frame pointers (`-C force-frame-pointers=yes`, or any unoptimized
//! build). An empty trace is a valid outcome, not an error: this facility
//! reports failures and must never become one itself.

use std::fmt;

use retrace_types::{UNKNOWN_FUNCTION, UNKNOWN_LOCATION};

pub use retrace_symbolize::{ensure_initialized, preformatted, resolve};
pub use retrace_types::{CaptureBackend, MAX_FRAMES, ResolvedFrame, TraceCapabilities};

#[cfg(any(
    all(
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ),
    all(windows, target_arch = "x86_64")
))]
pub use retrace_capture::FaultContext;

/// An immutable snapshot of a call stack, captured at construction.
///
/// Holds up to [`MAX_FRAMES`] raw addresses, innermost first, in a
/// fixed-capacity inline buffer — no heap, no OS handles, trivially
/// droppable. Rendering the same trace repeatedly (or from several threads)
/// is fine; the trace itself is never mutated after capture.
#[derive(Clone, Copy)]
pub struct StackTrace {
    frames: retrace_capture::FrameBuffer,
}

impl StackTrace {
    /// Snapshot the current call stack.
    ///
    /// The constructor's own frame is excluded, so the first recorded frame
    /// belongs to the calling function. On targets without a frame-walking
    /// facility this yields an empty trace.
    #[inline(never)]
    pub fn capture() -> Self {
        retrace_symbolize::ensure_initialized();
        Self {
            frames: retrace_capture::capture_current(1),
        }
    }

    /// Reconstruct the call stack of a faulted execution point.
    ///
    /// The first frame is the faulting program counter; the walk proceeds
    /// outward from the context's saved frame register. Intended to be
    /// called from inside the signal handler or exception filter that
    /// received the context.
    #[cfg(any(
        all(
            target_os = "linux",
            any(target_arch = "x86_64", target_arch = "aarch64")
        ),
        all(windows, target_arch = "x86_64")
    ))]
    pub fn from_fault_context(ctx: &FaultContext) -> Self {
        retrace_symbolize::ensure_initialized();
        Self {
            frames: retrace_capture::capture_from_context(ctx),
        }
    }

    /// The captured addresses, innermost first.
    pub fn frames(&self) -> &[usize] {
        self.frames.frames()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// What the compiled-in backends can do on this target.
    pub fn capabilities() -> TraceCapabilities {
        let mut caps = retrace_capture::capabilities();
        caps.symbolication = retrace_symbolize::symbolication_supported();
        caps
    }

    /// Render the trace to `out`, suppressing the first `ignore_frames`
    /// frames (typically frames internal to the code that captured).
    ///
    /// Printed frames are renumbered from 0. Asking to ignore more frames
    /// than were captured renders a frameless report, not an error. The only
    /// error this returns is the sink's own.
    pub fn write_to<W: fmt::Write + ?Sized>(
        &self,
        out: &mut W,
        ignore_frames: usize,
    ) -> fmt::Result {
        writeln!(out, "Stacktrace:")?;

        if !retrace_symbolize::symbolication_supported() {
            writeln!(out, "(not available)")?;
            return writeln!(out);
        }

        let mut printed = 0usize;
        for &addr in self.frames().iter().skip(ignore_frames) {
            let frame = retrace_symbolize::resolve(addr);
            write!(out, "\t({printed}) ")?;
            write_descriptor(out, &frame)?;
            writeln!(out)?;
            printed += 1;
        }
        writeln!(out)
    }
}

/// `file:line: function (+0xdisp)` when line tables resolved, falling back
/// to the containing module, then to explicit unknown markers. The raw
/// address is appended only when no function resolved, so the line still
/// identifies the frame.
fn write_descriptor<W: fmt::Write + ?Sized>(out: &mut W, frame: &ResolvedFrame) -> fmt::Result {
    match (&frame.file, frame.line) {
        (Some(file), Some(line)) => write!(out, "{file}:{line}")?,
        (Some(file), None) => write!(out, "{file}")?,
        (None, _) => match &frame.module {
            Some(module) => write!(out, "{module}")?,
            None => write!(out, "{UNKNOWN_LOCATION}")?,
        },
    }
    write!(out, ": ")?;

    match &frame.function {
        Some(function) => write!(out, "{function}")?,
        None => write!(out, "{UNKNOWN_FUNCTION}")?,
    }
    if let Some(displacement) = frame.displacement {
        write!(out, " (+{displacement:#x})")?;
    }
    if frame.function.is_none() {
        write!(out, " [{:#x}]", frame.addr)?;
    }
    Ok(())
}

/// Renders like [`StackTrace::write_to`] with `ignore_frames = 1`, hiding
/// the frame that invoked the formatting itself.
impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f, 1)
    }
}

impl fmt::Debug for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackTrace")
            .field("frames", &self.frames)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_for_a_fully_unresolved_frame_uses_markers() {
        let frame = ResolvedFrame::unresolved(0x1234);
        let mut out = String::new();
        write_descriptor(&mut out, &frame).unwrap();
        assert_eq!(out, "(unknown file/line): <unknown function> [0x1234]");
    }

    #[test]
    fn descriptor_with_location_and_symbol() {
        let frame = ResolvedFrame {
            addr: 0x1234,
            function: Some("alpha::beta".into()),
            displacement: Some(0x42),
            file: Some("src/beta.rs".into()),
            line: Some(17),
            module: Some("/usr/bin/alpha".into()),
            module_offset: Some(0x1000),
        };
        let mut out = String::new();
        write_descriptor(&mut out, &frame).unwrap();
        assert_eq!(out, "src/beta.rs:17: alpha::beta (+0x42)");
    }

    #[test]
    fn descriptor_falls_back_to_the_module() {
        let frame = ResolvedFrame {
            addr: 0x1234,
            function: Some("gamma".into()),
            displacement: None,
            file: None,
            line: None,
            module: Some("/usr/lib/libgamma.so".into()),
            module_offset: Some(0x34),
        };
        let mut out = String::new();
        write_descriptor(&mut out, &frame).unwrap();
        assert_eq!(out, "/usr/lib/libgamma.so: gamma");
    }
}
