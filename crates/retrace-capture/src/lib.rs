//! Raw stack capture.
//!
//! Fills a fixed-capacity buffer of return addresses either from the current
//! execution point or from a platform fault context. The capture path
//! performs no heap allocation, takes no locks, and emits no logging, so it
//! stays usable inside signal handlers and exception filters. Anything that
//! needs allocation (symbolication, formatting) lives downstream.
//!
//! On Windows, `capture_from_context` drives dbghelp's stack walker, which
//! requires the symbol engine to have been initialized first; the `retrace`
//! facade takes care of that ordering.

use retrace_types::{MAX_FRAMES, TraceCapabilities};
use std::fmt;

#[cfg(unix)]
#[path = "unix.rs"]
mod platform;
#[cfg(windows)]
#[path = "windows.rs"]
mod platform;
#[cfg(not(any(unix, windows)))]
#[path = "unsupported.rs"]
mod platform;

#[cfg(any(
    all(
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ),
    all(windows, target_arch = "x86_64")
))]
pub use platform::FaultContext;

#[cfg(all(windows, target_arch = "x86_64"))]
pub use platform::ffi::EXCEPTION_POINTERS;

/// One capture's worth of raw instruction addresses, innermost first.
///
/// Filled exactly once by a capture call and immutable afterwards. Entries
/// past `len()` are never exposed.
#[derive(Clone, Copy)]
pub struct FrameBuffer {
    frames: [usize; MAX_FRAMES],
    count: usize,
}

impl FrameBuffer {
    pub(crate) const fn empty() -> Self {
        Self {
            frames: [0; MAX_FRAMES],
            count: 0,
        }
    }

    pub(crate) fn push(&mut self, addr: usize) -> bool {
        if self.count == MAX_FRAMES {
            return false;
        }
        self.frames[self.count] = addr;
        self.count += 1;
        true
    }

    pub(crate) fn is_full(&self) -> bool {
        self.count == MAX_FRAMES
    }

    /// The captured addresses, bounds-checked: exactly the valid prefix.
    pub fn frames(&self) -> &[usize] {
        &self.frames[..self.count]
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for addr in self.frames() {
            list.entry(&format_args!("{addr:#x}"));
        }
        list.finish()
    }
}

/// What the compiled-in backend can do on this target.
pub fn capabilities() -> TraceCapabilities {
    platform::capabilities_impl()
}

/// Capture the current call stack, innermost first.
///
/// With `skip = 0` the first recorded frame is the immediate caller. Each
/// additional `skip` drops one more leading frame, so wrappers can hide
/// themselves. On targets without a frame-walking facility this returns an
/// empty buffer rather than failing.
#[inline(always)]
pub fn capture_current(skip: usize) -> FrameBuffer {
    platform::capture_current_impl(skip)
}

/// Reconstruct the call stack of a faulted execution point.
///
/// The first recorded frame is the faulting program counter itself; the walk
/// then proceeds outward from the context's frame register. Zero frames is a
/// valid outcome for a context too damaged to walk.
#[cfg(any(
    all(
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ),
    all(windows, target_arch = "x86_64")
))]
pub fn capture_from_context(ctx: &FaultContext) -> FrameBuffer {
    platform::capture_from_context_impl(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_types::CaptureBackend;

    #[test]
    fn buffer_rejects_overflow() {
        let mut buf = FrameBuffer::empty();
        for i in 0..MAX_FRAMES {
            assert!(buf.push(0x1000 + i));
        }
        assert!(buf.is_full());
        assert!(!buf.push(0xffff));
        assert_eq!(buf.len(), MAX_FRAMES);
        assert_eq!(buf.frames().last(), Some(&(0x1000 + MAX_FRAMES - 1)));
    }

    #[test]
    fn empty_buffer_exposes_no_frames() {
        let buf = FrameBuffer::empty();
        assert!(buf.is_empty());
        assert_eq!(buf.frames(), &[] as &[usize]);
    }

    #[inline(never)]
    fn capture_here() -> FrameBuffer {
        capture_current(0)
    }

    #[test]
    fn capture_respects_capacity_bounds() {
        let buf = capture_here();
        assert!(buf.len() <= MAX_FRAMES);
        for &addr in buf.frames() {
            assert_ne!(addr, 0);
        }
    }

    #[test]
    fn back_to_back_captures_have_similar_depth() {
        let first = capture_here();
        let second = capture_here();
        let diff = first.len().abs_diff(second.len());
        assert!(diff <= 2, "depths diverged: {} vs {}", first.len(), second.len());
    }

    #[test]
    fn skipping_drops_leading_frames() {
        #[inline(never)]
        fn nested() -> (FrameBuffer, FrameBuffer) {
            (capture_current(0), capture_current(2))
        }
        let (all, skipped) = nested();
        if all.is_empty() {
            // No frame-walking facility in this configuration; nothing to compare.
            return;
        }
        assert!(skipped.len() <= all.len());
    }

    #[test]
    fn unavailable_backend_means_empty_captures() {
        if capabilities().backend == CaptureBackend::Unavailable {
            assert!(capture_here().is_empty());
        }
    }

    #[cfg(all(
        target_os = "linux",
        target_env = "gnu",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn fault_context_capture_walks_a_live_context() {
        let mut uc: libc::ucontext_t = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::getcontext(&mut uc) };
        assert_eq!(rc, 0);

        // The saved program counter points right after the getcontext call,
        // i.e. into this test function, and the frame is still live.
        let ctx = unsafe { FaultContext::from_ucontext(&raw const uc) };
        let buf = capture_from_context(&ctx);
        assert!(!buf.is_empty());
        assert!(buf.len() <= MAX_FRAMES);
        assert_ne!(buf.frames()[0], 0);
    }
}
