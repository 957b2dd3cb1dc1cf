//! Frame-pointer walking backend for Unix targets.
//!
//! Walks the saved-frame-pointer chain directly: `[fp]` holds the previous
//! frame pointer, `[fp + 1]` the return address of the current frame. The
//! chain is validated as it goes (alignment, strict monotonic growth) and the
//! walk stops at the first implausible link rather than risking a wild read.

use crate::FrameBuffer;
use retrace_types::{CaptureBackend, TraceCapabilities};

pub(crate) fn capabilities_impl() -> TraceCapabilities {
    TraceCapabilities {
        backend: if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
            CaptureBackend::FramePointerWalk
        } else {
            CaptureBackend::Unavailable
        },
        fault_context: cfg!(all(
            target_os = "linux",
            any(target_arch = "x86_64", target_arch = "aarch64")
        )),
        symbolication: true,
        requires_frame_pointers: true,
    }
}

#[inline(never)]
pub(crate) fn capture_current_impl(skip: usize) -> FrameBuffer {
    let mut buf = FrameBuffer::empty();
    let Some(fp) = read_frame_pointer() else {
        return buf;
    };
    walk_frame_chain(fp, skip, &mut buf);
    buf
}

/// Follow the frame-pointer chain starting at `fp`, appending return
/// addresses until the chain ends, turns implausible, or the buffer fills.
fn walk_frame_chain(mut fp: usize, mut skip: usize, buf: &mut FrameBuffer) {
    while fp != 0 && !buf.is_full() {
        if fp % std::mem::align_of::<usize>() != 0 {
            break;
        }

        // SAFETY: fp is a non-null, aligned value taken from the live frame
        // chain (or a fault context describing one); the frame record it
        // points at is two words: previous fp, then the return address.
        let next_fp = unsafe { *(fp as *const usize) };
        let return_addr = unsafe { *((fp as *const usize).add(1)) };

        if return_addr != 0 {
            if skip > 0 {
                skip -= 1;
            } else if !buf.push(return_addr) {
                break;
            }
        }

        if next_fp == 0 || next_fp <= fp {
            break;
        }
        fp = next_fp;
    }
}

#[cfg(target_arch = "x86_64")]
fn read_frame_pointer() -> Option<usize> {
    let fp: usize;
    unsafe {
        core::arch::asm!(
            "mov {}, rbp",
            out(reg) fp,
            options(nomem, nostack, preserves_flags)
        );
    }
    Some(fp)
}

#[cfg(target_arch = "aarch64")]
fn read_frame_pointer() -> Option<usize> {
    let fp: usize;
    unsafe {
        core::arch::asm!(
            "mov {}, x29",
            out(reg) fp,
            options(nomem, nostack, preserves_flags)
        );
    }
    Some(fp)
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn read_frame_pointer() -> Option<usize> {
    None
}

/// A saved register snapshot from a signal handler, as handed to an
/// `SA_SIGINFO` handler's third argument.
#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub struct FaultContext {
    uc: *const libc::ucontext_t,
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
impl FaultContext {
    /// Wrap a `ucontext_t` describing the faulted execution point.
    ///
    /// # Safety
    ///
    /// `uc` must point to a `ucontext_t` that stays valid for the lifetime of
    /// the returned value, with the stack it describes still mapped — in
    /// practice, the pointer a signal handler receives, used from inside that
    /// handler.
    pub unsafe fn from_ucontext(uc: *const libc::ucontext_t) -> Self {
        Self { uc }
    }

    #[cfg(target_arch = "x86_64")]
    fn registers(&self) -> (usize, usize) {
        // SAFETY: guaranteed valid by the from_ucontext contract.
        let mcontext = unsafe { &(*self.uc).uc_mcontext };
        let pc = mcontext.gregs[libc::REG_RIP as usize] as usize;
        let fp = mcontext.gregs[libc::REG_RBP as usize] as usize;
        (pc, fp)
    }

    #[cfg(target_arch = "aarch64")]
    fn registers(&self) -> (usize, usize) {
        // SAFETY: guaranteed valid by the from_ucontext contract.
        let mcontext = unsafe { &(*self.uc).uc_mcontext };
        let pc = mcontext.pc as usize;
        let fp = mcontext.regs[29] as usize;
        (pc, fp)
    }
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub(crate) fn capture_from_context_impl(ctx: &FaultContext) -> FrameBuffer {
    let mut buf = FrameBuffer::empty();
    let (pc, fp) = ctx.registers();

    // The faulting instruction itself is the innermost frame; the chain walk
    // only sees the return addresses above it.
    if pc != 0 {
        buf.push(pc);
    }
    if fp != 0 {
        walk_frame_chain(fp, 0, &mut buf);
    }
    buf
}
