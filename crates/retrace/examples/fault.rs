//! Print a fault-context stacktrace from inside a SIGSEGV handler, the way a
//! crash reporter would, then exit.

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
fn main() {
    use retrace::{FaultContext, StackTrace};

    extern "C" fn on_segv(_sig: i32, _info: *mut libc::siginfo_t, uc: *mut libc::c_void) {
        let ctx = unsafe { FaultContext::from_ucontext(uc as *const libc::ucontext_t) };
        let trace = StackTrace::from_fault_context(&ctx);

        let mut report = String::new();
        let _ = trace.write_to(&mut report, 0);
        eprint!("{report}");

        unsafe { libc::_exit(1) };
    }

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_segv as usize;
        action.sa_flags = libc::SA_SIGINFO;
        libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut());

        libc::raise(libc::SIGSEGV);
    }
    unreachable!("the handler exits the process");
}

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
fn main() {
    eprintln!("fault-context capture is not available on this target");
}
