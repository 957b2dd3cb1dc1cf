//! dbghelp-based backend for Windows.
//!
//! Live captures use `RtlCaptureStackBackTrace`; fault-context captures seed
//! a `STACKFRAME64` from the exception's saved registers and iterate
//! `StackWalk64`. The symbol engine must have been initialized (see
//! `retrace-symbolize`) before `StackWalk64` is driven, because it consults
//! `SymFunctionTableAccess64` for unwind data; no lock is taken here since a
//! fault-context capture typically runs inside an exception filter.

use crate::FrameBuffer;
use retrace_types::{CaptureBackend, MAX_FRAMES, TraceCapabilities};
use std::ffi::c_void;
use std::ptr;

pub(crate) fn capabilities_impl() -> TraceCapabilities {
    TraceCapabilities {
        backend: CaptureBackend::DbgHelpStackWalk,
        fault_context: cfg!(target_arch = "x86_64"),
        symbolication: true,
        requires_frame_pointers: false,
    }
}

#[inline(never)]
pub(crate) fn capture_current_impl(skip: usize) -> FrameBuffer {
    let mut buf = FrameBuffer::empty();
    let mut raw = [ptr::null_mut::<c_void>(); MAX_FRAMES];

    // One extra skipped frame hides this function itself.
    let skip = skip.saturating_add(1).min(u32::MAX as usize) as u32;
    let captured = unsafe {
        ffi::RtlCaptureStackBackTrace(skip, MAX_FRAMES as u32, raw.as_mut_ptr(), ptr::null_mut())
    };
    for &addr in &raw[..captured as usize] {
        if !buf.push(addr as usize) {
            break;
        }
    }
    buf
}

/// The exception record and register snapshot handed to a structured
/// exception filter.
#[cfg(target_arch = "x86_64")]
pub struct FaultContext {
    exception: *mut ffi::EXCEPTION_POINTERS,
}

#[cfg(target_arch = "x86_64")]
impl FaultContext {
    /// Wrap the `EXCEPTION_POINTERS` passed to an exception filter.
    ///
    /// # Safety
    ///
    /// `exception` (and the `CONTEXT` it references) must stay valid for the
    /// lifetime of the returned value — in practice, the pointer an
    /// unhandled-exception filter receives, used from inside that filter.
    pub unsafe fn from_exception_pointers(exception: *mut ffi::EXCEPTION_POINTERS) -> Self {
        Self { exception }
    }
}

#[cfg(target_arch = "x86_64")]
pub(crate) fn capture_from_context_impl(ctx: &FaultContext) -> FrameBuffer {
    let mut buf = FrameBuffer::empty();

    // SAFETY: guaranteed valid by the from_exception_pointers contract.
    let context = unsafe { (*ctx.exception).ContextRecord };
    if context.is_null() {
        return buf;
    }

    let mut frame: ffi::STACKFRAME64 = unsafe { std::mem::zeroed() };
    unsafe {
        frame.AddrPC.Offset = (*context).Rip;
        frame.AddrFrame.Offset = (*context).Rbp;
        frame.AddrStack.Offset = (*context).Rsp;
    }
    frame.AddrPC.Mode = ffi::ADDR_MODE_FLAT;
    frame.AddrFrame.Mode = ffi::ADDR_MODE_FLAT;
    frame.AddrStack.Mode = ffi::ADDR_MODE_FLAT;

    loop {
        let ok = unsafe {
            ffi::StackWalk64(
                ffi::IMAGE_FILE_MACHINE_AMD64,
                ffi::GetCurrentProcess(),
                ffi::GetCurrentThread(),
                &mut frame,
                context.cast(),
                None,
                Some(ffi::SymFunctionTableAccess64),
                Some(ffi::SymGetModuleBase64),
                None,
            )
        };
        if ok == 0 {
            break;
        }
        let pc = frame.AddrPC.Offset as usize;
        if pc == 0 || !buf.push(pc) {
            break;
        }
    }
    buf
}

#[allow(non_snake_case, non_camel_case_types, clippy::upper_case_acronyms)]
pub mod ffi {
    use std::ffi::c_void;

    pub const IMAGE_FILE_MACHINE_AMD64: u32 = 0x8664;
    pub const ADDR_MODE_FLAT: u32 = 3;

    #[repr(C)]
    pub struct EXCEPTION_POINTERS {
        pub ExceptionRecord: *mut c_void,
        pub ContextRecord: *mut CONTEXT,
    }

    /// Leading (integer-register) portion of the x64 `CONTEXT` record.
    ///
    /// Only ever accessed through a pointer supplied by the OS; the floating
    /// point and vector state that follows `Rip` is not declared because it
    /// is never read and the struct is never constructed or copied here.
    #[repr(C, align(16))]
    pub struct CONTEXT {
        pub P1Home: u64,
        pub P2Home: u64,
        pub P3Home: u64,
        pub P4Home: u64,
        pub P5Home: u64,
        pub P6Home: u64,
        pub ContextFlags: u32,
        pub MxCsr: u32,
        pub SegCs: u16,
        pub SegDs: u16,
        pub SegEs: u16,
        pub SegFs: u16,
        pub SegGs: u16,
        pub SegSs: u16,
        pub EFlags: u32,
        pub Dr0: u64,
        pub Dr1: u64,
        pub Dr2: u64,
        pub Dr3: u64,
        pub Dr6: u64,
        pub Dr7: u64,
        pub Rax: u64,
        pub Rcx: u64,
        pub Rdx: u64,
        pub Rbx: u64,
        pub Rsp: u64,
        pub Rbp: u64,
        pub Rsi: u64,
        pub Rdi: u64,
        pub R8: u64,
        pub R9: u64,
        pub R10: u64,
        pub R11: u64,
        pub R12: u64,
        pub R13: u64,
        pub R14: u64,
        pub R15: u64,
        pub Rip: u64,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct ADDRESS64 {
        pub Offset: u64,
        pub Mode: u32,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct KDHELP64 {
        pub Thread: u64,
        pub ThCallbackStack: u32,
        pub ThCallbackBStore: u32,
        pub NextCallback: u32,
        pub FramePointer: u32,
        pub KiCallUserMode: u64,
        pub KeUserCallbackDispatcher: u64,
        pub SystemRangeStart: u64,
        pub KiUserExceptionDispatcher: u64,
        pub StackBase: u64,
        pub StackLimit: u64,
        pub BuildVersion: u32,
        pub RetpolineStubFunctionTableSize: u32,
        pub RetpolineStubFunctionTable: u64,
        pub RetpolineStubOffset: u32,
        pub RetpolineStubSize: u32,
        pub Reserved0: [u64; 2],
    }

    #[repr(C)]
    pub struct STACKFRAME64 {
        pub AddrPC: ADDRESS64,
        pub AddrReturn: ADDRESS64,
        pub AddrFrame: ADDRESS64,
        pub AddrStack: ADDRESS64,
        pub AddrBStore: ADDRESS64,
        pub FuncTableEntry: *mut c_void,
        pub Params: [u64; 4],
        pub Far: i32,
        pub Virtual: i32,
        pub Reserved: [u64; 3],
        pub KdHelp: KDHELP64,
    }

    pub type ReadProcessMemoryRoutine64 = unsafe extern "system" fn(
        process: *mut c_void,
        base_address: u64,
        buffer: *mut c_void,
        size: u32,
        bytes_read: *mut u32,
    ) -> i32;
    pub type FunctionTableAccessRoutine64 =
        unsafe extern "system" fn(process: *mut c_void, addr_base: u64) -> *mut c_void;
    pub type GetModuleBaseRoutine64 =
        unsafe extern "system" fn(process: *mut c_void, address: u64) -> u64;
    pub type TranslateAddressRoutine64 = unsafe extern "system" fn(
        process: *mut c_void,
        thread: *mut c_void,
        address: *mut ADDRESS64,
    ) -> u64;

    #[link(name = "kernel32")]
    unsafe extern "system" {
        pub fn GetCurrentProcess() -> *mut c_void;
        pub fn GetCurrentThread() -> *mut c_void;
        pub fn RtlCaptureStackBackTrace(
            frames_to_skip: u32,
            frames_to_capture: u32,
            back_trace: *mut *mut c_void,
            back_trace_hash: *mut u32,
        ) -> u16;
    }

    #[link(name = "dbghelp")]
    unsafe extern "system" {
        pub fn StackWalk64(
            machine_type: u32,
            process: *mut c_void,
            thread: *mut c_void,
            stack_frame: *mut STACKFRAME64,
            context_record: *mut c_void,
            read_memory: Option<ReadProcessMemoryRoutine64>,
            function_table_access: Option<FunctionTableAccessRoutine64>,
            get_module_base: Option<GetModuleBaseRoutine64>,
            translate_address: Option<TranslateAddressRoutine64>,
        ) -> i32;
        pub fn SymFunctionTableAccess64(process: *mut c_void, addr_base: u64) -> *mut c_void;
        pub fn SymGetModuleBase64(process: *mut c_void, address: u64) -> u64;
    }
}
