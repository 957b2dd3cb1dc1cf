//! Windows resolution through dbghelp.
//!
//! `SymFromAddrW` supplies the function name and displacement,
//! `SymGetLineFromAddrW64` the source location; the two lookups are
//! independent and either may fail on its own. dbghelp is single-threaded by
//! contract, so every call into it goes through the engine lock.

use parking_lot::Mutex;
use retrace_types::ResolvedFrame;
use std::ptr;
use tracing::debug;

use crate::demangle;

pub(crate) const SYMBOLICATION_SUPPORTED: bool = true;

static DBGHELP: Mutex<()> = Mutex::new(());

const MAX_SYM_NAME: usize = 2000;

pub(crate) fn initialize_engine() {
    let _guard = DBGHELP.lock();
    unsafe {
        ffi::SymSetOptions(ffi::SYMOPT_UNDNAME | ffi::SYMOPT_LOAD_LINES);
        if ffi::SymInitializeW(ffi::GetCurrentProcess(), ptr::null(), 1) == 0 {
            debug!("SymInitializeW failed; resolution degrades to unknown markers");
        }
    }
}

pub(crate) fn resolve_impl(addr: usize) -> ResolvedFrame {
    let mut frame = ResolvedFrame::unresolved(addr);
    let _guard = DBGHELP.lock();
    let process = unsafe { ffi::GetCurrentProcess() };

    #[repr(C)]
    struct SymbolStorage {
        info: ffi::SYMBOL_INFOW,
        name_tail: [u16; MAX_SYM_NAME],
    }
    let mut storage: SymbolStorage = unsafe { std::mem::zeroed() };
    storage.info.SizeOfStruct = size_of::<ffi::SYMBOL_INFOW>() as u32;
    storage.info.MaxNameLen = MAX_SYM_NAME as u32;

    let mut displacement = 0u64;
    let found = unsafe {
        ffi::SymFromAddrW(process, addr as u64, &mut displacement, &mut storage.info)
    };
    if found != 0 {
        let len = storage.info.NameLen.min(MAX_SYM_NAME as u32) as usize;
        let name_ptr = (&raw const storage.info.Name).cast::<u16>();
        let name = String::from_utf16_lossy(unsafe { std::slice::from_raw_parts(name_ptr, len) });
        frame.function = demangle::readable(&name);
        frame.displacement = Some(displacement);
    }

    let mut line: ffi::IMAGEHLP_LINEW64 = unsafe { std::mem::zeroed() };
    line.SizeOfStruct = size_of::<ffi::IMAGEHLP_LINEW64>() as u32;
    let mut line_displacement = 0u32;
    let found = unsafe {
        ffi::SymGetLineFromAddrW64(process, addr as u64, &mut line_displacement, &mut line)
    };
    if found != 0 && !line.FileName.is_null() {
        frame.file = Some(utf16z_to_string(line.FileName));
        frame.line = Some(line.LineNumber);
    }
    frame
}

fn utf16z_to_string(mut ptr: *const u16) -> String {
    let mut units = Vec::new();
    // SAFETY: ptr is a nul-terminated wide string owned by dbghelp, valid
    // until the next dbghelp call; we hold the engine lock for the duration.
    unsafe {
        while *ptr != 0 {
            units.push(*ptr);
            ptr = ptr.add(1);
        }
    }
    String::from_utf16_lossy(&units)
}

#[allow(non_snake_case, non_camel_case_types, clippy::upper_case_acronyms)]
mod ffi {
    use std::ffi::c_void;

    pub const SYMOPT_UNDNAME: u32 = 0x0000_0002;
    pub const SYMOPT_LOAD_LINES: u32 = 0x0000_0010;

    #[repr(C)]
    pub struct SYMBOL_INFOW {
        pub SizeOfStruct: u32,
        pub TypeIndex: u32,
        pub Reserved: [u64; 2],
        pub Index: u32,
        pub Size: u32,
        pub ModBase: u64,
        pub Flags: u32,
        pub Value: u64,
        pub Address: u64,
        pub Register: u32,
        pub Scope: u32,
        pub Tag: u32,
        pub NameLen: u32,
        pub MaxNameLen: u32,
        pub Name: [u16; 1],
    }

    #[repr(C)]
    pub struct IMAGEHLP_LINEW64 {
        pub SizeOfStruct: u32,
        pub Key: *mut c_void,
        pub LineNumber: u32,
        pub FileName: *mut u16,
        pub Address: u64,
    }

    #[link(name = "kernel32")]
    unsafe extern "system" {
        pub fn GetCurrentProcess() -> *mut c_void;
    }

    #[link(name = "dbghelp")]
    unsafe extern "system" {
        pub fn SymSetOptions(options: u32) -> u32;
        pub fn SymInitializeW(
            process: *mut c_void,
            user_search_path: *const u16,
            invade_process: i32,
        ) -> i32;
        pub fn SymFromAddrW(
            process: *mut c_void,
            address: u64,
            displacement: *mut u64,
            symbol: *mut SYMBOL_INFOW,
        ) -> i32;
        pub fn SymGetLineFromAddrW64(
            process: *mut c_void,
            address: u64,
            displacement: *mut u32,
            line: *mut IMAGEHLP_LINEW64,
        ) -> i32;
    }
}
