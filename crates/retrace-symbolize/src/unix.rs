//! Unix resolution: `dladdr` for module attribution, `addr2line` for
//! function names and line tables.
//!
//! Runtime addresses are rebased onto each module's linked image base (the
//! lowest file-backed segment address) before the debug-data lookup, which
//! is what makes PIE executables and shared libraries resolve correctly.
//! Per-module loaders are engine state: opened once, kept for the process
//! lifetime, all access serialized by the engine lock.

use addr2line::Loader;
use object::{Object, ObjectSegment};
use parking_lot::Mutex;
use retrace_types::ResolvedFrame;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::ffi::{CStr, c_void};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::demangle;

pub(crate) const SYMBOLICATION_SUPPORTED: bool = true;

static ENGINE: Mutex<BTreeMap<String, ModuleState>> = Mutex::new(BTreeMap::new());

enum ModuleState {
    Ready {
        loader: Box<Loader>,
        linked_image_base: u64,
    },
    Failed,
}

pub(crate) fn initialize_engine() {
    // Nothing to configure natively on Unix; per-module debug data is
    // opened lazily under the engine lock.
}

pub(crate) fn resolve_impl(addr: usize) -> ResolvedFrame {
    let mut frame = ResolvedFrame::unresolved(addr);
    let Some(info) = module_info_for(addr) else {
        return frame;
    };

    frame.module = Some(info.path.clone());
    if (addr as u64) >= info.runtime_base {
        frame.module_offset = Some(addr as u64 - info.runtime_base);
    }
    if let Some(symbol_addr) = info.symbol_addr
        && symbol_addr <= addr
    {
        frame.displacement = Some((addr - symbol_addr) as u64);
    }

    let mut modules = ENGINE.lock();
    if let ModuleState::Ready {
        loader,
        linked_image_base,
    } = module_state(&mut modules, &info.path)
        && let Some(module_offset) = frame.module_offset
        && let Some(probe) = linked_image_base.checked_add(module_offset)
    {
        lookup_in_debug_data(loader, probe, &mut frame);
    }
    drop(modules);

    // Last resort: the nearest dynamic-symbol name from dladdr itself.
    if frame.function.is_none()
        && let Some(symbol_name) = &info.symbol_name
    {
        frame.function = demangle::readable(symbol_name);
    }
    frame
}

fn lookup_in_debug_data(loader: &Loader, probe: u64, frame: &mut ResolvedFrame) {
    let mut located = match loader.find_frames(probe) {
        Ok(located) => located,
        Err(error) => {
            debug!(probe, %error, "find_frames failed");
            return;
        }
    };

    while let Ok(Some(unit)) = located.next() {
        if frame.function.is_none()
            && let Some(function) = unit.function
            && let Ok(raw) = function.raw_name()
        {
            frame.function = demangle::readable(raw.as_ref());
        }
        if frame.file.is_none()
            && let Some(location) = unit.location
            && let Some(file) = location.file
        {
            frame.file = Some(file.to_owned());
            frame.line = location.line;
        }
        if frame.function.is_some() && frame.file.is_some() {
            break;
        }
    }

    if frame.function.is_none()
        && let Some(symbol) = loader.find_symbol(probe)
    {
        frame.function = demangle::readable(symbol);
    }
    if frame.file.is_none()
        && let Ok(Some(location)) = loader.find_location(probe)
        && let Some(file) = location.file
    {
        frame.file = Some(file.to_owned());
        frame.line = location.line;
    }
}

fn module_state<'a>(
    modules: &'a mut BTreeMap<String, ModuleState>,
    path: &str,
) -> &'a ModuleState {
    match modules.entry(path.to_owned()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => entry.insert(match open_module(path) {
            Ok(state) => state,
            Err(reason) => {
                debug!(module = path, %reason, "failed to open debug object");
                ModuleState::Failed
            }
        }),
    }
}

fn open_module(path: &str) -> Result<ModuleState, String> {
    let loader = Loader::new(path).map_err(|error| format!("load debug data: {error}"))?;
    let linked_image_base = linked_image_base_for_file(Path::new(path))?;
    Ok(ModuleState::Ready {
        loader: Box::new(loader),
        linked_image_base,
    })
}

fn linked_image_base_for_file(path: &Path) -> Result<u64, String> {
    let data = fs::read(path).map_err(|error| format!("read module file: {error}"))?;
    let object = object::File::parse(&*data).map_err(|error| format!("parse object: {error}"))?;

    object
        .segments()
        .filter_map(|segment| {
            let (_, file_size) = segment.file_range();
            if file_size == 0 {
                return None;
            }
            Some(segment.address())
        })
        .min()
        .ok_or_else(|| String::from("no file-backed segments"))
}

struct ModuleInfo {
    path: String,
    runtime_base: u64,
    symbol_name: Option<String>,
    symbol_addr: Option<usize>,
}

fn module_info_for(addr: usize) -> Option<ModuleInfo> {
    let mut info = std::mem::MaybeUninit::<libc::Dl_info>::zeroed();
    let ok = unsafe { libc::dladdr(addr as *const c_void, info.as_mut_ptr()) };
    if ok == 0 {
        return None;
    }

    let info = unsafe { info.assume_init() };
    if info.dli_fbase.is_null() || info.dli_fname.is_null() {
        return None;
    }

    let path = unsafe { CStr::from_ptr(info.dli_fname) }
        .to_string_lossy()
        .into_owned();
    if path.is_empty() {
        return None;
    }

    let symbol_name = (!info.dli_sname.is_null()).then(|| {
        unsafe { CStr::from_ptr(info.dli_sname) }
            .to_string_lossy()
            .into_owned()
    });

    Some(ModuleInfo {
        path,
        runtime_base: info.dli_fbase as usize as u64,
        symbol_name,
        symbol_addr: (!info.dli_saddr.is_null()).then(|| info.dli_saddr as usize),
    })
}
