//! Address-to-symbol resolution.
//!
//! The symbol engine is process-wide state: configured exactly once on first
//! use, never torn down, and serialized behind a single lock because the
//! native facilities underneath (dbghelp on Windows, per-module debug-data
//! loaders elsewhere) are not documented as reentrant.
//!
//! Resolution is strictly best-effort. Every lookup that fails leaves its
//! field as `None` and the formatter substitutes an explicit marker; nothing
//! in this crate surfaces an error to the caller, because the whole facility
//! exists to report *other* failures and must not become one itself.

use retrace_types::ResolvedFrame;
use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod demangle;
pub mod preformatted;

#[cfg(unix)]
#[path = "unix.rs"]
mod platform;
#[cfg(windows)]
#[path = "windows.rs"]
mod platform;
#[cfg(not(any(unix, windows)))]
#[path = "unsupported.rs"]
mod platform;

static ENGINE_INIT: Once = Once::new();
static ENGINE_INIT_RUNS: AtomicU64 = AtomicU64::new(0);

/// Run the one-time native symbol-engine setup.
///
/// Idempotent and thread-safe: concurrent first callers block until the
/// single initialization completes, later callers return immediately.
/// Initialization failures are swallowed — they degrade resolution quality
/// but never abort the caller.
pub fn ensure_initialized() {
    ENGINE_INIT.call_once(|| {
        ENGINE_INIT_RUNS.fetch_add(1, Ordering::Relaxed);
        platform::initialize_engine();
    });
}

/// Whether this target can symbolicate at all. When false, formatters are
/// expected to print a single "(not available)" line instead of frames.
pub fn symbolication_supported() -> bool {
    platform::SYMBOLICATION_SUPPORTED
}

/// Map one raw address to a best-effort descriptor.
///
/// The function-name and source-location lookups are independent; either may
/// fail without affecting the other, and a mangled name that cannot be
/// demangled is suppressed rather than passed through.
pub fn resolve(addr: usize) -> ResolvedFrame {
    ensure_initialized();
    platform::resolve_impl(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialization_runs_exactly_once_under_contention() {
        let threads: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(ensure_initialized))
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        ensure_initialized();
        assert_eq!(ENGINE_INIT_RUNS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn bogus_address_degrades_to_markers_not_garbage() {
        let frame = resolve(1);
        assert_eq!(frame.addr, 1);
        assert_eq!(frame.function, None);
        assert_eq!(frame.file, None);
        assert_eq!(frame.line, None);
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    mod linux {
        use super::super::*;

        #[inline(never)]
        fn probe_symbol() -> u32 {
            42
        }

        #[test]
        fn resolves_a_function_in_the_test_binary() {
            assert_eq!(probe_symbol(), 42);

            let frame = resolve(probe_symbol as usize);
            assert!(frame.module.is_some(), "dladdr should attribute the module");

            let name = frame.function.expect("test binaries carry symbols");
            assert!(name.contains("probe_symbol"), "unexpected name: {name}");
            assert!(!name.starts_with("_ZN"), "mangled name leaked: {name}");
        }

        #[test]
        fn repeated_resolution_is_stable() {
            let first = resolve(probe_symbol as usize);
            let second = resolve(probe_symbol as usize);
            assert_eq!(first, second);
        }
    }
}
