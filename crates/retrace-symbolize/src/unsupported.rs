//! Stub engine for targets with no symbolication facility.

use retrace_types::ResolvedFrame;

pub(crate) const SYMBOLICATION_SUPPORTED: bool = false;

pub(crate) fn initialize_engine() {}

pub(crate) fn resolve_impl(addr: usize) -> ResolvedFrame {
    ResolvedFrame::unresolved(addr)
}
