//! Stub backend for targets with no frame-walking facility.
//!
//! Every capture is empty and formatting reports the trace as unavailable;
//! callers are expected to treat zero frames as a valid outcome.

use crate::FrameBuffer;
use retrace_types::{CaptureBackend, TraceCapabilities};

pub(crate) fn capabilities_impl() -> TraceCapabilities {
    TraceCapabilities {
        backend: CaptureBackend::Unavailable,
        fault_context: false,
        symbolication: false,
        requires_frame_pointers: false,
    }
}

pub(crate) fn capture_current_impl(_skip: usize) -> FrameBuffer {
    FrameBuffer::empty()
}
