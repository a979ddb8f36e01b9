//! Traceback payload: one entry per unwound frame, outermost last.

use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TraceEntry {
    /// Name of the code object the failure passed through.
    pub func: Arc<str>,
    /// Byte offset of the faulting instruction.
    pub offset: u32,
}
