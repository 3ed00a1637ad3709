//! Run Context
//!
//! Cooperative cancellation handle threaded from the scheduler into every
//! background pass, plus the trace identifier the upstream client forwards
//! as `X-Trace-ID`. Loops check the flag at iteration boundaries; an
//! in-flight HTTP request is allowed to finish under its own timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation flag and trace id shared across one run
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancelled: Arc<AtomicBool>,
    trace_id: Option<String>,
}

impl RunContext {
    /// Create a fresh, non-cancelled context
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a trace identifier for upstream request correlation
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Trace identifier, if one was attached
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Request cancellation; visible to every clone of this context
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
