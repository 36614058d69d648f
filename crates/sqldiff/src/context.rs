//! Per-run context: usage telemetry and the interactive query gate.
//!
//! Both are passed explicitly into the orchestrators instead of living in
//! globals, so tests can run with the no-op implementations.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Usage telemetry sink.
pub trait Tracker: Send + Sync {
    /// Record a named event with a JSON payload. Must never fail the run.
    fn event(&self, name: &str, payload: serde_json::Value);
}

/// Telemetry sink that discards everything.
#[derive(Debug, Default)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn event(&self, _name: &str, _payload: serde_json::Value) {}
}

/// Telemetry sink that logs events at debug level.
#[derive(Debug, Default)]
pub struct LogTracker;

impl Tracker for LogTracker {
    fn event(&self, name: &str, payload: serde_json::Value) {
        tracing::debug!(event = name, %payload, "telemetry");
    }
}

/// Approval hook consulted before each query in interactive mode.
#[async_trait]
pub trait QueryGate: Send + Sync {
    /// Shown the query and its plan; returns false to abort the run.
    async fn approve(&self, sql: &str, plan: &str) -> Result<bool>;
}

/// Shared state threaded through a diff run.
pub struct RunContext {
    pub tracker: Arc<dyn Tracker>,
    /// Present only in interactive mode.
    pub gate: Option<Arc<dyn QueryGate>>,
}

impl RunContext {
    pub fn new(tracker: Arc<dyn Tracker>) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            gate: None,
        })
    }

    /// Context with no telemetry and no gate, for tests and library callers.
    pub fn noop() -> Arc<Self> {
        Self::new(Arc::new(NoopTracker))
    }

    pub fn with_gate(self: Arc<Self>, gate: Arc<dyn QueryGate>) -> Arc<Self> {
        Arc::new(Self {
            tracker: Arc::clone(&self.tracker),
            gate: Some(gate),
        })
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("interactive", &self.gate.is_some())
            .finish()
    }
}
