//! Crate-wide error taxonomy for the worker pool scheduler.
//!
//! Every failure the scheduler and lifecycle controller can produce is one
//! of these variants. Only [`DispatcherError::NoWorkerAvailable`] and
//! [`DispatcherError::ExecutableNotFound`] are meant to reach a caller
//! outside the scheduler — everything else is absorbed and compensated by
//! the next scheduler iteration or reaper tick.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    /// The 256-port range starting at 6001 is fully occupied.
    #[error("no free port in range [6001, 6256]")]
    NoFreePort,

    /// The `compute.geometry` worker binary could not be found next to, or
    /// in a `compute.geometry` subdirectory of, the dispatcher executable.
    #[error("worker executable not found: {0}")]
    ExecutableNotFound(String),

    /// A spawned worker did not report ready within the 180s budget.
    #[error("worker on port {port} did not become ready within {timeout_secs}s")]
    SpawnTimeout { port: u16, timeout_secs: u64 },

    /// A worker stopped responding to probes (internal — triggers a reap).
    #[error("worker on port {0} is unreachable")]
    ProbeUnreachable(u16),

    /// `AcquireWorker` exceeded its 60s budget without finding or spawning
    /// a free worker.
    #[error("no worker became available within {budget_secs}s")]
    NoWorkerAvailable { budget_secs: u64 },

    /// Failed to start the worker subprocess at all (OS-level spawn error).
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

impl IntoResponse for DispatcherError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatcherError::NoWorkerAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DispatcherError::ExecutableNotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DispatcherError::NoFreePort
            | DispatcherError::SpawnTimeout { .. }
            | DispatcherError::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DispatcherError::ProbeUnreachable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DispatcherError>;
