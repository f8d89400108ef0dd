use std::fmt;

use crate::error_codec::ErrorDescriptor;

/// Every failure kind the worker-pool engine can surface, per the wire
/// contract's error handling design.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerPoolError {
    /// The requested substrate (thread/process/web) is unavailable on this host.
    #[error("unsupported worker substrate: {0}")]
    UnsupportedSubstrate(String),

    /// Operation attempted against a terminated handler, or a task rejected
    /// during forced termination.
    #[error("worker has been terminated")]
    WorkerTerminated,

    /// Termination requested on a worker whose transport reports it is
    /// already killed.
    #[error("worker was already killed")]
    AlreadyKilled,

    /// The transport exposes neither `kill` nor `terminate`.
    #[error("worker transport cannot be terminated")]
    CannotTerminate,

    /// The worker exited without a prior graceful-termination request.
    #[error("worker exited unexpectedly (exit_code={exit_code:?}, signal={signal:?}, script={script}){diagnostics}")]
    UnexpectedExit {
        /// Process exit code, when available.
        exit_code: Option<i32>,
        /// Terminating signal, when available (unix only).
        signal: Option<i32>,
        /// The worker script that was running.
        script: String,
        /// Best-effort transport diagnostics (stdout/stderr tails, spawn args).
        diagnostics: TransportDiagnostics,
    },

    /// The transport signalled an asynchronous error outside of any
    /// in-flight task's response.
    #[error("worker transport error: {0}")]
    WorkerError(String),

    /// An error decoded from a response's `error` field, delivered to the
    /// task that requested it.
    #[error("task failed: {0}")]
    TaskError(ErrorDescriptor),

    /// The readiness timer expired before the worker signalled `"ready"`.
    #[error("worker did not become ready in time")]
    ReadyTimeout,

    /// The caller cancelled the task before it settled.
    #[error("task was cancelled")]
    Cancellation,

    /// The task did not settle before its deadline.
    #[error("task timed out")]
    Timeout,
}

/// Best-effort diagnostics surfaced alongside an [`WorkerPoolError::UnexpectedExit`].
#[derive(Debug, Clone, Default)]
pub struct TransportDiagnostics {
    /// The program and arguments used to spawn the worker, when known.
    pub spawn_command: Option<String>,
    /// A tail of the worker's stderr output, when captured.
    pub stderr_tail: Option<String>,
}

impl fmt::Display for TransportDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.spawn_command.is_none() && self.stderr_tail.is_none() {
            return Ok(());
        }
        write!(f, " [")?;
        if let Some(cmd) = &self.spawn_command {
            write!(f, "spawn_command={cmd:?}")?;
        }
        if let Some(tail) = &self.stderr_tail {
            if self.spawn_command.is_some() {
                write!(f, ", ")?;
            }
            write!(f, "stderr_tail={tail:?}")?;
        }
        write!(f, "]")
    }
}
