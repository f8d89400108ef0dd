use serde_json::Value;
use tokio::sync::mpsc;

pub use workerpool_core::WorkerPoolError;

/// One event a transport can publish, matching §4.1's `on("message" |
/// "error" | "exit", cb)` contract.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded message from the worker (a response, an event payload, or
    /// the bare `"ready"` signal — `workerpool-engine` tells these apart).
    Message(Value),
    /// An asynchronous transport-level error.
    Error(String),
    /// The worker substrate exited.
    Exit {
        /// Process exit code, when available.
        exit_code: Option<i32>,
        /// Terminating signal (unix only), when available.
        signal: Option<i32>,
    },
}

/// The receiving half of a transport's event stream. Exclusively owned by
/// the `WorkerHandler` that spawned the transport.
pub struct TransportEvents {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event. Returns `None` once the transport has
    /// shut down and will never emit again.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Best-effort diagnostics surfaced in `UnexpectedExit` errors, mirroring
/// the original's tolerant reads of `spawnargs`/`stdout`/`stderr`.
#[derive(Debug, Clone, Default)]
pub struct TransportDiagnostics {
    /// The program and arguments used to spawn the worker, when known.
    pub spawn_command: Option<String>,
    /// A tail of the worker's stderr output, when captured.
    pub stderr_tail: Option<String>,
}
