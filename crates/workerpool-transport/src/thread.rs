use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use workerpool_core::WorkerPoolError;

use crate::events::{TransportDiagnostics, TransportEvent, TransportEvents};

/// A thread-substrate worker body. Receives requests via [`ThreadWorkerIo`]
/// and must push every response/event it produces back through it; the
/// closure returns when the worker should exit (normally when `recv`
/// yields `None`, meaning the handler side dropped or killed it).
pub type ThreadScript = Arc<dyn Fn(ThreadWorkerIo) + Send + Sync>;

/// The worker-side handle passed into a [`ThreadScript`].
pub struct ThreadWorkerIo {
    inbox: std_mpsc::Receiver<Value>,
    outbox: mpsc::UnboundedSender<TransportEvent>,
}

impl ThreadWorkerIo {
    /// Block until the handler sends a request, or return `None` once the
    /// channel is closed (handler dropped or killed the transport).
    #[must_use]
    pub fn recv(&self) -> Option<Value> {
        self.inbox.recv().ok()
    }

    /// Publish one message (a response, an event payload, or `"ready"`) to
    /// the handler.
    pub fn send(&self, msg: Value) {
        let _ = self.outbox.send(TransportEvent::Message(msg));
    }
}

pub(crate) struct ThreadTransport {
    inbox_tx: Mutex<Option<std_mpsc::Sender<Value>>>,
}

impl ThreadTransport {
    pub(crate) fn spawn(script: ThreadScript) -> (Self, TransportEvents) {
        let (inbox_tx, inbox_rx) = std_mpsc::channel::<Value>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker_event_tx = event_tx.clone();
        let join = std::thread::Builder::new()
            .name("workerpool-thread-worker".to_string())
            .spawn(move || {
                let io = ThreadWorkerIo {
                    inbox: inbox_rx,
                    outbox: worker_event_tx,
                };
                (script)(io);
            })
            .expect("spawning an OS thread should not fail under normal conditions");

        tracing::debug!("spawned thread-substrate worker");

        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || join.join()).await;
            let exit_code = match result {
                Ok(Ok(())) => Some(0),
                _ => None,
            };
            tracing::debug!(?exit_code, "thread-substrate worker exited");
            let _ = event_tx.send(TransportEvent::Exit {
                exit_code,
                signal: None,
            });
        });

        (
            Self {
                inbox_tx: Mutex::new(Some(inbox_tx)),
            },
            TransportEvents::new(event_rx),
        )
    }

    pub(crate) fn send(&self, msg: Value) -> Result<(), WorkerPoolError> {
        let guard = self.inbox_tx.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(msg).map_err(|_| WorkerPoolError::WorkerTerminated),
            None => Err(WorkerPoolError::WorkerTerminated),
        }
    }

    pub(crate) fn kill(&self) {
        // Dropping the sender closes the worker's inbox; a well-behaved
        // `ThreadScript` observes `recv() == None` and returns, which the
        // join watcher above turns into an `Exit` event. There is no
        // forcible-kill primitive for a plain OS thread, matching the
        // "thread ≈ immediate" cancellation-cost note in `SPEC_FULL.md` §4.1.
        tracing::debug!("killing thread-substrate worker");
        let mut guard = self.inbox_tx.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub(crate) fn diagnostics(&self) -> TransportDiagnostics {
        TransportDiagnostics {
            spawn_command: Some("<in-process thread worker>".to_string()),
            stderr_tail: None,
        }
    }
}
