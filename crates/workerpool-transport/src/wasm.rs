//! `WebWorkerTransport`: the `wasm32-unknown-unknown` substrate gated
//! behind the `wasm-worker` feature (see `SPEC_FULL.md` §9's Open
//! Question resolution). Messages cross the boundary as JSON strings via
//! `postMessage`/`onmessage`, mirroring the newline-JSON framing
//! `ProcessTransport` uses on the process substrate, just without the
//! newline (each `postMessage` call is already one discrete message).
//!
//! Grounded in the `wasm_thread`/`wasm-futures-executor` worker-spawning
//! pattern from the retrieved corpus, simplified here to plain
//! string message-passing (no shared wasm memory/module handoff is
//! needed: a web worker substrate only ever exchanges protocol JSON, it
//! never runs Rust code inside the worker).

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, Worker, WorkerOptions, WorkerType};

use crate::events::{TransportDiagnostics, TransportEvent, TransportEvents};

/// Everything needed to spawn a web-worker-substrate worker.
#[derive(Debug, Clone)]
pub struct WebWorkerScript {
    /// URL (or blob URL) the browser loads as the worker's script.
    pub script_url: String,
}

/// Failure to spawn a web-worker-substrate worker.
#[derive(Debug, thiserror::Error)]
#[error("failed to construct web worker for {script_url:?}: {message}")]
pub struct WebWorkerSpawnError {
    script_url: String,
    message: String,
}

pub(crate) struct WebWorkerTransport {
    worker: Worker,
    script_url: String,
    // Keeps the `onmessage`/`onerror` closures alive for the worker's
    // lifetime; dropping them would detach the listeners.
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_error: Closure<dyn FnMut(web_sys::ErrorEvent)>,
}

impl WebWorkerTransport {
    pub(crate) fn spawn(script: WebWorkerScript) -> Result<(Self, TransportEvents), WebWorkerSpawnError> {
        let mut options = WorkerOptions::new();
        options.type_(WorkerType::Classic);

        let worker = Worker::new_with_options(&script.script_url, &options).map_err(|err| {
            WebWorkerSpawnError {
                script_url: script.script_url.clone(),
                message: format!("{err:?}"),
            }
        })?;

        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();

        let message_tx = event_tx.clone();
        let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Some(text) = event.data().as_string() {
                match serde_json::from_str::<serde_json::Value>(&text) {
                    Ok(value) => {
                        let _ = message_tx.send(TransportEvent::Message(value));
                    }
                    Err(err) => {
                        let _ = message_tx.send(TransportEvent::Error(format!(
                            "malformed message from web worker: {err}"
                        )));
                    }
                }
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        worker.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        let error_tx = event_tx;
        let on_error = Closure::wrap(Box::new(move |event: web_sys::ErrorEvent| {
            let _ = error_tx.send(TransportEvent::Error(event.message()));
        }) as Box<dyn FnMut(web_sys::ErrorEvent)>);
        worker.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        Ok((
            Self {
                worker,
                script_url: script.script_url,
                _on_message: on_message,
                _on_error: on_error,
            },
            TransportEvents::new(event_rx),
        ))
    }

    pub(crate) fn send(&self, msg: serde_json::Value) -> Result<(), workerpool_core::WorkerPoolError> {
        let text = serde_json::to_string(&msg)
            .map_err(|err| workerpool_core::WorkerPoolError::WorkerError(err.to_string()))?;
        self.worker
            .post_message(&JsValue::from_str(&text))
            .map_err(|err| workerpool_core::WorkerPoolError::WorkerError(format!("{err:?}")))
    }

    pub(crate) fn kill(&self) {
        // `Worker::terminate` is the only shutdown primitive a browser
        // worker exposes; there is no graceful handshake to prefer it
        // over, unlike the process substrate.
        self.worker.terminate();
    }

    pub(crate) fn diagnostics(&self) -> TransportDiagnostics {
        TransportDiagnostics {
            spawn_command: Some(self.script_url.clone()),
            stderr_tail: None,
        }
    }
}
