#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Concrete transport adapters over the worker-pool's two native
//! substrates (process, thread), normalised to the uniform capability set
//! `workerpool-engine` drives every `WorkerHandler` through.
//!
//! Per the distilled spec's design note, this is a capability record with
//! concrete constructors, not a trait hierarchy: [`Transport`] is a closed
//! enum over [`process::ProcessTransport`] and [`thread::ThreadTransport`],
//! so adding a substrate means adding a variant, never subclassing.

mod events;
mod process;
mod thread;
#[cfg(all(target_arch = "wasm32", feature = "wasm-worker"))]
mod wasm;

pub use events::{TransportDiagnostics, TransportEvent, TransportEvents};
pub use process::{ProcessScript, ProcessSpawnError};
pub use thread::{ThreadScript, ThreadWorkerIo};
#[cfg(all(target_arch = "wasm32", feature = "wasm-worker"))]
pub use wasm::{WebWorkerScript, WebWorkerSpawnError};

use serde_json::Value;
use workerpool_core::WorkerPoolError;

enum TransportKind {
    Process(process::ProcessTransport),
    Thread(thread::ThreadTransport),
    #[cfg(all(target_arch = "wasm32", feature = "wasm-worker"))]
    Wasm(wasm::WebWorkerTransport),
}

/// A uniform handle to one running worker, regardless of which substrate
/// it runs on. Exclusively owned by the `WorkerHandler` that created it.
pub struct Transport {
    kind: TransportKind,
}

impl Transport {
    /// Spawn an OS child process running `script`, returning the transport
    /// and the event stream it will publish to.
    pub async fn spawn_process(script: ProcessScript) -> Result<(Self, TransportEvents), ProcessSpawnError> {
        let (kind, events) = process::ProcessTransport::spawn(script).await?;
        Ok((
            Self {
                kind: TransportKind::Process(kind),
            },
            events,
        ))
    }

    /// Spawn an OS thread running `script`, returning the transport and
    /// the event stream it will publish to.
    #[must_use]
    pub fn spawn_thread(script: ThreadScript) -> (Self, TransportEvents) {
        let (kind, events) = thread::ThreadTransport::spawn(script);
        (
            Self {
                kind: TransportKind::Thread(kind),
            },
            events,
        )
    }

    /// Spawn a browser worker loading `script`, returning the transport
    /// and the event stream it will publish to. Only available on
    /// `wasm32-unknown-unknown` with the `wasm-worker` feature enabled.
    #[cfg(all(target_arch = "wasm32", feature = "wasm-worker"))]
    pub fn spawn_web(script: WebWorkerScript) -> Result<(Self, TransportEvents), WebWorkerSpawnError> {
        let (kind, events) = wasm::WebWorkerTransport::spawn(script)?;
        Ok((
            Self {
                kind: TransportKind::Wasm(kind),
            },
            events,
        ))
    }

    /// Deliver one structured message to the worker.
    pub fn send(&self, msg: Value) -> Result<(), WorkerPoolError> {
        match &self.kind {
            TransportKind::Process(p) => p.send(msg),
            TransportKind::Thread(t) => t.send(msg),
            #[cfg(all(target_arch = "wasm32", feature = "wasm-worker"))]
            TransportKind::Wasm(w) => w.send(msg),
        }
    }

    /// Request immediate shutdown. Idempotent.
    pub fn kill(&self) {
        match &self.kind {
            TransportKind::Process(p) => p.kill(),
            TransportKind::Thread(t) => t.kill(),
            #[cfg(all(target_arch = "wasm32", feature = "wasm-worker"))]
            TransportKind::Wasm(w) => w.kill(),
        }
    }

    /// Whether this substrate exposes a graceful `terminate` distinct from
    /// `kill` (only a browser-worker substrate would; process and thread
    /// both fall back to `kill` per `SPEC_FULL.md` §4.3).
    #[must_use]
    pub fn has_graceful_terminate(&self) -> bool {
        false
    }

    /// Best-effort diagnostics for error messages (spawn command, captured
    /// stderr tail).
    #[must_use]
    pub fn diagnostics(&self) -> TransportDiagnostics {
        match &self.kind {
            TransportKind::Process(p) => p.diagnostics(),
            TransportKind::Thread(t) => t.diagnostics(),
            #[cfg(all(target_arch = "wasm32", feature = "wasm-worker"))]
            TransportKind::Wasm(w) => w.diagnostics(),
        }
    }
}
