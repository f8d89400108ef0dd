#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! The wire protocol, the `WorkerHandler` state machine, and the
//! `WorkerPool` scheduler — the two tightly coupled state machines
//! described in `SPEC_FULL.md` §4.3 and §4.4.

/// Public API: the types and handles a host crate constructs and calls.
pub mod api;

mod inflight;
mod pool;
/// The wire protocol spoken between a `WorkerHandler` and its worker, and
/// the codec that turns one raw transport message into something the
/// handler state machine can act on. Public so `workerpool-default-worker`
/// can speak the same protocol without duplicating it.
pub mod protocol;
mod worker_handler;

pub use api::{
    DEFAULT_CONCURRENCY, EventSink, PoolEvent, PoolOptions, PoolSnapshot, TerminateOutcome,
    WorkerHandler, WorkerId, WorkerOptions, WorkerPool, WorkerScript, WorkerStats, WorkerSummary,
    start_pool,
};
