#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared foundations for the `workerpool` crates: the settlement-once
//! [`Task`] future, the [`WorkerPoolError`] kind, the error codec that
//! crosses the handler/worker boundary, and the small set of types
//! (`Substrate`, `HostEnv`) every other crate in the workspace builds on.

mod deferred;
mod error;
mod error_codec;
mod host_env;
mod substrate;

pub use deferred::{Task, TaskResolver};
pub use error::{TransportDiagnostics, WorkerPoolError};
pub use error_codec::ErrorDescriptor;
pub use host_env::HostEnv;
pub use substrate::Substrate;
