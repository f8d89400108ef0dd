//! The public surface of `workerpool-engine`: the types a host crate
//! (the default worker's launcher, the demo CLI, or any other embedder)
//! constructs and calls directly. The state machines that back these
//! handles live in [`crate::worker_handler`] and [`crate::pool`].

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use workerpool_core::{HostEnv, Substrate, Task, TaskResolver, WorkerPoolError};
use workerpool_transport::ThreadScript;

use crate::worker_handler::{HandlerCommand, HandlerShared};

/// A streaming-event callback: invoked once per non-terminal event a
/// worker publishes for a task, in order, before the task's terminal
/// result or error arrives. `FnMut` rather than `Fn` because callers
/// commonly accumulate state (progress counters, buffered output) across
/// calls; `Send` because it runs inside the handler's actor task.
pub type EventSink = Box<dyn FnMut(Value) + Send>;

/// The default worker count for [`PoolOptions`] when the caller does not
/// override it: all workers share one set of [`WorkerOptions`].
pub const DEFAULT_CONCURRENCY: usize = 1;

/// How a worker's body is obtained.
#[derive(Clone)]
pub enum WorkerScript {
    /// Spawn the bundled default worker binary.
    Default,
    /// Spawn an arbitrary external program as a process-substrate worker.
    Process {
        /// The worker executable.
        program: PathBuf,
        /// Extra arguments, appended after any `WorkerOptions::spawn_args`.
        args: Vec<String>,
        /// Extra environment variables, layered over `WorkerOptions::spawn_env`.
        env: Vec<(String, String)>,
    },
    /// Run an in-process closure as a thread-substrate worker.
    Thread(ThreadScript),
}

impl fmt::Debug for WorkerScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerScript::Default => f.write_str("WorkerScript::Default"),
            WorkerScript::Process { program, args, .. } => f
                .debug_struct("WorkerScript::Process")
                .field("program", program)
                .field("args", args)
                .finish_non_exhaustive(),
            WorkerScript::Thread(_) => f.write_str("WorkerScript::Thread(<closure>)"),
        }
    }
}

/// Per-worker configuration, mirroring the original's `WorkerOptions`.
#[derive(Clone)]
pub struct WorkerOptions {
    /// Which substrate to run this worker on.
    pub substrate: Substrate,
    /// Extra arguments passed to a process-substrate worker.
    pub spawn_args: Vec<String>,
    /// Extra environment variables passed to a process-substrate worker.
    pub spawn_env: Vec<(String, String)>,
    /// Debug port to forward as `WORKERPOOL_INSPECT`, overriding the
    /// injected [`HostEnv`] when set.
    pub debug_port: Option<u16>,
    /// Number of concurrent in-flight tasks this worker accepts.
    pub concurrency: usize,
    /// Terminate the worker after it has served this many requests.
    /// Zero means unbounded.
    pub max_exec: u64,
    /// Flip the worker back to not-ready after each completed request,
    /// requiring a fresh readiness handshake before the next dispatch.
    pub mark_not_ready_after_exec: bool,
    /// How long to wait for readiness after each
    /// `mark_not_ready_after_exec` cycle.
    pub ready_timeout: Option<Duration>,
    /// How long to wait for the initial readiness handshake. Defaults to
    /// `ready_timeout` when unset.
    pub init_ready_timeout: Option<Duration>,
    /// Treat the worker as ready immediately, skipping the handshake.
    /// Meaningless (ignored) for [`WorkerScript::Default`].
    pub skip_handshake: bool,
    /// Override the path used to locate the bundled default worker binary.
    pub default_worker_path: Option<PathBuf>,
    /// Fired once, the first time this worker becomes ready.
    pub on_worker_ready: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Fired once, when this worker exits for any reason. `None` signals a
    /// clean, requested termination; `Some` carries the cause.
    pub on_worker_exit: Option<Arc<dyn Fn(Option<&WorkerPoolError>) + Send + Sync>>,
}

impl fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerOptions")
            .field("substrate", &self.substrate)
            .field("spawn_args", &self.spawn_args)
            .field("spawn_env", &self.spawn_env)
            .field("debug_port", &self.debug_port)
            .field("concurrency", &self.concurrency)
            .field("max_exec", &self.max_exec)
            .field("mark_not_ready_after_exec", &self.mark_not_ready_after_exec)
            .field("ready_timeout", &self.ready_timeout)
            .field("init_ready_timeout", &self.init_ready_timeout)
            .field("skip_handshake", &self.skip_handshake)
            .field("default_worker_path", &self.default_worker_path)
            .finish_non_exhaustive()
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            substrate: Substrate::Auto,
            spawn_args: Vec::new(),
            spawn_env: Vec::new(),
            debug_port: None,
            concurrency: DEFAULT_CONCURRENCY,
            max_exec: 0,
            mark_not_ready_after_exec: false,
            ready_timeout: None,
            init_ready_timeout: None,
            skip_handshake: false,
            default_worker_path: None,
            on_worker_ready: None,
            on_worker_exit: None,
        }
    }
}

impl WorkerOptions {
    /// Start from the defaults and override the substrate.
    #[must_use]
    pub fn with_substrate(mut self, substrate: Substrate) -> Self {
        self.substrate = substrate;
        self
    }

    /// Override the per-worker concurrency.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Terminate the worker after `max_exec` served requests.
    #[must_use]
    pub fn with_max_exec(mut self, max_exec: u64) -> Self {
        self.max_exec = max_exec;
        self
    }

    /// Override the readiness timeout applied after the initial handshake.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }
}

/// The effect of a [`WorkerHandler::terminate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Termination has begun; the worker was not already stopping or stopped.
    Initiated,
    /// The worker was already shutting down gracefully.
    AlreadyTerminating,
    /// The worker had already exited.
    AlreadyTerminated,
}

/// A worker's cumulative timing statistics, reset on the periodic window
/// described in `SPEC_FULL.md` §4.3 (min/max reset; totals persist).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Requests sent to this worker since it was spawned.
    pub request_count: u64,
    /// Terminal responses received since it was spawned.
    pub response_count: u64,
    /// Cumulative time spent in completed requests, in milliseconds.
    pub total_time_ms: u64,
    /// Shortest completed request duration in the current window.
    pub min_time_ms: Option<u64>,
    /// Longest completed request duration in the current window.
    pub max_time_ms: u64,
    /// Duration of the most recently completed request.
    pub last_time_ms: u64,
}

/// Opaque identifier for one worker, stable for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub(crate) u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// A handle to one running worker and the actor task driving it.
///
/// Cloning is cheap (an `Arc` and two channel senders); every clone talks
/// to the same underlying worker.
#[derive(Clone)]
pub struct WorkerHandler {
    pub(crate) shared: Arc<HandlerShared>,
    pub(crate) cmd_tx: mpsc::UnboundedSender<HandlerCommand>,
    pub(crate) cancel_tx: mpsc::UnboundedSender<u64>,
}

impl WorkerHandler {
    /// Spawn a worker and return a handle once its actor task is running
    /// (not necessarily ready yet; see [`WorkerOptions::on_worker_ready`]).
    pub async fn spawn(
        script: WorkerScript,
        options: WorkerOptions,
        host_env: HostEnv,
    ) -> Result<Self, WorkerPoolError> {
        crate::worker_handler::spawn(script, options, host_env).await
    }

    /// Call `method` with `params`, discarding any streamed events.
    #[must_use]
    pub fn exec(&self, method: impl Into<String>, params: Vec<Value>) -> Task<Value> {
        self.exec_with_events(method, params, None)
    }

    /// Call `method` with `params`, invoking `on` for every streamed event
    /// the worker publishes before the task settles.
    #[must_use]
    pub fn exec_with_events(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        on: Option<EventSink>,
    ) -> Task<Value> {
        let id = self.shared.next_task_id();
        let (resolver, task) = Task::new_cancellable(id, self.cancel_tx.clone());
        let _ = self.cmd_tx.send(HandlerCommand::Exec {
            id,
            method: method.into(),
            params,
            on,
            resolver,
        });
        task
    }

    /// Ask the worker to report the methods it exposes.
    #[must_use]
    pub fn methods(&self) -> Task<Value> {
        self.exec("methods", Vec::new())
    }

    /// Whether the worker currently has as many in-flight requests as its
    /// configured concurrency allows.
    #[must_use]
    pub fn busy(&self) -> bool {
        self.shared.busy()
    }

    /// Whether this worker can currently accept a new request.
    #[must_use]
    pub fn available(&self) -> bool {
        self.shared.available()
    }

    /// This worker's stable identifier.
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.shared.id
    }

    /// A snapshot of this worker's cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.shared.stats()
    }

    fn terminate_internal(&self, force: bool, notify: Option<TaskResolver<()>>) -> TerminateOutcome {
        if self.shared.terminated.load(Ordering::SeqCst) {
            if let Some(resolver) = notify {
                resolver.resolve(());
            }
            return TerminateOutcome::AlreadyTerminated;
        }
        let was_terminating = self.shared.terminating.swap(true, Ordering::SeqCst);
        let _ = self.cmd_tx.send(HandlerCommand::Terminate { force, notify });
        if was_terminating {
            TerminateOutcome::AlreadyTerminating
        } else {
            TerminateOutcome::Initiated
        }
    }

    /// Begin terminating this worker. `force` drops in-flight tasks
    /// immediately instead of waiting for the current batch to settle.
    pub fn terminate(&self, force: bool) -> TerminateOutcome {
        self.terminate_internal(force, None)
    }

    /// Like [`WorkerHandler::terminate`], but waits for the worker to
    /// actually exit (optionally bounded by `timeout`).
    pub async fn terminate_and_notify(
        &self,
        force: bool,
        timeout: Option<Duration>,
    ) -> Result<(), WorkerPoolError> {
        let (resolver, task) = Task::new();
        self.terminate_internal(force, Some(resolver));
        match timeout {
            Some(duration) => task.with_timeout(duration).await,
            None => task.await,
        }
    }
}

/// Pool-wide configuration: how many workers to keep alive and the
/// [`WorkerOptions`] every one of them is spawned with.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Minimum number of workers kept alive, respawned on crash/exit.
    pub min_workers: usize,
    /// Maximum number of workers spawned to drain a deep backlog.
    pub max_workers: usize,
    /// Options applied to every worker this pool spawns.
    pub worker_options: WorkerOptions,
    /// Default per-task timeout applied to every task dispatched through
    /// this pool.
    pub default_task_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        let min_workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            min_workers,
            max_workers: min_workers,
            worker_options: WorkerOptions::default(),
            default_task_timeout: None,
        }
    }
}

/// A pool-level lifecycle/diagnostic event, published on
/// [`WorkerPool::subscribe`].
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// The pool's actor task has started and the minimum worker count is spawning.
    Started,
    /// A new worker was spawned.
    WorkerSpawned {
        /// The worker's id.
        worker_id: WorkerId,
    },
    /// A worker completed its readiness handshake.
    WorkerReady {
        /// The worker's id.
        worker_id: WorkerId,
    },
    /// A worker exited, for any reason.
    WorkerExited {
        /// The worker's id.
        worker_id: WorkerId,
        /// A human-readable cause, when the exit was not a clean termination.
        reason: Option<String>,
    },
    /// A dispatched task completed successfully.
    TaskCompleted {
        /// The worker that served it.
        worker_id: WorkerId,
        /// The method that was called.
        method: String,
    },
    /// A dispatched task failed.
    TaskFailed {
        /// The worker that served it, if one had been chosen.
        worker_id: WorkerId,
        /// The method that was called.
        method: String,
        /// A human-readable description of the failure.
        error: String,
    },
    /// [`WorkerPool::request_stop`] was called.
    StopRequested,
    /// The pool has finished draining and every worker has exited.
    Stopped,
}

/// A point-in-time summary of one worker, part of a [`PoolSnapshot`].
#[derive(Debug, Clone)]
pub struct WorkerSummary {
    /// The worker's id.
    pub id: WorkerId,
    /// Whether it is currently at its concurrency limit.
    pub busy: bool,
    /// Whether it can currently accept a new request.
    pub available: bool,
    /// Its cumulative statistics.
    pub stats: WorkerStats,
}

/// A point-in-time view of the whole pool, readable without round-tripping
/// through the pool's actor task.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    /// Every worker currently tracked by the pool.
    pub workers: Vec<WorkerSummary>,
    /// Tasks submitted but not yet dispatched to a worker.
    pub pending_tasks: usize,
    /// Whether [`WorkerPool::request_stop`] has been called.
    pub stop_requested: bool,
}

/// A handle to a running worker pool and the actor task scheduling it.
pub struct WorkerPool {
    pub(crate) inner: Arc<crate::pool::PoolInner>,
    pub(crate) join: tokio::task::JoinHandle<()>,
}

impl WorkerPool {
    /// Submit `method(params)`, to be dispatched to the next available
    /// worker, subject to `PoolOptions::default_task_timeout`.
    #[must_use]
    pub fn exec(&self, method: impl Into<String>, params: Vec<Value>) -> Task<Value> {
        self.inner.exec_with_events(method.into(), params, None)
    }

    /// Like [`WorkerPool::exec`], but invoking `on` for every streamed
    /// event the chosen worker publishes before the task settles.
    #[must_use]
    pub fn exec_with_events(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        on: Option<EventSink>,
    ) -> Task<Value> {
        self.inner.exec_with_events(method.into(), params, on)
    }

    /// Subscribe to this pool's lifecycle/diagnostic event stream. Lagging
    /// subscribers miss events rather than stall the pool.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.event_tx.subscribe()
    }

    /// A synchronous, always-current snapshot of the pool's workers and queue.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        self.inner.snapshot_rx.borrow().clone()
    }

    /// Ask the pool to stop accepting new tasks and terminate its workers
    /// once their in-flight work drains.
    pub fn request_stop(&self) {
        self.inner.request_stop();
    }

    /// Wait for the pool's actor task to finish (after
    /// [`WorkerPool::request_stop`] has drained it).
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

/// Start a worker pool: spawn `PoolOptions::min_workers` workers running
/// `script` and return a handle once the scheduling actor is running.
#[must_use]
pub fn start_pool(script: WorkerScript, options: PoolOptions) -> WorkerPool {
    crate::pool::start_pool(script, options)
}
