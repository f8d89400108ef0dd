//! The `WorkerPool` scheduler actor: owns the set of spawned workers,
//! dispatches queued tasks to the first available one, and republishes
//! worker lifecycle as pool-level events and a synchronous snapshot.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use workerpool_core::{HostEnv, Task, TaskResolver, WorkerPoolError};

use crate::api::{
    EventSink, PoolEvent, PoolOptions, PoolSnapshot, WorkerHandler, WorkerId, WorkerOptions,
    WorkerScript, WorkerSummary,
};

const POOL_EVENT_CAPACITY: usize = 256;

/// One submitted-but-not-yet-dispatched task.
struct Submission {
    pool_task_id: u64,
    method: String,
    params: Vec<Value>,
    on: Option<EventSink>,
    resolver: TaskResolver<Value>,
    timeout: Option<Duration>,
}

/// A command sent from a [`crate::api::WorkerPool`] handle to its
/// scheduling actor task.
enum PoolCommand {
    Exec(Submission),
    RequestStop,
}

/// Reported by a worker's `on_worker_ready`/`on_worker_exit` callback, both
/// of which run outside the actor task and must hand control back to it.
enum PoolInternalEvent {
    WorkerReady { worker_id: WorkerId },
    WorkerExited { worker_id: WorkerId, error: Option<WorkerPoolError> },
    /// A forwarded task settled, possibly freeing up its worker's
    /// concurrency slot for the next queued submission.
    TaskSettled { worker_id: WorkerId },
}

/// Sends `TaskSettled` on drop rather than at the end of `forward`'s spawned
/// task body, so an aborted forwarding task (the `cancel_rx` branch in
/// `PoolActor::run`) still releases its slot's pending-dispatch count.
struct SettleGuard {
    worker_id: WorkerId,
    internal_tx: mpsc::UnboundedSender<PoolInternalEvent>,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        let _ = self.internal_tx.send(PoolInternalEvent::TaskSettled { worker_id: self.worker_id });
    }
}

/// Shared state a [`crate::api::WorkerPool`] handle reads synchronously,
/// without a round trip through the actor task.
pub(crate) struct PoolInner {
    cmd_tx: mpsc::UnboundedSender<PoolCommand>,
    cancel_tx: mpsc::UnboundedSender<u64>,
    next_task_id: AtomicU64,
    pub(crate) event_tx: broadcast::Sender<PoolEvent>,
    pub(crate) snapshot_rx: watch::Receiver<PoolSnapshot>,
    stop_requested: AtomicBool,
}

impl PoolInner {
    pub(crate) fn exec_with_events(
        &self,
        method: String,
        params: Vec<Value>,
        on: Option<EventSink>,
    ) -> Task<Value> {
        let pool_task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (resolver, task) = Task::new_cancellable(pool_task_id, self.cancel_tx.clone());
        if self.stop_requested.load(Ordering::SeqCst) {
            resolver.reject(WorkerPoolError::WorkerTerminated);
            return task;
        }
        let _ = self.cmd_tx.send(PoolCommand::Exec(Submission {
            pool_task_id,
            method,
            params,
            on,
            resolver,
            timeout: None,
        }));
        task
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.cmd_tx.send(PoolCommand::RequestStop);
    }
}

/// One worker tracked by the pool actor, alongside a count of submissions
/// the scheduler has forwarded onto it but not yet seen settle.
struct Slot {
    handler: WorkerHandler,
    /// Dispatched-but-not-settled count, kept synchronously by the actor
    /// itself. `handler.available()` only reflects a dispatch once the
    /// handler's own actor task has processed it, which happens after
    /// `forward` spawns the forwarding task — too late to prevent
    /// `dispatch_queue`'s own loop from picking the same worker twice in a
    /// single pass. This counter closes that gap.
    pending_dispatch: usize,
}

struct PoolActor {
    script: WorkerScript,
    worker_options: WorkerOptions,
    min_workers: usize,
    max_workers: usize,
    default_task_timeout: Option<Duration>,
    slots: Vec<Slot>,
    queue: VecDeque<Submission>,
    /// Forwarding task per in-flight pool-level task id; aborting one
    /// drops the handler-level `Task` it's awaiting, which triggers that
    /// task's own cancellation notice to its owning `WorkerHandler`.
    forwarding: HashMap<u64, tokio::task::JoinHandle<()>>,
    event_tx: broadcast::Sender<PoolEvent>,
    snapshot_tx: watch::Sender<PoolSnapshot>,
    stop_requested: bool,
    internal_tx: mpsc::UnboundedSender<PoolInternalEvent>,
}

/// Start a worker pool: spawn `PoolOptions::min_workers` workers running
/// `script` and return a handle once the scheduling actor is running.
pub(crate) fn start_pool(script: WorkerScript, options: PoolOptions) -> crate::api::WorkerPool {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
    let (event_tx, _) = broadcast::channel(POOL_EVENT_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(PoolSnapshot::default());
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let inner = Arc::new(PoolInner {
        cmd_tx,
        cancel_tx,
        next_task_id: AtomicU64::new(0),
        event_tx: event_tx.clone(),
        snapshot_rx,
        stop_requested: AtomicBool::new(false),
    });

    let actor = PoolActor {
        script,
        min_workers: options.min_workers.max(1),
        max_workers: options.max_workers.max(options.min_workers).max(1),
        worker_options: options.worker_options,
        default_task_timeout: options.default_task_timeout,
        slots: Vec::new(),
        queue: VecDeque::new(),
        forwarding: HashMap::new(),
        event_tx,
        snapshot_tx,
        stop_requested: false,
        internal_tx,
    };

    let join = tokio::spawn(actor.run(cmd_rx, cancel_rx, internal_rx));

    crate::api::WorkerPool { inner, join }
}

impl PoolActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<PoolCommand>,
        mut cancel_rx: mpsc::UnboundedReceiver<u64>,
        mut internal_rx: mpsc::UnboundedReceiver<PoolInternalEvent>,
    ) {
        let _ = self.event_tx.send(PoolEvent::Started);
        for _ in 0..self.min_workers {
            self.spawn_worker().await;
        }
        self.publish_snapshot();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PoolCommand::Exec(submission)) => self.handle_exec(submission).await,
                        Some(PoolCommand::RequestStop) => self.handle_request_stop().await,
                        None => self.handle_request_stop().await,
                    }
                }
                id = cancel_rx.recv() => {
                    if let Some(id) = id {
                        if let Some(handle) = self.forwarding.remove(&id) {
                            handle.abort();
                        }
                    }
                }
                ev = internal_rx.recv() => {
                    match ev {
                        Some(PoolInternalEvent::WorkerReady { worker_id }) => {
                            let _ = self.event_tx.send(PoolEvent::WorkerReady { worker_id });
                            self.dispatch_queue().await;
                        }
                        Some(PoolInternalEvent::WorkerExited { worker_id, error }) => {
                            self.handle_worker_exited(worker_id, error).await;
                        }
                        Some(PoolInternalEvent::TaskSettled { worker_id }) => {
                            if let Some(slot) = self.slots.iter_mut().find(|slot| slot.handler.id() == worker_id) {
                                slot.pending_dispatch = slot.pending_dispatch.saturating_sub(1);
                            }
                            self.dispatch_queue().await;
                        }
                        None => {}
                    }
                }
            }

            self.forwarding.retain(|_, handle| !handle.is_finished());
            self.publish_snapshot();

            if self.stop_requested && self.slots.is_empty() {
                let _ = self.event_tx.send(PoolEvent::Stopped);
                break;
            }
        }
    }

    async fn spawn_worker(&mut self) {
        let internal_tx_ready = self.internal_tx.clone();
        let internal_tx_exit = self.internal_tx.clone();
        let prior_ready = self.worker_options.on_worker_ready.clone();
        let prior_exit = self.worker_options.on_worker_exit.clone();

        // The worker id isn't known until `WorkerHandler::spawn` resolves,
        // so the callbacks close over a cell filled in immediately after.
        let slot_id = Arc::new(std::sync::OnceLock::new());
        let slot_id_ready = slot_id.clone();
        let slot_id_exit = slot_id.clone();

        let mut options = self.worker_options.clone();
        options.on_worker_ready = Some(Arc::new(move || {
            if let Some(prior) = &prior_ready {
                prior();
            }
            if let Some(worker_id) = slot_id_ready.get().copied() {
                let _ = internal_tx_ready.send(PoolInternalEvent::WorkerReady { worker_id });
            }
        }));
        options.on_worker_exit = Some(Arc::new(move |err: Option<&WorkerPoolError>| {
            if let Some(prior) = &prior_exit {
                prior(err);
            }
            if let Some(worker_id) = slot_id_exit.get().copied() {
                let _ = internal_tx_exit.send(PoolInternalEvent::WorkerExited {
                    worker_id,
                    error: err.cloned(),
                });
            }
        }));

        match WorkerHandler::spawn(self.script.clone(), options, HostEnv::from_process_env()).await {
            Ok(handler) => {
                let _ = slot_id.set(handler.id());
                let _ = self.event_tx.send(PoolEvent::WorkerSpawned { worker_id: handler.id() });
                self.slots.push(Slot { handler, pending_dispatch: 0 });
            }
            Err(err) => {
                tracing::warn!(%err, "failed to spawn worker");
            }
        }
    }

    async fn handle_exec(&mut self, mut submission: Submission) {
        submission.timeout = submission.timeout.or(self.default_task_timeout);
        self.queue.push_back(submission);
        self.dispatch_queue().await;

        if self.queue.len() > self.slots.len() && self.slots.len() < self.max_workers {
            self.spawn_worker().await;
        }
    }

    async fn dispatch_queue(&mut self) {
        loop {
            let Some(slot) = self
                .slots
                .iter_mut()
                .find(|slot| slot.handler.available() && slot.pending_dispatch == 0)
            else {
                break;
            };
            let Some(submission) = self.queue.pop_front() else {
                break;
            };
            slot.pending_dispatch += 1;
            let handler = slot.handler.clone();
            self.forward(handler, submission);
        }
    }

    fn forward(&mut self, handler: WorkerHandler, submission: Submission) {
        let Submission { pool_task_id, method, params, on, resolver, timeout } = submission;
        let worker_id = handler.id();
        let event_tx = self.event_tx.clone();
        let internal_tx = self.internal_tx.clone();
        let method_for_event = method.clone();

        let handle = tokio::spawn(async move {
            // Reports the dispatch as settled on every exit path, including
            // a cancellation abort, so a slot's `pending_dispatch` count
            // never gets stranded above zero.
            let _settle_guard = SettleGuard { worker_id, internal_tx };

            let task = handler.exec_with_events(method.clone(), params, on);
            let outcome = match timeout {
                Some(duration) => task.with_timeout(duration).await,
                None => task.await,
            };
            match outcome {
                Ok(value) => {
                    let _ = event_tx.send(PoolEvent::TaskCompleted {
                        worker_id,
                        method: method_for_event,
                    });
                    resolver.resolve(value);
                }
                Err(err) => {
                    let _ = event_tx.send(PoolEvent::TaskFailed {
                        worker_id,
                        method: method_for_event,
                        error: err.to_string(),
                    });
                    resolver.reject(err);
                }
            }
        });
        self.forwarding.insert(pool_task_id, handle);
    }

    async fn handle_worker_exited(&mut self, worker_id: WorkerId, error: Option<WorkerPoolError>) {
        self.slots.retain(|slot| slot.handler.id() != worker_id);
        let reason = error.map(|err| err.to_string());
        let _ = self.event_tx.send(PoolEvent::WorkerExited { worker_id, reason });

        if !self.stop_requested && self.slots.len() < self.min_workers {
            self.spawn_worker().await;
            self.dispatch_queue().await;
        }
    }

    async fn handle_request_stop(&mut self) {
        if self.stop_requested {
            return;
        }
        self.stop_requested = true;
        let _ = self.event_tx.send(PoolEvent::StopRequested);

        for submission in self.queue.drain(..) {
            submission.resolver.reject(WorkerPoolError::WorkerTerminated);
        }

        for slot in &self.slots {
            slot.handler.terminate(false);
        }
        if self.slots.is_empty() {
            let _ = self.event_tx.send(PoolEvent::Stopped);
        }
    }

    fn publish_snapshot(&self) {
        let workers = self
            .slots
            .iter()
            .map(|slot| WorkerSummary {
                id: slot.handler.id(),
                busy: slot.handler.busy(),
                available: slot.handler.available(),
                stats: slot.handler.stats(),
            })
            .collect();
        self.snapshot_tx.send_replace(PoolSnapshot {
            workers,
            pending_tasks: self.queue.len(),
            stop_requested: self.stop_requested,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use workerpool_transport::ThreadWorkerIo;

    use super::*;

    fn echo_script() -> WorkerScript {
        WorkerScript::Thread(Arc::new(|io: ThreadWorkerIo| {
            io.send(serde_json::json!("ready"));
            while let Some(msg) = io.recv() {
                let id = msg["id"].as_u64().unwrap();
                let param = msg["params"][0].clone();
                io.send(serde_json::json!({"id": id, "result": param}));
            }
        }))
    }

    #[tokio::test]
    async fn exec_dispatches_to_an_available_worker_and_resolves() {
        let options = PoolOptions {
            min_workers: 1,
            max_workers: 1,
            ..PoolOptions::default()
        };
        let pool = start_pool(echo_script(), options);
        let result = pool.exec("echo", vec![serde_json::json!("hi")]).await.unwrap();
        assert_eq!(result, serde_json::json!("hi"));
        pool.request_stop();
        pool.wait().await;
    }

    #[tokio::test]
    async fn queued_tasks_drain_once_a_worker_becomes_available() {
        let options = PoolOptions {
            min_workers: 1,
            max_workers: 1,
            worker_options: WorkerOptions::default().with_concurrency(1),
            ..PoolOptions::default()
        };
        let pool = start_pool(echo_script(), options);
        let first = pool.exec("echo", vec![serde_json::json!(1)]);
        let second = pool.exec("echo", vec![serde_json::json!(2)]);
        assert_eq!(first.await.unwrap(), serde_json::json!(1));
        assert_eq!(second.await.unwrap(), serde_json::json!(2));
        pool.request_stop();
        pool.wait().await;
    }

    #[tokio::test]
    async fn request_stop_rejects_queued_tasks_and_eventually_stops() {
        let options = PoolOptions {
            min_workers: 1,
            max_workers: 1,
            ..PoolOptions::default()
        };
        let pool = start_pool(echo_script(), options);
        pool.request_stop();
        let result = pool.exec("echo", vec![serde_json::json!(1)]).await;
        assert!(result.is_err());
        pool.wait().await;
    }

    #[tokio::test]
    async fn snapshot_reflects_worker_count() {
        let options = PoolOptions {
            min_workers: 2,
            max_workers: 2,
            ..PoolOptions::default()
        };
        let pool = start_pool(echo_script(), options);
        // Give the actor a moment to finish the initial spawn loop.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.snapshot().workers.len(), 2);
        pool.request_stop();
        pool.wait().await;
    }
}
