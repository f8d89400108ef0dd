//! The `WorkerHandler` actor: owns one worker's transport and in-flight
//! table, and is reached only through [`HandlerCommand`]s sent from
//! [`crate::api::WorkerHandler`]. Mirrors the single-actor-per-worker
//! shape `SPEC_FULL.md` §3/§5 calls for on a preemptive runtime.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Sleep;
use workerpool_core::{HostEnv, Substrate, TaskResolver, WorkerPoolError};
use workerpool_transport::{ProcessScript, Transport, TransportEvent, TransportEvents};

use crate::api::{EventSink, WorkerHandler, WorkerId, WorkerOptions, WorkerScript, WorkerStats};
use crate::inflight::{InflightTable, TaskRecord};
use crate::protocol::{InboundMessage, Request, Response, TERMINATE_SIGNAL};

/// How long a process-substrate worker is given to exit gracefully after
/// receiving [`TERMINATE_SIGNAL`] before it is force-killed.
const CHILD_PROCESS_EXIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// How often a handler's min/max timing window resets (totals persist).
const STATS_RESET_INTERVAL: Duration = Duration::from_secs(5 * 60);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// A command sent from a [`WorkerHandler`] handle to its actor task.
pub(crate) enum HandlerCommand {
    /// Dispatch one call, queueing it if the worker is not yet ready.
    Exec {
        id: u64,
        method: String,
        params: Vec<Value>,
        on: Option<EventSink>,
        resolver: TaskResolver<Value>,
    },
    /// Begin terminating the worker, optionally notified on completion.
    Terminate {
        force: bool,
        notify: Option<TaskResolver<()>>,
    },
}

/// State a [`WorkerHandler`] handle can read synchronously, without a
/// round trip through the actor task: readiness/termination flags,
/// in-flight count, and cumulative stats.
pub(crate) struct HandlerShared {
    pub(crate) id: WorkerId,
    request_count: AtomicU64,
    pub(crate) ready: std::sync::atomic::AtomicBool,
    pub(crate) terminating: std::sync::atomic::AtomicBool,
    pub(crate) terminated: std::sync::atomic::AtomicBool,
    inflight_count: AtomicUsize,
    concurrency: usize,
    max_exec: u64,
    stats: Mutex<StatsInner>,
}

#[derive(Default)]
struct StatsInner {
    response_count: u64,
    total_time_ms: u64,
    min_time_ms: Option<u64>,
    max_time_ms: u64,
    last_time_ms: u64,
}

impl HandlerShared {
    fn new(id: WorkerId, concurrency: usize, max_exec: u64) -> Self {
        Self {
            id,
            request_count: AtomicU64::new(0),
            ready: std::sync::atomic::AtomicBool::new(false),
            terminating: std::sync::atomic::AtomicBool::new(false),
            terminated: std::sync::atomic::AtomicBool::new(false),
            inflight_count: AtomicUsize::new(0),
            concurrency: concurrency.max(1),
            max_exec,
            stats: Mutex::new(StatsInner::default()),
        }
    }

    /// Allocate the next strictly increasing task id, doubling as the
    /// handler's `request_count` (every call increments both together, so
    /// the two counters are always equal — see `SPEC_FULL.md` §3).
    pub(crate) fn next_task_id(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn inc_inflight(&self) {
        self.inflight_count.fetch_add(1, Ordering::SeqCst);
    }

    fn sub_inflight(&self, n: usize) {
        if n > 0 {
            self.inflight_count.fetch_sub(n, Ordering::SeqCst);
        }
    }

    fn max_exec(&self) -> u64 {
        self.max_exec
    }

    pub(crate) fn busy(&self) -> bool {
        self.inflight_count.load(Ordering::SeqCst) >= self.concurrency
    }

    pub(crate) fn available(&self) -> bool {
        !self.terminated.load(Ordering::SeqCst)
            && !self.terminating.load(Ordering::SeqCst)
            && self.ready.load(Ordering::SeqCst)
            && (self.max_exec == 0 || self.request_count.load(Ordering::SeqCst) < self.max_exec)
            && !self.busy()
    }

    pub(crate) fn stats(&self) -> WorkerStats {
        let s = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        WorkerStats {
            request_count: self.request_count.load(Ordering::SeqCst),
            response_count: s.response_count,
            total_time_ms: s.total_time_ms,
            min_time_ms: s.min_time_ms,
            max_time_ms: s.max_time_ms,
            last_time_ms: s.last_time_ms,
        }
    }

    /// Record one completed response's timing and return the updated
    /// `response_count`.
    fn record_response(&self, time_spent_ms: u64) -> u64 {
        let mut s = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        s.response_count += 1;
        s.total_time_ms += time_spent_ms;
        s.last_time_ms = time_spent_ms;
        s.max_time_ms = s.max_time_ms.max(time_spent_ms);
        s.min_time_ms = Some(s.min_time_ms.map_or(time_spent_ms, |m| m.min(time_spent_ms)));
        s.response_count
    }

    fn reset_stats_window(&self) {
        let mut s = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        s.min_time_ms = None;
        s.max_time_ms = 0;
    }
}

/// Spawn a worker per `script`/`options` and return a handle once its
/// actor task is running (not necessarily ready — see
/// [`WorkerOptions::on_worker_ready`]).
pub(crate) async fn spawn(
    script: WorkerScript,
    options: WorkerOptions,
    host_env: HostEnv,
) -> Result<WorkerHandler, WorkerPoolError> {
    let is_thread_script = matches!(script, WorkerScript::Thread(_));
    let substrate = options.substrate.resolve(is_thread_script);

    // `WorkerScript::Default` always performs the readiness handshake (the
    // bundled default worker speaks the protocol for real); `skip_handshake`
    // only ever applies to a bespoke script, per `SPEC_FULL.md` §9.
    let skip_handshake = !matches!(script, WorkerScript::Default) && options.skip_handshake;

    let concurrency = options.concurrency.max(1);
    let max_exec = options.max_exec;
    let mark_not_ready_after_exec = options.mark_not_ready_after_exec;
    let ready_timeout = options.ready_timeout;
    let init_ready_timeout = options.init_ready_timeout.or(ready_timeout);
    let on_worker_ready = options.on_worker_ready.clone();
    let on_worker_exit = options.on_worker_exit.clone();

    let (transport, events, script_label) = match substrate {
        Substrate::Thread => {
            let WorkerScript::Thread(closure) = script else {
                return Err(WorkerPoolError::UnsupportedSubstrate(
                    "thread substrate requires a WorkerScript::Thread".to_string(),
                ));
            };
            let (transport, events) = Transport::spawn_thread(closure);
            (transport, events, "<thread worker>".to_string())
        }
        Substrate::Process => {
            let (program, args, env, label) = resolve_process_target(&script, &options)?;
            let process_script = ProcessScript {
                program,
                args,
                env,
                debug_port: options.debug_port,
                host_env,
            };
            let (transport, events) = Transport::spawn_process(process_script)
                .await
                .map_err(|err| WorkerPoolError::WorkerError(err.to_string()))?;
            (transport, events, label)
        }
        Substrate::Web => {
            return Err(WorkerPoolError::UnsupportedSubstrate(
                "web substrate requires the wasm-worker feature on a wasm32 target".to_string(),
            ));
        }
        Substrate::Auto => unreachable!("Substrate::resolve never returns Auto"),
    };

    let id = WorkerId(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed));
    let shared = Arc::new(HandlerShared::new(id, concurrency, max_exec));
    if skip_handshake {
        shared.ready.store(true, Ordering::SeqCst);
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();

    let actor = HandlerActor {
        shared: shared.clone(),
        transport,
        events,
        inflight: InflightTable::new(),
        pending: VecDeque::new(),
        substrate,
        mark_not_ready_after_exec,
        ready_timeout,
        init_ready_timeout,
        script_label,
        on_worker_ready,
        on_worker_exit,
        ready_fired: false,
        exit_fired: false,
        shutdown_requested: false,
        shutdown_reason: None,
        termination_notifies: Vec::new(),
        ready_timer: None,
        force_kill_timer: None,
    };

    tokio::spawn(actor.run(cmd_rx, cancel_rx));

    Ok(WorkerHandler {
        shared,
        cmd_tx,
        cancel_tx,
    })
}

fn resolve_process_target(
    script: &WorkerScript,
    options: &WorkerOptions,
) -> Result<(PathBuf, Vec<String>, Vec<(String, String)>, String), WorkerPoolError> {
    match script {
        WorkerScript::Default => {
            let program = resolve_default_worker_path(options.default_worker_path.as_deref())?;
            let label = program.display().to_string();
            Ok((program, options.spawn_args.clone(), options.spawn_env.clone(), label))
        }
        WorkerScript::Process { program, args, env } => {
            let mut all_args = args.clone();
            all_args.extend(options.spawn_args.iter().cloned());
            let mut all_env = env.clone();
            all_env.extend(options.spawn_env.iter().cloned());
            let label = program.display().to_string();
            Ok((program.clone(), all_args, all_env, label))
        }
        WorkerScript::Thread(_) => {
            unreachable!("thread scripts never resolve to a process target")
        }
    }
}

fn resolve_default_worker_path(explicit: Option<&Path>) -> Result<PathBuf, WorkerPoolError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let exe_name = if cfg!(windows) {
        "workerpool-default-worker.exe"
    } else {
        "workerpool-default-worker"
    };
    let current = std::env::current_exe().map_err(|err| {
        WorkerPoolError::WorkerError(format!("cannot resolve current executable: {err}"))
    })?;
    let dir = current.parent().ok_or_else(|| {
        WorkerPoolError::WorkerError("current executable has no parent directory".to_string())
    })?;
    Ok(dir.join(exe_name))
}

/// The actor task backing one [`WorkerHandler`]. Owns the transport, the
/// in-flight table, and every timer; reached only via `cmd_rx`/`cancel_rx`.
struct HandlerActor {
    shared: Arc<HandlerShared>,
    transport: Transport,
    events: TransportEvents,
    inflight: InflightTable,
    /// Messages queued because the worker is not yet ready: real requests
    /// (as pre-encoded `Value`s) and, if a graceful shutdown was requested
    /// before readiness, the terminate signal.
    pending: VecDeque<Value>,
    substrate: Substrate,
    mark_not_ready_after_exec: bool,
    ready_timeout: Option<Duration>,
    init_ready_timeout: Option<Duration>,
    script_label: String,
    on_worker_ready: Option<Arc<dyn Fn() + Send + Sync>>,
    on_worker_exit: Option<Arc<dyn Fn(Option<&WorkerPoolError>) + Send + Sync>>,
    ready_fired: bool,
    exit_fired: bool,
    shutdown_requested: bool,
    /// The cause to report via `on_worker_exit` once `begin_shutdown`'s
    /// kill/terminate-signal completes, for shutdowns triggered by something
    /// other than a plain `terminate()` call (e.g. a readiness timeout).
    shutdown_reason: Option<WorkerPoolError>,
    termination_notifies: Vec<TaskResolver<()>>,
    ready_timer: Option<Pin<Box<Sleep>>>,
    force_kill_timer: Option<Pin<Box<Sleep>>>,
}

impl HandlerActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<HandlerCommand>,
        mut cancel_rx: mpsc::UnboundedReceiver<u64>,
    ) {
        if self.shared.ready.load(Ordering::SeqCst) {
            self.fire_ready_once();
        } else {
            self.arm_ready_timer(self.init_ready_timeout);
        }

        let mut stats_reset = tokio::time::interval(STATS_RESET_INTERVAL);
        stats_reset.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        stats_reset.tick().await; // the first tick fires immediately; consume it

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(HandlerCommand::Exec { id, method, params, on, resolver }) => {
                            self.handle_exec(id, method, params, on, resolver);
                        }
                        Some(HandlerCommand::Terminate { force, notify }) => {
                            self.handle_terminate(force, notify).await;
                        }
                        None => {
                            // Every handle was dropped; nobody can observe this
                            // worker's results, so tear it down.
                            self.handle_terminate(true, None).await;
                        }
                    }
                }
                id = cancel_rx.recv() => {
                    if let Some(id) = id {
                        self.handle_cancel(id).await;
                    }
                }
                ev = self.events.recv() => {
                    match ev {
                        Some(event) => self.handle_transport_event(event).await,
                        None => self.teardown(None).await,
                    }
                }
                _ = Self::tick_opt(&mut self.ready_timer) => {
                    self.handle_ready_timeout().await;
                }
                _ = Self::tick_opt(&mut self.force_kill_timer) => {
                    self.handle_force_kill_timeout();
                }
                _ = stats_reset.tick() => {
                    self.shared.reset_stats_window();
                }
            }

            if self.shared.terminated.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    async fn tick_opt(timer: &mut Option<Pin<Box<Sleep>>>) {
        match timer {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
    }

    fn handle_exec(
        &mut self,
        id: u64,
        method: String,
        params: Vec<Value>,
        on: Option<EventSink>,
        resolver: TaskResolver<Value>,
    ) {
        if self.shared.terminated.load(Ordering::SeqCst) {
            resolver.reject(WorkerPoolError::WorkerTerminated);
            return;
        }
        self.inflight.insert(
            id,
            TaskRecord {
                resolver,
                on,
                started: Instant::now(),
            },
        );
        self.shared.inc_inflight();

        let request = Request { id, method, params };
        let encoded = request.to_value();
        if self.shared.ready.load(Ordering::SeqCst) {
            if let Err(err) = self.transport.send(encoded) {
                tracing::warn!(worker = %self.shared.id, %err, "failed to send request to worker");
            }
        } else {
            self.pending.push_back(encoded);
        }
    }

    async fn handle_cancel(&mut self, id: u64) {
        if self.inflight.remove(id).is_some() {
            self.shared.sub_inflight(1);
        }
        if !self.shared.terminated.load(Ordering::SeqCst) {
            self.handle_terminate(true, None).await;
        }
    }

    async fn handle_terminate(&mut self, force: bool, notify: Option<TaskResolver<()>>) {
        if let Some(notify) = notify {
            self.termination_notifies.push(notify);
        }
        if self.shared.terminated.load(Ordering::SeqCst) {
            for notify in self.termination_notifies.drain(..) {
                notify.resolve(());
            }
            return;
        }

        self.shared.terminating.store(true, Ordering::SeqCst);
        self.cancel_ready_timer();

        if force {
            let drained = self.inflight.drain_all();
            self.shared.sub_inflight(drained.len());
            for record in drained {
                record.resolver.reject(WorkerPoolError::WorkerTerminated);
            }
            self.pending.clear();
        }

        if !self.inflight.is_empty() {
            // Resumes from `settle` once the last in-flight response arrives.
            return;
        }

        self.begin_shutdown();
    }

    fn begin_shutdown(&mut self) {
        self.shutdown_requested = true;
        match self.substrate {
            Substrate::Thread => {
                self.transport.kill();
            }
            Substrate::Process => {
                let signal = Value::String(TERMINATE_SIGNAL.to_string());
                if self.shared.ready.load(Ordering::SeqCst) {
                    if let Err(err) = self.transport.send(signal) {
                        tracing::warn!(worker = %self.shared.id, %err, "failed to send terminate signal");
                    }
                } else {
                    self.pending.push_back(signal);
                }
                self.arm_force_kill_timer();
            }
            Substrate::Web | Substrate::Auto => unreachable!("resolved at spawn time"),
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.shared.terminated.load(Ordering::SeqCst) {
            return;
        }
        match event {
            TransportEvent::Message(value) => self.handle_message(value).await,
            TransportEvent::Error(message) => {
                self.teardown(Some(WorkerPoolError::WorkerError(message))).await;
            }
            TransportEvent::Exit { exit_code, signal } => {
                let err = if self.shutdown_requested {
                    self.shutdown_reason.take()
                } else {
                    Some(WorkerPoolError::UnexpectedExit {
                        exit_code,
                        signal,
                        script: self.script_label.clone(),
                        diagnostics: {
                            let diag = self.transport.diagnostics();
                            workerpool_core::TransportDiagnostics {
                                spawn_command: diag.spawn_command,
                                stderr_tail: diag.stderr_tail,
                            }
                        },
                    })
                };
                self.teardown(err).await;
            }
        }
    }

    async fn handle_message(&mut self, value: Value) {
        let decoded = match InboundMessage::decode(&value) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(worker = %self.shared.id, %err, "dropping malformed message from worker");
                return;
            }
        };

        match decoded {
            InboundMessage::Ready => self.handle_ready(),
            InboundMessage::Response(Response::Event { id, payload }) => {
                if let Some(record) = self.inflight.get_mut(id) {
                    if let Some(on) = record.on.as_mut() {
                        (on)(payload);
                    }
                }
            }
            InboundMessage::Response(Response::Result { id, result }) => {
                self.settle(id, Ok(result)).await;
            }
            InboundMessage::Response(Response::Error { id, error }) => {
                self.settle(id, Err(WorkerPoolError::TaskError(error))).await;
            }
        }
    }

    fn handle_ready(&mut self) {
        self.cancel_ready_timer();
        self.shared.ready.store(true, Ordering::SeqCst);
        self.fire_ready_once();

        let pending = std::mem::take(&mut self.pending);
        for msg in pending {
            if let Err(err) = self.transport.send(msg) {
                tracing::warn!(worker = %self.shared.id, %err, "failed to flush queued message");
            }
        }
    }

    async fn settle(&mut self, id: u64, outcome: Result<Value, WorkerPoolError>) {
        let Some(record) = self.inflight.remove(id) else {
            return;
        };
        self.shared.sub_inflight(1);

        let time_spent_ms = u64::try_from(record.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let response_count = self.shared.record_response(time_spent_ms);

        if self.mark_not_ready_after_exec {
            self.shared.ready.store(false, Ordering::SeqCst);
            self.arm_ready_timer(self.ready_timeout);
        }

        let max_exec = self.shared.max_exec();
        if max_exec > 0 && response_count >= max_exec {
            self.shared.terminating.store(true, Ordering::SeqCst);
            self.fire_exit_once(None);
        }

        if self.shared.terminating.load(Ordering::SeqCst) && !self.shared.busy() {
            self.begin_shutdown();
        }

        match outcome {
            Ok(value) => record.resolver.resolve(value),
            Err(err) => record.resolver.reject(err),
        }
    }

    async fn teardown(&mut self, err: Option<WorkerPoolError>) {
        if self.shared.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_ready_timer();
        self.cancel_force_kill_timer();

        let drained = self.inflight.drain_all();
        self.shared.sub_inflight(drained.len());
        for record in drained {
            record.resolver.reject(err.clone().unwrap_or(WorkerPoolError::WorkerTerminated));
        }
        self.pending.clear();

        self.fire_exit_once(err.as_ref());
        for notify in self.termination_notifies.drain(..) {
            notify.resolve(());
        }
    }

    fn fire_ready_once(&mut self) {
        if !self.ready_fired {
            self.ready_fired = true;
            if let Some(cb) = &self.on_worker_ready {
                cb();
            }
        }
    }

    fn fire_exit_once(&mut self, err: Option<&WorkerPoolError>) {
        if !self.exit_fired {
            self.exit_fired = true;
            if let Some(cb) = &self.on_worker_exit {
                cb(err);
            }
        }
    }

    fn arm_ready_timer(&mut self, timeout: Option<Duration>) {
        self.ready_timer = timeout.map(|d| Box::pin(tokio::time::sleep(d)));
    }

    fn cancel_ready_timer(&mut self) {
        self.ready_timer = None;
    }

    fn arm_force_kill_timer(&mut self) {
        self.force_kill_timer = Some(Box::pin(tokio::time::sleep(CHILD_PROCESS_EXIT_TIMEOUT)));
    }

    fn cancel_force_kill_timer(&mut self) {
        self.force_kill_timer = None;
    }

    async fn handle_ready_timeout(&mut self) {
        self.ready_timer = None;
        if self.shared.terminated.load(Ordering::SeqCst) {
            return;
        }
        tracing::warn!(worker = %self.shared.id, "readiness timed out; terminating worker");
        self.shutdown_reason = Some(WorkerPoolError::ReadyTimeout);
        self.handle_terminate(true, None).await;
    }

    fn handle_force_kill_timeout(&mut self) {
        self.force_kill_timer = None;
        tracing::warn!(worker = %self.shared.id, "worker ignored terminate signal; force killing");
        self.transport.kill();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    use workerpool_transport::ThreadWorkerIo;

    use super::*;
    use crate::api::{WorkerOptions, WorkerScript};

    fn echo_script() -> WorkerScript {
        WorkerScript::Thread(Arc::new(|io: ThreadWorkerIo| {
            io.send(serde_json::json!("ready"));
            while let Some(msg) = io.recv() {
                let id = msg["id"].as_u64().unwrap();
                let method = msg["method"].as_str().unwrap_or_default();
                if method == "echo" {
                    let param = msg["params"][0].clone();
                    io.send(serde_json::json!({"id": id, "result": param}));
                } else if method == "stream" {
                    for tick in ["a", "b", "c"] {
                        io.send(serde_json::json!({"id": id, "is_event": true, "payload": tick}));
                    }
                    io.send(serde_json::json!({"id": id, "result": "done"}));
                } else {
                    io.send(
                        serde_json::json!({"id": id, "error": {"name": "RangeError", "message": "oops"}}),
                    );
                }
            }
        }))
    }

    #[tokio::test]
    async fn basic_echo_resolves_with_the_same_value() {
        let handler = WorkerHandler::spawn(echo_script(), WorkerOptions::default(), HostEnv::default())
            .await
            .unwrap();
        let result = handler.exec("echo", vec![serde_json::json!(42)]).await.unwrap();
        assert_eq!(result, serde_json::json!(42));
        assert_eq!(handler.stats().response_count, 1);
    }

    #[tokio::test]
    async fn streamed_events_arrive_before_the_terminal_result() {
        let handler = WorkerHandler::spawn(echo_script(), WorkerOptions::default(), HostEnv::default())
            .await
            .unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_sink = seen.clone();
        let sink: EventSink = Box::new(move |value| {
            seen_sink.lock().unwrap().push(value);
        });
        let result = handler
            .exec_with_events("stream", Vec::new(), Some(sink))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("done"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![serde_json::json!("a"), serde_json::json!("b"), serde_json::json!("c")]
        );
    }

    #[tokio::test]
    async fn task_error_rejects_with_decoded_fields() {
        let handler = WorkerHandler::spawn(echo_script(), WorkerOptions::default(), HostEnv::default())
            .await
            .unwrap();
        let err = handler.exec("boom", Vec::new()).await.unwrap_err();
        match err {
            WorkerPoolError::TaskError(descriptor) => {
                assert_eq!(descriptor.name(), Some("RangeError"));
                assert_eq!(descriptor.message(), Some("oops"));
            }
            other => panic!("expected TaskError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn task_ids_are_strictly_increasing_and_never_reused() {
        let handler = WorkerHandler::spawn(echo_script(), WorkerOptions::default(), HostEnv::default())
            .await
            .unwrap();
        let mut tasks = Vec::new();
        for n in 0..5 {
            tasks.push(handler.exec("echo", vec![serde_json::json!(n)]));
        }
        for (n, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap(), serde_json::json!(n));
        }
        assert_eq!(handler.stats().request_count, 5);
    }

    #[tokio::test]
    async fn forced_termination_rejects_every_in_flight_task() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_worker = calls.clone();
        let script = WorkerScript::Thread(Arc::new(move |io: ThreadWorkerIo| {
            io.send(serde_json::json!("ready"));
            // Never answer: every request just increments a counter and
            // is left in-flight, so the test can exercise forced shutdown.
            while io.recv().is_some() {
                calls_worker.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let handler = WorkerHandler::spawn(script, WorkerOptions::default().with_concurrency(3), HostEnv::default())
            .await
            .unwrap();

        let t1 = handler.exec("echo", Vec::new());
        let t2 = handler.exec("echo", Vec::new());
        let t3 = handler.exec("echo", Vec::new());

        // Give the thread worker a moment to receive all three requests.
        tokio::time::sleep(Duration::from_millis(20)).await;

        handler.terminate(true);

        for task in [t1, t2, t3] {
            assert!(matches!(task.await, Err(WorkerPoolError::WorkerTerminated)));
        }
    }

    #[tokio::test]
    async fn max_exec_terminates_after_the_kth_response() {
        let handler = WorkerHandler::spawn(
            echo_script(),
            WorkerOptions::default().with_max_exec(2),
            HostEnv::default(),
        )
        .await
        .unwrap();

        handler.exec("echo", vec![serde_json::json!(1)]).await.unwrap();
        handler.exec("echo", vec![serde_json::json!(2)]).await.unwrap();

        // Give the actor a moment to process the terminating transition.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let third = handler.exec("echo", vec![serde_json::json!(3)]).await;
        assert!(third.is_err());
    }
}
