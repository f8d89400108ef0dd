use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use workerpool_core::{HostEnv, WorkerPoolError};

use crate::events::{TransportDiagnostics, TransportEvent, TransportEvents};

const STDERR_TAIL_LINES: usize = 20;

/// Everything needed to spawn a process-substrate worker.
#[derive(Debug, Clone)]
pub struct ProcessScript {
    /// The worker executable.
    pub program: std::path::PathBuf,
    /// Extra arguments passed before the handshake (cf. `extra_args` in the
    /// original's process spawning).
    pub args: Vec<String>,
    /// Additional environment variables to set on the child.
    pub env: Vec<(String, String)>,
    /// Per-worker debug port override; takes priority over `host_env`'s own
    /// inspect port when forwarding `WORKERPOOL_INSPECT` (`SPEC_FULL.md` §6).
    pub debug_port: Option<u16>,
    /// Host debug settings to forward, per `SPEC_FULL.md` §6.
    pub host_env: HostEnv,
}

/// Failure to spawn a process-substrate worker.
#[derive(Debug, thiserror::Error)]
pub enum ProcessSpawnError {
    /// The OS refused to spawn the child (binary missing, permissions, ...).
    #[error("failed to spawn worker process {program:?}: {source}")]
    Spawn {
        /// The program that failed to spawn.
        program: std::path::PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The spawned child did not expose the stdio pipes this transport
    /// requires (should not happen given how the `Command` is built).
    #[error("worker process {0:?} is missing a stdio pipe")]
    MissingStdio(std::path::PathBuf),
}

pub(crate) struct ProcessTransport {
    cmd_tx: mpsc::UnboundedSender<ProcessCommand>,
    spawn_command: String,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

enum ProcessCommand {
    Send(Value),
    Kill,
}

impl ProcessTransport {
    pub(crate) async fn spawn(script: ProcessScript) -> Result<(Self, TransportEvents), ProcessSpawnError> {
        let mut command = Command::new(&script.program);
        command
            .args(&script.args)
            .envs(script.env.iter().cloned())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(port) = script.debug_port.or(script.host_env.inspect_port) {
            command.env("WORKERPOOL_INSPECT", port.to_string());
        }
        if script.host_env.debug_brk {
            command.env("WORKERPOOL_DEBUG_BRK", "1");
        }

        let spawn_command = format!("{} {}", script.program.display(), script.args.join(" "));

        let mut child = command.spawn().map_err(|source| ProcessSpawnError::Spawn {
            program: script.program.clone(),
            source,
        })?;
        tracing::debug!(command = %spawn_command, pid = ?child.id(), "spawned process-substrate worker");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessSpawnError::MissingStdio(script.program.clone()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessSpawnError::MissingStdio(script.program.clone()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessSpawnError::MissingStdio(script.program.clone()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        tokio::spawn(run_stdout_reader(stdout, event_tx.clone()));
        tokio::spawn(run_stderr_reader(stderr, stderr_tail.clone()));
        tokio::spawn(run_supervisor(child, stdin, cmd_rx, event_tx));

        Ok((
            Self {
                cmd_tx,
                spawn_command,
                stderr_tail,
            },
            TransportEvents::new(event_rx),
        ))
    }

    pub(crate) fn send(&self, msg: Value) -> Result<(), WorkerPoolError> {
        self.cmd_tx
            .send(ProcessCommand::Send(msg))
            .map_err(|_| WorkerPoolError::WorkerTerminated)
    }

    pub(crate) fn kill(&self) {
        tracing::debug!(command = %self.spawn_command, "killing process-substrate worker");
        let _ = self.cmd_tx.send(ProcessCommand::Kill);
    }

    pub(crate) fn diagnostics(&self) -> TransportDiagnostics {
        let stderr_tail = self.stderr_tail.lock().unwrap_or_else(|e| e.into_inner());
        let stderr_tail = if stderr_tail.is_empty() {
            None
        } else {
            Some(stderr_tail.iter().cloned().collect::<Vec<_>>().join("\n"))
        };
        TransportDiagnostics {
            spawn_command: Some(self.spawn_command.clone()),
            stderr_tail,
        }
    }
}

async fn run_stdout_reader(
    stdout: tokio::process::ChildStdout,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => {
                        if event_tx.send(TransportEvent::Message(value)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = event_tx.send(TransportEvent::Error(format!(
                            "malformed message from worker: {err}"
                        )));
                    }
                }
            }
            Ok(None) => return,
            Err(err) => {
                let _ = event_tx.send(TransportEvent::Error(format!("stdout read error: {err}")));
                return;
            }
        }
    }
}

async fn run_stderr_reader(
    stderr: tokio::process::ChildStderr,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut tail = stderr_tail.lock().unwrap_or_else(|e| e.into_inner());
        if tail.len() >= STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

async fn run_supervisor(
    mut child: Child,
    mut stdin: tokio::process::ChildStdin,
    mut cmd_rx: mpsc::UnboundedReceiver<ProcessCommand>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ProcessCommand::Send(msg)) => {
                        let mut line = match serde_json::to_string(&msg) {
                            Ok(line) => line,
                            Err(err) => {
                                let _ = event_tx.send(TransportEvent::Error(format!("failed to encode request: {err}")));
                                continue;
                            }
                        };
                        line.push('\n');
                        if stdin.write_all(line.as_bytes()).await.is_err() {
                            // The child closed its stdin; the exit watcher below
                            // will report the exit once the process actually dies.
                        }
                    }
                    Some(ProcessCommand::Kill) | None => {
                        let _ = child.start_kill();
                        break;
                    }
                }
            }
            status = child.wait() => {
                let status = status.ok();
                tracing::debug!(?status, "worker process exited");
                let _ = event_tx.send(TransportEvent::Exit {
                    exit_code: status.and_then(|s| s.code()),
                    signal: unix_signal(status),
                });
                return;
            }
        }
    }

    // Killed on request: still wait for the OS to reap the child so the
    // exit event carries an accurate (if synthetic) signal/code pair.
    let status = child.wait().await.ok();
    tracing::debug!(?status, "worker process reaped after kill");
    let _ = event_tx.send(TransportEvent::Exit {
        exit_code: status.and_then(|s| s.code()),
        signal: unix_signal(status),
    });
}

#[cfg(unix)]
fn unix_signal(status: Option<std::process::ExitStatus>) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.and_then(|s| s.signal())
}

#[cfg(not(unix))]
fn unix_signal(_status: Option<std::process::ExitStatus>) -> Option<i32> {
    None
}
