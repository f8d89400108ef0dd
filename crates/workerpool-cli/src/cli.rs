use std::time::Duration;

use clap::Parser;

fn default_workers() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn parse_millis(input: &str) -> Result<Duration, String> {
    input
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| format!("invalid millisecond duration: {input:?}"))
}

/// Demonstration CLI for `workerpool-engine`: spawns a pool of default
/// workers, submits a batch of synthetic `echo`/`stream` tasks, prints the
/// pool's event stream as it drains, and exits cleanly on Ctrl-C.
#[derive(Debug, Clone, Parser)]
#[command(name = "workerpool-cli", version, about = "workerpool-engine demo")]
pub struct Cli {
    /// Number of workers to keep warm in the pool.
    #[arg(short = 'w', long, env = "WORKERPOOL_WORKERS", default_value_t = default_workers())]
    pub workers: usize,

    /// Maximum in-flight tasks per worker.
    #[arg(long, env = "WORKERPOOL_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,

    /// Number of synthetic `echo` tasks to submit before streaming demos.
    #[arg(short = 't', long, env = "WORKERPOOL_TASKS", default_value_t = 8)]
    pub tasks: usize,

    /// Also submit one `stream` task per worker, printing its events live.
    #[arg(long, env = "WORKERPOOL_STREAM_DEMO", default_value_t = true)]
    pub stream_demo: bool,

    /// Per-task timeout; unset means no timeout.
    #[arg(long, env = "WORKERPOOL_TASK_TIMEOUT_MS", value_parser = parse_millis)]
    pub task_timeout: Option<Duration>,
}
