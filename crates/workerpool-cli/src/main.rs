mod cli;
mod shutdown;

use clap::Parser;
use workerpool_engine::{PoolEvent, PoolOptions, WorkerOptions, WorkerScript, start_pool};

use crate::cli::Cli;
use crate::shutdown::{ShutdownController, ShutdownEvent, spawn_ctrl_c_handler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let worker_options = WorkerOptions::default().with_concurrency(cli.concurrency);
    let pool_options = PoolOptions {
        min_workers: cli.workers,
        max_workers: cli.workers,
        worker_options,
        default_task_timeout: cli.task_timeout,
    };

    println!(
        "workerpool-cli: starting {} worker(s), concurrency={}",
        cli.workers, cli.concurrency
    );

    let pool = start_pool(WorkerScript::Default, pool_options);
    let mut events = pool.subscribe();

    let shutdown = std::sync::Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown.clone(), shutdown_tx);

    tokio::spawn({
        let pool_events_task = async move {
            while let Ok(event) = events.recv().await {
                log_pool_event(&event);
            }
        };
        pool_events_task
    });

    let echoes = (0..cli.tasks)
        .map(|n| pool.exec("echo", vec![serde_json::json!(n)]))
        .collect::<Vec<_>>();

    let stream_task = if cli.stream_demo {
        let ticks = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_ticks = ticks.clone();
        let sink: workerpool_engine::EventSink = Box::new(move |payload| {
            sink_ticks.lock().unwrap().push(payload);
        });
        Some((ticks, pool.exec_with_events("stream", Vec::new(), Some(sink))))
    } else {
        None
    };

    tokio::select! {
        results = futures_join_all(echoes) => {
            for (n, result) in results.into_iter().enumerate() {
                match result {
                    Ok(value) => println!("echo({n}) -> {value}"),
                    Err(err) => eprintln!("echo({n}) failed: {err}"),
                }
            }
        }
        Some(event) = shutdown_rx.recv() => {
            return handle_early_shutdown(pool, event).await;
        }
    }

    if let Some((ticks, task)) = stream_task {
        tokio::select! {
            result = task => {
                match result {
                    Ok(result) => {
                        println!("stream -> events={:?} result={result}", ticks.lock().unwrap());
                    }
                    Err(err) => eprintln!("stream failed: {err}"),
                }
            }
            Some(event) = shutdown_rx.recv() => {
                return handle_early_shutdown(pool, event).await;
            }
        }
    }

    println!("workerpool-cli: done, stopping pool");
    pool.request_stop();
    tokio::select! {
        () = pool.wait() => {}
        Some(ShutdownEvent::Immediate) = shutdown_rx.recv() => {
            println!("workerpool-cli: stopping immediately");
            std::process::exit(130);
        }
    }

    Ok(())
}

/// Ctrl-C arrived while tasks were still in flight: ask the pool to drain
/// on the first signal, or exit without waiting on a second.
async fn handle_early_shutdown(pool: workerpool_engine::WorkerPool, event: ShutdownEvent) -> anyhow::Result<()> {
    match event {
        ShutdownEvent::Graceful => {
            println!("workerpool-cli: Ctrl-C received, draining in-flight tasks (press again to force)");
            pool.request_stop();
            pool.wait().await;
            Ok(())
        }
        ShutdownEvent::Immediate => {
            println!("workerpool-cli: stopping immediately");
            std::process::exit(130);
        }
    }
}

fn log_pool_event(event: &PoolEvent) {
    match event {
        PoolEvent::Started => tracing::info!("pool started"),
        PoolEvent::WorkerSpawned { worker_id } => tracing::info!(%worker_id, "worker spawned"),
        PoolEvent::WorkerReady { worker_id } => tracing::info!(%worker_id, "worker ready"),
        PoolEvent::WorkerExited { worker_id, reason } => {
            tracing::info!(%worker_id, ?reason, "worker exited");
        }
        PoolEvent::TaskCompleted { worker_id, method } => {
            tracing::debug!(%worker_id, %method, "task completed");
        }
        PoolEvent::TaskFailed { worker_id, method, error } => {
            tracing::warn!(%worker_id, %method, %error, "task failed");
        }
        PoolEvent::StopRequested => tracing::info!("stop requested"),
        PoolEvent::Stopped => tracing::info!("pool stopped"),
    }
}

/// A minimal stand-in for `futures::future::join_all` so the demo binary
/// doesn't need the `futures` crate for one call site: drive every task to
/// completion concurrently, preserving submission order in the result.
async fn futures_join_all(
    tasks: Vec<workerpool_core::Task<serde_json::Value>>,
) -> Vec<Result<serde_json::Value, workerpool_core::WorkerPoolError>> {
    let handles: Vec<_> = tasks.into_iter().map(tokio::spawn).collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.expect("task future panicked"));
    }
    results
}
