//! End-to-end coverage over the real process substrate: spawns the
//! actual `workerpool-default-worker` binary (not a fake thread script)
//! and drives it through the full readiness handshake, an `echo` call, a
//! `stream` call, and a graceful `terminate`.

use std::path::PathBuf;

use workerpool_core::{HostEnv, Substrate};
use workerpool_engine::{EventSink, WorkerHandler, WorkerOptions, WorkerScript};

fn default_worker_options() -> WorkerOptions {
    WorkerOptions::default()
        .with_substrate(Substrate::Process)
        .with_ready_timeout(std::time::Duration::from_secs(5))
}

fn default_worker_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_workerpool-default-worker"))
}

#[tokio::test]
async fn echo_round_trips_through_the_real_binary() {
    let mut options = default_worker_options();
    options.default_worker_path = Some(default_worker_path());

    let handler = WorkerHandler::spawn(WorkerScript::Default, options, HostEnv::default())
        .await
        .unwrap();

    let result = handler.exec("echo", vec![serde_json::json!({"hello": "world"})]).await.unwrap();
    assert_eq!(result, serde_json::json!({"hello": "world"}));

    handler.terminate_and_notify(false, Some(std::time::Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn stream_emits_three_events_then_a_terminal_result_over_the_real_binary() {
    let mut options = default_worker_options();
    options.default_worker_path = Some(default_worker_path());

    let handler = WorkerHandler::spawn(WorkerScript::Default, options, HostEnv::default())
        .await
        .unwrap();

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_sink = seen.clone();
    let sink: EventSink = Box::new(move |payload| {
        seen_sink.lock().unwrap().push(payload);
    });

    let result = handler.exec_with_events("stream", Vec::new(), Some(sink)).await.unwrap();
    assert_eq!(result, serde_json::json!("done"));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![serde_json::json!("a"), serde_json::json!("b"), serde_json::json!("c")]
    );

    handler.terminate_and_notify(false, Some(std::time::Duration::from_secs(5))).await.unwrap();
}

#[tokio::test]
async fn methods_lists_the_binarys_own_method_table() {
    let mut options = default_worker_options();
    options.default_worker_path = Some(default_worker_path());

    let handler = WorkerHandler::spawn(WorkerScript::Default, options, HostEnv::default())
        .await
        .unwrap();

    let result = handler.methods().await.unwrap();
    let methods: Vec<String> = serde_json::from_value(result).unwrap();
    assert!(methods.contains(&"echo".to_string()));
    assert!(methods.contains(&"stream".to_string()));

    handler.terminate_and_notify(false, Some(std::time::Duration::from_secs(5))).await.unwrap();
}
