//! The bundled default worker: a binary that speaks the
//! `workerpool-engine::protocol` wire format over stdio, performs the
//! readiness handshake, and exposes a built-in `methods` RPC plus two
//! demonstration methods (`echo`, `stream`) used by the engine's
//! integration tests and by `workerpool-cli`'s demo mode.
//!
//! Grounded in `ProcessTransport`'s newline-delimited-JSON framing
//! (`workerpool-transport/src/process.rs`): one JSON value per line, in
//! both directions.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use workerpool_core::ErrorDescriptor;
use workerpool_engine::protocol::{self, Request, TERMINATE_SIGNAL};

const METHOD_NAMES: &[&str] = &["methods", "echo", "stream"];
const STREAM_EVENTS: &[&str] = &["a", "b", "c"];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(stdin).lines();

    if write_line(&mut stdout, &Value::String(protocol::READY_SIGNAL.to_string()))
        .await
        .is_err()
    {
        return;
    }
    tracing::debug!("default worker signalled readiness");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%err, "failed to read request from handler");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        if is_terminate_signal(&line) {
            tracing::debug!("received terminate signal; shutting down gracefully");
            break;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(%err, %line, "dropping malformed request");
                continue;
            }
        };

        if handle_request(&mut stdout, &request).await.is_err() {
            break;
        }
    }
}

fn is_terminate_signal(line: &str) -> bool {
    matches!(serde_json::from_str::<Value>(line), Ok(Value::String(s)) if s == TERMINATE_SIGNAL)
}

async fn handle_request(
    stdout: &mut (impl AsyncWrite + Unpin),
    request: &Request,
) -> std::io::Result<()> {
    match request.method.as_str() {
        "methods" => {
            let response = protocol::encode_result(request.id, serde_json::json!(METHOD_NAMES));
            write_line(stdout, &response).await
        }
        "echo" => {
            let value = request.params.first().cloned().unwrap_or(Value::Null);
            let response = protocol::encode_result(request.id, value);
            write_line(stdout, &response).await
        }
        "stream" => {
            for tick in STREAM_EVENTS {
                let event = protocol::encode_event(request.id, serde_json::json!(tick));
                write_line(stdout, &event).await?;
            }
            let response = protocol::encode_result(request.id, serde_json::json!("done"));
            write_line(stdout, &response).await
        }
        other => {
            let error = ErrorDescriptor::named("RangeError", format!("unknown method {other:?}"));
            let response = protocol::encode_error(request.id, &error);
            write_line(stdout, &response).await
        }
    }
}

async fn write_line(stdout: &mut (impl AsyncWrite + Unpin), value: &Value) -> std::io::Result<()> {
    let mut line = serde_json::to_string(value).expect("protocol values always serialise");
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_its_single_param() {
        let mut buf = Vec::new();
        let request = Request { id: 1, method: "echo".to_string(), params: vec![serde_json::json!(42)] };
        handle_request(&mut buf, &request).await.unwrap();
        let line = String::from_utf8(buf).unwrap();
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value, serde_json::json!({"id": 1, "result": 42}));
    }

    #[tokio::test]
    async fn methods_lists_the_built_ins() {
        let mut buf = Vec::new();
        let request = Request { id: 2, method: "methods".to_string(), params: Vec::new() };
        handle_request(&mut buf, &request).await.unwrap();
        let line = String::from_utf8(buf).unwrap();
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["result"], serde_json::json!(METHOD_NAMES));
    }

    #[tokio::test]
    async fn stream_emits_three_events_then_a_terminal_result() {
        let mut buf = Vec::new();
        let request = Request { id: 3, method: "stream".to_string(), params: Vec::new() };
        handle_request(&mut buf, &request).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["payload"], serde_json::json!("a"));
        assert_eq!(lines[1]["payload"], serde_json::json!("b"));
        assert_eq!(lines[2]["payload"], serde_json::json!("c"));
        assert_eq!(lines[3]["result"], serde_json::json!("done"));
    }

    #[tokio::test]
    async fn unknown_method_returns_a_range_error() {
        let mut buf = Vec::new();
        let request = Request { id: 4, method: "bogus".to_string(), params: Vec::new() };
        handle_request(&mut buf, &request).await.unwrap();
        let line = String::from_utf8(buf).unwrap();
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["error"]["name"], serde_json::json!("RangeError"));
    }

    #[test]
    fn terminate_signal_is_recognised_as_a_bare_json_string() {
        assert!(is_terminate_signal(&format!("\"{TERMINATE_SIGNAL}\"")));
        assert!(!is_terminate_signal("\"ready\""));
        assert!(!is_terminate_signal("{\"id\": 1}"));
    }
}
