//! The wire protocol spoken between a `WorkerHandler` and the process or
//! thread it supervises, and the codec that turns one raw transport
//! message into something the handler state machine can act on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use workerpool_core::ErrorDescriptor;

/// The literal a worker sends once it has finished initialising.
pub const READY_SIGNAL: &str = "ready";

/// The literal a handler sends to ask a process-substrate worker to shut
/// down gracefully.
pub const TERMINATE_SIGNAL: &str = "__workerpool-terminate__";

/// One outbound call to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Task id, unique and strictly increasing within one handler.
    pub id: u64,
    /// Method name the worker should dispatch to.
    pub method: String,
    /// Positional parameters, passed through as opaque JSON.
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Request {
    /// Encode as the `Value` handed to [`workerpool_transport::Transport::send`].
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("Request always serialises")
    }
}

/// One inbound message from a worker, after the bare `"ready"` string has
/// already been ruled out by [`InboundMessage::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A terminal, successful result.
    Result {
        /// The task this settles.
        id: u64,
        /// The worker's returned value.
        result: Value,
    },
    /// A terminal failure.
    Error {
        /// The task this settles.
        id: u64,
        /// The decoded error.
        error: ErrorDescriptor,
    },
    /// A non-terminal event payload; more messages with this `id` may
    /// follow, ending in exactly one `Result` or `Error`.
    Event {
        /// The task this event belongs to.
        id: u64,
        /// The event payload.
        payload: Value,
    },
}

impl Response {
    /// The task id this message belongs to, regardless of variant.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Response::Result { id, .. } | Response::Error { id, .. } | Response::Event { id, .. } => *id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RawResponse {
    id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_event: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

/// A transport message that could not be interpreted as a protocol message.
#[derive(Debug, thiserror::Error)]
#[error("malformed message from worker: {0}")]
pub struct ProtocolError(String);

/// One decoded inbound message: the readiness signal, or a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// The worker has signalled readiness.
    Ready,
    /// A response (terminal or event) to a previously sent request.
    Response(Response),
}

impl InboundMessage {
    /// Decode one raw transport message into a protocol-level message.
    pub fn decode(value: &Value) -> Result<Self, ProtocolError> {
        if value.as_str() == Some(READY_SIGNAL) {
            return Ok(InboundMessage::Ready);
        }

        let raw: RawResponse =
            serde_json::from_value(value.clone()).map_err(|err| ProtocolError(err.to_string()))?;

        if raw.is_event == Some(true) {
            let payload = raw.payload.unwrap_or(Value::Null);
            return Ok(InboundMessage::Response(Response::Event { id: raw.id, payload }));
        }
        if let Some(error) = raw.error {
            return Ok(InboundMessage::Response(Response::Error { id: raw.id, error }));
        }
        if let Some(result) = raw.result {
            return Ok(InboundMessage::Response(Response::Result { id: raw.id, result }));
        }

        Err(ProtocolError(format!(
            "response {} has neither result, error, nor an event payload",
            raw.id
        )))
    }
}

/// Encode a terminal successful response, used by worker-side binaries.
#[must_use]
pub fn encode_result(id: u64, result: Value) -> Value {
    serde_json::json!({ "id": id, "result": result })
}

/// Encode a terminal failure response.
#[must_use]
pub fn encode_error(id: u64, error: &ErrorDescriptor) -> Value {
    serde_json::json!({ "id": id, "error": error })
}

/// Encode a non-terminal event payload.
#[must_use]
pub fn encode_event(id: u64, payload: Value) -> Value {
    serde_json::json!({ "id": id, "is_event": true, "payload": payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_ready_signal() {
        let value = serde_json::json!(READY_SIGNAL);
        assert_eq!(InboundMessage::decode(&value).unwrap(), InboundMessage::Ready);
    }

    #[test]
    fn decodes_result_response() {
        let value = encode_result(3, serde_json::json!(42));
        let decoded = InboundMessage::decode(&value).unwrap();
        assert_eq!(
            decoded,
            InboundMessage::Response(Response::Result { id: 3, result: serde_json::json!(42) })
        );
    }

    #[test]
    fn event_and_terminal_response_share_an_id_but_decode_distinctly() {
        let event = InboundMessage::decode(&encode_event(1, serde_json::json!("tick"))).unwrap();
        assert_eq!(
            event,
            InboundMessage::Response(Response::Event { id: 1, payload: serde_json::json!("tick") })
        );

        let result = InboundMessage::decode(&encode_result(1, serde_json::json!("done"))).unwrap();
        assert_eq!(
            result,
            InboundMessage::Response(Response::Result { id: 1, result: serde_json::json!("done") })
        );
    }

    #[test]
    fn decodes_error_response_and_round_trips_fields() {
        let err = ErrorDescriptor::named("RangeError", "boom");
        let value = encode_error(9, &err);
        let decoded = InboundMessage::decode(&value).unwrap();
        assert_eq!(decoded, InboundMessage::Response(Response::Error { id: 9, error: err }));
    }

    #[test]
    fn rejects_a_response_with_no_recognised_payload() {
        let value = serde_json::json!({ "id": 1 });
        assert!(InboundMessage::decode(&value).is_err());
    }

    #[test]
    fn request_serialises_with_empty_params_by_default() {
        let request = Request { id: 5, method: "echo".to_string(), params: Vec::new() };
        assert_eq!(
            request.to_value(),
            serde_json::json!({ "id": 5, "method": "echo", "params": [] })
        );
    }
}
