use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::action::{ClientAction, HostAction};
use crate::error::{Result, WireError};

/// Default upper bound for a decoded envelope: 16 MiB.
pub const DEFAULT_MAX_ENVELOPE: usize = 16 * 1024 * 1024;

/// Upper bound for envelopes arriving on the window scope before a private
/// port exists. Handshake envelopes carry no payload.
pub const MAX_HANDSHAKE_ENVELOPE: usize = 16 * 1024;

/// Reason carried by a cancellation when the canceller gave none.
pub const DEFAULT_ABORT_REASON: &str = "Abort";

/// Body of a post-handshake message. Identical in both directions; only the
/// action code differs.
#[derive(Debug, Clone, PartialEq)]
pub enum Rpc {
    /// Fire-and-forget event.
    Event {
        event_name: String,
        payload: Vec<Value>,
    },
    /// Event expecting a response tagged with `sequence`.
    Request {
        event_name: String,
        payload: Vec<Value>,
        sequence: u64,
        /// The requester may cancel and asks the receiver to expose a
        /// cancellation signal to its handlers.
        signal: bool,
    },
    /// Ordered results of every handler for the request `sequence`.
    Response {
        event_name: String,
        payload: Vec<Value>,
        sequence: u64,
    },
    /// First handler failure for the request `sequence`.
    ResponseError {
        event_name: String,
        message: String,
        sequence: u64,
    },
    /// Cancellation of the request `sequence`.
    Abort {
        event_name: String,
        reason: String,
        sequence: u64,
    },
}

impl Rpc {
    /// Event name the message refers to.
    pub fn event_name(&self) -> &str {
        match self {
            Rpc::Event { event_name, .. }
            | Rpc::Request { event_name, .. }
            | Rpc::Response { event_name, .. }
            | Rpc::ResponseError { event_name, .. }
            | Rpc::Abort { event_name, .. } => event_name,
        }
    }

    /// Sequence number, for every kind except fire-and-forget events.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Rpc::Event { .. } => None,
            Rpc::Request { sequence, .. }
            | Rpc::Response { sequence, .. }
            | Rpc::ResponseError { sequence, .. }
            | Rpc::Abort { sequence, .. } => Some(*sequence),
        }
    }
}

/// A message travelling from the client to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Syn,
    Ack,
    Rpc(Rpc),
}

/// A message travelling from the host to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    SynAck,
    Rpc(Rpc),
}

/// Encoding and decoding shared by both directions.
pub trait Envelope: Sized {
    /// Direction label used in errors and logs.
    const DIRECTION: &'static str;

    /// Action code of this message.
    fn action_code(&self) -> u8;

    /// Action name of this message.
    fn action_name(&self) -> &'static str;

    /// Wrap a post-handshake body.
    fn from_rpc(rpc: Rpc) -> Self;

    /// Post-handshake body, if this is not a handshake message.
    fn rpc(&self) -> Option<&Rpc>;

    /// Split into the post-handshake body, or give the handshake message back.
    fn into_rpc(self) -> std::result::Result<Rpc, Self>;

    /// Encode into the JSON wire form.
    fn encode(&self) -> Result<Bytes>;

    /// Decode from the JSON wire form, rejecting anything over
    /// [`DEFAULT_MAX_ENVELOPE`].
    fn decode(src: &[u8]) -> Result<Self> {
        Self::decode_with_limit(src, DEFAULT_MAX_ENVELOPE)
    }

    /// Decode from the JSON wire form with an explicit size limit.
    fn decode_with_limit(src: &[u8], max: usize) -> Result<Self>;
}

impl Envelope for ClientMessage {
    const DIRECTION: &'static str = "client";

    fn action_code(&self) -> u8 {
        self.action().code()
    }

    fn action_name(&self) -> &'static str {
        self.action().name()
    }

    fn from_rpc(rpc: Rpc) -> Self {
        ClientMessage::Rpc(rpc)
    }

    fn rpc(&self) -> Option<&Rpc> {
        match self {
            ClientMessage::Rpc(rpc) => Some(rpc),
            _ => None,
        }
    }

    fn into_rpc(self) -> std::result::Result<Rpc, Self> {
        match self {
            ClientMessage::Rpc(rpc) => Ok(rpc),
            other => Err(other),
        }
    }

    fn encode(&self) -> Result<Bytes> {
        let data = match self {
            // The initiation envelope carries no data at all.
            ClientMessage::Syn => None,
            ClientMessage::Ack => Some(Value::Object(Map::new())),
            ClientMessage::Rpc(rpc) => Some(encode_rpc(rpc)?),
        };
        write_envelope(self.action_code(), data)
    }

    fn decode_with_limit(src: &[u8], max: usize) -> Result<Self> {
        let raw = read_envelope(src, max)?;
        let action = ClientAction::from_code(raw.action).ok_or(WireError::UnknownAction {
            direction: Self::DIRECTION,
            code: raw.action,
        })?;
        let name = action.name();

        Ok(match action {
            ClientAction::Syn => ClientMessage::Syn,
            ClientAction::Ack => ClientMessage::Ack,
            ClientAction::Message => ClientMessage::Rpc(decode_event(name, raw.data)?),
            ClientAction::MessageWithResponse => {
                ClientMessage::Rpc(decode_request(name, raw.data)?)
            }
            ClientAction::Response => ClientMessage::Rpc(decode_response(name, raw.data)?),
            ClientAction::ResponseError => {
                ClientMessage::Rpc(decode_response_error(name, raw.data)?)
            }
            ClientAction::AbortMessage => ClientMessage::Rpc(decode_abort(name, raw.data)?),
        })
    }
}

impl ClientMessage {
    /// Action this message is sent with.
    pub fn action(&self) -> ClientAction {
        match self {
            ClientMessage::Syn => ClientAction::Syn,
            ClientMessage::Ack => ClientAction::Ack,
            ClientMessage::Rpc(rpc) => match rpc {
                Rpc::Event { .. } => ClientAction::Message,
                Rpc::Request { .. } => ClientAction::MessageWithResponse,
                Rpc::Response { .. } => ClientAction::Response,
                Rpc::ResponseError { .. } => ClientAction::ResponseError,
                Rpc::Abort { .. } => ClientAction::AbortMessage,
            },
        }
    }
}

impl Envelope for HostMessage {
    const DIRECTION: &'static str = "host";

    fn action_code(&self) -> u8 {
        self.action().code()
    }

    fn action_name(&self) -> &'static str {
        self.action().name()
    }

    fn from_rpc(rpc: Rpc) -> Self {
        HostMessage::Rpc(rpc)
    }

    fn rpc(&self) -> Option<&Rpc> {
        match self {
            HostMessage::Rpc(rpc) => Some(rpc),
            HostMessage::SynAck => None,
        }
    }

    fn into_rpc(self) -> std::result::Result<Rpc, Self> {
        match self {
            HostMessage::Rpc(rpc) => Ok(rpc),
            other => Err(other),
        }
    }

    fn encode(&self) -> Result<Bytes> {
        let data = match self {
            HostMessage::SynAck => Value::Object(Map::new()),
            HostMessage::Rpc(rpc) => encode_rpc(rpc)?,
        };
        write_envelope(self.action_code(), Some(data))
    }

    fn decode_with_limit(src: &[u8], max: usize) -> Result<Self> {
        let raw = read_envelope(src, max)?;
        let action = HostAction::from_code(raw.action).ok_or(WireError::UnknownAction {
            direction: Self::DIRECTION,
            code: raw.action,
        })?;
        let name = action.name();

        Ok(match action {
            HostAction::SynAck => HostMessage::SynAck,
            HostAction::Message => HostMessage::Rpc(decode_event(name, raw.data)?),
            HostAction::MessageWithResponse => HostMessage::Rpc(decode_request(name, raw.data)?),
            HostAction::Response => HostMessage::Rpc(decode_response(name, raw.data)?),
            HostAction::ResponseError => HostMessage::Rpc(decode_response_error(name, raw.data)?),
            HostAction::AbortMessage => HostMessage::Rpc(decode_abort(name, raw.data)?),
        })
    }
}

impl HostMessage {
    /// Action this message is sent with.
    pub fn action(&self) -> HostAction {
        match self {
            HostMessage::SynAck => HostAction::SynAck,
            HostMessage::Rpc(rpc) => match rpc {
                Rpc::Event { .. } => HostAction::Message,
                Rpc::Request { .. } => HostAction::MessageWithResponse,
                Rpc::Response { .. } => HostAction::Response,
                Rpc::ResponseError { .. } => HostAction::ResponseError,
                Rpc::Abort { .. } => HostAction::AbortMessage,
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    action: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventData {
    event_name: String,
    #[serde(default, deserialize_with = "payload_list")]
    payload: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestData {
    event_name: String,
    #[serde(default, deserialize_with = "payload_list")]
    payload: Vec<Value>,
    sequence: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    signal: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseData {
    event_name: String,
    #[serde(default, deserialize_with = "payload_list")]
    payload: Vec<Value>,
    sequence: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseErrorData {
    event_name: String,
    #[serde(default)]
    payload: Value,
    sequence: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AbortData {
    event_name: String,
    #[serde(default)]
    payload: Option<AbortPayload>,
    sequence: u64,
}

#[derive(Serialize, Deserialize)]
struct AbortPayload {
    #[serde(default)]
    reason: Option<Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

// A lone non-array payload is treated as a single positional argument.
fn payload_list<'de, D>(deserializer: D) -> std::result::Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

fn write_envelope(action: u8, data: Option<Value>) -> Result<Bytes> {
    let raw = RawEnvelope { action, data };
    Ok(Bytes::from(serde_json::to_vec(&raw)?))
}

fn read_envelope(src: &[u8], max: usize) -> Result<RawEnvelope> {
    if src.len() > max {
        return Err(WireError::TooLarge {
            size: src.len(),
            max,
        });
    }
    Ok(serde_json::from_slice(src)?)
}

fn encode_rpc(rpc: &Rpc) -> Result<Value> {
    let value = match rpc {
        Rpc::Event {
            event_name,
            payload,
        } => serde_json::to_value(EventData {
            event_name: event_name.clone(),
            payload: payload.clone(),
        })?,
        Rpc::Request {
            event_name,
            payload,
            sequence,
            signal,
        } => serde_json::to_value(RequestData {
            event_name: event_name.clone(),
            payload: payload.clone(),
            sequence: *sequence,
            signal: *signal,
        })?,
        Rpc::Response {
            event_name,
            payload,
            sequence,
        } => serde_json::to_value(ResponseData {
            event_name: event_name.clone(),
            payload: payload.clone(),
            sequence: *sequence,
        })?,
        Rpc::ResponseError {
            event_name,
            message,
            sequence,
        } => serde_json::to_value(ResponseErrorData {
            event_name: event_name.clone(),
            payload: Value::String(message.clone()),
            sequence: *sequence,
        })?,
        Rpc::Abort {
            event_name,
            reason,
            sequence,
        } => serde_json::to_value(AbortData {
            event_name: event_name.clone(),
            payload: Some(AbortPayload {
                reason: Some(Value::String(reason.clone())),
            }),
            sequence: *sequence,
        })?,
    };
    Ok(value)
}

fn decode_data<T: DeserializeOwned>(action: &'static str, data: Option<Value>) -> Result<T> {
    let data = data.ok_or_else(|| WireError::Malformed {
        action,
        reason: "missing data".to_string(),
    })?;
    serde_json::from_value(data).map_err(|err| WireError::Malformed {
        action,
        reason: err.to_string(),
    })
}

fn check_sequence(action: &'static str, sequence: u64) -> Result<u64> {
    if sequence == 0 {
        return Err(WireError::Malformed {
            action,
            reason: "sequence must be positive".to_string(),
        });
    }
    Ok(sequence)
}

fn decode_event(action: &'static str, data: Option<Value>) -> Result<Rpc> {
    let data: EventData = decode_data(action, data)?;
    Ok(Rpc::Event {
        event_name: data.event_name,
        payload: data.payload,
    })
}

fn decode_request(action: &'static str, data: Option<Value>) -> Result<Rpc> {
    let data: RequestData = decode_data(action, data)?;
    Ok(Rpc::Request {
        event_name: data.event_name,
        payload: data.payload,
        sequence: check_sequence(action, data.sequence)?,
        signal: data.signal,
    })
}

fn decode_response(action: &'static str, data: Option<Value>) -> Result<Rpc> {
    let data: ResponseData = decode_data(action, data)?;
    Ok(Rpc::Response {
        event_name: data.event_name,
        payload: data.payload,
        sequence: check_sequence(action, data.sequence)?,
    })
}

fn decode_response_error(action: &'static str, data: Option<Value>) -> Result<Rpc> {
    let data: ResponseErrorData = decode_data(action, data)?;
    let message = match data.payload {
        Value::String(message) => message,
        other => other.to_string(),
    };
    Ok(Rpc::ResponseError {
        event_name: data.event_name,
        message,
        sequence: check_sequence(action, data.sequence)?,
    })
}

fn decode_abort(action: &'static str, data: Option<Value>) -> Result<Rpc> {
    let data: AbortData = decode_data(action, data)?;
    let reason = match data.payload.and_then(|payload| payload.reason) {
        Some(Value::String(reason)) => reason,
        _ => DEFAULT_ABORT_REASON.to_string(),
    };
    Ok(Rpc::Abort {
        event_name: data.event_name,
        reason,
        sequence: check_sequence(action, data.sequence)?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn wire(msg: &impl Envelope) -> Value {
        serde_json::from_slice(&msg.encode().unwrap()).unwrap()
    }

    #[test]
    fn syn_carries_no_data() {
        assert_eq!(wire(&ClientMessage::Syn), json!({ "action": 0 }));
        assert_eq!(wire(&ClientMessage::Ack), json!({ "action": 1, "data": {} }));
        assert_eq!(wire(&HostMessage::SynAck), json!({ "action": 0, "data": {} }));
    }

    #[test]
    fn event_wire_shape() {
        let msg = HostMessage::Rpc(Rpc::Event {
            event_name: "ping".to_string(),
            payload: vec![json!(1), json!("two")],
        });
        assert_eq!(
            wire(&msg),
            json!({ "action": 1, "data": { "eventName": "ping", "payload": [1, "two"] } })
        );
    }

    #[test]
    fn request_signal_flag_only_when_set() {
        let plain = ClientMessage::Rpc(Rpc::Request {
            event_name: "get".to_string(),
            payload: vec![],
            sequence: 3,
            signal: false,
        });
        assert_eq!(
            wire(&plain),
            json!({ "action": 3, "data": { "eventName": "get", "payload": [], "sequence": 3 } })
        );

        let cancellable = ClientMessage::Rpc(Rpc::Request {
            event_name: "get".to_string(),
            payload: vec![],
            sequence: 4,
            signal: true,
        });
        assert_eq!(wire(&cancellable)["data"]["signal"], json!(true));
    }

    #[test]
    fn error_and_abort_payload_shapes() {
        let err = HostMessage::Rpc(Rpc::ResponseError {
            event_name: "get".to_string(),
            message: "Error: boom".to_string(),
            sequence: 9,
        });
        assert_eq!(
            wire(&err),
            json!({ "action": 4, "data": { "eventName": "get", "payload": "Error: boom", "sequence": 9 } })
        );

        let abort = ClientMessage::Rpc(Rpc::Abort {
            event_name: "get".to_string(),
            reason: "user left".to_string(),
            sequence: 9,
        });
        assert_eq!(
            wire(&abort),
            json!({ "action": 6, "data": { "eventName": "get", "payload": { "reason": "user left" }, "sequence": 9 } })
        );
    }

    #[test]
    fn decodes_request_from_peer() {
        let bytes = br#"{"action":2,"data":{"eventName":"load","payload":[{"id":7}],"sequence":12,"signal":true}}"#;
        let msg = HostMessage::decode(bytes).unwrap();
        assert_eq!(
            msg,
            HostMessage::Rpc(Rpc::Request {
                event_name: "load".to_string(),
                payload: vec![json!({ "id": 7 })],
                sequence: 12,
                signal: true,
            })
        );
    }

    #[test]
    fn scalar_payload_becomes_single_argument() {
        let bytes = br#"{"action":2,"data":{"eventName":"e","payload":"solo"}}"#;
        let msg = ClientMessage::decode(bytes).unwrap();
        assert_eq!(
            msg.rpc().unwrap(),
            &Rpc::Event {
                event_name: "e".to_string(),
                payload: vec![json!("solo")],
            }
        );
    }

    #[test]
    fn abort_without_reason_uses_default() {
        let bytes = br#"{"action":5,"data":{"eventName":"e","sequence":2}}"#;
        let msg = HostMessage::decode(bytes).unwrap();
        match msg.rpc().unwrap() {
            Rpc::Abort { reason, .. } => assert_eq!(reason, DEFAULT_ABORT_REASON),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_string_error_payload_is_stringified() {
        let bytes = br#"{"action":5,"data":{"eventName":"e","payload":{"code":1},"sequence":2}}"#;
        let msg = ClientMessage::decode(bytes).unwrap();
        match msg.rpc().unwrap() {
            Rpc::ResponseError { message, .. } => assert_eq!(message, r#"{"code":1}"#),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_action() {
        let result = HostMessage::decode(br#"{"action":6,"data":{}}"#);
        assert!(matches!(
            result,
            Err(WireError::UnknownAction {
                direction: "host",
                code: 6
            })
        ));
    }

    #[test]
    fn rejects_missing_sequence() {
        let result =
            ClientMessage::decode(br#"{"action":4,"data":{"eventName":"e","payload":[]}}"#);
        assert!(matches!(
            result,
            Err(WireError::Malformed {
                action: "Response",
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_sequence() {
        let result = HostMessage::decode(
            br#"{"action":2,"data":{"eventName":"e","payload":[],"sequence":0}}"#,
        );
        assert!(matches!(result, Err(WireError::Malformed { .. })));
    }

    #[test]
    fn rejects_missing_data_for_rpc_kinds() {
        let result = HostMessage::decode(br#"{"action":1}"#);
        assert!(matches!(result, Err(WireError::Malformed { .. })));
    }

    #[test]
    fn rejects_non_envelope_json() {
        assert!(matches!(
            ClientMessage::decode(b"{not-json"),
            Err(WireError::Json(_))
        ));
        assert!(matches!(
            ClientMessage::decode(br#"{"kind":"syn"}"#),
            Err(WireError::Json(_))
        ));
    }

    #[test]
    fn enforces_size_limit() {
        let big = format!(
            r#"{{"action":2,"data":{{"eventName":"e","payload":["{}"]}}}}"#,
            "x".repeat(64)
        );
        let result = ClientMessage::decode_with_limit(big.as_bytes(), 32);
        assert!(matches!(result, Err(WireError::TooLarge { max: 32, .. })));
    }
}
