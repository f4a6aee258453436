use portlink_wire::{ClientMessage, Envelope, HostMessage, Rpc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::cmd::{DecodeArgs, Direction};
use crate::exit::{wire_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty, OutputFormat};

#[derive(Debug, Serialize, PartialEq)]
struct DecodedEnvelope {
    direction: &'static str,
    action: u8,
    action_name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let decoded = decode(args.direction, args.envelope.as_bytes())?;

    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&decoded),
        OutputFormat::Table => print_fields(&rows(&decoded)),
        OutputFormat::Pretty => print_pretty("Envelope", &rows(&decoded)),
    }
    Ok(SUCCESS)
}

fn decode(direction: Direction, src: &[u8]) -> CliResult<DecodedEnvelope> {
    match direction {
        Direction::Host => {
            let msg = HostMessage::decode(src).map_err(|err| wire_error("decode failed", err))?;
            Ok(describe(&msg))
        }
        Direction::Client => {
            let msg = ClientMessage::decode(src).map_err(|err| wire_error("decode failed", err))?;
            Ok(describe(&msg))
        }
    }
}

fn describe<E: Envelope>(msg: &E) -> DecodedEnvelope {
    let mut out = DecodedEnvelope {
        direction: E::DIRECTION,
        action: msg.action_code(),
        action_name: msg.action_name(),
        event_name: None,
        sequence: None,
        signal: None,
        payload: None,
    };
    let Some(rpc) = msg.rpc() else {
        return out;
    };

    out.event_name = Some(rpc.event_name().to_string());
    out.sequence = rpc.sequence();
    let payload = match rpc {
        Rpc::Event { payload, .. } | Rpc::Response { payload, .. } => json!(payload),
        Rpc::Request {
            payload, signal, ..
        } => {
            out.signal = Some(*signal);
            json!(payload)
        }
        Rpc::ResponseError { message, .. } => json!(message),
        Rpc::Abort { reason, .. } => json!({ "reason": reason }),
    };
    out.payload = Some(payload);
    out
}

fn rows(decoded: &DecodedEnvelope) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("direction", decoded.direction.to_string()),
        (
            "action",
            format!("{} ({})", decoded.action_name, decoded.action),
        ),
    ];
    if let Some(event_name) = &decoded.event_name {
        rows.push(("event", event_name.clone()));
    }
    if let Some(sequence) = decoded.sequence {
        rows.push(("sequence", sequence.to_string()));
    }
    if let Some(signal) = decoded.signal {
        rows.push(("signal", signal.to_string()));
    }
    if let Some(payload) = &decoded.payload {
        rows.push(("payload", payload.to_string()));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::DATA_INVALID;

    #[test]
    fn describes_handshake() {
        let decoded = decode(Direction::Client, br#"{"action":0}"#).unwrap();
        assert_eq!(decoded.action_name, "Syn");
        assert_eq!(decoded.direction, "client");
        assert!(decoded.event_name.is_none());
    }

    #[test]
    fn describes_cancellable_request() {
        let decoded = decode(
            Direction::Host,
            br#"{"action":2,"data":{"eventName":"load","payload":[1],"sequence":3,"signal":true}}"#,
        )
        .unwrap();
        assert_eq!(
            decoded,
            DecodedEnvelope {
                direction: "host",
                action: 2,
                action_name: "MessageWithResponse",
                event_name: Some("load".into()),
                sequence: Some(3),
                signal: Some(true),
                payload: Some(json!([1])),
            }
        );
    }

    #[test]
    fn same_code_differs_by_direction() {
        let host = decode(Direction::Host, br#"{"action":5,"data":{"eventName":"e","sequence":1}}"#)
            .unwrap();
        assert_eq!(host.action_name, "AbortMessage");
        assert_eq!(host.payload, Some(json!({ "reason": "Abort" })));

        let client = decode(
            Direction::Client,
            br#"{"action":5,"data":{"eventName":"e","payload":"boom","sequence":1}}"#,
        )
        .unwrap();
        assert_eq!(client.action_name, "ResponseError");
        assert_eq!(client.payload, Some(json!("boom")));
    }

    #[test]
    fn malformed_envelope_is_data_invalid() {
        let err = decode(Direction::Host, br#"{"action":9}"#).expect_err("unknown action");
        assert_eq!(err.code, DATA_INVALID);
    }
}
