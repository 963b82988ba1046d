//! Socket.IO wire codec
//!
//! Engine.IO v4 frames carry Socket.IO v5 packets as text:
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,"pingTimeout":20000}   open
//! 2 / 3                                                    ping / pong
//! 40/terminal,{"token":"abc"}                              connect
//! 42/terminal,["output","hello"]                           event
//! 44/terminal,{"message":"unauthorized"}                   connect error
//! 41/terminal,                                             disconnect
//! ```
//!
//! Binary attachments are not supported.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown Engine.IO packet type: {0}")]
    UnknownEngineType(char),

    #[error("Unknown Socket.IO packet type: {0}")]
    UnknownSocketType(char),

    #[error("Binary packets are not supported")]
    Binary,

    #[error("Malformed payload: {0}")]
    Payload(String),
}

/// Engine.IO open handshake
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

/// Engine.IO frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Message(Packet),
}

/// Socket.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Client: auth payload. Server: `{"sid": ..}` acknowledgement.
    Connect { namespace: String, data: Option<Value> },
    Disconnect { namespace: String },
    Event { namespace: String, name: String, args: Vec<Value> },
    Ack { namespace: String, id: u64, args: Vec<Value> },
    ConnectError { namespace: String, data: Value },
}

impl Packet {
    pub fn namespace(&self) -> &str {
        match self {
            Packet::Connect { namespace, .. }
            | Packet::Disconnect { namespace }
            | Packet::Event { namespace, .. }
            | Packet::Ack { namespace, .. }
            | Packet::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Build an event packet with an optional single payload argument
    pub fn event(namespace: &str, name: &str, payload: Option<Value>) -> Self {
        Packet::Event {
            namespace: namespace.to_string(),
            name: name.to_string(),
            args: payload.into_iter().collect(),
        }
    }
}

impl Frame {
    /// Encode to the text form sent over the WebSocket
    pub fn encode(&self) -> String {
        match self {
            Frame::Open(info) => format!(
                "0{}",
                serde_json::json!({
                    "sid": info.sid,
                    "pingInterval": info.ping_interval,
                    "pingTimeout": info.ping_timeout,
                })
            ),
            Frame::Close => "1".to_string(),
            Frame::Ping => "2".to_string(),
            Frame::Pong => "3".to_string(),
            Frame::Message(packet) => format!("4{}", encode_packet(packet)),
        }
    }

    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => serde_json::from_str(rest)
                .map(Frame::Open)
                .map_err(|e| PacketError::Payload(e.to_string())),
            '1' => Ok(Frame::Close),
            // Probe payloads after ping/pong are ignored
            '2' => Ok(Frame::Ping),
            '3' => Ok(Frame::Pong),
            '4' => decode_packet(rest).map(Frame::Message),
            other => Err(PacketError::UnknownEngineType(other)),
        }
    }
}

fn encode_packet(packet: &Packet) -> String {
    let (kind, body) = match packet {
        Packet::Connect { data, .. } => ('0', data.as_ref().map(Value::to_string)),
        Packet::Disconnect { .. } => ('1', None),
        Packet::Event { name, args, .. } => {
            let mut array = Vec::with_capacity(args.len() + 1);
            array.push(Value::String(name.clone()));
            array.extend(args.iter().cloned());
            ('2', Some(Value::Array(array).to_string()))
        }
        Packet::Ack { id, args, .. } => {
            ('3', Some(format!("{}{}", id, Value::Array(args.clone()))))
        }
        Packet::ConnectError { data, .. } => ('4', Some(data.to_string())),
    };

    let mut out = String::new();
    out.push(kind);
    let namespace = packet.namespace();
    if namespace != "/" && !namespace.is_empty() {
        out.push_str(namespace);
        out.push(',');
    }
    if let Some(body) = body {
        out.push_str(&body);
    }
    out
}

fn decode_packet(text: &str) -> Result<Packet, PacketError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let mut rest = chars.as_str();

    if matches!(kind, '5' | '6') {
        return Err(PacketError::Binary);
    }

    let namespace = if rest.starts_with('/') {
        match rest.find(',') {
            Some(pos) => {
                let ns = &rest[..pos];
                rest = &rest[pos + 1..];
                ns.to_string()
            }
            None => {
                let ns = rest.to_string();
                rest = "";
                ns
            }
        }
    } else {
        "/".to_string()
    };

    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let ack_id = if digits > 0 {
        let id = rest[..digits]
            .parse::<u64>()
            .map_err(|e| PacketError::Payload(e.to_string()))?;
        rest = &rest[digits..];
        Some(id)
    } else {
        None
    };

    let body = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(rest).map_err(|e| PacketError::Payload(e.to_string()))?)
    };

    match kind {
        '0' => Ok(Packet::Connect { namespace, data: body }),
        '1' => Ok(Packet::Disconnect { namespace }),
        '2' => {
            let mut args = match body {
                Some(Value::Array(items)) => items,
                _ => return Err(PacketError::Payload("event body must be an array".into())),
            };
            if args.is_empty() {
                return Err(PacketError::Payload("event without name".into()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                other => return Err(PacketError::Payload(format!("event name is not a string: {}", other))),
            };
            Ok(Packet::Event { namespace, name, args })
        }
        '3' => {
            let args = match body {
                Some(Value::Array(items)) => items,
                None => Vec::new(),
                Some(other) => vec![other],
            };
            Ok(Packet::Ack { namespace, id: ack_id.unwrap_or(0), args })
        }
        '4' => Ok(Packet::ConnectError {
            namespace,
            data: body.unwrap_or(Value::Null),
        }),
        other => Err(PacketError::UnknownSocketType(other)),
    }
}

/// Human-readable text of a connect_error payload
pub fn error_message(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        Value::Null => "connection refused".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let frame = Frame::decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Open(OpenInfo {
                sid: "abc".into(),
                ping_interval: 25000,
                ping_timeout: 20000,
            })
        );
    }

    #[test]
    fn test_ping_pong() {
        assert_eq!(Frame::decode("2").unwrap(), Frame::Ping);
        assert_eq!(Frame::decode("3probe").unwrap(), Frame::Pong);
        assert_eq!(Frame::Pong.encode(), "3");
    }

    #[test]
    fn test_encode_connect_with_auth() {
        let frame = Frame::Message(Packet::Connect {
            namespace: "/terminal".into(),
            data: Some(json!({"token": "abc"})),
        });
        assert_eq!(frame.encode(), r#"40/terminal,{"token":"abc"}"#);
    }

    #[test]
    fn test_encode_event_root_namespace() {
        let frame = Frame::Message(Packet::event("/", "resize_terminal", Some(json!({"cols": 80, "rows": 24}))));
        assert_eq!(frame.encode(), r#"42["resize_terminal",{"cols":80,"rows":24}]"#);
    }

    #[test]
    fn test_encode_event_without_payload() {
        let frame = Frame::Message(Packet::event("/terminal", "close_terminal", None));
        assert_eq!(frame.encode(), r#"42/terminal,["close_terminal"]"#);
    }

    #[test]
    fn test_decode_event_with_namespace() {
        let frame = Frame::decode(r#"42/terminal,["output","hi\n"]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Message(Packet::Event {
                namespace: "/terminal".into(),
                name: "output".into(),
                args: vec![json!("hi\n")],
            })
        );
    }

    #[test]
    fn test_decode_connect_ack_and_error() {
        assert_eq!(
            Frame::decode(r#"40/terminal,{"sid":"xyz"}"#).unwrap(),
            Frame::Message(Packet::Connect {
                namespace: "/terminal".into(),
                data: Some(json!({"sid": "xyz"})),
            })
        );
        let frame = Frame::decode(r#"44/terminal,{"message":"invalid token"}"#).unwrap();
        match frame {
            Frame::Message(Packet::ConnectError { data, .. }) => {
                assert_eq!(error_message(&data), "invalid token");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_disconnect_without_comma() {
        assert_eq!(
            Frame::decode("41/terminal").unwrap(),
            Frame::Message(Packet::Disconnect { namespace: "/terminal".into() })
        );
        assert_eq!(
            Frame::decode("41").unwrap(),
            Frame::Message(Packet::Disconnect { namespace: "/".into() })
        );
    }

    #[test]
    fn test_decode_ack_id() {
        assert_eq!(
            Frame::decode(r#"43/terminal,7["ok"]"#).unwrap(),
            Frame::Message(Packet::Ack {
                namespace: "/terminal".into(),
                id: 7,
                args: vec![json!("ok")],
            })
        );
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Frame::decode(""), Err(PacketError::Empty));
        assert_eq!(Frame::decode("9"), Err(PacketError::UnknownEngineType('9')));
        assert_eq!(Frame::decode("451-[\"x\",{}]"), Err(PacketError::Binary));
        assert!(matches!(Frame::decode("42{\"a\":1}"), Err(PacketError::Payload(_))));
        assert!(matches!(Frame::decode("42[]"), Err(PacketError::Payload(_))));
    }
}
