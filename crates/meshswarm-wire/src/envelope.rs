//! The `{t, n, d}` JSON envelope carried over the mesh transport.

use serde_json::{json, Value};
use thiserror::Error;

use crate::payload::{Heartbeat, StateRecord, StateReq, StateSync, TelemetryReport};
use crate::types::MsgType;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors produced while decoding an inbound frame.
///
/// The dispatcher never propagates these; it counts the frame as dropped.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope missing field `{0}`")]
    MissingField(&'static str),

    /// A `t` value this node does not speak. Dropped without logging.
    #[error("unknown message type {0}")]
    UnknownType(u8),
}

/// Typed payload variants, one per [`MsgType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Heartbeat(Heartbeat),
    StateSet(StateRecord),
    StateSync(StateSync),
    StateReq(StateReq),
    /// Reserved on the wire; carried opaque and ignored by dispatch.
    Command(Value),
    Telemetry(TelemetryReport),
}

impl Payload {
    /// The `t` discriminant this payload travels under.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Payload::Heartbeat(_) => MsgType::Heartbeat,
            Payload::StateSet(_) => MsgType::StateSet,
            Payload::StateSync(_) => MsgType::StateSync,
            Payload::StateReq(_) => MsgType::StateReq,
            Payload::Command(_) => MsgType::Command,
            Payload::Telemetry(_) => MsgType::Telemetry,
        }
    }

    fn to_data(&self) -> Value {
        match self {
            Payload::Heartbeat(hb) => serde_json::to_value(hb).unwrap_or_default(),
            Payload::StateSet(rec) => serde_json::to_value(rec).unwrap_or_default(),
            Payload::StateSync(sync) => serde_json::to_value(sync).unwrap_or_default(),
            Payload::StateReq(req) => serde_json::to_value(req).unwrap_or_default(),
            Payload::Command(raw) => raw.clone(),
            Payload::Telemetry(report) => serde_json::to_value(report).unwrap_or_default(),
        }
    }
}

/// A decoded mesh message: who sent it and what it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Sender's human name (`n`).
    pub sender: String,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(sender: impl Into<String>, payload: Payload) -> Self {
        Self {
            sender: sender.into(),
            payload,
        }
    }

    /// Encode to the wire form. Well-formed payloads always serialize.
    pub fn encode(&self) -> Vec<u8> {
        let doc = json!({
            "t": self.payload.msg_type() as u8,
            "n": self.sender,
            "d": self.payload.to_data(),
        });
        doc.to_string().into_bytes()
    }

    /// Decode an inbound frame into a typed envelope.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let doc: Value = serde_json::from_slice(raw)?;
        let t = doc
            .get("t")
            .and_then(Value::as_u64)
            .ok_or(WireError::MissingField("t"))? as u8;
        let sender = doc
            .get("n")
            .and_then(Value::as_str)
            .unwrap_or("???")
            .to_string();
        let data = doc.get("d").cloned().ok_or(WireError::MissingField("d"))?;

        let msg_type = MsgType::from_u8(t).ok_or(WireError::UnknownType(t))?;
        let payload = match msg_type {
            MsgType::Heartbeat => Payload::Heartbeat(serde_json::from_value(data)?),
            MsgType::StateSet => Payload::StateSet(serde_json::from_value(data)?),
            MsgType::StateSync => Payload::StateSync(serde_json::from_value(data)?),
            MsgType::StateReq => Payload::StateReq(serde_json::from_value(data)?),
            MsgType::Command => Payload::Command(data),
            MsgType::Telemetry => Payload::Telemetry(serde_json::from_value(data)?),
        };

        Ok(Self { sender, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn round_trip(env: Envelope) {
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn heartbeat_round_trip() {
        let mut extras = BTreeMap::new();
        extras.insert("door".to_string(), 1);
        round_trip(Envelope::new(
            "N1A2B",
            Payload::Heartbeat(Heartbeat {
                role: crate::Role::Coordinator,
                uptime_secs: 123,
                heap_free: 45678,
                state_count: 7,
                extras,
            }),
        ));
    }

    #[test]
    fn state_set_round_trip() {
        round_trip(Envelope::new(
            "N2",
            Payload::StateSet(StateRecord {
                key: "mode".into(),
                value: "on".into(),
                version: 1,
                origin: 2,
            }),
        ));
    }

    #[test]
    fn state_sync_round_trip() {
        round_trip(Envelope::new(
            "N2",
            Payload::StateSync(StateSync {
                entries: vec![
                    StateRecord {
                        key: "a".into(),
                        value: "1".into(),
                        version: 4,
                        origin: 1,
                    },
                    StateRecord {
                        key: "b".into(),
                        value: "2".into(),
                        version: 1,
                        origin: 3,
                    },
                ],
            }),
        ));
    }

    #[test]
    fn state_req_round_trip() {
        round_trip(Envelope::new("N9", Payload::StateReq(StateReq::default())));
    }

    #[test]
    fn decodes_raw_heartbeat_frame() {
        let raw = br#"{"t":1,"n":"N1A2B","d":{"role":"COORD","up":123,"heap":45678,"states":7}}"#;
        let env = Envelope::decode(raw).unwrap();
        assert_eq!(env.sender, "N1A2B");
        match env.payload {
            Payload::Heartbeat(hb) => {
                assert_eq!(hb.role, crate::Role::Coordinator);
                assert_eq!(hb.uptime_secs, 123);
                assert_eq!(hb.state_count, 7);
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn missing_sender_defaults() {
        let raw = br#"{"t":4,"d":{"req":1}}"#;
        let env = Envelope::decode(raw).unwrap();
        assert_eq!(env.sender, "???");
    }

    #[test]
    fn unknown_type_is_typed_error() {
        let raw = br#"{"t":99,"n":"N1","d":{}}"#;
        match Envelope::decode(raw) {
            Err(WireError::UnknownType(99)) => {}
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_json_error() {
        assert!(matches!(
            Envelope::decode(b"not json at all"),
            Err(WireError::Json(_))
        ));
    }

    #[test]
    fn command_carried_opaque() {
        let raw = br#"{"t":5,"n":"N1","d":{"cmd":"reboot","arg":42}}"#;
        let env = Envelope::decode(raw).unwrap();
        match &env.payload {
            Payload::Command(value) => assert_eq!(value["cmd"], "reboot"),
            other => panic!("wrong payload: {other:?}"),
        }
        round_trip(env);
    }
}
