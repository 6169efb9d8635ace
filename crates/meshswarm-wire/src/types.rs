//! Core identity types shared across the swarm.

use serde::{Deserialize, Serialize};

/// Transport-assigned node identifier, stable for the life of a session.
pub type NodeId = u32;

/// Default human name for a node: `"N"` plus the uppercase hex of the low
/// 16 bits of its id, without zero padding.
pub fn node_name(id: NodeId) -> String {
    format!("N{:X}", id & 0xFFFF)
}

/// Role a node currently holds in the membership.
///
/// Exactly one node per connected partition is the coordinator: the one
/// with the numerically smallest id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "COORD")]
    Coordinator,
    #[default]
    #[serde(rename = "PEER")]
    Peer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Coordinator => write!(f, "COORD"),
            Role::Peer => write!(f, "PEER"),
        }
    }
}

/// Message type discriminants carried in the envelope `t` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Heartbeat = 1,
    StateSet = 2,
    StateSync = 3,
    StateReq = 4,
    Command = 5,
    Telemetry = 6,
}

impl MsgType {
    /// Parse a raw `t` value. `None` for types this node does not speak.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(MsgType::Heartbeat),
            2 => Some(MsgType::StateSet),
            3 => Some(MsgType::StateSync),
            4 => Some(MsgType::StateReq),
            5 => Some(MsgType::Command),
            6 => Some(MsgType::Telemetry),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_name_short_id() {
        assert_eq!(node_name(0x0001), "N1");
        assert_eq!(node_name(0x01A2), "N1A2");
    }

    #[test]
    fn node_name_uses_low_16_bits() {
        assert_eq!(node_name(0xDEAD_1A2B), "N1A2B");
        assert_eq!(node_name(0x0001_2345), "N2345");
    }

    #[test]
    fn role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Coordinator).unwrap(), "\"COORD\"");
        assert_eq!(serde_json::to_string(&Role::Peer).unwrap(), "\"PEER\"");
        assert_eq!(Role::Coordinator.to_string(), "COORD");
    }

    #[test]
    fn msg_type_round_trip() {
        for t in 1..=6u8 {
            let parsed = MsgType::from_u8(t).unwrap();
            assert_eq!(parsed as u8, t);
        }
        assert_eq!(MsgType::from_u8(0), None);
        assert_eq!(MsgType::from_u8(7), None);
    }
}
