//! Typed `d` payloads, one per message type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, Role};

/// Periodic liveness announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default)]
    pub role: Role,
    /// Seconds since the sender booted.
    #[serde(rename = "up", default)]
    pub uptime_secs: u64,
    /// Free heap bytes on the sender.
    #[serde(rename = "heap", default)]
    pub heap_free: u64,
    /// Number of keys in the sender's shared state.
    #[serde(rename = "states", default)]
    pub state_count: usize,
    /// Application-provided gauges merged into the heartbeat.
    #[serde(flatten)]
    pub extras: BTreeMap<String, i64>,
}

/// One replicated entry as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    #[serde(rename = "k")]
    pub key: String,
    #[serde(rename = "v")]
    pub value: String,
    #[serde(rename = "ver")]
    pub version: u32,
    #[serde(rename = "org")]
    pub origin: NodeId,
}

/// Full-store anti-entropy snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSync {
    #[serde(rename = "s")]
    pub entries: Vec<StateRecord>,
}

/// Request for a full snapshot from any peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReq {
    pub req: u32,
}

impl Default for StateReq {
    fn default() -> Self {
        Self { req: 1 }
    }
}

/// Node telemetry pushed to (or relayed by) the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub name: String,
    /// Seconds since boot.
    pub uptime: u64,
    pub heap_free: u64,
    pub peer_count: usize,
    pub role: Role,
    /// Firmware version string.
    pub firmware: String,
    /// Current key/value view of the shared state.
    pub state: BTreeMap<String, String>,
    /// Fields this node does not model survive a relay hop untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
