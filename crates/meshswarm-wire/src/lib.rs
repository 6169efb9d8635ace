//! MeshSwarm wire format.
//!
//! Every message on the mesh is a JSON envelope `{t, n, d}`: a numeric
//! message type, the sender's human name, and a type-specific payload.
//! This crate owns the core identity types, the typed payloads, and the
//! envelope codec.
//!
//! # Design
//!
//! Payloads use the short wire keys (`k`/`v`/`ver`/`org`, `up`/`heap`) the
//! protocol has always used; the Rust structs keep readable names and map
//! via serde renames. Decoding returns a typed [`WireError`] so the
//! dispatcher can count drops without propagating failures.

mod envelope;
mod payload;
mod types;

pub use envelope::{Envelope, Payload, Result, WireError};
pub use payload::{Heartbeat, StateRecord, StateReq, StateSync, TelemetryReport};
pub use types::{node_name, MsgType, NodeId, Role};
