//! MeshSwarm node runtime.
//!
//! A self-organizing mesh node: replicated key-value state, heartbeat-driven
//! membership with deterministic coordinator election, and scheduled
//! telemetry, all advanced by one cooperative scheduler.
//!
//! # Scheduling model
//!
//! Everything runs on a single execution context. The host calls
//! [`SwarmNode::tick`] as often as it likes; each tick drains the transport,
//! then runs whichever periodic actions are due against one monotonic
//! millisecond clock. The underlying mesh transport is consumed through the
//! poll/drain [`Transport`] contract, so no foreign thread ever touches core
//! state.
//!
//! # Example
//!
//! ```rust
//! use meshswarm_node::{LoopbackHub, ManualClock, SwarmConfig, SwarmNode};
//!
//! let hub = LoopbackHub::new();
//! let clock = ManualClock::new();
//! let mut a = SwarmNode::new(SwarmConfig::default(), clock.clone(), hub.endpoint(1));
//! let mut b = SwarmNode::new(SwarmConfig::default(), clock.clone(), hub.endpoint(2));
//!
//! a.set_state("mode", "on");
//! b.tick();
//! assert_eq!(b.state("mode", ""), "on");
//! ```

mod clock;
mod config;
mod loopback;
mod membership;
mod node;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use meshswarm_state::{StateEntry, StateStore};
pub use config::{SwarmConfig, TelemetryConfig};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use membership::{elect, Peer, PeerTable};
pub use node::{ServiceCtx, SwarmNode, SwarmService, TelemetrySink};
pub use transport::{
    FirmwareOffer, Inbound, PartRequest, Transport, TransportError, TransportEvent,
};
