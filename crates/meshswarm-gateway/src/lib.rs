//! Gateway services for a MeshSwarm node.
//!
//! A gateway is an ordinary mesh node that also holds an HTTP uplink to the
//! control plane. It pushes its own telemetry directly, relays peer
//! telemetry arriving over the mesh, and optionally drives OTA firmware
//! distribution: polling for pending updates, offering them to role-matched
//! peers through the transport, and streaming firmware parts fetched with
//! ranged requests.
//!
//! Both services plug into the node runtime through the seams it already
//! defines: the telemetry relay is a
//! [`TelemetrySink`](meshswarm_node::TelemetrySink), the distributor a
//! [`SwarmService`](meshswarm_node::SwarmService). They share one uplink —
//! the scheduler is single-threaded, so at most one request is ever in
//! flight.
//!
//! # Example
//!
//! ```rust,ignore
//! use meshswarm_gateway::{gateway_pair, HttpUplink, OtaConfig, UplinkConfig};
//!
//! let uplink = HttpUplink::new(UplinkConfig::new("http://hub.local:8000"))?;
//! let (telemetry, ota) = gateway_pair(uplink, OtaConfig::default());
//! node.set_uplink(telemetry);
//! node.add_service(ota);
//! ```

mod error;
mod ota;
mod relay;
mod uplink;

use std::cell::RefCell;
use std::rc::Rc;

pub use error::{Error, Result};
pub use ota::{OtaConfig, OtaDistributor, OtaUpdate};
pub use relay::UplinkTelemetry;
pub use uplink::{HttpUplink, OtaProgress, PendingUpdate, Uplink, UplinkConfig};

/// Wire a telemetry sink and an OTA distributor around one shared uplink.
pub fn gateway_pair<U: Uplink>(
    uplink: U,
    ota: OtaConfig,
) -> (UplinkTelemetry<U>, OtaDistributor<U>) {
    let shared = Rc::new(RefCell::new(uplink));
    (
        UplinkTelemetry::new(Rc::clone(&shared)),
        OtaDistributor::new(ota, shared),
    )
}
