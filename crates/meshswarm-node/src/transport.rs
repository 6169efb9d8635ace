//! The seam between the runtime and the underlying mesh transport.
//!
//! The real transport (peer discovery, reliable flooding, per-hop acks)
//! lives outside this workspace. The runtime consumes it through a
//! queue-shaped contract: everything the transport would deliver via
//! callback is drained from [`SwarmNode::tick`](crate::SwarmNode::tick) on
//! the scheduler context, so no transport thread ever touches core state
//! and the transport never owns closures into the core.

use meshswarm_wire::NodeId;
use thiserror::Error;

/// Failure surfaced by the mesh transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broadcast failed: {0}")]
    Broadcast(String),

    #[error("node {0:#x} not reachable")]
    Unreachable(NodeId),
}

/// A frame received from a peer.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: NodeId,
    pub payload: Vec<u8>,
}

/// Connectivity changes observed since the last drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(NodeId),
    Dropped(NodeId),
    TopologyChanged,
}

/// Firmware advertisement for role-matched peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareOffer {
    /// Role the firmware targets; peers with a matching role pull it.
    pub node_type: String,
    pub hardware: String,
    pub md5: String,
    pub num_parts: u32,
    /// Offer the image even to nodes already running this version.
    pub force: bool,
}

/// A peer asking for one firmware part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRequest {
    pub from: NodeId,
    pub part: u32,
}

/// Contract the runtime consumes from the mesh layer.
///
/// The OTA extension has no-op defaults; only gateway transports implement
/// it.
pub trait Transport {
    /// Identifier the transport assigned to this node.
    fn local_id(&self) -> NodeId;

    /// Every other node currently known to the transport.
    fn node_list(&self) -> Vec<NodeId>;

    /// Reliable flood to all reachable nodes.
    fn broadcast(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Connectivity events since the last call.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    /// Frames received since the last call.
    fn poll_inbound(&mut self) -> Vec<Inbound>;

    /// Advertise a firmware image to role-matched peers. `false` when the
    /// transport cannot take the offer.
    fn offer_firmware(&mut self, offer: &FirmwareOffer) -> bool {
        let _ = offer;
        false
    }

    /// Firmware part requests since the last call.
    fn poll_part_requests(&mut self) -> Vec<PartRequest> {
        Vec::new()
    }

    /// Deliver one firmware part to a requesting node. Empty `data` tells
    /// the peer the part could not be produced and may be re-requested.
    fn send_part(&mut self, to: NodeId, part: u32, data: &[u8]) -> Result<(), TransportError> {
        let _ = (to, part, data);
        Ok(())
    }
}
