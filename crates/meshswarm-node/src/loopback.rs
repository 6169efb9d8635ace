//! In-process transport for tests and simulations.
//!
//! Models the mesh as seen from one process: a broadcast floods to every
//! attached, reachable endpoint, and attach/detach surface as queued
//! connectivity events. `set_reachable` models silent radio loss — frames
//! to (and from) an unreachable node vanish without any topology event,
//! which is exactly the failure anti-entropy sync exists to heal.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use meshswarm_wire::NodeId;

use crate::transport::{
    FirmwareOffer, Inbound, PartRequest, Transport, TransportError, TransportEvent,
};

#[derive(Default)]
struct Endpoint {
    inbound: VecDeque<Inbound>,
    events: VecDeque<TransportEvent>,
    part_requests: VecDeque<PartRequest>,
    reachable: bool,
}

#[derive(Default)]
struct HubInner {
    endpoints: BTreeMap<NodeId, Endpoint>,
    offers: Vec<FirmwareOffer>,
    parts_sent: Vec<(NodeId, u32, Vec<u8>)>,
    reject_offers: bool,
}

/// Shared in-process mesh hub. Cheap to clone; clones address the same hub.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Rc<RefCell<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node and hand back its transport endpoint. Existing nodes
    /// observe the connection; the new node observes everyone already there.
    pub fn endpoint(&self, id: NodeId) -> LoopbackTransport {
        let mut hub = self.inner.borrow_mut();
        let existing: Vec<NodeId> = hub.endpoints.keys().copied().collect();

        for endpoint in hub.endpoints.values_mut() {
            endpoint.events.push_back(TransportEvent::Connected(id));
            endpoint.events.push_back(TransportEvent::TopologyChanged);
        }

        let mut endpoint = Endpoint {
            reachable: true,
            ..Default::default()
        };
        for other in existing {
            endpoint.events.push_back(TransportEvent::Connected(other));
        }
        if !endpoint.events.is_empty() {
            endpoint.events.push_back(TransportEvent::TopologyChanged);
        }
        hub.endpoints.insert(id, endpoint);

        LoopbackTransport {
            id,
            hub: Rc::clone(&self.inner),
        }
    }

    /// Toggle silent radio loss for a node. No events fire; frames simply
    /// stop flowing to and from it.
    pub fn set_reachable(&self, id: NodeId, reachable: bool) {
        if let Some(endpoint) = self.inner.borrow_mut().endpoints.get_mut(&id) {
            endpoint.reachable = reachable;
        }
    }

    /// Remove a node entirely; the others observe the drop.
    pub fn detach(&self, id: NodeId) {
        let mut hub = self.inner.borrow_mut();
        if hub.endpoints.remove(&id).is_none() {
            return;
        }
        for endpoint in hub.endpoints.values_mut() {
            endpoint.events.push_back(TransportEvent::Dropped(id));
            endpoint.events.push_back(TransportEvent::TopologyChanged);
        }
    }

    /// Firmware offers the hub has accepted, newest last.
    pub fn offers(&self) -> Vec<FirmwareOffer> {
        self.inner.borrow().offers.clone()
    }

    /// Make subsequent offers fail, as a transport without OTA room would.
    pub fn set_reject_offers(&self, reject: bool) {
        self.inner.borrow_mut().reject_offers = reject;
    }

    /// Queue a firmware part request for `to`, as if `from` asked for it.
    pub fn push_part_request(&self, to: NodeId, from: NodeId, part: u32) {
        if let Some(endpoint) = self.inner.borrow_mut().endpoints.get_mut(&to) {
            endpoint.part_requests.push_back(PartRequest { from, part });
        }
    }

    /// Parts delivered through the hub: `(to, part, data)`.
    pub fn parts_sent(&self) -> Vec<(NodeId, u32, Vec<u8>)> {
        self.inner.borrow().parts_sent.clone()
    }
}

/// One node's view of the hub.
pub struct LoopbackTransport {
    id: NodeId,
    hub: Rc<RefCell<HubInner>>,
}

impl Transport for LoopbackTransport {
    fn local_id(&self) -> NodeId {
        self.id
    }

    fn node_list(&self) -> Vec<NodeId> {
        self.hub
            .borrow()
            .endpoints
            .keys()
            .copied()
            .filter(|&id| id != self.id)
            .collect()
    }

    fn broadcast(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut hub = self.hub.borrow_mut();
        let sender_reachable = hub
            .endpoints
            .get(&self.id)
            .map_or(false, |e| e.reachable);
        if !sender_reachable {
            // The radio ate it; the transport itself took the frame.
            return Ok(());
        }
        let from = self.id;
        for (&id, endpoint) in hub.endpoints.iter_mut() {
            if id == from || !endpoint.reachable {
                continue;
            }
            endpoint.inbound.push_back(Inbound {
                from,
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        match self.hub.borrow_mut().endpoints.get_mut(&self.id) {
            Some(endpoint) => endpoint.events.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn poll_inbound(&mut self) -> Vec<Inbound> {
        match self.hub.borrow_mut().endpoints.get_mut(&self.id) {
            Some(endpoint) => endpoint.inbound.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn offer_firmware(&mut self, offer: &FirmwareOffer) -> bool {
        let mut hub = self.hub.borrow_mut();
        if hub.reject_offers {
            return false;
        }
        hub.offers.push(offer.clone());
        true
    }

    fn poll_part_requests(&mut self) -> Vec<PartRequest> {
        match self.hub.borrow_mut().endpoints.get_mut(&self.id) {
            Some(endpoint) => endpoint.part_requests.drain(..).collect(),
            None => Vec::new(),
        }
    }

    fn send_part(&mut self, to: NodeId, part: u32, data: &[u8]) -> Result<(), TransportError> {
        self.hub
            .borrow_mut()
            .parts_sent
            .push((to, part, data.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_every_other_endpoint() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(1);
        let mut b = hub.endpoint(2);
        let mut c = hub.endpoint(3);

        a.broadcast(b"hello").unwrap();

        assert!(a.poll_inbound().is_empty());
        let got = b.poll_inbound();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].from, 1);
        assert_eq!(got[0].payload, b"hello");
        assert_eq!(c.poll_inbound().len(), 1);
    }

    #[test]
    fn attach_and_detach_queue_events() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(1);
        let mut b = hub.endpoint(2);

        let events = a.poll_events();
        assert!(events.contains(&TransportEvent::Connected(2)));

        let events = b.poll_events();
        assert!(events.contains(&TransportEvent::Connected(1)));

        hub.detach(2);
        let events = a.poll_events();
        assert!(events.contains(&TransportEvent::Dropped(2)));
        assert!(events.contains(&TransportEvent::TopologyChanged));
        assert!(a.node_list().is_empty());
    }

    #[test]
    fn unreachable_node_misses_frames_silently() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(1);
        let mut b = hub.endpoint(2);

        hub.set_reachable(2, false);
        a.broadcast(b"lost").unwrap();
        assert!(b.poll_inbound().is_empty());
        // Still listed: no topology event fired.
        assert_eq!(a.node_list(), vec![2]);

        hub.set_reachable(2, true);
        a.broadcast(b"heard").unwrap();
        assert_eq!(b.poll_inbound().len(), 1);
    }

    #[test]
    fn offers_and_parts_are_recorded() {
        let hub = LoopbackHub::new();
        let mut gateway = hub.endpoint(1);

        let offer = FirmwareOffer {
            node_type: "sensor".into(),
            hardware: "esp32".into(),
            md5: "abc".into(),
            num_parts: 2,
            force: false,
        };
        assert!(gateway.offer_firmware(&offer));
        assert_eq!(hub.offers(), vec![offer.clone()]);

        hub.set_reject_offers(true);
        assert!(!gateway.offer_firmware(&offer));

        hub.push_part_request(1, 7, 0);
        let requests = gateway.poll_part_requests();
        assert_eq!(requests, vec![PartRequest { from: 7, part: 0 }]);

        gateway.send_part(7, 0, b"data").unwrap();
        assert_eq!(hub.parts_sent(), vec![(7, 0, b"data".to_vec())]);
    }
}
