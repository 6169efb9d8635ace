//! Peer liveness tracking and coordinator election.

use std::collections::BTreeMap;

use meshswarm_wire::{node_name, NodeId, Role};
use tracing::debug;

/// What this node knows about one peer, learned from heartbeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub name: String,
    pub role: Role,
    pub last_seen_ms: u64,
    /// Cleared when the transport drops the peer; restored by the next
    /// heartbeat.
    pub alive: bool,
}

/// Heartbeat-driven peer table.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<NodeId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a peer from a heartbeat.
    pub fn observe_heartbeat(&mut self, id: NodeId, name: &str, role: Role, now_ms: u64) {
        let peer = self.peers.entry(id).or_insert_with(|| Peer {
            id,
            name: String::new(),
            role,
            last_seen_ms: now_ms,
            alive: true,
        });
        peer.name = name.to_string();
        peer.role = role;
        peer.last_seen_ms = now_ms;
        peer.alive = true;
    }

    /// The transport lost this peer; keep the entry until it is pruned or
    /// heard from again.
    pub fn mark_dropped(&mut self, id: NodeId) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.alive = false;
        }
    }

    /// Remove peers silent for longer than `dead_after_ms`.
    pub fn prune(&mut self, now_ms: u64, dead_after_ms: u64) -> Vec<NodeId> {
        let dead: Vec<NodeId> = self
            .peers
            .iter()
            .filter(|(_, peer)| now_ms.saturating_sub(peer.last_seen_ms) > dead_after_ms)
            .map(|(&id, _)| id)
            .collect();
        for id in &dead {
            self.peers.remove(id);
            debug!(target: "mesh", peer = %node_name(*id), "pruned dead peer");
        }
        dead
    }

    pub fn get(&self, id: NodeId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Peers currently believed reachable.
    pub fn alive_count(&self) -> usize {
        self.peers.values().filter(|p| p.alive).count()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Deterministic election: the lowest id among ourselves and everything the
/// transport can currently see. No consensus round; two partitions each
/// elect their own minimum and the lower id wins on reunion.
pub fn elect(local_id: NodeId, known: &[NodeId]) -> NodeId {
    known.iter().copied().fold(local_id, NodeId::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_upserts() {
        let mut peers = PeerTable::new();
        peers.observe_heartbeat(2, "N2", Role::Peer, 100);
        peers.observe_heartbeat(2, "N2", Role::Coordinator, 200);

        let peer = peers.get(2).unwrap();
        assert_eq!(peer.role, Role::Coordinator);
        assert_eq!(peer.last_seen_ms, 200);
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn prune_is_strictly_after_deadline() {
        let mut peers = PeerTable::new();
        peers.observe_heartbeat(2, "N2", Role::Peer, 0);

        assert!(peers.prune(15_000, 15_000).is_empty());
        assert_eq!(peers.prune(15_001, 15_000), vec![2]);
        assert!(peers.is_empty());
    }

    #[test]
    fn dropped_peer_counts_as_not_alive() {
        let mut peers = PeerTable::new();
        peers.observe_heartbeat(2, "N2", Role::Peer, 0);
        peers.observe_heartbeat(3, "N3", Role::Peer, 0);
        assert_eq!(peers.alive_count(), 2);

        peers.mark_dropped(3);
        assert_eq!(peers.alive_count(), 1);
        assert_eq!(peers.len(), 2);

        peers.observe_heartbeat(3, "N3", Role::Peer, 10);
        assert_eq!(peers.alive_count(), 2);
    }

    #[test]
    fn election_is_minimum_over_known_set() {
        assert_eq!(elect(5, &[]), 5);
        assert_eq!(elect(5, &[7, 9]), 5);
        assert_eq!(elect(5, &[3, 7]), 3);
    }
}
