//! The cooperative node runtime.
//!
//! One [`SwarmNode`] owns every piece of core state — store, peer table,
//! timers — and advances it from [`tick`](SwarmNode::tick). Within a tick
//! the order is fixed: drain the transport, then heartbeat, then
//! anti-entropy sync, then telemetry, then plug-in services, then user loop
//! hooks. A heartbeat therefore never observes a partly-applied inbound
//! batch.

use std::collections::BTreeMap;

use meshswarm_state::{LocalWrite, StateStore};
use meshswarm_wire::{
    node_name, Envelope, Heartbeat, NodeId, Payload, Role, StateReq, StateSync, TelemetryReport,
    WireError,
};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::clock::Clock;
use crate::config::SwarmConfig;
use crate::membership::{elect, PeerTable};
use crate::transport::{Transport, TransportEvent};

/// Destination for telemetry when the node runs with an HTTP uplink
/// (gateway mode). Without a sink, telemetry is broadcast over the mesh
/// for a gateway to relay.
pub trait TelemetrySink {
    /// Push this node's own report. `false` when delivery failed; the next
    /// scheduled push retries the same semantics.
    fn push_own(&mut self, node: NodeId, report: &TelemetryReport) -> bool;

    /// Relay a peer's report verbatim.
    fn relay(&mut self, from: NodeId, report: &Value) -> bool;
}

/// View handed to plug-in services during a tick.
pub struct ServiceCtx<'a> {
    pub now_ms: u64,
    pub local_id: NodeId,
    pub role: Role,
    pub alive_peers: usize,
    pub store: &'a StateStore,
    pub transport: &'a mut (dyn Transport + 'a),
}

/// A module that plugs into the scheduler, such as the OTA distributor.
/// Services run after telemetry, in registration order.
pub trait SwarmService {
    fn on_tick(&mut self, ctx: &mut ServiceCtx<'_>);
}

type LoopHook<C, T> = Box<dyn FnMut(&mut SwarmNode<C, T>)>;
type HeapGauge = Box<dyn Fn() -> u64>;

/// A mesh node: replicated state, membership, election, telemetry, all
/// driven by [`tick`](Self::tick).
pub struct SwarmNode<C: Clock, T: Transport> {
    config: SwarmConfig,
    clock: C,
    transport: T,

    id: NodeId,
    name: String,
    role: Role,
    coordinator_id: NodeId,
    boot_ms: u64,

    store: StateStore,
    peers: PeerTable,

    last_heartbeat: u64,
    last_state_sync: u64,
    last_telemetry_push: u64,
    last_state_telemetry_push: Option<u64>,

    heartbeat_extras: BTreeMap<String, i64>,
    heap_gauge: Option<HeapGauge>,
    uplink: Option<Box<dyn TelemetrySink>>,
    services: Vec<Box<dyn SwarmService>>,
    loop_hooks: Vec<LoopHook<C, T>>,

    dropped_messages: u64,
}

impl<C: Clock, T: Transport> SwarmNode<C, T> {
    pub fn new(config: SwarmConfig, clock: C, transport: T) -> Self {
        let id = transport.local_id();
        let name = config
            .node_name
            .clone()
            .unwrap_or_else(|| node_name(id));
        let boot_ms = clock.now_ms();
        info!(
            target: "mesh",
            id = format_args!("{id:#010x}"),
            name = %name,
            "node up"
        );

        Self {
            config,
            clock,
            transport,
            id,
            name,
            role: Role::Peer,
            coordinator_id: id,
            boot_ms,
            store: StateStore::new(),
            peers: PeerTable::new(),
            last_heartbeat: boot_ms,
            last_state_sync: boot_ms,
            last_telemetry_push: boot_ms,
            last_state_telemetry_push: None,
            heartbeat_extras: BTreeMap::new(),
            heap_gauge: None,
            uplink: None,
            services: Vec::new(),
            loop_hooks: Vec::new(),
            dropped_messages: 0,
        }
    }

    /// Advance the node. Call as often as the host permits.
    pub fn tick(&mut self) {
        self.drain_events();
        self.drain_inbound();

        let now = self.clock.now_ms();
        if now - self.last_heartbeat >= self.config.heartbeat_interval_ms {
            self.send_heartbeat();
            if !self.peers.prune(now, self.config.peer_dead_ms).is_empty() {
                self.run_election();
            }
            self.last_heartbeat = now;
        }

        if now - self.last_state_sync >= self.config.state_sync_interval_ms {
            self.broadcast_full_state();
            self.last_state_sync = now;
        }

        if self.config.telemetry.enabled
            && now - self.last_telemetry_push >= self.config.telemetry.interval_ms
        {
            self.deliver_telemetry(now);
            self.last_telemetry_push = now;
        }

        self.run_services(now);
        self.run_loop_hooks();
    }

    // ---- state API ----

    /// Write a key locally: bump the version, fire watchers, broadcast
    /// eagerly. Returns false when the value already matched.
    pub fn set_state(&mut self, key: &str, value: &str) -> bool {
        let now = self.clock.now_ms();
        match self.store.set_local(key, value, self.id, now) {
            LocalWrite::Unchanged => false,
            LocalWrite::Changed { version } => {
                debug!(target: "state", key, value, version, "local write");
                self.broadcast_state(key);
                self.state_change_telemetry(now);
                true
            }
        }
    }

    /// Batch write. Unchanged pairs are skipped without a version bump;
    /// at most one telemetry push fires for the whole batch.
    pub fn set_states<'p>(
        &mut self,
        pairs: impl IntoIterator<Item = (&'p str, &'p str)>,
    ) -> bool {
        let now = self.clock.now_ms();
        let mut any_changed = false;
        for (key, value) in pairs {
            match self.store.set_local(key, value, self.id, now) {
                LocalWrite::Unchanged => {}
                LocalWrite::Changed { version } => {
                    debug!(target: "state", key, value, version, "local write");
                    self.broadcast_state(key);
                    any_changed = true;
                }
            }
        }
        if any_changed {
            self.state_change_telemetry(now);
        }
        any_changed
    }

    /// Current value of a key, or `default` when absent.
    pub fn state(&self, key: &str, default: &str) -> String {
        self.store.get_or(key, default).to_string()
    }

    /// Subscribe to changes of `key`, or every key via `"*"`.
    pub fn watch_state(&mut self, key: &str, callback: impl FnMut(&str, &str, &str) + 'static) {
        self.store.watch(key, callback);
    }

    /// Broadcast the whole store as an anti-entropy snapshot. No-op while
    /// the store is empty.
    pub fn broadcast_full_state(&mut self) {
        if self.store.is_empty() {
            return;
        }
        let entries = self.store.snapshot();
        trace!(target: "state", entries = entries.len(), "broadcasting full state");
        self.broadcast(Payload::StateSync(StateSync { entries }));
    }

    /// Ask any peer for a full snapshot.
    pub fn request_state_sync(&mut self) {
        self.broadcast(Payload::StateReq(StateReq::default()));
    }

    // ---- node info ----

    pub fn node_id(&self) -> NodeId {
        self.id
    }

    pub fn node_name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator
    }

    pub fn coordinator_id(&self) -> NodeId {
        self.coordinator_id
    }

    /// Peers currently believed alive.
    pub fn peer_count(&self) -> usize {
        self.peers.alive_count()
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Frames dropped because they failed to decode or carried an unknown
    /// message type.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages
    }

    // ---- customization ----

    /// Add an integer gauge to every outgoing heartbeat.
    pub fn set_heartbeat_extra(&mut self, key: impl Into<String>, value: i64) {
        self.heartbeat_extras.insert(key.into(), value);
    }

    /// Inject the host's free-heap gauge. Defaults to 0 when absent.
    pub fn set_heap_gauge(&mut self, gauge: impl Fn() -> u64 + 'static) {
        self.heap_gauge = Some(Box::new(gauge));
    }

    /// Install an uplink sink; the node switches to gateway mode and both
    /// pushes its own telemetry and relays peer telemetry through it.
    pub fn set_uplink(&mut self, sink: impl TelemetrySink + 'static) {
        self.uplink = Some(Box::new(sink));
    }

    /// Plug a service into the scheduler. Services run after telemetry.
    pub fn add_service(&mut self, service: impl SwarmService + 'static) {
        self.services.push(Box::new(service));
    }

    /// Register a loop hook, invoked at the end of every tick in
    /// registration order.
    pub fn on_loop(&mut self, hook: impl FnMut(&mut SwarmNode<C, T>) + 'static) {
        self.loop_hooks.push(Box::new(hook));
    }

    // ---- scheduler internals ----

    fn drain_events(&mut self) {
        for event in self.transport.poll_events() {
            match event {
                TransportEvent::Connected(id) => {
                    info!(target: "mesh", peer = %node_name(id), "connected");
                    self.send_heartbeat();
                    self.broadcast_full_state();
                }
                TransportEvent::Dropped(id) => {
                    info!(target: "mesh", peer = %node_name(id), "dropped");
                    self.peers.mark_dropped(id);
                    self.run_election();
                }
                TransportEvent::TopologyChanged => {
                    debug!(
                        target: "mesh",
                        nodes = self.transport.node_list().len(),
                        "topology changed"
                    );
                    self.run_election();
                }
            }
        }
    }

    fn drain_inbound(&mut self) {
        for frame in self.transport.poll_inbound() {
            match Envelope::decode(&frame.payload) {
                Ok(envelope) => self.dispatch(frame.from, envelope),
                Err(WireError::UnknownType(_)) => {
                    self.dropped_messages += 1;
                }
                Err(err) => {
                    self.dropped_messages += 1;
                    warn!(
                        target: "mesh",
                        from = %node_name(frame.from),
                        %err,
                        "dropped undecodable message"
                    );
                }
            }
        }
    }

    fn dispatch(&mut self, from: NodeId, envelope: Envelope) {
        match envelope.payload {
            Payload::Heartbeat(heartbeat) => {
                let now = self.clock.now_ms();
                self.peers
                    .observe_heartbeat(from, &envelope.sender, heartbeat.role, now);
                self.run_election();
            }
            Payload::StateSet(record) => {
                let now = self.clock.now_ms();
                self.store.apply_remote(&record, now);
            }
            Payload::StateSync(sync) => {
                let now = self.clock.now_ms();
                for record in &sync.entries {
                    self.store.apply_remote(record, now);
                }
                trace!(
                    target: "state",
                    from = %envelope.sender,
                    entries = sync.entries.len(),
                    "applied sync"
                );
            }
            Payload::StateReq(_) => self.broadcast_full_state(),
            Payload::Command(_) => {}
            Payload::Telemetry(report) => {
                if let Some(uplink) = self.uplink.as_mut() {
                    let raw = serde_json::to_value(&report).unwrap_or_default();
                    uplink.relay(from, &raw);
                }
            }
        }
    }

    fn run_election(&mut self) {
        self.coordinator_id = elect(self.id, &self.transport.node_list());
        let new_role = if self.coordinator_id == self.id {
            Role::Coordinator
        } else {
            Role::Peer
        };
        if new_role != self.role {
            info!(target: "mesh", from = %self.role, to = %new_role, "role changed");
            self.role = new_role;
        }
    }

    fn send_heartbeat(&mut self) {
        let now = self.clock.now_ms();
        let heartbeat = Heartbeat {
            role: self.role,
            uptime_secs: (now - self.boot_ms) / 1000,
            heap_free: self.heap_gauge.as_ref().map_or(0, |gauge| gauge()),
            state_count: self.store.len(),
            extras: self.heartbeat_extras.clone(),
        };
        self.broadcast(Payload::Heartbeat(heartbeat));
    }

    fn broadcast_state(&mut self, key: &str) {
        if let Some(record) = self.store.record(key) {
            self.broadcast(Payload::StateSet(record));
        }
    }

    fn broadcast(&mut self, payload: Payload) {
        let frame = Envelope::new(self.name.clone(), payload).encode();
        if let Err(err) = self.transport.broadcast(&frame) {
            warn!(target: "mesh", %err, "broadcast failed");
        }
    }

    /// Debounced state-change telemetry. The debounced path updates both
    /// push timestamps, so a burst of writes can postpone the periodic
    /// push; this skew is part of the protocol's observed behavior.
    fn state_change_telemetry(&mut self, now: u64) {
        if !self.config.telemetry.enabled {
            return;
        }
        let allowed = match self.last_state_telemetry_push {
            None => true,
            Some(last) => now - last >= self.config.telemetry.min_state_interval_ms,
        };
        if allowed {
            debug!(target: "telem", "state change push");
            self.deliver_telemetry(now);
            self.last_telemetry_push = now;
            self.last_state_telemetry_push = Some(now);
        } else {
            trace!(target: "telem", "state change push debounced");
        }
    }

    fn deliver_telemetry(&mut self, now: u64) {
        let report = TelemetryReport {
            name: self.name.clone(),
            uptime: (now - self.boot_ms) / 1000,
            heap_free: self.heap_gauge.as_ref().map_or(0, |gauge| gauge()),
            peer_count: self.peers.alive_count(),
            role: self.role,
            firmware: self.config.firmware_version.clone(),
            state: self.store.values(),
            extra: serde_json::Map::new(),
        };
        match self.uplink.as_mut() {
            Some(uplink) => {
                uplink.push_own(self.id, &report);
            }
            None => self.broadcast(Payload::Telemetry(report)),
        }
    }

    fn run_services(&mut self, now: u64) {
        if self.services.is_empty() {
            return;
        }
        let mut services = std::mem::take(&mut self.services);
        for service in &mut services {
            let mut ctx = ServiceCtx {
                now_ms: now,
                local_id: self.id,
                role: self.role,
                alive_peers: self.peers.alive_count(),
                store: &self.store,
                transport: &mut self.transport,
            };
            service.on_tick(&mut ctx);
        }
        services.append(&mut self.services);
        self.services = services;
    }

    fn run_loop_hooks(&mut self) {
        if self.loop_hooks.is_empty() {
            return;
        }
        let mut hooks = std::mem::take(&mut self.loop_hooks);
        for hook in &mut hooks {
            hook(self);
        }
        // Hooks registered from inside a hook land behind the originals.
        hooks.append(&mut self.loop_hooks);
        self.loop_hooks = hooks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::loopback::LoopbackHub;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn node(
        hub: &LoopbackHub,
        clock: &ManualClock,
        id: NodeId,
    ) -> SwarmNode<ManualClock, crate::loopback::LoopbackTransport> {
        SwarmNode::new(SwarmConfig::default(), clock.clone(), hub.endpoint(id))
    }

    #[test]
    fn name_defaults_from_id() {
        let hub = LoopbackHub::new();
        let clock = ManualClock::new();
        let n = node(&hub, &clock, 0xBEEF_1A2B);
        assert_eq!(n.node_name(), "N1A2B");
    }

    #[test]
    fn unchanged_write_does_not_broadcast() {
        let hub = LoopbackHub::new();
        let clock = ManualClock::new();
        let mut a = node(&hub, &clock, 1);
        let mut b = node(&hub, &clock, 2);
        b.tick();

        assert!(a.set_state("k", "v"));
        b.tick();
        assert_eq!(b.store().entry("k").unwrap().version, 1);

        // Same value again: nothing on the wire, version untouched.
        assert!(!a.set_state("k", "v"));
        b.tick();
        assert_eq!(b.store().entry("k").unwrap().version, 1);
    }

    #[test]
    fn heartbeat_carries_extras() {
        let hub = LoopbackHub::new();
        let clock = ManualClock::new();
        let mut a = node(&hub, &clock, 1);
        let mut b = node(&hub, &clock, 2);
        a.set_heartbeat_extra("door", 1);
        a.set_heap_gauge(|| 4096);

        clock.advance(5_000);
        a.tick();
        b.tick();

        let peer = b.peers().get(1).unwrap();
        assert_eq!(peer.name, "N1");
        assert!(peer.alive);
    }

    #[test]
    fn state_req_answered_with_full_sync() {
        let hub = LoopbackHub::new();
        let clock = ManualClock::new();
        let mut a = node(&hub, &clock, 1);
        let mut b = node(&hub, &clock, 2);

        a.set_state("k", "v");
        b.tick(); // b now has it too

        let mut late = node(&hub, &clock, 3);
        late.request_state_sync();
        a.tick();
        b.tick();
        late.tick();

        assert_eq!(late.state("k", ""), "v");
    }

    #[test]
    fn dropped_messages_counted() {
        let hub = LoopbackHub::new();
        let clock = ManualClock::new();
        let mut a = node(&hub, &clock, 1);
        let mut raw = hub.endpoint(99);

        use crate::transport::Transport;
        raw.broadcast(b"not json").unwrap();
        raw.broadcast(br#"{"t":42,"n":"X","d":{}}"#).unwrap();
        a.tick();

        assert_eq!(a.dropped_messages(), 2);
    }

    #[test]
    fn loop_hooks_run_in_order_and_can_write_state() {
        let hub = LoopbackHub::new();
        let clock = ManualClock::new();
        let mut a = node(&hub, &clock, 1);

        let order = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&order);
        a.on_loop(move |node| {
            node.set_state("hook", "ran");
            log.borrow_mut().push("first");
        });
        let log = Rc::clone(&order);
        a.on_loop(move |_| log.borrow_mut().push("second"));

        a.tick();
        assert_eq!(*order.borrow(), vec!["first", "second"]);
        assert_eq!(a.state("hook", ""), "ran");
    }

    #[test]
    fn batch_write_skips_unchanged_pairs() {
        let hub = LoopbackHub::new();
        let clock = ManualClock::new();
        let mut a = node(&hub, &clock, 1);

        a.set_state("a", "1");
        assert!(a.set_states([("a", "1"), ("b", "2")]));
        assert_eq!(a.store().entry("a").unwrap().version, 1);
        assert_eq!(a.store().entry("b").unwrap().version, 1);
        assert!(!a.set_states([("a", "1"), ("b", "2")]));
    }
}
