//! Gateway-side OTA firmware distribution.
//!
//! A poll-driven state machine: ask the control plane for a pending update,
//! offer it to role-matched peers through the transport, then serve
//! firmware parts on demand with ranged fetches, reporting start, progress
//! and the terminal outcome. At most one update is active at a time, and
//! serving a part is idempotent — the same part number always fetches the
//! same byte range.

use std::cell::RefCell;
use std::rc::Rc;

use meshswarm_node::{FirmwareOffer, PartRequest, ServiceCtx, SwarmService};
use tracing::{debug, info, warn};

use crate::uplink::{OtaProgress, PendingUpdate, Uplink};

/// OTA distribution knobs.
#[derive(Debug, Clone)]
pub struct OtaConfig {
    pub poll_interval_ms: u64,
    /// Bytes per firmware part.
    pub part_size: usize,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
            part_size: 1024,
        }
    }
}

/// The update currently held by the gateway.
#[derive(Debug, Clone)]
pub struct OtaUpdate {
    pub info: PendingUpdate,
    /// True from acceptance until the terminal report.
    pub active: bool,
    /// Highest part number served so far, -1 before the first.
    pub last_part_sent: i64,
    /// Set once the first part has been served.
    pub transfer_started: bool,
}

/// Gateway OTA service. Plugs into the node scheduler; part requests are
/// served before the poll so a waiting peer never stalls behind it.
pub struct OtaDistributor<U: Uplink> {
    config: OtaConfig,
    uplink: Rc<RefCell<U>>,
    current: Option<OtaUpdate>,
    last_poll: Option<u64>,
}

impl<U: Uplink> OtaDistributor<U> {
    pub fn new(config: OtaConfig, uplink: Rc<RefCell<U>>) -> Self {
        Self {
            config,
            uplink,
            current: None,
            last_poll: None,
        }
    }

    /// The update being distributed, if any.
    pub fn current(&self) -> Option<&OtaUpdate> {
        self.current.as_ref()
    }

    fn poll_due(&self, now_ms: u64) -> bool {
        match self.last_poll {
            None => true,
            Some(last) => now_ms - last >= self.config.poll_interval_ms,
        }
    }

    fn poll(&mut self, ctx: &mut ServiceCtx<'_>) {
        if let Some(current) = &self.current {
            // A running transfer owns the uplink; do not poll under it.
            if current.active && current.transfer_started {
                return;
            }
        }

        let updates = match self.uplink.borrow_mut().pending_updates() {
            Ok(updates) => updates,
            Err(err) => {
                warn!(target: "ota", %err, "pending poll failed");
                return;
            }
        };
        let Some(info) = updates.into_iter().next() else {
            debug!(target: "ota", "no pending updates");
            return;
        };

        info!(
            target: "ota",
            update_id = info.update_id,
            version = %info.version,
            node_type = %info.node_type,
            parts = info.num_parts,
            size = info.size_bytes,
            "pending update"
        );
        self.current = Some(OtaUpdate {
            info,
            active: true,
            last_part_sent: -1,
            transfer_started: false,
        });
        self.offer(ctx);
    }

    fn offer(&mut self, ctx: &mut ServiceCtx<'_>) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        if let Err(err) = self.uplink.borrow_mut().report_start(current.info.update_id) {
            warn!(target: "ota", %err, "start report failed");
        }

        let offer = FirmwareOffer {
            node_type: current.info.node_type.clone(),
            hardware: current.info.hardware.clone(),
            md5: current.info.md5.clone(),
            num_parts: current.info.num_parts,
            force: current.info.force,
        };
        if ctx.transport.offer_firmware(&offer) {
            info!(
                target: "ota",
                update_id = current.info.update_id,
                node_type = %current.info.node_type,
                "offered to mesh"
            );
        } else {
            warn!(
                target: "ota",
                update_id = current.info.update_id,
                "transport rejected offer"
            );
            if let Err(err) = self
                .uplink
                .borrow_mut()
                .report_fail(current.info.update_id, "transport rejected offer")
            {
                warn!(target: "ota", %err, "fail report failed");
            }
            current.active = false;
        }
    }

    fn serve(&mut self, request: PartRequest, ctx: &mut ServiceCtx<'_>) {
        let Some(current) = self.current.as_mut() else {
            // Nothing to serve; an empty part tells the peer to back off.
            let _ = ctx.transport.send_part(request.from, request.part, &[]);
            return;
        };
        let info = &current.info;
        let node_hex = format!("{:x}", request.from);

        let part_size = self.config.part_size as u64;
        let offset = u64::from(request.part) * part_size;
        if offset >= info.size_bytes {
            let _ = ctx.transport.send_part(request.from, request.part, &[]);
            return;
        }
        let chunk = part_size.min(info.size_bytes - offset) as usize;

        let mut buf = vec![0u8; chunk];
        let read = match self
            .uplink
            .borrow_mut()
            .fetch_firmware(info.firmware_id, offset, &mut buf)
        {
            Ok(read) => read,
            Err(err) => {
                warn!(target: "ota", %err, part = request.part, "firmware fetch failed");
                0
            }
        };
        if read < chunk {
            warn!(
                target: "ota",
                part = request.part,
                wanted = chunk,
                got = read,
                "short firmware read"
            );
            let _ = ctx.transport.send_part(request.from, request.part, &[]);
            let progress = OtaProgress {
                current_part: request.part,
                total_parts: info.num_parts,
                status: "failed".into(),
                error_message: Some("short firmware read".into()),
            };
            if let Err(err) =
                self.uplink
                    .borrow_mut()
                    .report_progress(info.update_id, &node_hex, &progress)
            {
                debug!(target: "ota", %err, "progress report failed");
            }
            return;
        }

        if let Err(err) = ctx.transport.send_part(request.from, request.part, &buf) {
            warn!(target: "ota", %err, part = request.part, "part send failed");
            return;
        }
        current.transfer_started = true;
        current.last_part_sent = i64::from(request.part);
        debug!(
            target: "ota",
            part = request.part,
            bytes = chunk,
            to = %node_hex,
            "served part"
        );

        let progress = OtaProgress {
            current_part: request.part,
            total_parts: info.num_parts,
            status: "downloading".into(),
            error_message: None,
        };
        if let Err(err) =
            self.uplink
                .borrow_mut()
                .report_progress(info.update_id, &node_hex, &progress)
        {
            debug!(target: "ota", %err, "progress report failed");
        }

        if request.part + 1 == info.num_parts && current.active {
            info!(target: "ota", update_id = info.update_id, "transfer complete");
            if let Err(err) = self.uplink.borrow_mut().report_complete(info.update_id) {
                warn!(target: "ota", %err, "complete report failed");
            }
            current.active = false;
        }
    }
}

impl<U: Uplink> SwarmService for OtaDistributor<U> {
    fn on_tick(&mut self, ctx: &mut ServiceCtx<'_>) {
        for request in ctx.transport.poll_part_requests() {
            self.serve(request, ctx);
        }
        if self.poll_due(ctx.now_ms) {
            self.last_poll = Some(ctx.now_ms);
            self.poll(ctx);
        }
    }
}
