//! Gateway-side telemetry delivery.

use std::cell::RefCell;
use std::rc::Rc;

use meshswarm_node::TelemetrySink;
use meshswarm_wire::{NodeId, TelemetryReport};
use serde_json::Value;
use tracing::{debug, warn};

use crate::uplink::Uplink;

/// Pushes the gateway's own telemetry and relays peer reports to the
/// control plane, addressed by the node's hex id. Delivery failures are
/// logged and dropped; the next scheduled push carries fresh data anyway.
pub struct UplinkTelemetry<U: Uplink> {
    uplink: Rc<RefCell<U>>,
}

impl<U: Uplink> UplinkTelemetry<U> {
    pub fn new(uplink: Rc<RefCell<U>>) -> Self {
        Self { uplink }
    }
}

impl<U: Uplink> TelemetrySink for UplinkTelemetry<U> {
    fn push_own(&mut self, node: NodeId, report: &TelemetryReport) -> bool {
        let raw = match serde_json::to_value(report) {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        match self
            .uplink
            .borrow_mut()
            .post_telemetry(&format!("{node:x}"), &raw)
        {
            Ok(()) => {
                debug!(target: "telem", node = format_args!("{node:x}"), "telemetry pushed");
                true
            }
            Err(err) => {
                warn!(target: "telem", %err, "telemetry push failed");
                false
            }
        }
    }

    fn relay(&mut self, from: NodeId, report: &Value) -> bool {
        match self
            .uplink
            .borrow_mut()
            .post_telemetry(&format!("{from:x}"), report)
        {
            Ok(()) => {
                debug!(target: "gateway", from = format_args!("{from:x}"), "relayed telemetry");
                true
            }
            Err(err) => {
                warn!(
                    target: "gateway",
                    %err,
                    from = format_args!("{from:x}"),
                    "telemetry relay failed"
                );
                false
            }
        }
    }
}
