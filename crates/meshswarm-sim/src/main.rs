//! MeshSwarm demo.
//!
//! Runs a handful of nodes on one in-process loopback hub so election,
//! replication and anti-entropy are all visible in the logs. The lowest-id
//! node writes a counter every few seconds; every node watches every key.

use std::time::{Duration, Instant};

use meshswarm_node::{LoopbackHub, SwarmConfig, SwarmNode, SystemClock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let node_count: usize = std::env::var("SWARM_SIM_NODES")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(3);

    tracing::info!(nodes = node_count, "starting swarm sim");

    let hub = LoopbackHub::new();
    let mut nodes = Vec::with_capacity(node_count);
    for index in 0..node_count {
        let id = 0x1000 + index as u32;
        let mut node = SwarmNode::new(SwarmConfig::from_env(), SystemClock::new(), hub.endpoint(id));
        let name = node.node_name().to_string();
        node.watch_state("*", move |key, value, old| {
            tracing::info!(target: "state", node = %name, key, value, old, "observed");
        });
        node.set_heartbeat_extra("sim", 1);
        nodes.push(node);
    }

    let mut counter = 0u32;
    let mut last_write: Option<Instant> = None;
    loop {
        for node in &mut nodes {
            node.tick();
        }

        if last_write.map_or(true, |at| at.elapsed() >= Duration::from_secs(3)) {
            counter += 1;
            let writer = &mut nodes[0];
            writer.set_state("counter", &counter.to_string());
            tracing::info!(
                target: "mesh",
                writer = %writer.node_name(),
                role = %writer.role(),
                coordinator = format_args!("{:#06x}", writer.coordinator_id()),
                counter,
                "wrote counter"
            );
            last_write = Some(Instant::now());
        }

        std::thread::sleep(Duration::from_millis(20));
    }
}
