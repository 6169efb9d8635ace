//! Runtime configuration. Defaults hold the protocol constants.

/// Telemetry scheduling knobs.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Periodic push interval.
    pub interval_ms: u64,
    /// Minimum spacing between state-change-triggered pushes.
    pub min_state_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 30_000,
            min_state_interval_ms: 2_000,
        }
    }
}

impl TelemetryConfig {
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_interval(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }
}

/// Node configuration.
///
/// The mesh credentials are carried for the transport's bring-up; the
/// runtime itself only reads the timing fields and identity strings.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Mesh network name.
    pub mesh_prefix: String,
    pub mesh_password: String,
    pub mesh_port: u16,
    /// Human name; derived from the node id when absent.
    pub node_name: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub state_sync_interval_ms: u64,
    /// A peer silent for longer than this is pruned.
    pub peer_dead_ms: u64,
    pub firmware_version: String,
    pub telemetry: TelemetryConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            mesh_prefix: "swarm".to_string(),
            mesh_password: "swarmnet123".to_string(),
            mesh_port: 5555,
            node_name: None,
            heartbeat_interval_ms: 5_000,
            state_sync_interval_ms: 10_000,
            peer_dead_ms: 15_000,
            firmware_version: "1.0.0".to_string(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl SwarmConfig {
    /// Defaults overridden from `SWARM_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(prefix) = std::env::var("SWARM_MESH_PREFIX") {
            config.mesh_prefix = prefix;
        }
        if let Ok(password) = std::env::var("SWARM_MESH_PASSWORD") {
            config.mesh_password = password;
        }
        if let Ok(port) = std::env::var("SWARM_MESH_PORT") {
            if let Ok(port) = port.parse() {
                config.mesh_port = port;
            }
        }
        if let Ok(name) = std::env::var("SWARM_NODE_NAME") {
            config.node_name = Some(name);
        }
        if let Ok(version) = std::env::var("SWARM_FIRMWARE_VERSION") {
            config.firmware_version = version;
        }
        config
    }

    #[must_use]
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[must_use]
    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = version.into();
        self
    }
}
