// crates/tessel-daemon/src/config.rs
//
// Runtime configuration for the Tessel daemon.
// Loaded from a TOML file or populated with sensible defaults.

use std::fs;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use tessel_cluster::RegistryConfig;
use tessel_core::PeerType;

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Node type: "store" (holds data, joins the ring) or "client".
    #[serde(default = "default_node_type")]
    pub node_type: String,

    /// Host address for the RPC server.
    #[serde(default = "default_rpc_host")]
    pub rpc_host: String,

    /// Port for the RPC server.
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// This node's publicly reachable URL (e.g., "http://10.0.0.1:7650").
    /// Peers address it by this URL and it is the node's ring identity.
    #[serde(default = "default_self_url")]
    pub self_url: String,

    /// Seed peer URLs. More peers are learned from announcements.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Virtual nodes per host on the hash ring.
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Bit count of each membership hint.
    #[serde(default = "default_hint_capacity")]
    pub hint_capacity: u64,

    /// Hash functions per membership hint.
    #[serde(default = "default_hint_recursions")]
    pub hint_recursions: u64,

    /// Bucket count of the local storage engine.
    #[serde(default = "default_store_buckets")]
    pub store_buckets: usize,

    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,

    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,

    #[serde(default = "default_announce_interval_ms")]
    pub announce_interval_ms: u64,

    /// Pending repair jobs held before new ones are dropped.
    #[serde(default = "default_repair_queue_capacity")]
    pub repair_queue_capacity: usize,

    #[serde(default = "default_repair_workers")]
    pub repair_workers: usize,

    /// Per-request timeout of the HTTP transport.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_node_type() -> String {
    "store".to_string()
}

fn default_rpc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_port() -> u16 {
    7650
}

fn default_self_url() -> String {
    "http://127.0.0.1:7650".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_replication_factor() -> usize {
    32
}

fn default_hint_capacity() -> u64 {
    65_536
}

fn default_hint_recursions() -> u64 {
    4
}

fn default_store_buckets() -> usize {
    64
}

fn default_discovery_interval_ms() -> u64 {
    1_000
}

fn default_broadcast_interval_ms() -> u64 {
    500
}

fn default_announce_interval_ms() -> u64 {
    5_000
}

fn default_repair_queue_capacity() -> usize {
    1_024
}

fn default_repair_workers() -> usize {
    4
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_type: default_node_type(),
            rpc_host: default_rpc_host(),
            rpc_port: default_rpc_port(),
            self_url: default_self_url(),
            peers: Vec::new(),
            log_level: default_log_level(),
            replication_factor: default_replication_factor(),
            hint_capacity: default_hint_capacity(),
            hint_recursions: default_hint_recursions(),
            store_buckets: default_store_buckets(),
            discovery_interval_ms: default_discovery_interval_ms(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            announce_interval_ms: default_announce_interval_ms(),
            repair_queue_capacity: default_repair_queue_capacity(),
            repair_workers: default_repair_workers(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Reject values the runtime cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.peer_type()?;
        let positive = [
            ("replication_factor", self.replication_factor as u64),
            ("hint_capacity", self.hint_capacity),
            ("hint_recursions", self.hint_recursions),
            ("store_buckets", self.store_buckets as u64),
            ("discovery_interval_ms", self.discovery_interval_ms),
            ("broadcast_interval_ms", self.broadcast_interval_ms),
            ("announce_interval_ms", self.announce_interval_ms),
            ("repair_queue_capacity", self.repair_queue_capacity as u64),
            ("repair_workers", self.repair_workers as u64),
            ("request_timeout_ms", self.request_timeout_ms),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
        }
        if self.hint_capacity < 64 {
            return Err(ConfigError::Invalid("hint_capacity must be >= 64".to_string()));
        }
        if !self.self_url.starts_with("http://") && !self.self_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "self_url '{}' must be an http(s) URL",
                self.self_url
            )));
        }
        Ok(())
    }

    pub fn peer_type(&self) -> Result<PeerType, ConfigError> {
        self.node_type
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown node_type '{}'", self.node_type)))
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            replication_factor: self.replication_factor,
            hint_capacity: self.hint_capacity,
            hint_recursions: self.hint_recursions,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
