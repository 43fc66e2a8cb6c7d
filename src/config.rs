//! Per-node configuration.
//!
//! Every tunable the node needs lives here so tests can build clusters with
//! short timers and the binary can fill it from CLI flags. Defaults match
//! production values.

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a single store node.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address for the public HTTP facade.
    pub http_server_addr: String,
    /// Bind address for the consensus RPC transport.
    pub raft_server_addr: String,
    /// Durable directory for the consensus log, snapshots and peer list.
    pub raft_dir: String,
    /// Start as a standalone single-node cluster (elects itself immediately).
    pub run_in_single_server_mode: bool,
    /// Discard the persisted peer list on startup, keeping only self.
    pub reset_peers_on_load: bool,
    /// HTTP address of an existing member whose `/join` endpoint should be
    /// used to enter the cluster.
    pub join_address: Option<String>,
    /// UDP bind address for the bootstrap pub/sub transport. `None` disables
    /// the pub/sub bootstrap path.
    pub bootstrap_bind: Option<SocketAddr>,
    /// Seed addresses the bootstrap transport publishes to.
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Shared secret for signing bootstrap announcements.
    pub shared_secret: Option<String>,

    /// Eviction tick interval in milliseconds.
    pub ttl_tick_ms: u64,
    /// Maximum TTL index elements examined per eviction tick.
    pub ttl_chunk_size: usize,
    /// Leader heartbeat/replication interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Lower bound of the randomized election timeout in milliseconds.
    pub election_timeout_min_ms: u64,
    /// Upper bound of the randomized election timeout in milliseconds.
    pub election_timeout_max_ms: u64,
    /// How long a proposal may wait for quorum before failing.
    pub apply_timeout_ms: u64,
    /// Applied-entry count that triggers log compaction.
    pub snapshot_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_server_addr: "127.0.0.1:4000".to_string(),
            raft_server_addr: "127.0.0.1:4100".to_string(),
            raft_dir: "./raft".to_string(),
            run_in_single_server_mode: false,
            reset_peers_on_load: false,
            join_address: None,
            bootstrap_bind: None,
            bootstrap_peers: vec![],
            shared_secret: None,
            ttl_tick_ms: 5_000,
            ttl_chunk_size: 100,
            heartbeat_interval_ms: 50,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            apply_timeout_ms: 5_000,
            snapshot_threshold: 1024,
        }
    }
}

impl Config {
    pub fn ttl_tick(&self) -> Duration {
        Duration::from_millis(self.ttl_tick_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }
}
