//! Node configuration.

use crate::types::{NodeMeta, ServerAddress, ServerId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's unique server id.
    pub server_id: String,

    /// Host this node binds the Raft transport to (e.g., "0.0.0.0").
    pub bind_addr: String,

    /// Port of the Raft transport. 0 asks the OS for a free port.
    pub raft_bind_port: u16,

    /// Host advertised to other nodes (e.g., "192.168.1.10").
    /// If not set, uses bind_addr.
    pub advertise_addr: Option<String>,

    /// Directory for durable Raft state. Required unless `in_memory`.
    pub data_dir: Option<PathBuf>,

    /// Keep all Raft state in memory.
    pub in_memory: bool,

    /// Address of an existing member to join through. Empty means bootstrap.
    pub join_addr: String,

    /// Raft timing configuration.
    pub raft: RaftConfig,

    /// Snapshot configuration.
    pub snapshot: SnapshotConfig,

    /// Storage tuning.
    pub storage: StorageConfig,

    /// Transport tuning.
    pub transport: TransportConfig,

    /// Membership and lifecycle timeouts.
    pub membership: MembershipConfig,
}

/// Raft timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Election timeout range (min, max) in milliseconds.
    /// A random value in this range is chosen for each election.
    /// Should be >> heartbeat_interval to avoid spurious elections.
    pub election_timeout_ms: (u64, u64),

    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Maximum entries per AppendEntries RPC.
    pub max_entries_per_append: u64,
}

/// Snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Create snapshot after this many log entries.
    pub snapshot_threshold: u64,

    /// Number of snapshot files kept on disk.
    pub retain: usize,
}

/// Storage tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Number of recently appended log entries served from memory.
    pub log_cache_capacity: usize,
}

/// Transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum number of pooled peer connections.
    pub max_pool: usize,

    /// Dial and per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Membership and lifecycle timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Bound on a single add-voter proposal, in milliseconds.
    pub add_voter_timeout_ms: u64,

    /// Bound on a single remove-server proposal, in milliseconds.
    pub remove_server_timeout_ms: u64,

    /// Bound on a leadership transfer, in milliseconds.
    pub transfer_timeout_ms: u64,

    /// Capacity of the outgoing cluster event queue.
    pub event_queue_capacity: usize,

    /// How many times a joining node contacts the join target.
    pub join_attempts: u32,

    /// Pause between join attempts, in milliseconds.
    pub join_retry_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server_id: String::new(),
            bind_addr: "127.0.0.1".to_string(),
            raft_bind_port: 8300,
            advertise_addr: None,
            data_dir: None,
            in_memory: false,
            join_addr: String::new(),
            raft: RaftConfig::default(),
            snapshot: SnapshotConfig::default(),
            storage: StorageConfig::default(),
            transport: TransportConfig::default(),
            membership: MembershipConfig::default(),
        }
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            // Election timeout: 150-300ms (standard Raft recommendation)
            election_timeout_ms: (150, 300),
            heartbeat_interval_ms: 50,
            max_entries_per_append: 100,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            snapshot_threshold: 8_192,
            retain: 2,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_cache_capacity: 512,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_pool: 10,
            timeout_ms: 500,
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            add_voter_timeout_ms: 10_000,
            remove_server_timeout_ms: 10_000,
            transfer_timeout_ms: 5_000,
            event_queue_capacity: 128,
            join_attempts: 5,
            join_retry_interval_ms: 500,
        }
    }
}

impl NodeConfig {
    /// Create a new configuration builder.
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }

    /// This node's server id.
    pub fn server_id(&self) -> ServerId {
        ServerId::new(self.server_id.clone())
    }

    /// `host:port` the transport binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.raft_bind_port)
    }

    /// Host advertised to peers (falls back to bind_addr).
    pub fn advertise_host(&self) -> &str {
        self.advertise_addr.as_deref().unwrap_or(&self.bind_addr)
    }

    /// The join target, if any.
    pub fn join_target(&self) -> Option<&str> {
        let addr = self.join_addr.trim();
        (!addr.is_empty()).then_some(addr)
    }

    /// Identity of this node once its transport address is known.
    pub fn node_meta(&self, raft_addr: impl Into<ServerAddress>) -> NodeMeta {
        NodeMeta::new(self.server_id(), raft_addr)
    }

    /// Transport dial and call timeout.
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.timeout_ms)
    }

    /// Bound on add-voter proposals.
    pub fn add_voter_timeout(&self) -> Duration {
        Duration::from_millis(self.membership.add_voter_timeout_ms)
    }

    /// Bound on remove-server proposals.
    pub fn remove_server_timeout(&self) -> Duration {
        Duration::from_millis(self.membership.remove_server_timeout_ms)
    }

    /// Bound on leadership transfer.
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.membership.transfer_timeout_ms)
    }

    /// Pause between join attempts.
    pub fn join_retry_interval(&self) -> Duration {
        Duration::from_millis(self.membership.join_retry_interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.server_id.trim().is_empty() {
            return Err("server_id is required".to_string());
        }

        if self.bind_addr.is_empty() {
            return Err("bind_addr is required".to_string());
        }

        if !self.in_memory && self.data_dir.is_none() {
            return Err("data_dir is required unless in_memory is set".to_string());
        }

        let (min_election, max_election) = self.raft.election_timeout_ms;
        if min_election > max_election {
            return Err(format!(
                "election_timeout_ms min ({}) must not exceed max ({})",
                min_election, max_election
            ));
        }

        // Heartbeat should be much less than election timeout
        if self.raft.heartbeat_interval_ms >= min_election / 2 {
            return Err(format!(
                "heartbeat_interval_ms ({}) should be << election_timeout_ms ({})",
                self.raft.heartbeat_interval_ms, min_election
            ));
        }

        if self.snapshot.retain == 0 {
            return Err("snapshot.retain must be > 0".to_string());
        }

        if self.storage.log_cache_capacity == 0 {
            return Err("storage.log_cache_capacity must be > 0".to_string());
        }

        if self.transport.max_pool == 0 {
            return Err("transport.max_pool must be > 0".to_string());
        }

        if self.membership.event_queue_capacity == 0 {
            return Err("membership.event_queue_capacity must be > 0".to_string());
        }

        Ok(())
    }
}

/// Builder for NodeConfig.
#[derive(Debug, Default)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Set the server id.
    pub fn server_id(mut self, id: impl Into<String>) -> Self {
        self.config.server_id = id.into();
        self
    }

    /// Set the bind host.
    pub fn bind_addr(mut self, host: impl Into<String>) -> Self {
        self.config.bind_addr = host.into();
        self
    }

    /// Set the Raft port.
    pub fn raft_bind_port(mut self, port: u16) -> Self {
        self.config.raft_bind_port = port;
        self
    }

    /// Set the advertised host.
    pub fn advertise_addr(mut self, host: impl Into<String>) -> Self {
        self.config.advertise_addr = Some(host.into());
        self
    }

    /// Set the data directory.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = Some(path.into());
        self
    }

    /// Keep all state in memory.
    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.config.in_memory = in_memory;
        self
    }

    /// Join an existing cluster through this address.
    pub fn join_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.join_addr = addr.into();
        self
    }

    /// Set election timeout range in milliseconds.
    pub fn election_timeout_ms(mut self, min: u64, max: u64) -> Self {
        self.config.raft.election_timeout_ms = (min, max);
        self
    }

    /// Set heartbeat interval in milliseconds.
    pub fn heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.config.raft.heartbeat_interval_ms = ms;
        self
    }

    /// Set snapshot threshold.
    pub fn snapshot_threshold(mut self, entries: u64) -> Self {
        self.config.snapshot.snapshot_threshold = entries;
        self
    }

    /// Set the leadership transfer bound.
    pub fn transfer_timeout_ms(mut self, ms: u64) -> Self {
        self.config.membership.transfer_timeout_ms = ms;
        self
    }

    /// Set the number of join attempts.
    pub fn join_attempts(mut self, attempts: u32) -> Self {
        self.config.membership.join_attempts = attempts;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<NodeConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}
