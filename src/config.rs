//! Node configuration.
//!
//! Loaded once at startup from a YAML file and turned into an immutable
//! [`NodeSettings`] value that every worker receives at construction. The
//! `SERVER_TYPE` environment variable selects which tier this node serves.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::topology::types::{ServerThread, Tier, ALL_TIERS, DEFAULT_PORT_BASE};

/// On-disk configuration layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub threads: ThreadConfig,
    pub capacities: CapacityConfig,
    pub replication: ReplicationConfig,
    pub server: ServerConfig,
}

/// Worker thread count per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadConfig {
    pub memory: u32,
    pub ebs: u32,
}

/// Per-node byte capacity per tier, in megabytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityConfig {
    #[serde(rename = "memory-cap")]
    pub memory_cap: u64,
    #[serde(rename = "ebs-cap")]
    pub ebs_cap: u64,
}

/// Default replication factors: global per tier, plus the intra-node factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub memory: u32,
    pub ebs: u32,
    pub local: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub public_ip: String,
    pub private_ip: String,
    pub seed_ip: String,
    /// `"NULL"` disables management-node interaction entirely.
    pub mgmt_ip: String,
    #[serde(default = "default_port_base")]
    pub port_base: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub routing: Vec<String>,
    #[serde(default)]
    pub monitoring: Vec<String>,
}

fn default_port_base() -> u16 {
    DEFAULT_PORT_BASE
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("latticekv-data")
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("unable to parse config file {}", path.display()))
    }
}

/// Static description of one tier.
#[derive(Debug, Clone)]
pub struct TierMeta {
    pub threads: u32,
    pub default_replication: u32,
    pub node_capacity_bytes: u64,
}

/// Immutable runtime settings shared by every worker on the node.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub self_tier: Tier,
    pub tiers: HashMap<Tier, TierMeta>,
    pub default_local_replication: u32,
    pub public_ip: String,
    pub private_ip: String,
    pub seed_ip: String,
    pub mgmt_ip: Option<String>,
    pub routing_ips: Vec<String>,
    pub monitoring_ips: Vec<String>,
    pub port_base: u16,
    pub data_dir: PathBuf,
}

impl NodeSettings {
    pub fn from_config(config: &Config, self_tier: Tier) -> Self {
        let mut tiers = HashMap::new();
        tiers.insert(
            Tier::Memory,
            TierMeta {
                threads: config.threads.memory,
                default_replication: config.replication.memory,
                node_capacity_bytes: config.capacities.memory_cap * 1_000_000,
            },
        );
        tiers.insert(
            Tier::Disk,
            TierMeta {
                threads: config.threads.ebs,
                default_replication: config.replication.ebs,
                node_capacity_bytes: config.capacities.ebs_cap * 1_000_000,
            },
        );
        let mgmt_ip = match config.server.mgmt_ip.as_str() {
            "NULL" => None,
            ip => Some(ip.to_string()),
        };
        Self {
            self_tier,
            tiers,
            default_local_replication: config.replication.local,
            public_ip: config.server.public_ip.clone(),
            private_ip: config.server.private_ip.clone(),
            seed_ip: config.server.seed_ip.clone(),
            mgmt_ip,
            routing_ips: config.server.routing.clone(),
            monitoring_ips: config.server.monitoring.clone(),
            port_base: config.server.port_base,
            data_dir: config.server.data_dir.clone(),
        }
    }

    /// Worker thread count for this node's own tier.
    pub fn thread_count(&self) -> u32 {
        self.tier_threads(self.self_tier)
    }

    pub fn tier_threads(&self, tier: Tier) -> u32 {
        self.tiers.get(&tier).map(|meta| meta.threads).unwrap_or(0)
    }

    pub fn default_global_replication(&self, tier: Tier) -> u32 {
        self.tiers
            .get(&tier)
            .map(|meta| meta.default_replication)
            .unwrap_or(1)
    }

    /// Default global factors for every tier, for keys without overrides.
    pub fn default_global_map(&self) -> HashMap<Tier, u32> {
        ALL_TIERS
            .iter()
            .map(|tier| (*tier, self.default_global_replication(*tier)))
            .collect()
    }

    /// This node's identity handle for worker thread `tid`.
    pub fn self_thread(&self, tid: u32) -> ServerThread {
        ServerThread::new(&self.public_ip, &self.private_ip, tid, self.port_base)
    }
}
