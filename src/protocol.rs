//! Wire Protocol Module
//!
//! Data transfer objects exchanged between workers, routing nodes, monitoring
//! nodes, the management node and external caches. Structured messages travel
//! as bincode datagrams; membership control messages (joins, departs, seed and
//! restart queries) are bare `:`-delimited strings so they can be produced by
//! anything that can write a UDP packet.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::lattice::LatticeType;
use crate::topology::types::Tier;

/// Keys are opaque byte strings; in practice UTF-8 names.
pub type Key = String;

/// Reserved prefix marking keys that carry cluster metadata. Metadata keys
/// route through the MEMORY tier only.
pub const METADATA_PREFIX: &str = "_meta";

const METADATA_DELIM: char = '|';

pub fn is_metadata(key: &str) -> bool {
    key.starts_with(METADATA_PREFIX)
}

/// Metadata key holding the replication record for `key`.
pub fn replication_metadata_key(key: &Key) -> Key {
    format!("{METADATA_PREFIX}{METADATA_DELIM}replication{METADATA_DELIM}{key}")
}

/// Inverse of [`replication_metadata_key`].
pub fn key_from_replication_metadata(metadata_key: &str) -> Option<Key> {
    metadata_key
        .strip_prefix(METADATA_PREFIX)?
        .strip_prefix(METADATA_DELIM)?
        .strip_prefix("replication")?
        .strip_prefix(METADATA_DELIM)
        .map(str::to_string)
}

/// The periodic self-reports every worker emits.
#[derive(Debug, Clone, Copy)]
pub enum ReportKind {
    ServerStats,
    KeyAccess,
    KeySize,
}

impl ReportKind {
    fn name(self) -> &'static str {
        match self {
            ReportKind::ServerStats => "server_stats",
            ReportKind::KeyAccess => "key_access",
            ReportKind::KeySize => "key_size",
        }
    }
}

/// Metadata key under which a worker publishes one of its reports.
pub fn report_metadata_key(kind: ReportKind, tier: Tier, private_ip: &str, tid: u32) -> Key {
    format!(
        "{METADATA_PREFIX}{METADATA_DELIM}{}{METADATA_DELIM}{tier}{METADATA_DELIM}{private_ip}:{tid}",
        kind.name()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Get,
    Put,
}

/// One key's worth of a request. `lattice_type` and `payload` are required for
/// PUTs and absent on GETs; `payload` is the bincode form of a
/// [`crate::lattice::LatticeValue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyTuple {
    pub key: Key,
    pub lattice_type: Option<LatticeType>,
    pub payload: Option<Vec<u8>>,
}

impl KeyTuple {
    pub fn get(key: Key) -> Self {
        Self {
            key,
            lattice_type: None,
            payload: None,
        }
    }

    pub fn put(key: Key, lattice_type: LatticeType, payload: Vec<u8>) -> Self {
        Self {
            key,
            lattice_type: Some(lattice_type),
            payload: Some(payload),
        }
    }
}

/// A batched GET or PUT. `response_address` is empty for fire-and-forget
/// deliveries such as gossip and self-reports; responses are correlated by
/// `request_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRequest {
    pub request_id: String,
    pub response_address: Option<String>,
    pub request_type: RequestType,
    pub tuples: Vec<KeyTuple>,
}

/// Per-tuple failure kinds carried back to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseError {
    /// GET on a key this replica does not hold.
    KeyDoesNotExist,
    /// The receiver is not in the key's responsible set; `responsible` in the
    /// tuple names the threads that are.
    WrongThread,
    /// PUT with a lattice type different from the stored one.
    LatticeMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTuple {
    pub key: Key,
    pub lattice_type: Option<LatticeType>,
    pub payload: Option<Vec<u8>>,
    pub error: Option<ResponseError>,
    /// Current responsible request endpoints, populated on `WrongThread`.
    pub responsible: Vec<String>,
}

impl ResponseTuple {
    pub fn ok(key: Key) -> Self {
        Self {
            key,
            lattice_type: None,
            payload: None,
            error: None,
            responsible: Vec::new(),
        }
    }

    pub fn error(key: Key, error: ResponseError) -> Self {
        Self {
            key,
            lattice_type: None,
            payload: None,
            error: Some(error),
            responsible: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyResponse {
    pub response_id: String,
    pub tuples: Vec<ResponseTuple>,
}

/// Which physical servers make up which tier; the seed node's answer to a
/// bootstrap "join" query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub tiers: Vec<TierMembership>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierMembership {
    pub tier: Tier,
    pub servers: Vec<ServerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub public_ip: String,
    pub private_ip: String,
}

/// Replication factors for one key, as stored in replication metadata records
/// and shipped in replication-change notices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationFactor {
    pub key: Key,
    pub global: Vec<ReplicationValue>,
    pub local: Vec<ReplicationValue>,
}

/// The replication level for a single key at a single tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationValue {
    pub tier: Tier,
    pub value: u32,
}

/// A batch of replication-factor changes pushed to the servers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationFactorUpdate {
    pub updates: Vec<ReplicationFactor>,
}

/// Body of the per-epoch `server_stats` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerThreadStatistics {
    pub storage_consumption_kb: u64,
    pub occupancy: f64,
    pub epoch: u32,
    pub access_count: u32,
}

/// Body of the per-epoch `key_access` report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyAccessData {
    pub keys: Vec<KeyCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCount {
    pub key: Key,
    pub access_count: u32,
}

/// Body of the per-epoch `key_size` report, emitted by primaries only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeySizeData {
    pub key_sizes: Vec<KeySizeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySizeEntry {
    pub key: Key,
    pub size: u64,
}

/// An external cache's declaration of the keys it currently holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKeysReport {
    pub cache_ip: String,
    pub keys: Vec<Key>,
}

/// Query asking a cache to enumerate its keys back to `respond_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKeysQuery {
    pub respond_to: String,
    pub request_id: String,
}

/// Management node's answer listing the live cache/function nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheNodeList {
    pub ips: Vec<String>,
}

/// Parsed node-join announcement: `"<tier>:<public_ip>:<private_ip>:<epoch>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinNotice {
    pub tier: Tier,
    pub public_ip: String,
    pub private_ip: String,
    pub join_epoch: u32,
}

impl JoinNotice {
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 4 {
            return Err(anyhow!("malformed join notice: {raw:?}"));
        }
        Ok(Self {
            tier: Tier::parse(parts[0])
                .ok_or_else(|| anyhow!("unknown tier in join notice: {:?}", parts[0]))?,
            public_ip: parts[1].to_string(),
            private_ip: parts[2].to_string(),
            join_epoch: parts[3].parse()?,
        })
    }

    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.tier, self.public_ip, self.private_ip, self.join_epoch
        )
    }
}

/// Parsed node-depart announcement: `"<tier>:<public_ip>:<private_ip>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartNotice {
    pub tier: Tier,
    pub public_ip: String,
    pub private_ip: String,
}

impl DepartNotice {
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 3 {
            return Err(anyhow!("malformed depart notice: {raw:?}"));
        }
        Ok(Self {
            tier: Tier::parse(parts[0])
                .ok_or_else(|| anyhow!("unknown tier in depart notice: {:?}", parts[0]))?,
            public_ip: parts[1].to_string(),
            private_ip: parts[2].to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.tier, self.public_ip, self.private_ip)
    }
}
