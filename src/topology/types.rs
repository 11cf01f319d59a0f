use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A homogeneous storage class with its own ring, thread count and defaults.
///
/// `Disk` is spelled `ebs` on the wire and in `SERVER_TYPE`, matching the
/// deployment environment it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Memory,
    Disk,
}

/// Resolution order for multi-tier lookups: memory first, then disk.
pub const ALL_TIERS: [Tier; 2] = [Tier::Memory, Tier::Disk];

impl Tier {
    pub fn parse(name: &str) -> Option<Tier> {
        match name {
            "memory" => Some(Tier::Memory),
            "ebs" => Some(Tier::Disk),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Memory => write!(f, "memory"),
            Tier::Disk => write!(f, "ebs"),
        }
    }
}

// Port layout relative to the node's configured base port. Every worker thread
// adds its `tid` on top of the purpose offset, so purposes must stay at least
// one maximum thread count apart.
pub const DEFAULT_PORT_BASE: u16 = 6000;

const NODE_JOIN_OFFSET: u16 = 0;
const NODE_DEPART_OFFSET: u16 = 25;
const SELF_DEPART_OFFSET: u16 = 50;
const REQUEST_OFFSET: u16 = 75;
const GOSSIP_OFFSET: u16 = 100;
const REPLICATION_RESPONSE_OFFSET: u16 = 125;
const REPLICATION_CHANGE_OFFSET: u16 = 150;
const CACHE_IP_RESPONSE_OFFSET: u16 = 175;
const MANAGEMENT_RESPONSE_OFFSET: u16 = 200;

// Endpoints owned by external collaborators, derived from the same base so a
// whole deployment is described by one number.
const ROUTING_SEED_OFFSET: u16 = 225;
const ROUTING_NOTIFY_OFFSET: u16 = 250;
const MONITORING_NOTIFY_OFFSET: u16 = 275;
const MANAGEMENT_RESTART_OFFSET: u16 = 300;
const MANAGEMENT_FUNC_NODES_OFFSET: u16 = 325;
const CACHE_UPDATE_OFFSET: u16 = 350;
const CACHE_ENUMERATE_OFFSET: u16 = 375;

/// Identity of one worker thread on one node, plus its endpoint derivation.
///
/// Peers address each other through the private IP; only the client-facing
/// request endpoint is ever handed out on the public IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerThread {
    pub public_ip: String,
    pub private_ip: String,
    pub tid: u32,
    port_base: u16,
}

impl ServerThread {
    pub fn new(
        public_ip: impl Into<String>,
        private_ip: impl Into<String>,
        tid: u32,
        port_base: u16,
    ) -> Self {
        Self {
            public_ip: public_ip.into(),
            private_ip: private_ip.into(),
            tid,
            port_base,
        }
    }

    fn endpoint(&self, offset: u16) -> String {
        format!(
            "{}:{}",
            self.private_ip,
            self.port_base + offset + self.tid as u16
        )
    }

    pub fn node_join_addr(&self) -> String {
        self.endpoint(NODE_JOIN_OFFSET)
    }

    pub fn node_depart_addr(&self) -> String {
        self.endpoint(NODE_DEPART_OFFSET)
    }

    pub fn self_depart_addr(&self) -> String {
        self.endpoint(SELF_DEPART_OFFSET)
    }

    pub fn request_addr(&self) -> String {
        self.endpoint(REQUEST_OFFSET)
    }

    /// Request endpoint advertised to clients outside the cluster network.
    pub fn public_request_addr(&self) -> String {
        format!(
            "{}:{}",
            self.public_ip,
            self.port_base + REQUEST_OFFSET + self.tid as u16
        )
    }

    pub fn gossip_addr(&self) -> String {
        self.endpoint(GOSSIP_OFFSET)
    }

    pub fn replication_response_addr(&self) -> String {
        self.endpoint(REPLICATION_RESPONSE_OFFSET)
    }

    pub fn replication_change_addr(&self) -> String {
        self.endpoint(REPLICATION_CHANGE_OFFSET)
    }

    pub fn cache_ip_response_addr(&self) -> String {
        self.endpoint(CACHE_IP_RESPONSE_OFFSET)
    }

    pub fn management_response_addr(&self) -> String {
        self.endpoint(MANAGEMENT_RESPONSE_OFFSET)
    }
}

impl PartialEq for ServerThread {
    fn eq(&self, other: &Self) -> bool {
        self.private_ip == other.private_ip && self.tid == other.tid
    }
}

impl Eq for ServerThread {}

impl Hash for ServerThread {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.private_ip.hash(state);
        self.tid.hash(state);
    }
}

/// Seed endpoint on a routing node (request/reply).
pub fn seed_addr(routing_ip: &str, port_base: u16) -> String {
    format!("{}:{}", routing_ip, port_base + ROUTING_SEED_OFFSET)
}

/// Join/depart notification endpoint on a routing node.
pub fn routing_notify_addr(routing_ip: &str, port_base: u16) -> String {
    format!("{}:{}", routing_ip, port_base + ROUTING_NOTIFY_OFFSET)
}

/// Join/depart notification endpoint on a monitoring node.
pub fn monitoring_notify_addr(monitoring_ip: &str, port_base: u16) -> String {
    format!("{}:{}", monitoring_ip, port_base + MONITORING_NOTIFY_OFFSET)
}

/// Restart-count query endpoint on the management node (request/reply).
pub fn management_restart_addr(management_ip: &str, port_base: u16) -> String {
    format!("{}:{}", management_ip, port_base + MANAGEMENT_RESTART_OFFSET)
}

/// Live-cache-list query endpoint on the management node.
pub fn management_func_nodes_addr(management_ip: &str, port_base: u16) -> String {
    format!("{}:{}", management_ip, port_base + MANAGEMENT_FUNC_NODES_OFFSET)
}

/// Invalidation-gossip endpoint on an external cache node.
pub fn cache_update_addr(cache_ip: &str, port_base: u16) -> String {
    format!("{}:{}", cache_ip, port_base + CACHE_UPDATE_OFFSET)
}

/// Key-enumeration query endpoint on an external cache node.
pub fn cache_enumerate_addr(cache_ip: &str, port_base: u16) -> String {
    format!("{}:{}", cache_ip, port_base + CACHE_ENUMERATE_OFFSET)
}

/// A virtual point on a consistent-hash ring.
///
/// Global rings carry `vtid == 0` entries, one ring node per physical server;
/// local rings carry one entry per worker thread with `join_epoch == 0`.
/// Identity (and therefore ordering on the circle when tokens collide) is
/// `(private_ip, join_epoch, vtid)`; the public IP travels along as metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingNode {
    pub public_ip: String,
    pub private_ip: String,
    pub join_epoch: u32,
    pub vtid: u32,
}

impl RingNode {
    fn identity(&self) -> (&str, u32, u32) {
        (&self.private_ip, self.join_epoch, self.vtid)
    }
}

impl PartialEq for RingNode {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for RingNode {}

impl Ord for RingNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl PartialOrd for RingNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for RingNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.private_ip.hash(state);
        self.join_epoch.hash(state);
        self.vtid.hash(state);
    }
}

/// Per-key replication factors, one entry per tier.
///
/// Missing entries mean "use the tier default". A key with no record at all in
/// the replication map is *unknown* and must be looked up before any routing
/// decision can be made for it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyReplication {
    pub global: HashMap<Tier, u32>,
    pub local: HashMap<Tier, u32>,
}

impl KeyReplication {
    /// Factors for a key that carries no override: the tier defaults.
    pub fn tier_defaults(defaults: &HashMap<Tier, u32>, local_default: u32) -> Self {
        let mut local = HashMap::new();
        for tier in ALL_TIERS {
            local.insert(tier, local_default);
        }
        Self {
            global: defaults.clone(),
            local,
        }
    }
}
