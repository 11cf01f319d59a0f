//! Consistent-hash rings and responsible-replica resolution.
//!
//! Both ring levels hash virtual ring points onto a 64-bit circle with the
//! standard `DefaultHasher`, which gives a deterministic key placement that is
//! identical on every node running the same build. Lookups walk clockwise from
//! the key's token and collect distinct physical owners; insertions and
//! removals touch only the affected virtual points.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use super::types::{KeyReplication, RingNode, ServerThread, Tier};
use crate::config::NodeSettings;
use crate::protocol::{is_metadata, Key};

/// Virtual ring points per inserted node. More points smooth the key
/// distribution at the cost of ring memory.
pub const VIRTUAL_NODE_COUNT: u32 = 256;

/// One consistent-hash ring: an ordered set of `(token, node)` points plus a
/// member index keyed by `(private_ip, vtid)`.
///
/// Token collisions order by the node's `(private_ip, join_epoch, vtid)`
/// identity, so equal hashes resolve the same way on every replica. A
/// re-insertion of a known `(private_ip, vtid)` only succeeds with a strictly
/// higher `join_epoch`; the stale entry is dropped first, which keeps the
/// epoch recorded for any private IP monotonically non-decreasing.
#[derive(Debug, Default, Clone)]
pub struct HashRing {
    tokens: BTreeSet<(u64, RingNode)>,
    members: BTreeMap<(String, u32), RingNode>,
}

fn hash_of(parts: &impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    parts.hash(&mut hasher);
    hasher.finish()
}

fn vnode_token(node: &RingNode, index: u32) -> u64 {
    hash_of(&(&node.private_ip, node.join_epoch, node.vtid, index))
}

fn key_token(key: &str) -> u64 {
    hash_of(&key)
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning whether the ring changed. An entry already
    /// present with the same or a higher `join_epoch` wins over the insert.
    pub fn insert(&mut self, node: RingNode) -> bool {
        let slot = (node.private_ip.clone(), node.vtid);
        if let Some(existing) = self.members.get(&slot) {
            if existing.join_epoch >= node.join_epoch {
                return false;
            }
            let stale = existing.clone();
            self.remove_tokens(&stale);
        }
        for index in 0..VIRTUAL_NODE_COUNT {
            self.tokens.insert((vnode_token(&node, index), node.clone()));
        }
        self.members.insert(slot, node);
        true
    }

    /// Remove every virtual point belonging to `private_ip`.
    pub fn remove(&mut self, private_ip: &str) -> bool {
        let slots: Vec<(String, u32)> = self
            .members
            .keys()
            .filter(|(ip, _)| ip == private_ip)
            .cloned()
            .collect();
        for slot in &slots {
            if let Some(node) = self.members.remove(slot) {
                self.remove_tokens(&node);
            }
        }
        !slots.is_empty()
    }

    fn remove_tokens(&mut self, node: &RingNode) {
        for index in 0..VIRTUAL_NODE_COUNT {
            self.tokens.remove(&(vnode_token(node, index), node.clone()));
        }
    }

    pub fn contains_node(&self, private_ip: &str) -> bool {
        self.members.keys().any(|(ip, _)| ip == private_ip)
    }

    /// The recorded join epoch for a physical node, if present.
    pub fn join_epoch_of(&self, private_ip: &str) -> Option<u32> {
        self.members
            .iter()
            .find(|((ip, _), _)| ip == private_ip)
            .map(|(_, node)| node.join_epoch)
    }

    /// One representative ring node per physical server, in a deterministic
    /// order. Used for announcement fan-out.
    pub fn unique_nodes(&self) -> Vec<RingNode> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for node in self.members.values() {
            if seen.insert(node.private_ip.clone()) {
                nodes.push(node.clone());
            }
        }
        nodes
    }

    /// Number of distinct physical servers on the ring.
    pub fn node_count(&self) -> usize {
        self.members
            .values()
            .map(|node| node.private_ip.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The first `count` distinct owners clockwise from the key's token,
    /// wrapping around the circle. Fewer owners exist than requested when the
    /// ring is small; the result is simply shorter then.
    pub fn successors(&self, key: &str, count: usize) -> Vec<RingNode> {
        if count == 0 || self.tokens.is_empty() {
            return Vec::new();
        }
        let start = (
            key_token(key),
            RingNode {
                public_ip: String::new(),
                private_ip: String::new(),
                join_epoch: 0,
                vtid: 0,
            },
        );
        let mut seen = HashSet::new();
        let mut owners = Vec::new();
        for (_, node) in self
            .tokens
            .range(start.clone()..)
            .chain(self.tokens.range(..start))
        {
            if seen.insert((node.private_ip.clone(), node.vtid)) {
                owners.push(node.clone());
                if owners.len() == count {
                    break;
                }
            }
        }
        owners
    }
}

/// One ring per tier.
pub type RingMap = HashMap<Tier, HashRing>;

/// Resolve the ordered set of threads that must hold a replica of `key`.
///
/// Metadata keys route through the MEMORY tier only and are replicated on
/// every memory node and thread. For ordinary keys the resolution needs the
/// key's replication factors; `None` means they are unknown and the caller
/// must defer the operation and look them up first.
pub fn responsible_threads(
    global_rings: &RingMap,
    local_rings: &RingMap,
    settings: &NodeSettings,
    key: &Key,
    replication: &HashMap<Key, KeyReplication>,
    tiers: &[Tier],
) -> Option<Vec<ServerThread>> {
    if is_metadata(key) {
        return Some(responsible_threads_metadata(
            key,
            global_rings,
            local_rings,
            settings,
        ));
    }
    let rep = replication.get(key)?;
    let mut threads = Vec::new();
    for tier in tiers {
        let (Some(global), Some(local)) = (global_rings.get(tier), local_rings.get(tier)) else {
            continue;
        };
        let global_rep = rep
            .global
            .get(tier)
            .copied()
            .unwrap_or_else(|| settings.default_global_replication(*tier));
        let local_rep = rep
            .local
            .get(tier)
            .copied()
            .unwrap_or(settings.default_local_replication);
        for node in global.successors(key, global_rep as usize) {
            for vnode in local.successors(key, local_rep as usize) {
                threads.push(ServerThread::new(
                    &node.public_ip,
                    &node.private_ip,
                    vnode.vtid,
                    settings.port_base,
                ));
            }
        }
    }
    Some(threads)
}

/// Responsible threads for a metadata key: every thread of every MEMORY node,
/// ordered by the clockwise walk from the key.
pub fn responsible_threads_metadata(
    key: &Key,
    global_rings: &RingMap,
    local_rings: &RingMap,
    settings: &NodeSettings,
) -> Vec<ServerThread> {
    let (Some(global), Some(local)) = (
        global_rings.get(&Tier::Memory),
        local_rings.get(&Tier::Memory),
    ) else {
        return Vec::new();
    };
    let node_count = global.node_count();
    let thread_count = settings.tier_threads(Tier::Memory) as usize;
    let mut threads = Vec::new();
    for node in global.successors(key, node_count) {
        for vnode in local.successors(key, thread_count) {
            threads.push(ServerThread::new(
                &node.public_ip,
                &node.private_ip,
                vnode.vtid,
                settings.port_base,
            ));
        }
    }
    threads
}

/// Whether `self_thread` is the first entry of the responsible order for
/// `key`. Exactly one thread per key answers true, which is what keeps
/// per-key size reporting single-sourced.
pub fn is_primary_replica(
    global_rings: &RingMap,
    local_rings: &RingMap,
    settings: &NodeSettings,
    key: &Key,
    replication: &HashMap<Key, KeyReplication>,
    self_thread: &ServerThread,
) -> bool {
    responsible_threads(
        global_rings,
        local_rings,
        settings,
        key,
        replication,
        &super::types::ALL_TIERS,
    )
    .map(|threads| threads.first() == Some(self_thread))
    .unwrap_or(false)
}
