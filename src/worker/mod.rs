//! Server Worker Module
//!
//! One [`ServerWorker`] per OS-level worker thread, shared-nothing: rings,
//! replication state and the store are per-worker copies, and sibling workers
//! are just peers addressed through their endpoints. The event loop
//! multiplexes the nine inbound queues with the gossip and report timers;
//! every handler runs to completion before the next event is taken, and the
//! join-redistribution backlog is drained a bounded slice at a time after
//! every turn.
//!
//! ## Submodules
//! - **`bootstrap`**: seed membership exchange, join-epoch query, announcements.
//! - **`requests`**: client GET/PUT handling with ownership checks and deferral.
//! - **`gossip`**: periodic changeset fan-out and inbound gossip merge.
//! - **`membership`**: node join / depart / self-depart and key redistribution.
//! - **`replication`**: replication-factor responses and changes.
//! - **`caches`**: external cache key tracking for invalidation gossip.
//! - **`telemetry`**: per-epoch statistics reports.

pub mod types;

mod bootstrap;
mod caches;
mod gossip;
mod membership;
mod replication;
mod requests;
mod telemetry;

#[cfg(test)]
mod tests;

use anyhow::Result;
use rand::seq::SliceRandom;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::NodeSettings;
use crate::lattice::LatticeType;
use crate::protocol::{
    replication_metadata_key, Key, KeyRequest, KeyTuple, RequestType,
};
use crate::store::serializer::SerializerMap;
use crate::store::KeyProperty;
use crate::topology::ring::{
    responsible_threads, responsible_threads_metadata, HashRing, RingMap,
};
use crate::topology::types::{KeyReplication, RingNode, ServerThread, Tier, ALL_TIERS};
use crate::transport::{Inbound, Transport, WorkerSockets};
use self::types::{Flow, PendingGossip, PendingRequest, PutOutcome};

/// Gossip cadence, in microseconds of wall clock between outbound rounds.
const GOSSIP_PERIOD: Duration = Duration::from_micros(10_000);

/// How often each worker publishes its statistics reports.
const SERVER_REPORT_PERIOD: Duration = Duration::from_secs(15);

/// Sliding window for per-key access counting.
const KEY_MONITORING_WINDOW: Duration = Duration::from_secs(60);

/// Upper bound on keys shipped per destination per loop turn while draining
/// the join-redistribution backlog.
const DATA_REDISTRIBUTE_THRESHOLD: usize = 50;

/// Working-time slots: nine inbound event classes plus the gossip round.
const EVENT_CLASSES: usize = 10;
const GOSSIP_CLASS: usize = 9;

/// All mutable state of one worker thread, owned exclusively.
pub struct ServerWorker {
    settings: Arc<NodeSettings>,
    tid: u32,
    wt: ServerThread,
    join_epoch: u32,

    transport: Transport,
    inbox: mpsc::Receiver<Inbound>,

    global_rings: RingMap,
    local_rings: RingMap,

    serializers: SerializerMap,
    stored_key_map: HashMap<Key, KeyProperty>,
    key_replication_map: HashMap<Key, KeyReplication>,
    local_changeset: HashSet<Key>,

    pending_requests: HashMap<Key, Vec<PendingRequest>>,
    pending_gossip: HashMap<Key, Vec<PendingGossip>>,

    join_gossip_map: HashMap<String, BTreeSet<Key>>,
    join_remove_set: HashSet<Key>,

    extant_caches: HashSet<String>,
    cache_ip_to_keys: HashMap<String, BTreeSet<Key>>,
    key_to_cache_ips: HashMap<Key, BTreeSet<String>>,

    key_access_tracker: HashMap<Key, Vec<Instant>>,
    access_count: u32,
    epoch: u32,
    rid: u64,
    working_time: u64,
    working_time_map: [u64; EVENT_CLASSES],
    report_start: Instant,
}

impl ServerWorker {
    /// Bind this worker's endpoints and build its empty state. The rings stay
    /// unpopulated until [`bootstrap`](Self::bootstrap) or
    /// [`install_membership`](Self::install_membership) runs.
    pub async fn new(settings: Arc<NodeSettings>, tid: u32) -> Result<Self> {
        let wt = settings.self_thread(tid);
        let inbox = WorkerSockets::bind_all(&wt).await?.into_inbox();
        let transport = Transport::new().await?;

        let serializers = match settings.self_tier {
            Tier::Memory => SerializerMap::memory(),
            Tier::Disk => SerializerMap::disk(&settings.data_dir, tid)?,
        };

        // Local rings are fixed by configuration: one entry per worker thread
        // per tier, identical on every node of the deployment.
        let mut local_rings: RingMap = HashMap::new();
        for tier in ALL_TIERS {
            let ring = local_rings.entry(tier).or_default();
            for vtid in 0..settings.tier_threads(tier) {
                ring.insert(RingNode {
                    public_ip: settings.public_ip.clone(),
                    private_ip: settings.private_ip.clone(),
                    join_epoch: 0,
                    vtid,
                });
            }
        }
        let global_rings = ALL_TIERS.iter().map(|tier| (*tier, HashRing::new())).collect();

        Ok(Self {
            settings,
            tid,
            wt,
            join_epoch: 0,
            transport,
            inbox,
            global_rings,
            local_rings,
            serializers,
            stored_key_map: HashMap::new(),
            key_replication_map: HashMap::new(),
            local_changeset: HashSet::new(),
            pending_requests: HashMap::new(),
            pending_gossip: HashMap::new(),
            join_gossip_map: HashMap::new(),
            join_remove_set: HashSet::new(),
            extant_caches: HashSet::new(),
            cache_ip_to_keys: HashMap::new(),
            key_to_cache_ips: HashMap::new(),
            key_access_tracker: HashMap::new(),
            access_count: 0,
            epoch: 0,
            rid: 0,
            working_time: 0,
            working_time_map: [0; EVENT_CLASSES],
            report_start: Instant::now(),
        })
    }

    /// The worker event loop. Returns only on self-depart or when every pump
    /// task has gone away.
    pub async fn run(mut self) -> Result<()> {
        let now = tokio::time::Instant::now();
        let mut gossip_timer = tokio::time::interval_at(now + GOSSIP_PERIOD, GOSSIP_PERIOD);
        gossip_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report_timer =
            tokio::time::interval_at(now + SERVER_REPORT_PERIOD, SERVER_REPORT_PERIOD);
        report_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.report_start = Instant::now();

        info!("worker {} serving tier {}", self.tid, self.settings.self_tier);

        loop {
            tokio::select! {
                event = self.inbox.recv() => {
                    let Some(event) = event else { break };
                    let class = event.class();
                    let began = Instant::now();
                    let flow = self.dispatch(event).await;
                    let elapsed = began.elapsed().as_micros() as u64;
                    self.working_time += elapsed;
                    self.working_time_map[class] += elapsed;
                    if flow == Flow::Depart {
                        info!("worker {} departed", self.tid);
                        return Ok(());
                    }
                }
                _ = gossip_timer.tick() => {
                    let began = Instant::now();
                    self.gossip_tick().await;
                    let elapsed = began.elapsed().as_micros() as u64;
                    self.working_time += elapsed;
                    self.working_time_map[GOSSIP_CLASS] += elapsed;
                }
                _ = report_timer.tick() => {
                    self.report_tick().await;
                }
            }
            self.redistribute_tick().await;
        }
        Ok(())
    }

    async fn dispatch(&mut self, event: Inbound) -> Flow {
        match event {
            Inbound::NodeJoin(raw) => self.handle_node_join(raw).await,
            Inbound::NodeDepart(raw) => self.handle_node_depart(raw).await,
            Inbound::SelfDepart(ack_addr) => return self.handle_self_depart(ack_addr).await,
            Inbound::Request(bytes) => self.handle_request(bytes).await,
            Inbound::Gossip(bytes) => self.handle_gossip(bytes).await,
            Inbound::ReplicationResponse(bytes) => self.handle_replication_response(bytes).await,
            Inbound::ReplicationChange(bytes) => self.handle_replication_change(bytes).await,
            Inbound::CacheKeys(bytes) => self.handle_cache_keys(bytes),
            Inbound::ManagementNodes(bytes) => self.handle_management_nodes(bytes).await,
        }
        Flow::Continue
    }

    /// Responsible threads for `key`, or `None` while its replication factors
    /// are unknown.
    pub(crate) fn resolve(&self, key: &Key) -> Option<Vec<ServerThread>> {
        responsible_threads(
            &self.global_rings,
            &self.local_rings,
            &self.settings,
            key,
            &self.key_replication_map,
            &ALL_TIERS,
        )
    }

    pub(crate) fn resolve_metadata(&self, key: &Key) -> Vec<ServerThread> {
        responsible_threads_metadata(key, &self.global_rings, &self.local_rings, &self.settings)
    }

    /// Merge a serialized lattice state into the local store, keeping the
    /// stored-key map current.
    pub(crate) fn apply_put(&mut self, key: &Key, kind: LatticeType, payload: &[u8]) -> PutOutcome {
        if let Some(property) = self.stored_key_map.get(key) {
            if property.lattice_type != kind {
                return PutOutcome::Mismatch;
            }
        }
        match self.serializers.get_mut(kind).put(key, payload) {
            Ok(size) => {
                self.stored_key_map.insert(
                    key.clone(),
                    KeyProperty {
                        size,
                        lattice_type: kind,
                    },
                );
                PutOutcome::Stored(size)
            }
            Err(err) => {
                error!("write of {key} failed: {err}");
                PutOutcome::Failed
            }
        }
    }

    /// The stored state of `key` in wire form, if this worker holds it.
    pub(crate) fn read_value(&self, key: &Key) -> Option<(LatticeType, Vec<u8>)> {
        let property = self.stored_key_map.get(key)?;
        match self.serializers.get(property.lattice_type).get(key) {
            Ok(Some(payload)) => Some((property.lattice_type, payload)),
            Ok(None) => None,
            Err(err) => {
                error!("read of {key} failed: {err}");
                None
            }
        }
    }

    /// Ask a MEMORY-tier metadata replica for `key`'s replication record. The
    /// answer lands on this worker's replication-response endpoint.
    pub(crate) async fn issue_replication_lookup(&mut self, key: &Key) {
        let metadata_key = replication_metadata_key(key);
        let targets = self.resolve_metadata(&metadata_key);
        let Some(target) = pick_random(&targets) else {
            warn!("no metadata replica reachable for replication lookup of {key}");
            return;
        };
        self.rid += 1;
        let request = KeyRequest {
            request_id: format!("{}:{}", self.wt.replication_response_addr(), self.rid),
            response_address: Some(self.wt.replication_response_addr()),
            request_type: RequestType::Get,
            tuples: vec![KeyTuple::get(metadata_key)],
        };
        let addr = target.request_addr();
        self.transport.send_message(&addr, &request).await;
    }

    /// Record replication factors for `key` that match the tier defaults.
    pub(crate) fn install_default_replication(&mut self, key: &Key) {
        let replication = KeyReplication::tier_defaults(
            &self.settings.default_global_map(),
            self.settings.default_local_replication,
        );
        self.key_replication_map.insert(key.clone(), replication);
    }

    /// One fire-and-forget PUT carrying current lattice states, as used by
    /// gossip rounds, redistribution and departures alike.
    pub(crate) async fn ship_keys(&self, destinations: &HashMap<String, BTreeSet<Key>>) {
        for (addr, keys) in destinations {
            let mut tuples = Vec::new();
            for key in keys {
                if let Some((kind, payload)) = self.read_value(key) {
                    tuples.push(KeyTuple::put(key.clone(), kind, payload));
                }
            }
            if tuples.is_empty() {
                continue;
            }
            let request = KeyRequest {
                request_id: Uuid::new_v4().to_string(),
                response_address: None,
                request_type: RequestType::Put,
                tuples,
            };
            self.transport.send_message(addr, &request).await;
        }
    }
}

fn pick_random(threads: &[ServerThread]) -> Option<&ServerThread> {
    threads.choose(&mut rand::thread_rng())
}
