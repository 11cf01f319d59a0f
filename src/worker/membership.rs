use std::collections::{BTreeSet, HashMap};
use tracing::{error, info, warn};

use super::types::Flow;
use super::{ServerWorker, DATA_REDISTRIBUTE_THRESHOLD};
use crate::protocol::{DepartNotice, JoinNotice, Key};
use crate::topology::types::{
    monitoring_notify_addr, routing_notify_addr, RingNode, ServerThread,
};

impl ServerWorker {
    /// A node announced itself. First sighting of a `(private_ip, epoch)`
    /// pair updates the ring; thread 0 then spreads the announcement and
    /// every worker re-examines which of its keys moved away.
    pub(crate) async fn handle_node_join(&mut self, raw: String) {
        let notice = match JoinNotice::parse(&raw) {
            Ok(notice) => notice,
            Err(err) => {
                warn!("{err}");
                return;
            }
        };

        let ring = self.global_rings.entry(notice.tier).or_default();
        if !ring.insert(RingNode {
            public_ip: notice.public_ip.clone(),
            private_ip: notice.private_ip.clone(),
            join_epoch: notice.join_epoch,
            vtid: 0,
        }) {
            // Stale epoch or an announcement we already processed.
            return;
        }
        info!(
            "node {} joined tier {} with epoch {}",
            notice.private_ip, notice.tier, notice.join_epoch
        );

        if notice.private_ip == self.settings.private_ip {
            return;
        }

        if self.tid == 0 {
            // Introduce ourselves to the newcomer, in case it bootstrapped
            // from a snapshot that predates us.
            let own = JoinNotice {
                tier: self.settings.self_tier,
                public_ip: self.settings.public_ip.clone(),
                private_ip: self.settings.private_ip.clone(),
                join_epoch: self.join_epoch,
            }
            .encode();
            let newcomer = ServerThread::new(
                &notice.public_ip,
                &notice.private_ip,
                0,
                self.settings.port_base,
            );
            self.transport
                .send_string(&newcomer.node_join_addr(), &own)
                .await;

            // Spread the announcement to everyone who might have missed it,
            // and to our sibling workers.
            let mut peers = Vec::new();
            for ring in self.global_rings.values() {
                for node in ring.unique_nodes() {
                    if node.private_ip != self.settings.private_ip
                        && node.private_ip != notice.private_ip
                    {
                        peers.push(
                            ServerThread::new(
                                &node.public_ip,
                                &node.private_ip,
                                0,
                                self.settings.port_base,
                            )
                            .node_join_addr(),
                        );
                    }
                }
            }
            for tid in 1..self.settings.thread_count() {
                peers.push(self.settings.self_thread(tid).node_join_addr());
            }
            for addr in peers {
                self.transport.send_string(&addr, &raw).await;
            }
        }

        if notice.tier != self.settings.self_tier {
            return;
        }

        let keys: Vec<Key> = self.stored_key_map.keys().cloned().collect();
        for key in keys {
            let Some(threads) = self.resolve(&key) else {
                error!("missing replication factor for {key} during join");
                continue;
            };
            if notice.join_epoch > 0 {
                // A rejoining node lost its state with its previous life;
                // queue everything it is responsible for again.
                for thread in threads.iter().filter(|t| t.private_ip == notice.private_ip) {
                    self.join_gossip_map
                        .entry(thread.gossip_addr())
                        .or_default()
                        .insert(key.clone());
                }
            } else if !threads.contains(&self.wt) {
                // The key moved off this worker; ship it, then drop it once
                // the backlog drains.
                self.join_remove_set.insert(key.clone());
                for thread in &threads {
                    self.join_gossip_map
                        .entry(thread.gossip_addr())
                        .or_default()
                        .insert(key.clone());
                }
            }
        }
    }

    pub(crate) async fn handle_node_depart(&mut self, raw: String) {
        let notice = match DepartNotice::parse(&raw) {
            Ok(notice) => notice,
            Err(err) => {
                warn!("{err}");
                return;
            }
        };
        let removed = self
            .global_rings
            .get_mut(&notice.tier)
            .map(|ring| ring.remove(&notice.private_ip))
            .unwrap_or(false);
        if !removed {
            return;
        }
        info!("node {} departed tier {}", notice.private_ip, notice.tier);

        if self.tid == 0 {
            for tid in 1..self.settings.thread_count() {
                let addr = self.settings.self_thread(tid).node_depart_addr();
                self.transport.send_string(&addr, &raw).await;
            }
        }
    }

    /// The orchestrator told this node to leave. Remove self from the rings,
    /// announce the departure, ship every stored key to the replicas that
    /// remain responsible, ack, and end the worker.
    pub(crate) async fn handle_self_depart(&mut self, ack_addr: String) -> Flow {
        info!("worker {} departing the cluster", self.tid);

        if let Some(ring) = self.global_rings.get_mut(&self.settings.self_tier) {
            ring.remove(&self.settings.private_ip.clone());
        }

        let body = DepartNotice {
            tier: self.settings.self_tier,
            public_ip: self.settings.public_ip.clone(),
            private_ip: self.settings.private_ip.clone(),
        }
        .encode();

        if self.tid == 0 {
            let mut peers = Vec::new();
            for ring in self.global_rings.values() {
                for node in ring.unique_nodes() {
                    if node.private_ip != self.settings.private_ip {
                        peers.push(
                            ServerThread::new(
                                &node.public_ip,
                                &node.private_ip,
                                0,
                                self.settings.port_base,
                            )
                            .node_depart_addr(),
                        );
                    }
                }
            }
            for addr in peers {
                self.transport.send_string(&addr, &body).await;
            }
            let notify = format!("depart:{body}");
            for ip in &self.settings.routing_ips {
                let addr = routing_notify_addr(ip, self.settings.port_base);
                self.transport.send_string(&addr, &notify).await;
            }
            for ip in &self.settings.monitoring_ips {
                let addr = monitoring_notify_addr(ip, self.settings.port_base);
                self.transport.send_string(&addr, &notify).await;
            }
        }

        let mut destinations: HashMap<String, BTreeSet<Key>> = HashMap::new();
        let keys: Vec<Key> = self.stored_key_map.keys().cloned().collect();
        for key in keys {
            match self.resolve(&key) {
                Some(threads) => {
                    for thread in threads {
                        if thread != self.wt {
                            destinations
                                .entry(thread.gossip_addr())
                                .or_default()
                                .insert(key.clone());
                        }
                    }
                }
                None => error!("missing replication factor for {key} during departure"),
            }
        }
        self.ship_keys(&destinations).await;

        if !ack_addr.is_empty() {
            self.transport.send_string(&ack_addr, &body).await;
        }
        Flow::Depart
    }

    /// Drain a bounded slice of the join-redistribution backlog. Once the
    /// backlog empties, keys that were queued for removal actually leave the
    /// store; until then every shipped key stays readable.
    pub(crate) async fn redistribute_tick(&mut self) {
        if self.join_gossip_map.is_empty() {
            return;
        }

        let mut batch: HashMap<String, BTreeSet<Key>> = HashMap::new();
        let mut drained = Vec::new();
        for (addr, keys) in self.join_gossip_map.iter_mut() {
            // Copy the slice out before trimming the set it came from.
            let sent: Vec<Key> = keys
                .iter()
                .take(DATA_REDISTRIBUTE_THRESHOLD)
                .cloned()
                .collect();
            for key in &sent {
                keys.remove(key);
            }
            batch.entry(addr.clone()).or_default().extend(sent);
            if keys.is_empty() {
                drained.push(addr.clone());
            }
        }
        for addr in drained {
            self.join_gossip_map.remove(&addr);
        }

        self.ship_keys(&batch).await;

        if self.join_gossip_map.is_empty() {
            let removals = std::mem::take(&mut self.join_remove_set);
            for key in removals {
                if let Some(property) = self.stored_key_map.remove(&key) {
                    if let Err(err) = self.serializers.get_mut(property.lattice_type).remove(&key)
                    {
                        error!("failed to drop {key} after redistribution: {err}");
                    }
                }
            }
        }
    }
}
