use std::collections::{BTreeSet, HashMap};
use tracing::{error, warn};
use uuid::Uuid;

use super::types::{PendingGossip, PutOutcome};
use super::ServerWorker;
use crate::protocol::{is_metadata, Key, KeyRequest, KeyTuple, RequestType};
use crate::topology::types::cache_update_addr;

impl ServerWorker {
    /// Outbound gossip round: ship the current state of every key mutated
    /// since the last round to its peer replicas and to every cache known to
    /// hold it. Full states, not deltas; the receiving merge absorbs
    /// duplicates.
    pub(crate) async fn gossip_tick(&mut self) {
        if self.local_changeset.is_empty() {
            return;
        }
        let changeset = std::mem::take(&mut self.local_changeset);

        let mut destinations: HashMap<String, BTreeSet<Key>> = HashMap::new();
        for key in changeset {
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
                None => error!("missing replication factor for {key} in gossip round"),
            }
            if let Some(cache_ips) = self.key_to_cache_ips.get(&key) {
                for cache_ip in cache_ips {
                    destinations
                        .entry(cache_update_addr(cache_ip, self.settings.port_base))
                        .or_default()
                        .insert(key.clone());
                }
            }
        }

        self.ship_keys(&destinations).await;
    }

    /// Inbound gossip: a PUT with nobody to answer. Keys with unknown
    /// replication are parked until the lookup resolves; keys this worker no
    /// longer owns are handed on to their current owners.
    pub(crate) async fn handle_gossip(&mut self, bytes: Vec<u8>) {
        let gossip: KeyRequest = match bincode::deserialize(&bytes) {
            Ok(gossip) => gossip,
            Err(err) => {
                warn!("discarding malformed gossip: {err}");
                return;
            }
        };

        let mut forwards: HashMap<String, Vec<KeyTuple>> = HashMap::new();
        for tuple in gossip.tuples {
            let (Some(kind), Some(payload)) = (tuple.lattice_type, tuple.payload.as_deref())
            else {
                warn!("discarding gossip for {} without type or payload", tuple.key);
                continue;
            };

            if is_metadata(&tuple.key) {
                if self.apply_put(&tuple.key, kind, payload) == PutOutcome::Mismatch {
                    error!("gossip for {} carries a mismatched lattice type", tuple.key);
                }
                continue;
            }

            match self.resolve(&tuple.key) {
                None => {
                    self.pending_gossip
                        .entry(tuple.key.clone())
                        .or_default()
                        .push(PendingGossip {
                            lattice_type: kind,
                            payload: payload.to_vec(),
                        });
                    self.issue_replication_lookup(&tuple.key).await;
                }
                Some(threads) if threads.contains(&self.wt) => {
                    if self.apply_put(&tuple.key, kind, payload) == PutOutcome::Mismatch {
                        error!("gossip for {} carries a mismatched lattice type", tuple.key);
                    }
                }
                Some(threads) => {
                    for thread in threads {
                        forwards
                            .entry(thread.gossip_addr())
                            .or_default()
                            .push(tuple.clone());
                    }
                }
            }
        }

        for (addr, tuples) in forwards {
            let request = KeyRequest {
                request_id: Uuid::new_v4().to_string(),
                response_address: None,
                request_type: RequestType::Put,
                tuples,
            };
            self.transport.send_message(&addr, &request).await;
        }
    }
}
