use std::collections::{BTreeSet, HashMap};
use tracing::{error, warn};
use uuid::Uuid;

use super::types::PutOutcome;
use super::ServerWorker;
use crate::lattice::LatticeValue;
use crate::protocol::{
    is_metadata, key_from_replication_metadata, Key, KeyRequest, KeyResponse, KeyTuple,
    ReplicationFactor, ReplicationFactorUpdate, RequestType, ResponseError,
};
use crate::topology::types::KeyReplication;

impl ServerWorker {
    /// A replication lookup answered. Install the factors (tier defaults when
    /// the record does not exist yet), then re-drive everything that was
    /// parked on this key as if it had just arrived.
    pub(crate) async fn handle_replication_response(&mut self, bytes: Vec<u8>) {
        let response: KeyResponse = match bincode::deserialize(&bytes) {
            Ok(response) => response,
            Err(err) => {
                warn!("discarding malformed replication response: {err}");
                return;
            }
        };

        for tuple in response.tuples {
            let Some(key) = key_from_replication_metadata(&tuple.key) else {
                warn!("replication response for unexpected key {}", tuple.key);
                continue;
            };

            match tuple.error {
                None => {
                    let Some(factor) = tuple.payload.as_deref().and_then(decode_factor) else {
                        warn!("undecodable replication record for {key}");
                        continue;
                    };
                    self.install_replication(&key, &factor);
                }
                Some(ResponseError::KeyDoesNotExist) => {
                    self.install_default_replication(&key);
                }
                Some(ResponseError::WrongThread) => {
                    // The metadata replica set moved while our lookup was in
                    // flight; ask again against the current ring.
                    self.issue_replication_lookup(&key).await;
                    continue;
                }
                Some(err) => {
                    warn!("replication lookup for {key} failed: {err:?}");
                    continue;
                }
            }

            self.drain_pending(&key).await;
        }
    }

    pub(crate) fn install_replication(&mut self, key: &Key, factor: &ReplicationFactor) {
        let mut replication = KeyReplication::tier_defaults(
            &self.settings.default_global_map(),
            self.settings.default_local_replication,
        );
        for value in &factor.global {
            replication.global.insert(value.tier, value.value);
        }
        for value in &factor.local {
            replication.local.insert(value.tier, value.value);
        }
        self.key_replication_map.insert(key.clone(), replication);
    }

    /// Re-submit deferred requests and gossip for `key` through the normal
    /// handling paths.
    async fn drain_pending(&mut self, key: &Key) {
        let threads = self.resolve(key);

        if let Some(pending) = self.pending_requests.remove(key) {
            for request in pending {
                let mut response = KeyResponse {
                    response_id: request.request_id.clone(),
                    tuples: Vec::new(),
                };
                match &threads {
                    Some(threads) if threads.contains(&self.wt) => match request.request_type {
                        RequestType::Get => response.tuples.push(self.read_tuple(key)),
                        RequestType::Put => {
                            let (Some(kind), Some(payload)) =
                                (request.lattice_type, request.payload.as_deref())
                            else {
                                warn!("deferred PUT for {key} without type or payload");
                                continue;
                            };
                            if let Some(tuple) = self.write_tuple(key.clone(), kind, payload) {
                                response.tuples.push(tuple);
                            }
                        }
                    },
                    Some(threads) => {
                        response.tuples.push(self.wrong_thread_tuple(key.clone(), threads));
                    }
                    None => {
                        warn!("replication for {key} still unknown after lookup");
                        continue;
                    }
                }
                if let Some(addr) = request.response_address {
                    if !response.tuples.is_empty() {
                        self.transport.send_message(&addr, &response).await;
                    }
                }
            }
        }

        if let Some(pending) = self.pending_gossip.remove(key) {
            match &threads {
                Some(threads) if threads.contains(&self.wt) => {
                    for gossip in pending {
                        if self.apply_put(key, gossip.lattice_type, &gossip.payload)
                            == PutOutcome::Mismatch
                        {
                            error!("deferred gossip for {key} carries a mismatched lattice type");
                        }
                    }
                }
                Some(threads) => {
                    let tuples: Vec<KeyTuple> = pending
                        .into_iter()
                        .map(|gossip| {
                            KeyTuple::put(key.clone(), gossip.lattice_type, gossip.payload)
                        })
                        .collect();
                    for thread in threads {
                        let request = KeyRequest {
                            request_id: Uuid::new_v4().to_string(),
                            response_address: None,
                            request_type: RequestType::Put,
                            tuples: tuples.clone(),
                        };
                        self.transport
                            .send_message(&thread.gossip_addr(), &request)
                            .await;
                    }
                }
                None => {}
            }
        }
    }

    /// A key's replication factors changed. Workers that lose responsibility
    /// ship their latest state to the new owners and drop the local copy once
    /// no thread of this node holds responsibility; workers that gain it will
    /// receive the state through peer gossip.
    pub(crate) async fn handle_replication_change(&mut self, bytes: Vec<u8>) {
        let update: ReplicationFactorUpdate = match bincode::deserialize(&bytes) {
            Ok(update) => update,
            Err(err) => {
                warn!("discarding malformed replication change: {err}");
                return;
            }
        };

        if self.tid == 0 {
            for tid in 1..self.settings.thread_count() {
                let addr = self.settings.self_thread(tid).replication_change_addr();
                self.transport.send_message(&addr, &update).await;
            }
        }

        for factor in update.updates {
            let key = factor.key.clone();
            if is_metadata(&key) {
                continue;
            }

            let before = self.resolve(&key);
            self.install_replication(&key, &factor);
            let Some(after) = self.resolve(&key) else {
                continue;
            };

            let was_responsible = before
                .map(|threads| threads.contains(&self.wt))
                .unwrap_or(false);
            if !was_responsible
                || !self.stored_key_map.contains_key(&key)
                || after.contains(&self.wt)
            {
                continue;
            }

            let mut destinations: HashMap<String, BTreeSet<Key>> = HashMap::new();
            for thread in &after {
                destinations
                    .entry(thread.gossip_addr())
                    .or_default()
                    .insert(key.clone());
            }
            self.ship_keys(&destinations).await;

            let node_still_owns = after
                .iter()
                .any(|thread| thread.private_ip == self.settings.private_ip);
            if !node_still_owns {
                if let Some(property) = self.stored_key_map.remove(&key) {
                    if let Err(err) = self.serializers.get_mut(property.lattice_type).remove(&key)
                    {
                        error!("failed to drop {key} after replication change: {err}");
                    }
                }
            }
        }
    }
}

fn decode_factor(payload: &[u8]) -> Option<ReplicationFactor> {
    match bincode::deserialize::<LatticeValue>(payload) {
        Ok(LatticeValue::Lww(lww)) => bincode::deserialize(&lww.value).ok(),
        _ => None,
    }
}
