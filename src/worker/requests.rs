use std::time::Instant;
use tracing::warn;

use super::types::{PendingRequest, PutOutcome};
use super::ServerWorker;
use crate::lattice::LatticeType;
use crate::protocol::{
    Key, KeyRequest, KeyResponse, RequestType, ResponseError, ResponseTuple,
};
use crate::topology::types::ServerThread;

impl ServerWorker {
    pub(crate) async fn handle_request(&mut self, bytes: Vec<u8>) {
        let request: KeyRequest = match bincode::deserialize(&bytes) {
            Ok(request) => request,
            Err(err) => {
                warn!("discarding malformed request: {err}");
                return;
            }
        };
        self.process_request(request).await;
    }

    /// Handle one client request batch: track accesses, check ownership per
    /// tuple, serve or store, and defer tuples whose replication factors are
    /// still unknown. The response only carries tuples that were actually
    /// decided here; deferred tuples answer later, out of the drain path.
    pub(crate) async fn process_request(&mut self, request: KeyRequest) {
        let mut response = KeyResponse {
            response_id: request.request_id.clone(),
            tuples: Vec::new(),
        };

        for tuple in request.tuples {
            self.note_access(&tuple.key);

            let Some(threads) = self.resolve(&tuple.key) else {
                self.pending_requests
                    .entry(tuple.key.clone())
                    .or_default()
                    .push(PendingRequest {
                        request_type: request.request_type,
                        lattice_type: tuple.lattice_type,
                        payload: tuple.payload,
                        response_address: request.response_address.clone(),
                        request_id: request.request_id.clone(),
                    });
                self.issue_replication_lookup(&tuple.key).await;
                continue;
            };

            if !threads.contains(&self.wt) {
                response
                    .tuples
                    .push(self.wrong_thread_tuple(tuple.key, &threads));
                continue;
            }

            match request.request_type {
                RequestType::Get => response.tuples.push(self.read_tuple(&tuple.key)),
                RequestType::Put => {
                    let (Some(kind), Some(payload)) =
                        (tuple.lattice_type, tuple.payload.as_deref())
                    else {
                        warn!("discarding PUT for {} without type or payload", tuple.key);
                        continue;
                    };
                    if let Some(result) = self.write_tuple(tuple.key, kind, payload) {
                        response.tuples.push(result);
                    }
                }
            }
        }

        if let Some(addr) = request.response_address {
            if !response.tuples.is_empty() {
                self.transport.send_message(&addr, &response).await;
            }
        }
    }

    pub(crate) fn note_access(&mut self, key: &Key) {
        self.key_access_tracker
            .entry(key.clone())
            .or_default()
            .push(Instant::now());
        self.access_count += 1;
    }

    /// A `WrongThread` reply carrying the client-facing endpoints of the
    /// threads that do own the key, so the caller can retry directly.
    pub(crate) fn wrong_thread_tuple(&self, key: Key, threads: &[ServerThread]) -> ResponseTuple {
        let mut tuple = ResponseTuple::error(key, ResponseError::WrongThread);
        tuple.responsible = threads
            .iter()
            .map(ServerThread::public_request_addr)
            .collect();
        tuple
    }

    pub(crate) fn read_tuple(&self, key: &Key) -> ResponseTuple {
        match self.read_value(key) {
            Some((kind, payload)) => ResponseTuple {
                key: key.clone(),
                lattice_type: Some(kind),
                payload: Some(payload),
                error: None,
                responsible: Vec::new(),
            },
            None => ResponseTuple::error(key.clone(), ResponseError::KeyDoesNotExist),
        }
    }

    /// Apply a client PUT and mark the key for the next gossip round.
    pub(crate) fn write_tuple(
        &mut self,
        key: Key,
        kind: LatticeType,
        payload: &[u8],
    ) -> Option<ResponseTuple> {
        match self.apply_put(&key, kind, payload) {
            PutOutcome::Stored(_) => {
                self.local_changeset.insert(key.clone());
                Some(ResponseTuple::ok(key))
            }
            PutOutcome::Mismatch => {
                Some(ResponseTuple::error(key, ResponseError::LatticeMismatch))
            }
            PutOutcome::Failed => None,
        }
    }
}
