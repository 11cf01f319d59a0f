use crate::lattice::LatticeType;
use crate::protocol::RequestType;

/// A client request held back because the key's replication factors are not
/// known yet. Re-driven through the request path once the replication lookup
/// answers.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_type: RequestType,
    pub lattice_type: Option<LatticeType>,
    pub payload: Option<Vec<u8>>,
    pub response_address: Option<String>,
    pub request_id: String,
}

/// Inbound gossip held back for the same reason, re-driven the same way.
#[derive(Debug, Clone)]
pub struct PendingGossip {
    pub lattice_type: LatticeType,
    pub payload: Vec<u8>,
}

/// Event-loop continuation: everything keeps the loop running except a
/// self-depart, which ends the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Depart,
}

/// Outcome of applying a serialized lattice state to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Merged and persisted; carries the post-merge size.
    Stored(usize),
    /// The key already holds a different lattice kind.
    Mismatch,
    /// Backend failure, already logged. The write is simply lost locally;
    /// peers re-deliver via gossip.
    Failed,
}
