//! Cluster Topology Module
//!
//! Maps keys to the set of server threads that must hold a replica of them.
//!
//! ## Core Concepts
//! - **Tiers**: Every node belongs to one storage tier (MEMORY or DISK) with its own
//!   thread count, capacity and default replication factor.
//! - **Two-level rings**: A global consistent-hash ring per tier places keys on nodes;
//!   a local ring per tier places keys on worker threads within a node. Both hash
//!   virtual ring points onto a 64-bit circle and walk clockwise.
//! - **Replication factors**: Per-key `{global, local}` factors per tier, with tier
//!   defaults for keys that carry no override. Keys whose factors are not yet known
//!   cannot be resolved; callers defer the operation and issue a metadata lookup.
//! - **Addressing**: Each `(node, thread, purpose)` pair owns a deterministic UDP
//!   endpoint, stable across restarts for the same `(private_ip, tid, purpose)`.

pub mod ring;
pub mod types;
