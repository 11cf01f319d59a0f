//! latticekv: per-node server worker of a distributed, tiered key-value
//! store whose values are conflict-free merge-semilattices.
//!
//! This library crate defines the core modules that make up one storage node.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`topology`**: The routing layer. Two-level consistent-hash rings map
//!   every key to the nodes, and threads within nodes, that must replicate it.
//! - **`lattice`**: The value model. Six merge-semilattice kinds whose joins
//!   are associative, commutative and idempotent, so replicas converge without
//!   coordination.
//! - **`store`**: The storage plane. Per-lattice-kind serializers that merge
//!   on write, backed by memory or thread-namespaced disk files.
//! - **`worker`**: The per-thread event loop. Shared-nothing workers multiplex
//!   client requests, peer gossip, membership changes, replication updates,
//!   cache tracking and telemetry ticks.
//! - **`protocol`**: Wire messages and `:`-delimited control strings.
//! - **`transport`**: Fire-and-forget UDP plumbing with one endpoint per
//!   `(thread, purpose)` pair.
//! - **`config`**: YAML configuration and the immutable per-node settings
//!   handed to every worker.

pub mod config;
pub mod lattice;
pub mod protocol;
pub mod store;
pub mod topology;
pub mod transport;
pub mod worker;
