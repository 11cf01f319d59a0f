//! Lattice Store Module
//!
//! Keyed storage with merge-on-write. A [`serializer::Serializer`] owns the
//! backing for one lattice kind (an in-memory map, or files on local disk
//! namespaced by worker thread); `put` deserializes the incoming state, merges
//! it with whatever is stored and persists the result. Because the merge is a
//! lattice join, repeated or reordered deliveries land on the same state.

pub mod serializer;


use crate::lattice::LatticeType;

/// Metadata about one stored key. The lattice type is fixed on first insert
/// and never changes over the key's lifetime; the size tracks the post-merge
/// state after every accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyProperty {
    pub size: usize,
    pub lattice_type: LatticeType,
}
