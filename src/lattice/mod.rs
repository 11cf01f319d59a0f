//! Lattice Value Module
//!
//! Every value in the store is a join-semilattice: a state with a binary merge
//! that is associative, commutative and idempotent. Replicas converge by
//! merging whole states, so duplicated or reordered delivery never changes the
//! outcome.
//!
//! Six kinds are supported as a closed tagged variant:
//! - **LWW**: last-writer-wins register ordered by `(timestamp, value)`.
//! - **SET** / **ORDERED_SET**: grow-only sets merged by union.
//! - **SINGLE_CAUSAL** / **MULTI_CAUSAL**: vector-clock guarded registers that
//!   keep all concurrent writes (see [`causal`]).
//! - **PRIORITY**: register keeping the entry with the lowest priority.

pub mod causal;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use causal::{MultiCausalValue, SingleCausalValue};

/// Discriminant for the six supported lattice kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LatticeType {
    Lww,
    Set,
    OrderedSet,
    SingleCausal,
    MultiCausal,
    Priority,
}

/// Every supported kind, in a stable order.
pub const ALL_LATTICE_TYPES: [LatticeType; 6] = [
    LatticeType::Lww,
    LatticeType::Set,
    LatticeType::OrderedSet,
    LatticeType::SingleCausal,
    LatticeType::MultiCausal,
    LatticeType::Priority,
];

impl fmt::Display for LatticeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LatticeType::Lww => "lww",
            LatticeType::Set => "set",
            LatticeType::OrderedSet => "ordered-set",
            LatticeType::SingleCausal => "single-causal",
            LatticeType::MultiCausal => "multi-causal",
            LatticeType::Priority => "priority",
        };
        write!(f, "{name}")
    }
}

/// Last-writer-wins register. The higher timestamp wins; equal timestamps
/// break by the larger value so that merge stays commutative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LwwValue {
    pub timestamp: u64,
    pub value: Vec<u8>,
}

impl LwwValue {
    pub fn new(timestamp: u64, value: Vec<u8>) -> Self {
        Self { timestamp, value }
    }

    pub fn merge(&mut self, other: LwwValue) {
        if (other.timestamp, &other.value) > (self.timestamp, &self.value) {
            *self = other;
        }
    }
}

/// Grow-only unordered set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetValue {
    pub elements: HashSet<Vec<u8>>,
}

impl SetValue {
    pub fn merge(&mut self, other: SetValue) {
        self.elements.extend(other.elements);
    }
}

/// Grow-only set with a stable iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedSetValue {
    pub elements: BTreeSet<Vec<u8>>,
}

impl OrderedSetValue {
    pub fn merge(&mut self, other: OrderedSetValue) {
        self.elements.extend(other.elements);
    }
}

/// Register keeping the entry with the lowest priority. Equal priorities break
/// by the smaller value, again for commutativity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityValue {
    pub priority: f64,
    pub value: Vec<u8>,
}

impl PriorityValue {
    pub fn new(priority: f64, value: Vec<u8>) -> Self {
        Self { priority, value }
    }

    pub fn merge(&mut self, other: PriorityValue) {
        let ordering = other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.value.cmp(&self.value));
        if ordering.is_lt() {
            *self = other;
        }
    }
}

/// A lattice state of any supported kind, as stored and shipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LatticeValue {
    Lww(LwwValue),
    Set(SetValue),
    OrderedSet(OrderedSetValue),
    SingleCausal(SingleCausalValue),
    MultiCausal(MultiCausalValue),
    Priority(PriorityValue),
}

impl LatticeValue {
    pub fn kind(&self) -> LatticeType {
        match self {
            LatticeValue::Lww(_) => LatticeType::Lww,
            LatticeValue::Set(_) => LatticeType::Set,
            LatticeValue::OrderedSet(_) => LatticeType::OrderedSet,
            LatticeValue::SingleCausal(_) => LatticeType::SingleCausal,
            LatticeValue::MultiCausal(_) => LatticeType::MultiCausal,
            LatticeValue::Priority(_) => LatticeType::Priority,
        }
    }

    /// Merge another state of the same kind into this one. Returns `false`
    /// without touching `self` when the kinds differ.
    pub fn merge(&mut self, other: LatticeValue) -> bool {
        match (self, other) {
            (LatticeValue::Lww(a), LatticeValue::Lww(b)) => a.merge(b),
            (LatticeValue::Set(a), LatticeValue::Set(b)) => a.merge(b),
            (LatticeValue::OrderedSet(a), LatticeValue::OrderedSet(b)) => a.merge(b),
            (LatticeValue::SingleCausal(a), LatticeValue::SingleCausal(b)) => a.merge(b),
            (LatticeValue::MultiCausal(a), LatticeValue::MultiCausal(b)) => a.merge(b),
            (LatticeValue::Priority(a), LatticeValue::Priority(b)) => a.merge(b),
            _ => return false,
        }
        true
    }

    /// Approximate payload size, used for capacity accounting and key-size
    /// reports.
    pub fn size_bytes(&self) -> usize {
        match self {
            LatticeValue::Lww(v) => v.value.len() + std::mem::size_of::<u64>(),
            LatticeValue::Set(v) => v.elements.iter().map(Vec::len).sum(),
            LatticeValue::OrderedSet(v) => v.elements.iter().map(Vec::len).sum(),
            LatticeValue::SingleCausal(v) => v.size_bytes(),
            LatticeValue::MultiCausal(v) => v.size_bytes(),
            LatticeValue::Priority(v) => v.value.len() + std::mem::size_of::<f64>(),
        }
    }
}
