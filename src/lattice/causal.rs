//! Vector clocks and the two causally consistent lattice kinds.
//!
//! A vector clock is itself a lattice (pointwise max over per-writer logical
//! clocks), which makes the causal registers below plain lattice compositions:
//! a dominant clock replaces the whole state, concurrent clocks merge clocks
//! and keep every concurrent value.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Partial order between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    Equal,
    Dominates,
    DominatedBy,
    Concurrent,
}

/// Per-writer logical clocks with pointwise-max merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    clocks: BTreeMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance this writer's component by one.
    pub fn increment(&mut self, writer: &str) {
        *self.clocks.entry(writer.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, writer: &str) -> u64 {
        self.clocks.get(writer).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &VectorClock) {
        for (writer, clock) in &other.clocks {
            let entry = self.clocks.entry(writer.clone()).or_insert(0);
            if *clock > *entry {
                *entry = *clock;
            }
        }
    }

    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut ahead = false;
        let mut behind = false;
        for (writer, clock) in &self.clocks {
            match clock.cmp(&other.get(writer)) {
                std::cmp::Ordering::Greater => ahead = true,
                std::cmp::Ordering::Less => behind = true,
                std::cmp::Ordering::Equal => {}
            }
        }
        for (writer, clock) in &other.clocks {
            if self.get(writer) < *clock {
                behind = true;
            }
        }
        match (ahead, behind) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Dominates,
            (false, true) => ClockOrdering::DominatedBy,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.clocks
            .iter()
            .map(|(writer, _)| writer.len() + std::mem::size_of::<u64>())
            .sum()
    }
}

/// Causal register for a single key: a vector clock guarding a set of values.
/// Concurrent writes are all kept until a later write dominates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleCausalValue {
    pub vector_clock: VectorClock,
    pub values: BTreeSet<Vec<u8>>,
}

impl SingleCausalValue {
    pub fn merge(&mut self, other: SingleCausalValue) {
        match self.vector_clock.compare(&other.vector_clock) {
            ClockOrdering::Dominates => {}
            ClockOrdering::DominatedBy => *self = other,
            ClockOrdering::Equal | ClockOrdering::Concurrent => {
                self.vector_clock.merge(&other.vector_clock);
                self.values.extend(other.values);
            }
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.vector_clock.size_bytes() + self.values.iter().map(Vec::len).sum::<usize>()
    }
}

/// Causal register that additionally records the clocks of the keys a write
/// depended on, so cross-key causal cuts can be reconstructed by readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiCausalValue {
    pub vector_clock: VectorClock,
    pub dependencies: BTreeMap<String, VectorClock>,
    pub values: BTreeSet<Vec<u8>>,
}

impl MultiCausalValue {
    pub fn merge(&mut self, other: MultiCausalValue) {
        match self.vector_clock.compare(&other.vector_clock) {
            ClockOrdering::Dominates => {}
            ClockOrdering::DominatedBy => *self = other,
            ClockOrdering::Equal | ClockOrdering::Concurrent => {
                self.vector_clock.merge(&other.vector_clock);
                for (key, clock) in other.dependencies {
                    self.dependencies
                        .entry(key)
                        .and_modify(|existing| existing.merge(&clock))
                        .or_insert(clock);
                }
                self.values.extend(other.values);
            }
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.vector_clock.size_bytes()
            + self
                .dependencies
                .iter()
                .map(|(key, clock)| key.len() + clock.size_bytes())
                .sum::<usize>()
            + self.values.iter().map(Vec::len).sum::<usize>()
    }
}
