//! Lattice Module Tests
//!
//! Validates the merge semantics of every lattice kind.
//!
//! ## Test Scopes
//! - **Merge Laws**: Commutativity and idempotence, the properties gossip
//!   delivery relies on.
//! - **Kind Semantics**: Timestamp ordering, union behavior, causal dominance
//!   and concurrency, priority ordering.

#[cfg(test)]
mod tests {
    use crate::lattice::causal::{
        ClockOrdering, MultiCausalValue, SingleCausalValue, VectorClock,
    };
    use crate::lattice::{
        LatticeType, LatticeValue, LwwValue, OrderedSetValue, PriorityValue, SetValue,
    };
    use std::collections::BTreeSet;

    fn set_of(elements: &[&str]) -> SetValue {
        SetValue {
            elements: elements.iter().map(|e| e.as_bytes().to_vec()).collect(),
        }
    }

    // ============================================================
    // LWW
    // ============================================================

    #[test]
    fn test_lww_higher_timestamp_wins() {
        let mut value = LwwValue::new(5, b"x".to_vec());
        value.merge(LwwValue::new(3, b"y".to_vec()));
        assert_eq!(value, LwwValue::new(5, b"x".to_vec()));

        value.merge(LwwValue::new(9, b"z".to_vec()));
        assert_eq!(value, LwwValue::new(9, b"z".to_vec()));
    }

    #[test]
    fn test_lww_merge_is_commutative_and_idempotent() {
        let a = LwwValue::new(7, b"a".to_vec());
        let b = LwwValue::new(7, b"b".to_vec());

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b.clone();
        ba.merge(a.clone());
        assert_eq!(ab, ba, "equal timestamps must still merge symmetrically");

        let mut twice = ab.clone();
        twice.merge(ab.clone());
        assert_eq!(twice, ab);
    }

    // ============================================================
    // SETS
    // ============================================================

    #[test]
    fn test_set_merge_is_union() {
        let mut value = set_of(&["a", "b"]);
        value.merge(set_of(&["b", "c"]));
        assert_eq!(value.elements.len(), 3);
    }

    #[test]
    fn test_ordered_set_keeps_order_under_merge() {
        let mut value = OrderedSetValue::default();
        value.elements.insert(b"c".to_vec());
        let mut other = OrderedSetValue::default();
        other.elements.insert(b"a".to_vec());
        other.elements.insert(b"b".to_vec());
        value.merge(other);
        let collected: Vec<Vec<u8>> = value.elements.into_iter().collect();
        assert_eq!(collected, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    // ============================================================
    // PRIORITY
    // ============================================================

    #[test]
    fn test_priority_lowest_wins() {
        let mut value = PriorityValue::new(2.5, b"slow".to_vec());
        value.merge(PriorityValue::new(1.0, b"fast".to_vec()));
        assert_eq!(value.value, b"fast".to_vec());

        value.merge(PriorityValue::new(3.0, b"slower".to_vec()));
        assert_eq!(value.value, b"fast".to_vec());
    }

    #[test]
    fn test_priority_merge_is_commutative_on_ties() {
        let a = PriorityValue::new(1.0, b"a".to_vec());
        let b = PriorityValue::new(1.0, b"b".to_vec());
        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);
        assert_eq!(ab.value, ba.value);
    }

    // ============================================================
    // VECTOR CLOCKS & CAUSAL KINDS
    // ============================================================

    #[test]
    fn test_vector_clock_compare() {
        let mut a = VectorClock::new();
        a.increment("r1");
        a.increment("r1");
        let mut b = VectorClock::new();
        b.increment("r1");

        assert_eq!(a.compare(&b), ClockOrdering::Dominates);
        assert_eq!(b.compare(&a), ClockOrdering::DominatedBy);
        assert_eq!(a.compare(&a.clone()), ClockOrdering::Equal);

        b.increment("r2");
        assert_eq!(a.compare(&b), ClockOrdering::Concurrent);
    }

    #[test]
    fn test_single_causal_dominant_write_replaces() {
        let mut first = SingleCausalValue::default();
        first.vector_clock.increment("r1");
        first.values.insert(b"v1".to_vec());

        let mut second = first.clone();
        second.vector_clock.increment("r1");
        second.values = BTreeSet::from([b"v2".to_vec()]);

        first.merge(second.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_causal_concurrent_writes_are_kept() {
        let mut left = SingleCausalValue::default();
        left.vector_clock.increment("r1");
        left.values.insert(b"left".to_vec());

        let mut right = SingleCausalValue::default();
        right.vector_clock.increment("r2");
        right.values.insert(b"right".to_vec());

        left.merge(right);
        assert_eq!(left.values.len(), 2);
        assert_eq!(left.vector_clock.get("r1"), 1);
        assert_eq!(left.vector_clock.get("r2"), 1);
    }

    #[test]
    fn test_multi_causal_merges_dependencies() {
        let mut left = MultiCausalValue::default();
        left.vector_clock.increment("r1");
        let mut dep = VectorClock::new();
        dep.increment("r1");
        left.dependencies.insert("other_key".to_string(), dep);
        left.values.insert(b"left".to_vec());

        let mut right = MultiCausalValue::default();
        right.vector_clock.increment("r2");
        let mut dep = VectorClock::new();
        dep.increment("r2");
        right.dependencies.insert("other_key".to_string(), dep);
        right.values.insert(b"right".to_vec());

        left.merge(right);
        assert_eq!(left.values.len(), 2);
        let merged_dep = &left.dependencies["other_key"];
        assert_eq!(merged_dep.get("r1"), 1);
        assert_eq!(merged_dep.get("r2"), 1);
    }

    // ============================================================
    // TAGGED VARIANT
    // ============================================================

    #[test]
    fn test_lattice_value_rejects_cross_kind_merge() {
        let mut value = LatticeValue::Lww(LwwValue::new(1, b"x".to_vec()));
        let merged = value.merge(LatticeValue::Set(set_of(&["a"])));
        assert!(!merged);
        assert_eq!(value.kind(), LatticeType::Lww);
    }

    #[test]
    fn test_lattice_value_wire_round_trip() {
        let value = LatticeValue::Set(set_of(&["a", "b"]));
        let bytes = bincode::serialize(&value).unwrap();
        let decoded: LatticeValue = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.kind(), LatticeType::Set);
        assert_eq!(decoded.size_bytes(), value.size_bytes());
    }
}
