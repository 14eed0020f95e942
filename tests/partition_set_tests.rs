//! Invariant tests for the partition-set bitset.

use tessera::partition::PartitionSet;

#[test]
fn cardinality_matches_contains() {
    let mut set = PartitionSet::new(500);
    let marked = [0u32, 1, 63, 64, 65, 127, 128, 300, 499];
    for pid in marked {
        set.add(pid);
    }

    let by_contains = (0..500).filter(|&p| set.contains(p)).count() as u32;
    assert_eq!(set.cardinality(), by_contains);
    assert_eq!(set.cardinality(), marked.len() as u32);
}

#[test]
fn cardinality_tracks_arbitrary_operation_sequences() {
    let mut set = PartitionSet::new(200);
    for pid in 0..100 {
        set.add(pid);
    }
    set.remove(50);
    set.invert();
    let other = PartitionSet::with_partitions(200, 90..120);
    set.retain(&other);

    let by_contains = (0..200).filter(|&p| set.contains(p)).count() as u32;
    assert_eq!(set.cardinality(), by_contains);
}

#[test]
fn fill_then_cardinality_is_partition_count() {
    for count in [1u32, 63, 64, 65, 1000] {
        let mut set = PartitionSet::new(count);
        set.fill();
        assert_eq!(set.cardinality(), count);
        assert!(set.is_full());
    }
}

#[test]
fn clear_then_is_empty() {
    let mut set = PartitionSet::full(129);
    set.clear();
    assert!(set.is_empty());
    assert_eq!(set.first(), None);
}

#[test]
fn invert_twice_restores_original() {
    let mut set = PartitionSet::with_partitions(321, [0, 5, 64, 320]);
    let original = set.clone();
    set.invert();
    set.invert();
    assert_eq!(set, original);
}

#[test]
fn add_then_remove_restores_prior_state() {
    let mut set = PartitionSet::with_partitions(100, [10, 20, 30]);
    let original = set.clone();

    set.add(55);
    assert_ne!(set, original);
    set.remove(55);
    assert_eq!(set, original);
    assert_eq!(set.cardinality(), original.cardinality());
}

#[test]
fn split_preserves_partitioning() {
    let mut set = PartitionSet::with_partitions(1000, (0..100).map(|i| i * 7));
    let original = set.clone();

    let mut detached = set.split().unwrap();
    assert!(!detached.intersects(&set));

    detached.add_all(&set);
    assert_eq!(detached, original);
}

#[test]
fn iterator_agrees_with_next() {
    let set = PartitionSet::with_partitions(300, [0, 1, 64, 128, 299]);

    let mut expected = Vec::new();
    let mut cursor = set.next(0);
    while let Some(pid) = cursor {
        expected.push(pid);
        cursor = set.next(pid + 1);
    }

    let collected: Vec<u32> = set.iter().collect();
    assert_eq!(collected, expected);
    assert_eq!(collected, set.to_vec());
}
