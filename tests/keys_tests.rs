//! Key-routing contract tests.

use std::borrow::Cow;
use std::sync::Arc;

use tessera::partition::{
    BroadKeyPartitioningStrategy, DefaultKeyPartitioningStrategy, KeyAssociator,
    KeyPartitioningStrategy, RoutingKey,
};

/// Associates `child:<parent>:<n>` with `parent:<parent>`.
struct ParentAssociator;

impl KeyAssociator for ParentAssociator {
    fn associated_key<'a>(&self, key: &'a [u8]) -> Option<Cow<'a, [u8]>> {
        let text = std::str::from_utf8(key).ok()?;
        let rest = text.strip_prefix("child:")?;
        let parent = rest.split(':').next()?;
        Some(Cow::Owned(format!("parent:{parent}").into_bytes()))
    }
}

#[test]
fn results_are_always_in_range() {
    for count in [1u32, 7, 257, 65536] {
        let strategy = DefaultKeyPartitioningStrategy::new(count).unwrap();
        for i in 0..200u32 {
            let key = format!("k{i}");
            assert!(strategy.key_partition(&RoutingKey::Opaque(key.as_bytes())) < count);
        }
    }
}

#[test]
fn association_is_transitive_across_children() {
    let strategy =
        DefaultKeyPartitioningStrategy::with_associator(257, Arc::new(ParentAssociator)).unwrap();

    let parent = strategy.key_partition(&RoutingKey::Opaque(b"parent:abc"));
    for i in 0..20 {
        let key = format!("child:abc:{i}");
        assert_eq!(
            strategy.key_partition(&RoutingKey::Opaque(key.as_bytes())),
            parent,
            "child {i} not co-located with its parent"
        );
    }
}

#[test]
fn different_partition_counts_do_not_share_placement() {
    // the same key may move when the count changes, but each strategy must
    // be internally consistent
    let a = DefaultKeyPartitioningStrategy::new(13).unwrap();
    let b = DefaultKeyPartitioningStrategy::new(13).unwrap();

    for i in 0..100u32 {
        let key = format!("key-{i}");
        assert_eq!(
            a.key_partition(&RoutingKey::Opaque(key.as_bytes())),
            b.key_partition(&RoutingKey::Opaque(key.as_bytes())),
        );
    }
}

#[test]
fn explicit_partition_wins_over_hashing() {
    let plain = DefaultKeyPartitioningStrategy::new(64).unwrap();
    let broad = BroadKeyPartitioningStrategy::new(64, 4, Arc::new(ParentAssociator)).unwrap();

    for partition in [0u32, 1, 32, 63] {
        let key = RoutingKey::PartitionAware {
            partition,
            key: b"whatever",
        };
        assert_eq!(plain.key_partition(&key), partition);
        assert_eq!(broad.key_partition(&key), partition);
    }
}

#[test]
fn broad_spread_uses_multiple_partitions() {
    let strategy =
        BroadKeyPartitioningStrategy::new(257, 4, Arc::new(ParentAssociator)).unwrap();
    let base = strategy.key_partition(&RoutingKey::Opaque(b"parent:hot"));

    let mut seen = std::collections::HashSet::new();
    for i in 0..200 {
        let key = format!("child:hot:{i}");
        let partition = strategy.key_partition(&RoutingKey::Opaque(key.as_bytes()));
        let offset = (partition + 257 - base) % 257;
        assert!(offset <= 4, "spread beyond the span window");
        seen.insert(partition);
    }

    // the point of the broad strategy: one association, several partitions
    assert!(seen.len() > 1, "hot association collapsed onto one partition");
}
