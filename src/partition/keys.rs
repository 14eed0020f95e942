//! Key-to-partition routing.
//!
//! A [`KeyPartitioningStrategy`] maps an application key to a partition id.
//! The mapping must be referentially consistent (same key, same partition for
//! a given associator and partition count), honor explicit key association
//! (associated keys land on the same partition), and honor explicit
//! partition affinity (a key declaring its own partition id is routed there
//! verbatim, bypassing hashing).

use std::borrow::Cow;
use std::sync::Arc;

use crate::error::{Error, Result};

/// A key as seen by the routing layer: either opaque serialized bytes or a
/// key carrying an explicit partition id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingKey<'a> {
    /// A regular key, routed by hashing its serialized form.
    Opaque(&'a [u8]),
    /// A partition-aware key: routed to `partition` verbatim.
    PartitionAware {
        /// The partition declared by the key.
        partition: u32,
        /// The serialized key bytes.
        key: &'a [u8],
    },
}

/// Declares explicit key associations: keys that must be co-located on the
/// same partition.
pub trait KeyAssociator: Send + Sync {
    /// The key whose partition the given key must share, or `None` if the
    /// key stands alone.
    fn associated_key<'a>(&self, key: &'a [u8]) -> Option<Cow<'a, [u8]>>;
}

/// The default associator: no keys are associated.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAssociation;

impl KeyAssociator for NoAssociation {
    fn associated_key<'a>(&self, _key: &'a [u8]) -> Option<Cow<'a, [u8]>> {
        None
    }
}

/// Maps keys to partition ids in `[0, partition_count)`.
pub trait KeyPartitioningStrategy: Send + Sync {
    /// The partition the given key belongs to.
    ///
    /// # Panics
    ///
    /// Panics if a partition-aware key declares a partition outside
    /// `[0, partition_count)`; such a key violates the routing contract.
    fn key_partition(&self, key: &RoutingKey<'_>) -> u32;

    /// The partition count this strategy routes into.
    fn partition_count(&self) -> u32;
}

/// Stable 32-bit FNV-1a over the serialized key bytes.
///
/// Every member of a service must agree on key placement, so the hash is a
/// fixed algorithm rather than the process-seeded std hasher.
fn hash_key(bytes: &[u8]) -> u32 {
    const OFFSET: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x0100_0193;

    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn check_affinity(partition: u32, partition_count: u32) -> u32 {
    assert!(
        partition < partition_count,
        "partition-aware key declares partition {partition} outside [0, {partition_count})"
    );
    partition
}

/// The default strategy: hash the (possibly substituted) serialized key,
/// modulo the partition count, with unsigned 32-bit hash semantics.
pub struct DefaultKeyPartitioningStrategy {
    partition_count: u32,
    associator: Arc<dyn KeyAssociator>,
}

impl DefaultKeyPartitioningStrategy {
    /// Construct with no key association.
    pub fn new(partition_count: u32) -> Result<Self> {
        Self::with_associator(partition_count, Arc::new(NoAssociation))
    }

    /// Construct with the given associator.
    pub fn with_associator(
        partition_count: u32,
        associator: Arc<dyn KeyAssociator>,
    ) -> Result<Self> {
        if partition_count == 0 {
            return Err(Error::Config("partition count must be positive".into()));
        }
        Ok(DefaultKeyPartitioningStrategy {
            partition_count,
            associator,
        })
    }
}

impl KeyPartitioningStrategy for DefaultKeyPartitioningStrategy {
    fn key_partition(&self, key: &RoutingKey<'_>) -> u32 {
        match key {
            RoutingKey::PartitionAware { partition, .. } => {
                check_affinity(*partition, self.partition_count)
            }
            RoutingKey::Opaque(bytes) => {
                let routed = match self.associator.associated_key(bytes) {
                    Some(assoc) => hash_key(&assoc),
                    None => hash_key(bytes),
                };
                routed % self.partition_count
            }
        }
    }

    fn partition_count(&self) -> u32 {
        self.partition_count
    }
}

/// A strategy that spreads each logical association across a bounded
/// contiguous span of `span + 1` partitions instead of a single one.
///
/// Strict co-location is traded for load spread: all keys of one association
/// stay within a small partition window, avoiding a single-partition hot
/// spot, while queries over the association still touch at most `span + 1`
/// partitions. The span is capped at `sqrt(partition_count)` to bound the
/// worst-case fan-out.
pub struct BroadKeyPartitioningStrategy {
    partition_count: u32,
    span: u32,
    associator: Arc<dyn KeyAssociator>,
}

impl BroadKeyPartitioningStrategy {
    /// Construct with the given association span.
    ///
    /// A negative span would make no sense and the argument is unsigned; a
    /// span larger than `sqrt(partition_count)` is clamped down to it.
    pub fn new(
        partition_count: u32,
        span: u32,
        associator: Arc<dyn KeyAssociator>,
    ) -> Result<Self> {
        if partition_count == 0 {
            return Err(Error::Config("partition count must be positive".into()));
        }

        let cap = (partition_count as f64).sqrt() as u32;
        Ok(BroadKeyPartitioningStrategy {
            partition_count,
            span: span.min(cap),
            associator,
        })
    }

    /// The effective span after clamping.
    pub fn span(&self) -> u32 {
        self.span
    }
}

impl KeyPartitioningStrategy for BroadKeyPartitioningStrategy {
    fn key_partition(&self, key: &RoutingKey<'_>) -> u32 {
        match key {
            RoutingKey::PartitionAware { partition, .. } => {
                check_affinity(*partition, self.partition_count)
            }
            RoutingKey::Opaque(bytes) => {
                let (base_hash, spread) = match self.associator.associated_key(bytes) {
                    // associated keys share the base partition and spread by
                    // their own bytes within the span window
                    Some(assoc) => (hash_key(&assoc), hash_key(bytes)),
                    None => (hash_key(bytes), 0),
                };

                let base = base_hash % self.partition_count;
                let offset = spread % (self.span + 1);
                (base + offset) % self.partition_count
            }
        }
    }

    fn partition_count(&self) -> u32 {
        self.partition_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Associates `order:<n>` keys with their `customer:<n>` parent.
    struct OrderAssociator;

    impl KeyAssociator for OrderAssociator {
        fn associated_key<'a>(&self, key: &'a [u8]) -> Option<Cow<'a, [u8]>> {
            let text = std::str::from_utf8(key).ok()?;
            let suffix = text.strip_prefix("order:")?;
            let customer = suffix.split('-').next()?;
            Some(Cow::Owned(format!("customer:{customer}").into_bytes()))
        }
    }

    #[test]
    fn routing_is_deterministic_and_in_range() {
        let strategy = DefaultKeyPartitioningStrategy::new(257).unwrap();
        for i in 0..500u32 {
            let key = format!("key-{i}");
            let first = strategy.key_partition(&RoutingKey::Opaque(key.as_bytes()));
            let second = strategy.key_partition(&RoutingKey::Opaque(key.as_bytes()));
            assert_eq!(first, second);
            assert!(first < 257);
        }
    }

    #[test]
    fn associated_keys_share_a_partition() {
        let strategy =
            DefaultKeyPartitioningStrategy::with_associator(257, Arc::new(OrderAssociator))
                .unwrap();

        let customer = strategy.key_partition(&RoutingKey::Opaque(b"customer:42"));
        let order_a = strategy.key_partition(&RoutingKey::Opaque(b"order:42-1"));
        let order_b = strategy.key_partition(&RoutingKey::Opaque(b"order:42-2"));

        assert_eq!(customer, order_a);
        assert_eq!(customer, order_b);
    }

    #[test]
    fn partition_affinity_is_honored_verbatim() {
        let strategy = DefaultKeyPartitioningStrategy::new(100).unwrap();
        let key = RoutingKey::PartitionAware {
            partition: 73,
            key: b"ignored",
        };
        assert_eq!(strategy.key_partition(&key), 73);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn out_of_range_affinity_panics() {
        let strategy = DefaultKeyPartitioningStrategy::new(10).unwrap();
        strategy.key_partition(&RoutingKey::PartitionAware {
            partition: 10,
            key: b"",
        });
    }

    #[test]
    fn zero_partition_count_is_a_config_error() {
        assert!(DefaultKeyPartitioningStrategy::new(0).is_err());
        assert!(BroadKeyPartitioningStrategy::new(0, 3, Arc::new(NoAssociation)).is_err());
    }

    #[test]
    fn broad_span_is_clamped_to_sqrt() {
        let strategy =
            BroadKeyPartitioningStrategy::new(100, 50, Arc::new(NoAssociation)).unwrap();
        assert_eq!(strategy.span(), 10);

        let tight = BroadKeyPartitioningStrategy::new(100, 3, Arc::new(NoAssociation)).unwrap();
        assert_eq!(tight.span(), 3);
    }

    #[test]
    fn broad_association_stays_within_span_window() {
        let strategy =
            BroadKeyPartitioningStrategy::new(257, 4, Arc::new(OrderAssociator)).unwrap();

        let base = strategy.key_partition(&RoutingKey::Opaque(b"customer:7"));
        for i in 0..50 {
            let key = format!("order:7-{i}");
            let partition = strategy.key_partition(&RoutingKey::Opaque(key.as_bytes()));
            let offset = (partition + 257 - base) % 257;
            assert!(offset <= 4, "order landed {offset} partitions from base");
        }
    }

    #[test]
    fn broad_unassociated_keys_route_like_default() {
        // spread is zero without an association, so the base partition is used
        let broad = BroadKeyPartitioningStrategy::new(257, 4, Arc::new(NoAssociation)).unwrap();
        let plain = DefaultKeyPartitioningStrategy::new(257).unwrap();

        for i in 0..50u32 {
            let key = format!("key-{i}");
            assert_eq!(
                broad.key_partition(&RoutingKey::Opaque(key.as_bytes())),
                plain.key_partition(&RoutingKey::Opaque(key.as_bytes()))
            );
        }
    }
}
