//! Partition-aware storage routing.
//!
//! This is the consumer side of the distribution core: a map split into one
//! child map per owned partition, with keys routed through a
//! [`KeyPartitioningStrategy`]. Partitions are created and destroyed as
//! ownership moves, and queries walk entries partition by partition so a
//! caller can fan out over a [`PartitionSet`] (splitting it for parallel
//! execution).
//!
//! Access to a partition the map does not hold is policy-controlled: strict
//! mode raises a hard error on writes and logs reads, lenient mode returns
//! natural defaults with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, warn};

use crate::error::{Error, Result};

use super::keys::{KeyPartitioningStrategy, RoutingKey};
use super::partition_set::PartitionSet;

/// How operations against an unowned partition behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPartitionPolicy {
    /// Writes fail with [`Error::PartitionNotOwned`]; reads log an error and
    /// return nothing.
    Strict,
    /// Reads and writes return natural defaults with a warning.
    Lenient,
}

/// A backing map that tracks partition ownership: child storage is created
/// when a partition arrives and destroyed when it departs.
pub trait PartitionAwareBackingMap {
    /// Create storage for a newly owned partition. A no-op if the partition
    /// is already held.
    fn create_partition(&mut self, partition: u32);

    /// Destroy a partition's storage, discarding its entries.
    fn destroy_partition(&mut self, partition: u32);

    /// The partitions this map currently holds.
    fn owned_partitions(&self) -> PartitionSet;
}

/// A map split into one child map per owned partition.
pub struct PartitionSplittingMap<V> {
    strategy: Arc<dyn KeyPartitioningStrategy>,
    policy: MissingPartitionPolicy,
    children: Vec<Option<HashMap<Vec<u8>, V>>>,
}

impl<V> PartitionSplittingMap<V> {
    /// Construct an empty map holding no partitions.
    pub fn new(strategy: Arc<dyn KeyPartitioningStrategy>, policy: MissingPartitionPolicy) -> Self {
        let partition_count = strategy.partition_count() as usize;
        let mut children = Vec::with_capacity(partition_count);
        children.resize_with(partition_count, || None);
        PartitionSplittingMap {
            strategy,
            policy,
            children,
        }
    }

    fn route(&self, key: &[u8]) -> u32 {
        self.strategy.key_partition(&RoutingKey::Opaque(key))
    }

    /// Insert a value. Routing to an unowned partition is policy-controlled.
    pub fn insert(&mut self, key: &[u8], value: V) -> Result<Option<V>> {
        let partition = self.route(key);
        match &mut self.children[partition as usize] {
            Some(child) => Ok(child.insert(key.to_vec(), value)),
            None => match self.policy {
                MissingPartitionPolicy::Strict => Err(Error::PartitionNotOwned { partition }),
                MissingPartitionPolicy::Lenient => {
                    warn!(partition, "write to unowned partition dropped");
                    Ok(None)
                }
            },
        }
    }

    /// Look up a value. Never fails; an unowned partition logs per policy
    /// and returns `None`.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let partition = self.route(key);
        match &self.children[partition as usize] {
            Some(child) => child.get(key),
            None => {
                match self.policy {
                    MissingPartitionPolicy::Strict => {
                        error!(partition, "read from unowned partition");
                    }
                    MissingPartitionPolicy::Lenient => {
                        warn!(partition, "read from unowned partition");
                    }
                }
                None
            }
        }
    }

    /// Remove a value. Routing to an unowned partition is policy-controlled.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<V>> {
        let partition = self.route(key);
        match &mut self.children[partition as usize] {
            Some(child) => Ok(child.remove(key)),
            None => match self.policy {
                MissingPartitionPolicy::Strict => Err(Error::PartitionNotOwned { partition }),
                MissingPartitionPolicy::Lenient => {
                    warn!(partition, "remove from unowned partition dropped");
                    Ok(None)
                }
            },
        }
    }

    /// Total entries across all held partitions.
    pub fn len(&self) -> usize {
        self.children
            .iter()
            .flatten()
            .map(HashMap::len)
            .sum()
    }

    /// True if no held partition has entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk the entries of the held partitions selected by `parts`, one
    /// partition at a time in partition order.
    pub fn iter_partitions<'a>(&'a self, parts: &PartitionSet) -> PartitionedIterator<'a, V> {
        let mut selected = self.owned_partitions();
        selected.retain(parts);
        PartitionedIterator {
            map: self,
            partitions: selected,
            cursor: 0,
            inner: None,
        }
    }
}

impl<V> PartitionAwareBackingMap for PartitionSplittingMap<V> {
    fn create_partition(&mut self, partition: u32) {
        let slot = &mut self.children[partition as usize];
        if slot.is_none() {
            *slot = Some(HashMap::new());
        }
    }

    fn destroy_partition(&mut self, partition: u32) {
        self.children[partition as usize] = None;
    }

    fn owned_partitions(&self) -> PartitionSet {
        let mut owned = PartitionSet::new(self.strategy.partition_count());
        for (pid, child) in self.children.iter().enumerate() {
            if child.is_some() {
                owned.add(pid as u32);
            }
        }
        owned
    }
}

/// Iterator over the entries of selected partitions, partition by partition.
pub struct PartitionedIterator<'a, V> {
    map: &'a PartitionSplittingMap<V>,
    partitions: PartitionSet,
    cursor: u32,
    inner: Option<(u32, std::collections::hash_map::Iter<'a, Vec<u8>, V>)>,
}

impl<'a, V> Iterator for PartitionedIterator<'a, V> {
    type Item = (u32, &'a [u8], &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((pid, inner)) = self.inner.as_mut() {
                if let Some((key, value)) = inner.next() {
                    return Some((*pid, key.as_slice(), value));
                }
            }

            let pid = self.partitions.next(self.cursor)?;
            self.cursor = pid + 1;
            let child = self.map.children[pid as usize].as_ref()?;
            self.inner = Some((pid, child.iter()));
        }
    }
}
