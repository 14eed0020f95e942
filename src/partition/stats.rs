//! Per-partition runtime statistics.
//!
//! Counters are accumulated lock-free from request threads and read by the
//! distribution coordinator for reporting and load weighting. Accumulation
//! runs in sampling windows: when a window elapses the counters reset, so a
//! snapshot always describes recent behavior rather than process lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// A point-in-time snapshot of one partition's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartitionStatistics {
    /// Requests routed to the partition in the current window.
    pub request_count: u64,
    /// Total request execution time in the current window.
    pub execution_time_nanos: u64,
    /// Total request queue-wait time in the current window.
    pub wait_time_nanos: u64,
    /// Bytes held directly by the partition's backing storage.
    pub direct_storage_bytes: u64,
    /// Bytes referenced indirectly (indices, overflow) by the partition.
    pub indirect_storage_bytes: u64,
}

impl PartitionStatistics {
    /// Combined direct and indirect storage footprint.
    pub fn storage_size(&self) -> u64 {
        self.direct_storage_bytes + self.indirect_storage_bytes
    }
}

#[derive(Default)]
struct PartitionCounters {
    request_count: AtomicU64,
    execution_time_nanos: AtomicU64,
    wait_time_nanos: AtomicU64,
    direct_storage_bytes: AtomicU64,
    indirect_storage_bytes: AtomicU64,
}

impl PartitionCounters {
    fn snapshot(&self) -> PartitionStatistics {
        PartitionStatistics {
            request_count: self.request_count.load(Ordering::Relaxed),
            execution_time_nanos: self.execution_time_nanos.load(Ordering::Relaxed),
            wait_time_nanos: self.wait_time_nanos.load(Ordering::Relaxed),
            direct_storage_bytes: self.direct_storage_bytes.load(Ordering::Relaxed),
            indirect_storage_bytes: self.indirect_storage_bytes.load(Ordering::Relaxed),
        }
    }

    fn reset_window(&self) {
        // storage sizes are gauges and survive the window roll
        self.request_count.store(0, Ordering::Relaxed);
        self.execution_time_nanos.store(0, Ordering::Relaxed);
        self.wait_time_nanos.store(0, Ordering::Relaxed);
    }
}

/// Concurrent collector of [`PartitionStatistics`] over a sampling window.
pub struct PartitionStatsCollector {
    partition_count: u32,
    window: Duration,
    window_start: std::sync::Mutex<Instant>,
    partitions: DashMap<u32, PartitionCounters>,
}

impl PartitionStatsCollector {
    /// Construct a collector for the given partition count and sampling
    /// window.
    pub fn new(partition_count: u32, window: Duration) -> Self {
        PartitionStatsCollector {
            partition_count,
            window,
            window_start: std::sync::Mutex::new(Instant::now()),
            partitions: DashMap::new(),
        }
    }

    /// The configured sampling window.
    pub fn sampling_period(&self) -> Duration {
        self.window
    }

    /// Record a completed request against a partition.
    pub fn record_request(&self, partition: u32, execution: Duration, wait: Duration) {
        self.maybe_roll_window();
        let counters = self.partitions.entry(partition).or_default();
        counters.request_count.fetch_add(1, Ordering::Relaxed);
        counters
            .execution_time_nanos
            .fetch_add(execution.as_nanos() as u64, Ordering::Relaxed);
        counters
            .wait_time_nanos
            .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Update the storage gauges for a partition.
    pub fn record_storage(&self, partition: u32, direct_bytes: u64, indirect_bytes: u64) {
        let counters = self.partitions.entry(partition).or_default();
        counters
            .direct_storage_bytes
            .store(direct_bytes, Ordering::Relaxed);
        counters
            .indirect_storage_bytes
            .store(indirect_bytes, Ordering::Relaxed);
    }

    /// Snapshot every partition's counters, indexed by partition id.
    pub fn snapshot(&self) -> Vec<PartitionStatistics> {
        let mut stats = vec![PartitionStatistics::default(); self.partition_count as usize];
        for entry in self.partitions.iter() {
            if let Some(slot) = stats.get_mut(*entry.key() as usize) {
                *slot = entry.value().snapshot();
            }
        }
        stats
    }

    fn maybe_roll_window(&self) {
        let mut start = self
            .window_start
            .lock()
            .expect("stats window lock poisoned");
        if start.elapsed() >= self.window {
            *start = Instant::now();
            drop(start);
            for entry in self.partitions.iter() {
                entry.value().reset_window();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate() {
        let collector = PartitionStatsCollector::new(8, Duration::from_secs(60));
        collector.record_request(3, Duration::from_micros(100), Duration::from_micros(5));
        collector.record_request(3, Duration::from_micros(50), Duration::from_micros(10));
        collector.record_storage(3, 4096, 1024);

        let stats = collector.snapshot();
        assert_eq!(stats.len(), 8);
        assert_eq!(stats[3].request_count, 2);
        assert_eq!(stats[3].execution_time_nanos, 150_000);
        assert_eq!(stats[3].wait_time_nanos, 15_000);
        assert_eq!(stats[3].storage_size(), 5120);
        assert_eq!(stats[0], PartitionStatistics::default());
    }

    #[test]
    fn window_roll_resets_counters_but_not_gauges() {
        let collector = PartitionStatsCollector::new(4, Duration::from_millis(0));
        collector.record_request(1, Duration::from_micros(10), Duration::ZERO);
        collector.record_storage(1, 100, 0);

        // zero-length window: the next record rolls first
        collector.record_request(1, Duration::from_micros(10), Duration::ZERO);
        let stats = collector.snapshot();
        assert_eq!(stats[1].request_count, 1);
        assert_eq!(stats[1].direct_storage_bytes, 100);
    }
}
