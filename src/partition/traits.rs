//! Contracts between the distribution core and the surrounding cluster
//! service.
//!
//! The core sits between two traits:
//!
//! - [`DistributionManager`]: implemented by the cluster service, consumed by
//!   the core. It is the algorithm's read/write view of live cluster state:
//!   membership, per-partition ownership, partition statistics, and the
//!   advisory `suggest` channel.
//! - [`PartitionAssignmentStrategy`]: implemented by the core, invoked by the
//!   service on whichever member currently acts as distribution coordinator.
//!
//! # Available Implementations
//!
//! - [`SimpleAssignmentStrategy`](super::SimpleAssignmentStrategy): the
//!   balancing engine (default, recommended)
//! - [`MockDistributionManager`](super::MockDistributionManager): in-memory
//!   manager for testing
//!
//! # Snapshot isolation
//!
//! The strategy runs on a single logical thread, but the service mutates real
//! ownership underneath it from request and transfer threads. A manager
//! implementation must therefore present a stable, consistent view of service
//! state for the duration of one `analyze_distribution` call (copy-on-read or
//! equivalent), so the algorithm never observes torn state mid-pass.
//!
//! # Advisory semantics
//!
//! `suggest` is one-way: the manager may enact, coalesce, delay, or drop any
//! suggestion. The strategy tracks un-enacted advice via `ignored_advice` and
//! re-suggests on a later pass; it never blocks waiting for enactment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::member::{MemberId, MemberInfo};
use super::ownership::Ownership;
use super::partition_set::PartitionSet;
use super::stats::PartitionStatistics;

/// Static description of a partitioned service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service name, used in reports and log events.
    pub name: String,
    /// Total number of partitions. Fixed for the service lifetime.
    pub partition_count: u32,
    /// Configured number of backup copies per partition.
    pub backup_count: usize,
    /// The member this strategy instance runs on (the distribution
    /// coordinator).
    pub local_member: MemberId,
    /// The longest-tenured ownership member.
    pub senior_member: MemberId,
}

/// The algorithm's view of cluster state, implemented by the surrounding
/// cluster service.
pub trait DistributionManager: Send + Sync {
    /// Static service description.
    fn service_info(&self) -> ServiceInfo;

    /// Look up a member by id. Returns `None` for unknown ids and for
    /// [`UNOWNED`](super::UNOWNED).
    fn member(&self, id: MemberId) -> Option<Arc<MemberInfo>>;

    /// The ownership-enabled members, including any that are leaving.
    fn ownership_members(&self) -> Vec<Arc<MemberInfo>>;

    /// The ownership-enabled members that are in the process of leaving.
    fn ownership_leaving_members(&self) -> Vec<Arc<MemberInfo>>;

    /// The partitions the given member owns at the given storage index
    /// (0 = primary).
    fn owned_partitions(&self, member: MemberId, store: usize) -> PartitionSet;

    /// The current ownership of the given partition.
    fn partition_ownership(&self, partition: u32) -> Ownership;

    /// Submit an advisory ownership-change suggestion for the given
    /// partitions. Non-blocking; enactment is not guaranteed.
    fn suggest(&self, partitions: &PartitionSet, owners: &Ownership);

    /// Partitions whose previously suggested transfer was dropped or
    /// rejected by the service, or `None` if nothing was ignored.
    fn ignored_advice(&self) -> Option<PartitionSet>;

    /// Ask the service to invoke `analyze_distribution` again after the
    /// given delay.
    fn schedule_next_analysis(&self, delay: Duration);

    /// The statistics sampling window the service runs.
    fn sampling_period(&self) -> Duration;

    /// Snapshot of per-partition statistics, indexed by partition id.
    fn partition_stats(&self) -> Vec<PartitionStatistics>;
}

/// A partition assignment strategy, driven by the cluster service on the
/// distribution coordinator.
pub trait PartitionAssignmentStrategy {
    /// One-time binding to the manager, called on the member that becomes
    /// coordinator.
    fn init(&mut self, manager: Arc<dyn DistributionManager>);

    /// React to partitions discovered to have no owner. `constraints` limits
    /// which members may recover each partition (e.g. members holding a
    /// persisted copy); partitions with no eligible member are assigned
    /// anywhere and reported lost.
    fn analyze_orphans(&mut self, constraints: &HashMap<MemberId, PartitionSet>);

    /// Run (or delay) a distribution analysis. Returns the delay before the
    /// next desired analysis, or `None` for no preference.
    fn analyze_distribution(&mut self) -> Option<Duration>;

    /// Human-readable summary of the last analysis.
    fn description(&self) -> String;
}
