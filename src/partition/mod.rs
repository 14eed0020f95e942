//! The partition-distribution core.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────┐
//!                    │   Cluster Service    │  (external: membership,
//!                    │  DistributionManager │   messaging, storage)
//!                    └──────────┬───────────┘
//!                 snapshot view │ ▲ advisory suggestions
//!                               ▼ │
//!        ┌─────────────────────────────────────────┐
//!        │       SimpleAssignmentStrategy          │
//!        │                                         │
//!        │   AnalysisContext ── BackupStrength     │
//!        │        │                                │
//!        │        ▼                                │
//!        │   PartitionSet / Ownership              │
//!        └─────────────────────────────────────────┘
//!                               │
//!                               ▼
//!        PartitionSplittingMap / PartitionedIterator
//!            (per-partition storage routing)
//! ```
//!
//! The strategy runs on one member at a time (the distribution
//! coordinator). Each `analyze_distribution` call builds an
//! [`AnalysisContext`] snapshot, mutates it through the balancing passes,
//! and pushes the resulting differences back as advisory suggestions the
//! service is free to enact, delay, or drop.

mod backing_map;
mod config;
mod context;
mod driver;
mod failover;
mod keys;
mod member;
mod mock_manager;
mod ownership;
mod partition_set;
mod report;
mod stats;
mod strategy;
mod strength;
mod traits;

pub use backing_map::{
    MissingPartitionPolicy, PartitionAwareBackingMap, PartitionSplittingMap, PartitionedIterator,
};
pub use config::{FailoverPolicyConfig, StrategyConfig};
pub use context::{AnalysisContext, LoadCalculator, SimpleLoadCalculator};
pub use driver::{CoordinatorHandle, DistributionCoordinator};
pub use failover::FailoverAccessPolicy;
pub use keys::{
    BroadKeyPartitioningStrategy, DefaultKeyPartitioningStrategy, KeyAssociator,
    KeyPartitioningStrategy, NoAssociation, RoutingKey,
};
pub use member::{MemberId, MemberInfo, UNOWNED};
pub use mock_manager::{MockDistributionManager, MockManagerBuilder};
pub use ownership::{Ownership, VersionedOwnership};
pub use partition_set::{Iter as PartitionSetIter, PartitionSet};
pub use report::{CompositeStats, DistributionSnapshot, MSG_NO_PENDING, MSG_NO_RESULT};
pub use stats::{PartitionStatistics, PartitionStatsCollector};
pub use strategy::SimpleAssignmentStrategy;
pub use strength::{BackupStrength, HaStatus, SafetyLevel};
pub use traits::{DistributionManager, PartitionAssignmentStrategy, ServiceInfo};
