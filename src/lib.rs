//! # Tessera
//! Partition-distribution core for partitioned-data clusters.
//!
//! This crate decides, for every data partition, which cluster member owns
//! the primary copy and which members own each backup copy, and keeps
//! rebalancing those assignments as membership changes, load shifts, or
//! failures occur. It is pure algorithm and bookkeeping; the surrounding
//! cluster service provides membership, messaging, and storage.
//!
//! # Goals
//! - A compact, wire-portable [`PartitionSet`](partition::PartitionSet) bitset
//!   as the foundational data structure
//! - Failure-domain aware placement (machine / rack / site safety)
//! - An iterative balancing engine with bounded convergence and explicit,
//!   logged degradation paths
//! - Advisory-only output: every decision is a suggestion the surrounding
//!   service may enact, delay, or drop
//!
//! ## Getting started
//!
//! Implement [`DistributionManager`](partition::DistributionManager) over your
//! cluster service's state, then drive a
//! [`SimpleAssignmentStrategy`](partition::SimpleAssignmentStrategy) from the
//! member currently acting as distribution coordinator:
//!
//! ```rust
//! use std::sync::Arc;
//! use tessera::partition::{
//!     MemberInfo, MockDistributionManager, PartitionAssignmentStrategy,
//!     SimpleAssignmentStrategy, StrategyConfig,
//! };
//!
//! let manager = Arc::new(
//!     MockDistributionManager::builder("orders", 257, 1)
//!         .member(MemberInfo::new(1, 1).with_machine_name("host-a"))
//!         .member(MemberInfo::new(2, 2).with_machine_name("host-b"))
//!         .owned_by(1)
//!         .auto_enact(true)
//!         .build(),
//! );
//!
//! let mut strategy = SimpleAssignmentStrategy::new(StrategyConfig::default());
//! strategy.init(manager.clone());
//! strategy.analyze_distribution();
//! ```
//!
//! The [`DistributionCoordinator`](partition::DistributionCoordinator) wraps
//! the same loop in a background task with jittered scheduling and graceful
//! shutdown.

pub mod encode;
pub mod error;
pub mod partition;
pub mod telemetry;

pub mod prelude {
    //! Convenience re-exports for the common surface.

    pub use crate::error::{Error, Result};
    pub use crate::partition::{
        BackupStrength, DistributionManager, HaStatus, MemberId, MemberInfo, Ownership,
        PartitionAssignmentStrategy, PartitionSet, SafetyLevel, ServiceInfo,
        SimpleAssignmentStrategy, StrategyConfig, VersionedOwnership,
    };
}
