//! In-memory [`DistributionManager`] for tests and examples.
//!
//! The mock keeps the whole service state behind one mutex: membership,
//! versioned per-partition ownership, recorded suggestions, and the schedule
//! log. With `auto_enact` enabled every suggestion is applied to live
//! ownership immediately, which lets convergence tests drive the strategy to
//! a fixed point without a surrounding service.
//!
//! Enacting a suggestion that changes a partition's primary owner bumps the
//! stored [`VersionedOwnership`] version, per the caller contract on that
//! type; backup-only changes leave the version untouched.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::member::{MemberId, MemberInfo, UNOWNED};
use super::ownership::{Ownership, VersionedOwnership};
use super::partition_set::PartitionSet;
use super::stats::PartitionStatistics;
use super::traits::{DistributionManager, ServiceInfo};

struct MockState {
    members: BTreeMap<MemberId, Arc<MemberInfo>>,
    leaving: HashSet<MemberId>,
    ownership: Vec<VersionedOwnership>,
    suggestions: Vec<(PartitionSet, Ownership)>,
    ignored: Option<PartitionSet>,
    scheduled: Vec<Duration>,
    stats: Vec<PartitionStatistics>,
    auto_enact: bool,
}

/// Builder for [`MockDistributionManager`].
pub struct MockManagerBuilder {
    name: String,
    partition_count: u32,
    backup_count: usize,
    members: Vec<MemberInfo>,
    leaving: Vec<MemberId>,
    owned_by: Option<MemberId>,
    local_member: Option<MemberId>,
    auto_enact: bool,
    sampling: Duration,
}

impl MockManagerBuilder {
    /// Register an ownership-enabled member.
    pub fn member(mut self, member: MemberInfo) -> Self {
        self.members.push(member);
        self
    }

    /// Mark a member as leaving.
    pub fn leaving(mut self, member: MemberId) -> Self {
        self.leaving.push(member);
        self
    }

    /// Assign every primary to the given member, as after an initial
    /// startup where the coordinator claimed everything.
    pub fn owned_by(mut self, member: MemberId) -> Self {
        self.owned_by = Some(member);
        self
    }

    /// Set the member the strategy runs on; defaults to the senior member.
    pub fn local_member(mut self, member: MemberId) -> Self {
        self.local_member = Some(member);
        self
    }

    /// Apply every suggestion to live ownership as soon as it arrives.
    pub fn auto_enact(mut self, enabled: bool) -> Self {
        self.auto_enact = enabled;
        self
    }

    /// Set the statistics sampling period.
    pub fn sampling(mut self, period: Duration) -> Self {
        self.sampling = period;
        self
    }

    /// Build the manager.
    pub fn build(self) -> MockDistributionManager {
        let senior = self.members.iter().map(|m| m.id).min().unwrap_or(UNOWNED);
        let service = ServiceInfo {
            name: self.name,
            partition_count: self.partition_count,
            backup_count: self.backup_count,
            local_member: self.local_member.unwrap_or(senior),
            senior_member: senior,
        };

        let mut ownership =
            vec![VersionedOwnership::new(self.backup_count); self.partition_count as usize];
        if let Some(owner) = self.owned_by {
            for row in &mut ownership {
                row.ownership_mut().set_owner(0, owner);
            }
        }

        MockDistributionManager {
            service,
            sampling: self.sampling,
            inner: Mutex::new(MockState {
                members: self
                    .members
                    .into_iter()
                    .map(|m| (m.id, Arc::new(m)))
                    .collect(),
                leaving: self.leaving.into_iter().collect(),
                ownership,
                suggestions: Vec::new(),
                ignored: None,
                scheduled: Vec::new(),
                stats: vec![PartitionStatistics::default(); self.partition_count as usize],
                auto_enact: self.auto_enact,
            }),
        }
    }
}

/// An in-memory manager holding mock cluster state.
pub struct MockDistributionManager {
    service: ServiceInfo,
    sampling: Duration,
    inner: Mutex<MockState>,
}

impl MockDistributionManager {
    /// Start building a mock service.
    pub fn builder(
        name: impl Into<String>,
        partition_count: u32,
        backup_count: usize,
    ) -> MockManagerBuilder {
        MockManagerBuilder {
            name: name.into(),
            partition_count,
            backup_count,
            members: Vec::new(),
            leaving: Vec::new(),
            owned_by: None,
            local_member: None,
            auto_enact: false,
            sampling: Duration::from_secs(60),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner.lock().expect("mock manager lock poisoned")
    }

    /// Register an additional member after construction.
    pub fn add_member(&self, member: MemberInfo) {
        self.state().members.insert(member.id, Arc::new(member));
    }

    /// Mark a member as leaving.
    pub fn mark_leaving(&self, member: MemberId) {
        self.state().leaving.insert(member);
    }

    /// Drop a member entirely, as after an abrupt departure. Ownership rows
    /// are not touched; orphan the member's partitions separately if the
    /// scenario calls for it.
    pub fn remove_member(&self, member: MemberId) {
        let mut state = self.state();
        state.members.remove(&member);
        state.leaving.remove(&member);
    }

    /// Overwrite one partition's owner row, `[primary, backup1, ..]`.
    pub fn set_ownership(&self, partition: u32, owners: &[MemberId]) {
        let mut state = self.state();
        let row = &mut state.ownership[partition as usize];
        for (store, owner) in owners.iter().enumerate() {
            row.ownership_mut().set_owner(store, *owner);
        }
    }

    /// Replace a partition's statistics.
    pub fn set_partition_stats(&self, partition: u32, stats: PartitionStatistics) {
        self.state().stats[partition as usize] = stats;
    }

    /// Inject ignored-advice state, as a service that dropped suggestions
    /// would report.
    pub fn set_ignored_advice(&self, parts: PartitionSet) {
        self.state().ignored = Some(parts);
    }

    /// The ownership version of a partition.
    pub fn version(&self, partition: u32) -> u64 {
        self.state().ownership[partition as usize].version()
    }

    /// The suggestions recorded so far, oldest first.
    pub fn suggestions(&self) -> Vec<(PartitionSet, Ownership)> {
        self.state().suggestions.clone()
    }

    /// Drain the suggestion log.
    pub fn clear_suggestions(&self) {
        self.state().suggestions.clear();
    }

    /// Drain the log of requested analysis delays.
    pub fn take_scheduled(&self) -> Vec<Duration> {
        std::mem::take(&mut self.state().scheduled)
    }

    /// Apply every recorded suggestion to live ownership and drain the log.
    pub fn enact_all(&self) {
        let mut state = self.state();
        let suggestions = std::mem::take(&mut state.suggestions);
        for (parts, owners) in suggestions {
            enact(&mut state, &parts, &owners);
        }
    }

    /// The number of partitions whose primary is the given member.
    pub fn primary_count(&self, member: MemberId) -> u32 {
        let state = self.state();
        state
            .ownership
            .iter()
            .filter(|row| row.ownership().primary() == member)
            .count() as u32
    }
}

fn enact(state: &mut MockState, parts: &PartitionSet, owners: &Ownership) {
    for pid in parts.iter() {
        let row = &mut state.ownership[pid as usize];
        let primary_changed = row.ownership().primary() != owners.primary();

        for store in 0..=owners.backup_count() {
            row.ownership_mut().set_owner(store, owners.owner(store));
        }

        if primary_changed {
            // caller contract on VersionedOwnership: bump exactly on
            // primary-owner change
            let version = row.version();
            row.set_version(version + 1);
        }
    }
}

impl DistributionManager for MockDistributionManager {
    fn service_info(&self) -> ServiceInfo {
        self.service.clone()
    }

    fn member(&self, id: MemberId) -> Option<Arc<MemberInfo>> {
        self.state().members.get(&id).cloned()
    }

    fn ownership_members(&self) -> Vec<Arc<MemberInfo>> {
        self.state().members.values().cloned().collect()
    }

    fn ownership_leaving_members(&self) -> Vec<Arc<MemberInfo>> {
        let state = self.state();
        state
            .members
            .values()
            .filter(|m| state.leaving.contains(&m.id))
            .cloned()
            .collect()
    }

    fn owned_partitions(&self, member: MemberId, store: usize) -> PartitionSet {
        let state = self.state();
        let mut parts = PartitionSet::new(self.service.partition_count);
        for (pid, row) in state.ownership.iter().enumerate() {
            if member != UNOWNED && row.ownership().owner(store) == member {
                parts.add(pid as u32);
            }
        }
        parts
    }

    fn partition_ownership(&self, partition: u32) -> Ownership {
        self.state().ownership[partition as usize].ownership().clone()
    }

    fn suggest(&self, partitions: &PartitionSet, owners: &Ownership) {
        let mut state = self.state();
        state
            .suggestions
            .push((partitions.clone(), owners.clone()));
        if state.auto_enact {
            enact(&mut state, partitions, owners);
        }
    }

    fn ignored_advice(&self) -> Option<PartitionSet> {
        self.state().ignored.take()
    }

    fn schedule_next_analysis(&self, delay: Duration) {
        self.state().scheduled.push(delay);
    }

    fn sampling_period(&self) -> Duration {
        self.sampling
    }

    fn partition_stats(&self) -> Vec<PartitionStatistics> {
        self.state().stats.clone()
    }
}
