//! Working snapshot of partition ownership used during one analysis pass.
//!
//! The [`AnalysisContext`] copies ownership state out of the
//! [`DistributionManager`](super::DistributionManager) on first touch and
//! mutates the copy locally while the balancing passes run. Every mutation
//! goes through [`AnalysisContext::transition_partition`], which keeps the
//! per-partition ownership records and the per-member partition sets
//! consistent with each other. Once a pass settles,
//! [`AnalysisContext::suggest_distribution`] diffs the snapshot against live
//! ownership and pushes the differences back as advisory suggestions.
//!
//! A context lives for one pass; transient hints (orphan carryover, an
//! explicit delay) are copied from the previous context and reset after use.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::member::{MemberId, MemberInfo, UNOWNED};
use super::ownership::Ownership;
use super::partition_set::PartitionSet;
use super::strength::{member_distance, BackupStrength};
use super::traits::{DistributionManager, ServiceInfo};

/// Computes the scalar load of a partition or a set of partitions.
pub trait LoadCalculator: Send {
    /// The load of a single partition.
    fn partition_load(&self, partition: u32) -> u32;

    /// The load of a set of partitions.
    fn set_load(&self, partitions: &PartitionSet) -> u32;
}

/// Count-based load: every partition weighs 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleLoadCalculator;

impl LoadCalculator for SimpleLoadCalculator {
    fn partition_load(&self, _partition: u32) -> u32 {
        1
    }

    fn set_load(&self, partitions: &PartitionSet) -> u32 {
        partitions.cardinality()
    }
}

/// The strategy-private working snapshot for one analysis pass.
pub struct AnalysisContext {
    manager: Arc<dyn DistributionManager>,
    service: ServiceInfo,

    /// Non-leaving ownership members, in arbitrary order.
    members: Vec<Arc<MemberInfo>>,
    /// Members in the process of leaving.
    leaving: Vec<Arc<MemberInfo>>,
    leaving_ids: HashSet<MemberId>,
    /// Every member seen this pass, leaving included.
    roster: HashMap<MemberId, Arc<MemberInfo>>,

    strength: BackupStrength,
    backup_count_actual: usize,
    fair_share_primary: u32,
    fair_share_backup: u32,

    calculator_primary: Box<dyn LoadCalculator>,
    calculator_backup: Box<dyn LoadCalculator>,

    /// Ownership per partition, fetched from the manager on first touch.
    owners: Vec<Option<Ownership>>,
    /// Owned-partition sets per member and storage index, fetched on first
    /// touch.
    owned: HashMap<MemberId, Vec<Option<PartitionSet>>>,

    /// Partitions this pass has reassigned.
    updated: Option<PartitionSet>,
    /// Partitions deemed lost by a previous `analyze_orphans`, prioritized
    /// for transfer to reduce cost.
    orphaned: Option<PartitionSet>,
    /// When the analysis completed, if it has.
    completed_at: Option<Instant>,
    /// Explicit one-shot delay overriding the computed analysis delay.
    delay_override: Option<std::time::Duration>,
}

impl AnalysisContext {
    /// Build a fresh context over the manager's current membership.
    pub fn new(manager: Arc<dyn DistributionManager>) -> Self {
        let service = manager.service_info();
        let partition_count = service.partition_count as usize;

        let mut ctx = AnalysisContext {
            manager,
            service,
            members: Vec::new(),
            leaving: Vec::new(),
            leaving_ids: HashSet::new(),
            roster: HashMap::new(),
            strength: BackupStrength::classify(&[], 0),
            backup_count_actual: 0,
            fair_share_primary: 0,
            fair_share_backup: 0,
            calculator_primary: Box::new(SimpleLoadCalculator),
            calculator_backup: Box::new(SimpleLoadCalculator),
            owners: vec![None; partition_count],
            owned: HashMap::new(),
            updated: None,
            orphaned: None,
            completed_at: None,
            delay_override: None,
        };
        ctx.initialize();
        ctx
    }

    /// (Re)compute the membership-derived fields from the manager. The
    /// ownership snapshot accumulated so far is deliberately kept.
    pub(crate) fn initialize(&mut self) {
        let leaving = self.manager.ownership_leaving_members();
        let leaving_ids: HashSet<MemberId> = leaving.iter().map(|m| m.id).collect();
        let members: Vec<Arc<MemberInfo>> = self
            .manager
            .ownership_members()
            .into_iter()
            .filter(|m| !leaving_ids.contains(&m.id))
            .collect();

        self.roster = members
            .iter()
            .chain(leaving.iter())
            .map(|m| (m.id, m.clone()))
            .collect();

        // the backup count can be smaller than configured when too few
        // members remain
        self.backup_count_actual = self
            .service
            .backup_count
            .min(members.len().saturating_sub(1));

        self.strength = BackupStrength::classify(&members, self.service.backup_count);
        self.members = members;
        self.leaving = leaving;
        self.leaving_ids = leaving_ids;

        self.fair_share_primary = self.calculate_fair_share(true);
        self.fair_share_backup = self.calculate_fair_share(false);
    }

    /// Narrow the membership view to the given pair, pretending the service
    /// holds exactly two members. Used by the fan-out limiting pre-pass.
    pub(crate) fn prime(&mut self, first: Arc<MemberInfo>, second: Arc<MemberInfo>) {
        let fair_initial = self.service.partition_count / 2 + 1;
        self.members = vec![first, second];
        self.fair_share_primary = fair_initial;
        self.fair_share_backup = fair_initial;
    }

    // ----- accessors ------------------------------------------------------

    /// The service this context describes.
    pub fn service(&self) -> &ServiceInfo {
        &self.service
    }

    /// The non-leaving ownership members, in arbitrary order.
    pub fn members(&self) -> &[Arc<MemberInfo>] {
        &self.members
    }

    /// The ids of the non-leaving ownership members.
    pub fn member_ids(&self) -> HashSet<MemberId> {
        self.members.iter().map(|m| m.id).collect()
    }

    /// The members that are leaving.
    pub fn leaving(&self) -> &[Arc<MemberInfo>] {
        &self.leaving
    }

    /// True if the member is in the process of leaving.
    pub fn is_member_leaving(&self, member: MemberId) -> bool {
        self.leaving_ids.contains(&member)
    }

    /// The backup strength targeted by this pass.
    pub fn backup_strength(&self) -> &BackupStrength {
        &self.strength
    }

    /// Replace the targeted backup strength (the non-convergence fallback).
    pub(crate) fn set_backup_strength(&mut self, strength: BackupStrength) {
        self.strength = strength;
    }

    /// The number of backup storage indices this pass maintains; may be
    /// below the configured count when too few members remain.
    pub fn actual_backup_count(&self) -> usize {
        self.backup_count_actual
    }

    /// The fair-share load ceiling for a balanced distribution.
    pub fn fair_share(&self, primary: bool) -> u32 {
        if primary {
            self.fair_share_primary
        } else {
            self.fair_share_backup
        }
    }

    /// The partitions reassigned by this pass so far, if any.
    pub fn updated_partitions(&self) -> Option<&PartitionSet> {
        self.updated.as_ref()
    }

    /// Partitions recorded as lost/orphaned by a previous orphan analysis.
    pub fn orphaned_partitions(&self) -> Option<&PartitionSet> {
        self.orphaned.as_ref()
    }

    pub(crate) fn set_orphaned_partitions(&mut self, parts: PartitionSet) {
        self.orphaned = Some(parts);
    }

    /// When this pass completed, if it has.
    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    pub(crate) fn set_completed_at(&mut self, at: Instant) {
        self.completed_at = Some(at);
    }

    /// Consume the one-shot explicit analysis delay, if set.
    pub(crate) fn take_delay_override(&mut self) -> Option<std::time::Duration> {
        self.delay_override.take()
    }

    pub(crate) fn set_delay_override(&mut self, delay: std::time::Duration) {
        self.delay_override = Some(delay);
    }

    /// Carry transient hints over from the previous pass.
    pub(crate) fn copy_transients(&mut self, last: Option<&AnalysisContext>) {
        let Some(last) = last else { return };

        if let Some(orphaned) = &last.orphaned {
            self.orphaned = Some(orphaned.clone());
        }
        if let Some(delay) = last.delay_override {
            self.delay_override = Some(delay);
        }
    }

    /// Drop the transient hints once the analysis has actually run.
    pub(crate) fn reset_transients(&mut self) {
        self.orphaned = None;
        self.delay_override = None;
    }

    /// Look up a member by id across the full roster, falling back to the
    /// manager for members that already departed.
    pub fn member_info(&self, id: MemberId) -> Option<Arc<MemberInfo>> {
        if id == UNOWNED {
            return None;
        }
        self.roster
            .get(&id)
            .cloned()
            .or_else(|| self.manager.member(id))
    }

    // ----- ownership snapshot ---------------------------------------------

    /// The ownership of the given partition, as assigned by this pass.
    pub fn ownership(&mut self, partition: u32) -> &Ownership {
        let slot = &mut self.owners[partition as usize];
        if slot.is_none() {
            *slot = Some(self.manager.partition_ownership(partition));
        }
        slot.as_ref().expect("ownership slot just populated")
    }

    /// Clone of the ownership of the given partition.
    pub fn ownership_cloned(&mut self, partition: u32) -> Ownership {
        self.ownership(partition).clone()
    }

    /// The ownership of the given partition if this pass has touched it.
    pub(crate) fn ownership_cached(&self, partition: u32) -> Option<&Ownership> {
        self.owners[partition as usize].as_ref()
    }

    fn ownership_mut(&mut self, partition: u32) -> &mut Ownership {
        let slot = &mut self.owners[partition as usize];
        if slot.is_none() {
            *slot = Some(self.manager.partition_ownership(partition));
        }
        slot.as_mut().expect("ownership slot just populated")
    }

    /// The partitions the member owns (or was assigned by this pass) at the
    /// given storage index.
    pub fn owned_partitions(&mut self, member: MemberId, store: usize) -> &PartitionSet {
        self.owned_partitions_mut(member, store)
    }

    /// Clone of the member's owned set at the given storage index.
    pub fn owned_partitions_cloned(&mut self, member: MemberId, store: usize) -> PartitionSet {
        self.owned_partitions_mut(member, store).clone()
    }

    fn owned_partitions_mut(&mut self, member: MemberId, store: usize) -> &mut PartitionSet {
        let store_count = self.service.backup_count + 1;
        let stores = self
            .owned
            .entry(member)
            .or_insert_with(|| vec![None; store_count]);
        if stores[store].is_none() {
            stores[store] = Some(self.manager.owned_partitions(member, store));
        }
        stores[store].as_mut().expect("owned slot just populated")
    }

    // ----- load -----------------------------------------------------------

    /// The load of one partition, primary or backup weighted.
    pub fn partition_load(&self, partition: u32, primary: bool) -> u32 {
        if primary {
            self.calculator_primary.partition_load(partition)
        } else {
            self.calculator_backup.partition_load(partition)
        }
    }

    /// The member's total primary or backup load.
    pub fn member_load(&mut self, member: MemberId, primary: bool) -> u32 {
        if primary {
            let parts = self.owned_partitions_cloned(member, 0);
            self.calculator_primary.set_load(&parts)
        } else {
            let mut load = 0;
            for store in 1..=self.service.backup_count {
                let parts = self.owned_partitions_cloned(member, store);
                load += self.calculator_backup.set_load(&parts);
            }
            load
        }
    }

    /// True if the member's load is below the fair share.
    pub fn is_underloaded(&mut self, member: MemberId, primary: bool) -> bool {
        self.member_load(member, primary) < self.fair_share(primary)
    }

    fn calculate_fair_share(&self, primary: bool) -> u32 {
        let all = PartitionSet::full(self.service.partition_count);
        let mut total = if primary {
            self.calculator_primary.set_load(&all)
        } else {
            self.calculator_backup.set_load(&all) * self.backup_count_actual as u32
        };

        let members = self.members.len() as u32;
        if members > 1 {
            total = total / members + 1;
        }
        total
    }

    // ----- strength -------------------------------------------------------

    /// True if the two members are mutually strong at the target strength.
    pub fn is_strong(&self, a: &MemberInfo, b: &MemberInfo) -> bool {
        self.strength.is_strong(a, b)
    }

    /// True if the partition's owners are pairwise strong at the target
    /// strength. An orphaned or endangered partition is never strong.
    pub fn is_partition_strong(&mut self, partition: u32) -> bool {
        let owners = self.ownership_cloned(partition);
        self.is_ownership_strong(&owners)
    }

    /// True if the given ownership is pairwise strong at the target
    /// strength.
    pub fn is_ownership_strong(&self, owners: &Ownership) -> bool {
        let stores = self.backup_count_actual;
        let mut resolved: Vec<Arc<MemberInfo>> = Vec::with_capacity(stores + 1);

        for store in 0..=stores {
            match self.member_info(owners.owner(store)) {
                Some(member) => resolved.push(member),
                // orphaned or endangered storage index
                None => return false,
            }
        }

        for i in 0..resolved.len() {
            for j in i + 1..resolved.len() {
                if !self.strength.is_strong(&resolved[i], &resolved[j]) {
                    return false;
                }
            }
        }
        true
    }

    /// True if placing `member` at `store` would leave the ownership
    /// pairwise strong.
    pub fn is_safe_candidate(&self, owners: &Ownership, store: usize, member: &MemberInfo) -> bool {
        let mut candidate = owners.clone();
        candidate.set_owner(store, member.id);
        self.is_ownership_strong(&candidate)
    }

    /// The heuristic "distance" of a member from the owners of a partition:
    /// the sum of squared per-owner distances, larger meaning stronger.
    /// Unowned storage indices contribute nothing, so with no owners at all
    /// every member scores zero.
    pub fn strength_distance(&self, member: &MemberInfo, owners: &Ownership) -> u32 {
        let mut distance = 0;
        for store in 0..=owners.backup_count() {
            let owner = owners.owner(store);
            if owner != UNOWNED {
                if let Some(other) = self.member_info(owner) {
                    let d = member_distance(member, &other);
                    distance += d * d;
                }
            }
        }
        distance
    }

    // ----- partition classification ---------------------------------------

    /// True if the ownership has an unfilled backup storage index.
    pub fn is_ownership_endangered(&self, owners: &Ownership) -> bool {
        (1..=self.backup_count_actual).any(|store| owners.owner(store) == UNOWNED)
    }

    /// True if the partition has an unfilled backup storage index.
    pub fn is_partition_endangered(&mut self, partition: u32) -> bool {
        let owners = self.ownership_cloned(partition);
        self.is_ownership_endangered(&owners)
    }

    /// The subset of `parts` recorded as orphan-recovered by a previous
    /// pass.
    pub(crate) fn collect_orphaned(&self, parts: &PartitionSet) -> PartitionSet {
        match &self.orphaned {
            Some(orphaned) if orphaned.intersects(parts) => {
                let mut collected = orphaned.clone();
                collected.retain(parts);
                collected
            }
            _ => PartitionSet::new(parts.partition_count()),
        }
    }

    /// The subset of `parts` that is endangered.
    pub(crate) fn collect_endangered(&mut self, parts: &PartitionSet) -> PartitionSet {
        let mut collected = PartitionSet::new(parts.partition_count());
        for pid in parts.iter() {
            if self.is_partition_endangered(pid) {
                collected.add(pid);
            }
        }
        collected
    }

    /// The subset of `parts` that is weak (not strong) at the target
    /// strength.
    pub(crate) fn collect_weak(&mut self, parts: &PartitionSet) -> PartitionSet {
        let mut collected = PartitionSet::new(parts.partition_count());
        for pid in parts.iter() {
            if !self.is_partition_strong(pid) {
                collected.add(pid);
            }
        }
        collected
    }

    // ----- mutation -------------------------------------------------------

    /// Record the transfer of one storage index of one partition between
    /// members in the working snapshot.
    ///
    /// `from == None` fills a previously endangered index; `to == None`
    /// endangers the index. On a primary transfer the old primary is demoted
    /// to a backup index when that raises machine-level safety, matching the
    /// hand-off the service performs when it enacts the transfer.
    pub fn transition_partition(
        &mut self,
        partition: u32,
        store: usize,
        from: Option<MemberId>,
        to: Option<MemberId>,
    ) {
        let to_id = to.unwrap_or(UNOWNED);
        let backup_count = self.service.backup_count;

        if let Some(from) = from {
            self.owned_partitions_mut(from, store).remove(partition);
        }
        if let Some(to) = to {
            self.owned_partitions_mut(to, store).add(partition);
        }

        for index in 0..=backup_count {
            if index == store {
                self.ownership_mut(partition).set_owner(store, to_id);

                // A primary hand-off leaves the old primary holding the
                // data; demote it into a backup index when doing so raises
                // machine-level safety, as the enacting service will.
                let demotable = store == 0
                    && to_id != UNOWNED
                    && from.is_some_and(|f| !self.is_member_leaving(f));
                if demotable {
                    self.demote_old_primary(partition, from.expect("demotable requires from"), to_id);
                }
            } else if to_id != UNOWNED && self.ownership(partition).owner(index) == to_id {
                // the receiver already owned a different storage index of
                // this partition; that index becomes endangered
                self.ownership_mut(partition).set_owner(index, UNOWNED);
                self.owned_partitions_mut(to_id, index).remove(partition);
            }
        }

        self.updated
            .get_or_insert_with(|| PartitionSet::new(self.service.partition_count))
            .add(partition);
    }

    fn demote_old_primary(&mut self, partition: u32, from: MemberId, to: MemberId) {
        let Some(from_info) = self.member_info(from) else {
            return;
        };
        let Some(to_info) = self.member_info(to) else {
            return;
        };

        for store in 1..=self.service.backup_count {
            let backup_owner = self.ownership(partition).owner(store);
            let backup_info = self.member_info(backup_owner);

            // machine comparison is deliberate: the enacting service
            // hands primaries off at machine granularity
            let improves = to_info.machine_id != from_info.machine_id
                && backup_info
                    .as_ref()
                    .map_or(true, |b| to_info.machine_id == b.machine_id);

            if improves {
                self.owned_partitions_mut(from, store).add(partition);
                if backup_owner != UNOWNED {
                    self.owned_partitions_mut(backup_owner, store).remove(partition);
                }
                self.ownership_mut(partition).set_owner(store, from);
                break;
            }
        }
    }

    // ----- suggestion -----------------------------------------------------

    /// True when the live distribution is still the initial one: the
    /// coordinator owns every primary and no backups exist.
    pub(crate) fn is_initial_distribution(&self, coordinator: MemberId) -> bool {
        for pid in 0..self.service.partition_count {
            let owners = self.manager.partition_ownership(pid);
            if owners.primary() != coordinator {
                return false;
            }
            for store in 1..=self.service.backup_count {
                if owners.owner(store) != UNOWNED {
                    return false;
                }
            }
        }
        true
    }

    /// Diff the working snapshot against live ownership and push every
    /// difference to the manager as an advisory suggestion, grouped by
    /// resulting ownership. Returns the suggested groups.
    pub(crate) fn suggest_distribution(&mut self) -> HashMap<Ownership, PartitionSet> {
        let Some(updated) = self.updated.clone() else {
            return HashMap::new();
        };

        let partition_count = self.service.partition_count;
        let mut suggestions: HashMap<Ownership, PartitionSet> = HashMap::new();

        for pid in updated.iter() {
            let assigned = self.ownership_cloned(pid);
            if assigned != self.manager.partition_ownership(pid) {
                suggestions
                    .entry(assigned)
                    .or_insert_with(|| PartitionSet::new(partition_count))
                    .add(pid);
            }
        }

        for (owners, parts) in &suggestions {
            if !parts.is_empty() {
                debug!(
                    service = %self.service.name,
                    partitions = parts.cardinality(),
                    owners = %owners,
                    "suggesting ownership change"
                );
                self.manager.suggest(parts, owners);
            }
        }

        suggestions
    }
}
