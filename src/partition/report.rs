//! Read-only reporting surface over the assignment strategy.
//!
//! Everything here is a thin projection of the last analysis context, the
//! last suggestion map, and live manager state. Nothing feeds back into the
//! algorithm.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use super::member::{MemberId, MemberInfo, UNOWNED};
use super::partition_set::PartitionSet;
use super::strategy::SimpleAssignmentStrategy;
use super::strength::{member_distance, HaStatus, SafetyLevel};

/// Returned while the distribution coordinator has not completed its first
/// analysis.
pub const MSG_NO_RESULT: &str = "There are no distribution analysis results.";

/// Returned when every suggested distribution has completed and none are
/// scheduled.
pub const MSG_NO_PENDING: &str = "No distributions are currently scheduled for this service.";

/// Storage statistics aggregated from the last sampled partition statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompositeStats {
    /// Average partition storage size in KB.
    pub average_partition_size_kb: u64,
    /// Largest partition storage size in KB.
    pub max_partition_size_kb: u64,
    /// Average per-member storage size in KB.
    pub average_storage_size_kb: u64,
    /// Largest per-member storage size in KB.
    pub max_storage_size_kb: u64,
    /// The member carrying the largest storage size.
    pub max_load_member: MemberId,
}

/// A point-in-time view of the strategy for dashboards and health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct DistributionSnapshot {
    /// Service name.
    pub service: String,
    /// Current high-availability status.
    pub ha_status: HaStatus,
    /// Integer code of `ha_status`.
    pub ha_status_code: i32,
    /// The safety level the strategy is aiming for.
    pub ha_target: String,
    /// Fair-share primary partition load.
    pub fair_share_primary: u32,
    /// Fair-share backup partition load.
    pub fair_share_backup: u32,
    /// The member acting as distribution coordinator.
    pub coordinator: MemberId,
    /// Number of suggested partition transfers not yet enacted.
    pub remaining_distribution_count: u32,
    /// Distinct sites among the ownership members.
    pub site_count: usize,
    /// Distinct racks among the ownership members.
    pub rack_count: usize,
    /// Distinct machines among the ownership members.
    pub machine_count: usize,
}

impl SimpleAssignmentStrategy {
    /// The current high-availability status, computed from live ownership.
    pub fn ha_status(&self) -> HaStatus {
        let manager = self.manager();
        let service = manager.service_info();
        let members = manager.ownership_members();

        let actual_backups = service.backup_count.min(members.len().saturating_sub(1));
        if actual_backups == 0 {
            // no redundancy configured, or too few members to hold any
            return HaStatus::Endangered;
        }

        let mut weakest: Option<u32> = None;
        for pid in 0..service.partition_count {
            let owners = manager.partition_ownership(pid);
            if owners.primary() == UNOWNED {
                return HaStatus::Orphaned;
            }

            let mut resolved: Vec<Arc<MemberInfo>> = Vec::with_capacity(actual_backups + 1);
            for store in 0..=actual_backups {
                match manager.member(owners.owner(store)) {
                    Some(member) => resolved.push(member),
                    None => return HaStatus::Endangered,
                }
            }

            for i in 0..resolved.len() {
                for j in i + 1..resolved.len() {
                    let d = member_distance(&resolved[i], &resolved[j]);
                    if d == 0 {
                        return HaStatus::Endangered;
                    }
                    weakest = Some(weakest.map_or(d, |w| w.min(d)));
                }
            }
        }

        let level = match weakest {
            Some(2) => SafetyLevel::Machine,
            Some(3) => SafetyLevel::Rack,
            Some(4) => SafetyLevel::Site,
            _ => SafetyLevel::Node,
        };
        HaStatus::from_level(level)
    }

    /// A serializable snapshot of the reporting attributes.
    pub fn snapshot(&self) -> DistributionSnapshot {
        let service = self.manager().service_info();
        let (fair_primary, fair_backup, target, sites, racks, machines) = match self.last_context()
        {
            Some(ctx) => {
                let strength = ctx.backup_strength();
                (
                    ctx.fair_share(true),
                    ctx.fair_share(false),
                    strength.level().as_str().to_string(),
                    strength.site_count(),
                    strength.rack_count(),
                    strength.machine_count(),
                )
            }
            None => (0, 0, MSG_NO_RESULT.to_string(), 0, 0, 0),
        };

        let ha_status = self.ha_status();
        DistributionSnapshot {
            service: service.name,
            ha_status,
            ha_status_code: ha_status.code(),
            ha_target: target,
            fair_share_primary: fair_primary,
            fair_share_backup: fair_backup,
            coordinator: service.local_member,
            remaining_distribution_count: self.remaining_distribution_count(),
            site_count: sites,
            rack_count: racks,
            machine_count: machines,
        }
    }

    /// The number of suggested partition transfers that have not yet been
    /// enacted by the service.
    pub fn remaining_distribution_count(&self) -> u32 {
        self.collect_scheduled_distributions()
            .values()
            .flat_map(|stores| stores.iter().flatten())
            .map(|parts| parts.cardinality())
            .sum()
    }

    /// Aggregated storage statistics, recomputed lazily after each analysis.
    pub fn composite_stats(&mut self) -> CompositeStats {
        if let (Some(stats), false) = (self.composite, self.stats_dirty) {
            return stats;
        }

        let stats = self.calculate_composite_stats();
        self.composite = Some(stats);
        self.stats_dirty = false;
        stats
    }

    fn calculate_composite_stats(&self) -> CompositeStats {
        let manager = self.manager();
        let service = manager.service_info();
        let partition_stats = manager.partition_stats();
        let members = manager.ownership_members();

        if members.is_empty() || partition_stats.is_empty() {
            return CompositeStats::default();
        }

        let mut total_storage = 0u64;
        let mut max_partition = 0u64;
        let mut max_storage = 0u64;
        let mut max_member = UNOWNED;

        for member in &members {
            let parts = manager.owned_partitions(member.id, 0);

            let mut member_storage = 0u64;
            for pid in parts.iter() {
                let Some(stat) = partition_stats.get(pid as usize) else {
                    continue;
                };
                let size = stat.storage_size();
                member_storage += size;
                max_partition = max_partition.max(size);
            }

            total_storage += member_storage;
            if member_storage > max_storage {
                max_storage = member_storage;
                max_member = member.id;
            }
        }

        CompositeStats {
            average_partition_size_kb: total_storage / (service.partition_count as u64 * 1024),
            max_partition_size_kb: max_partition / 1024,
            average_storage_size_kb: total_storage / (members.len() as u64 * 1024),
            max_storage_size_kb: max_storage / 1024,
            max_load_member: max_member,
        }
    }

    /// A human-readable report of suggested distributions that have not been
    /// enacted, grouped machine, then member, then storage index.
    pub fn report_scheduled_distributions(&self, verbose: bool) -> String {
        let scheduled = self.collect_scheduled_distributions();
        if scheduled.is_empty() {
            return if self.last_context().is_none() {
                MSG_NO_RESULT.to_string()
            } else {
                MSG_NO_PENDING.to_string()
            };
        }

        let manager = self.manager();
        let service = manager.service_info();
        let mut out = format!(
            "Partition Distributions Scheduled for Service \"{}\"\n",
            service.name
        );

        // group the receiving members by machine
        let mut by_machine: BTreeMap<String, Vec<Arc<MemberInfo>>> = BTreeMap::new();
        for member_id in scheduled.keys() {
            if let Some(member) = manager.member(*member_id) {
                by_machine
                    .entry(member.machine_label())
                    .or_default()
                    .push(member);
            }
        }

        for (machine, mut members) in by_machine {
            members.sort_by_key(|m| m.id);
            out.push_str(&format!("\nMachine {machine}"));

            for member in members {
                out.push_str(&format!("\n    Member {}:", member.id));

                let stores = &scheduled[&member.id];
                for (store, parts) in stores.iter().enumerate() {
                    let Some(parts) = parts else { continue };
                    let count = parts.cardinality();
                    if count == 0 {
                        continue;
                    }

                    let store_label = if store == 0 {
                        " Primary".to_string()
                    } else if service.backup_count == 1 {
                        " Backup".to_string()
                    } else {
                        format!(" Backup[{store}]")
                    };
                    out.push_str(&format!(
                        "\n        - scheduled to receive {count}{store_label} partitions:"
                    ));

                    for (owner, from_parts) in self.split_by_owner(parts) {
                        out.push_str(&format!(
                            "\n           -- {} from member {owner}",
                            from_parts.cardinality()
                        ));
                        if verbose {
                            out.push_str(&format!(": {from_parts}"));
                        }
                    }
                }
            }
        }

        out
    }

    /// The suggested-but-not-enacted partitions, keyed by receiving member
    /// and indexed by storage index.
    fn collect_scheduled_distributions(&self) -> HashMap<MemberId, Vec<Option<PartitionSet>>> {
        if self.last_suggestions.is_empty() {
            return HashMap::new();
        }

        let manager = self.manager();
        let service = manager.service_info();
        let mut scheduled: HashMap<MemberId, Vec<Option<PartitionSet>>> = HashMap::new();

        for (owners, parts) in &self.last_suggestions {
            for store in 0..=service.backup_count {
                let member_id = owners.owner(store);
                if member_id == UNOWNED || manager.member(member_id).is_none() {
                    continue;
                }

                let pending = self.unowned_partitions(parts, member_id);
                if pending.is_empty() {
                    continue;
                }

                let stores = scheduled
                    .entry(member_id)
                    .or_insert_with(|| vec![None; service.backup_count + 1]);
                match &mut stores[store] {
                    Some(existing) => {
                        existing.add_all(&pending);
                    }
                    slot => *slot = Some(pending),
                }
            }
        }

        scheduled
    }

    /// The subset of `parts` that the member does not currently own at any
    /// storage index; those transfers are still pending.
    fn unowned_partitions(&self, parts: &PartitionSet, member: MemberId) -> PartitionSet {
        let manager = self.manager();
        let service = manager.service_info();
        let mut unowned = parts.clone();

        for pid in parts.iter() {
            let owners = manager.partition_ownership(pid);
            for store in 0..=service.backup_count {
                if owners.owner(store) == member {
                    unowned.remove(pid);
                    break;
                }
            }
        }

        unowned
    }

    /// Group pending partitions by their current primary owner (transfers
    /// originate from the primary). Orphaned partitions are skipped; they
    /// await recovery rather than transfer.
    fn split_by_owner(&self, parts: &PartitionSet) -> BTreeMap<MemberId, PartitionSet> {
        let manager = self.manager();
        let partition_count = manager.service_info().partition_count;
        let mut by_owner: BTreeMap<MemberId, PartitionSet> = BTreeMap::new();

        for pid in parts.iter() {
            let owner = manager.partition_ownership(pid).primary();
            if owner == UNOWNED {
                continue;
            }
            by_owner
                .entry(owner)
                .or_insert_with(|| PartitionSet::new(partition_count))
                .add(pid);
        }

        by_owner
    }
}
