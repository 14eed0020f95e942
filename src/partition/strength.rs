//! Failure-domain safety classification.
//!
//! A distribution is "strong" at a given safety level when no two owners of
//! the same partition coincide at that granularity: node-safe owners are
//! distinct members, machine-safe owners live on distinct machines, and so on
//! up to site safety. [`BackupStrength`] captures the strongest level the
//! current membership topology can support, computed once per analysis pass.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::member::MemberInfo;

/// Failure-domain granularity, ordered weakest to strongest.
///
/// The discriminant doubles as the "distance" contribution between two
/// members separated at that granularity, which the placement heuristics sum
/// and square when scoring candidate owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SafetyLevel {
    /// Owners are distinct members.
    Node = 1,
    /// Owners are on distinct machines.
    Machine = 2,
    /// Owners are on distinct racks.
    Rack = 3,
    /// Owners are on distinct sites.
    Site = 4,
}

impl SafetyLevel {
    /// The next weaker level, or `None` below [`SafetyLevel::Node`].
    pub fn weaker(self) -> Option<SafetyLevel> {
        match self {
            SafetyLevel::Node => None,
            SafetyLevel::Machine => Some(SafetyLevel::Node),
            SafetyLevel::Rack => Some(SafetyLevel::Machine),
            SafetyLevel::Site => Some(SafetyLevel::Rack),
        }
    }

    /// Human-readable name, e.g. `MACHINE-SAFE`.
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyLevel::Node => "NODE-SAFE",
            SafetyLevel::Machine => "MACHINE-SAFE",
            SafetyLevel::Rack => "RACK-SAFE",
            SafetyLevel::Site => "SITE-SAFE",
        }
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The "distance" between two members: the coarsest granularity at which
/// they differ, or 0 for the same member.
pub(crate) fn member_distance(a: &MemberInfo, b: &MemberInfo) -> u32 {
    if a.site != b.site {
        return SafetyLevel::Site as u32;
    }
    if a.rack != b.rack {
        return SafetyLevel::Rack as u32;
    }
    if a.machine_id != b.machine_id {
        return SafetyLevel::Machine as u32;
    }
    if a.id != b.id {
        return SafetyLevel::Node as u32;
    }
    0
}

/// The target resiliency of a distribution, with the topology census it was
/// derived from.
#[derive(Debug, Clone)]
pub struct BackupStrength {
    level: SafetyLevel,
    site_count: usize,
    rack_count: usize,
    machine_count: usize,
}

impl BackupStrength {
    /// Classify the strongest achievable safety level for the given
    /// ownership members and backup count.
    ///
    /// A level is achievable when the largest failure-domain group at that
    /// granularity satisfies `max_group * (backups + 1) <= member_count`:
    /// losing the biggest group must leave enough surviving backup capacity
    /// to absorb the orphaned load.
    pub fn classify(members: &[Arc<MemberInfo>], backup_count: usize) -> BackupStrength {
        let mut sites: HashSet<&Option<String>> = HashSet::new();
        let mut racks: HashSet<&Option<String>> = HashSet::new();
        let mut machines: HashSet<u32> = HashSet::new();

        for member in members {
            sites.insert(&member.site);
            racks.insert(&member.rack);
            machines.insert(member.machine_id);
        }

        let total = members.len();
        let site_keys = members.iter().map(|m| m.site.as_deref());
        let rack_keys = members.iter().map(|m| m.rack.as_deref());
        let machine_keys = members.iter().map(|m| m.machine_id);

        let level = if Self::is_strong_possible(site_keys, total, backup_count) {
            SafetyLevel::Site
        } else if Self::is_strong_possible(rack_keys, total, backup_count) {
            SafetyLevel::Rack
        } else if Self::is_strong_possible(machine_keys, total, backup_count) {
            SafetyLevel::Machine
        } else {
            SafetyLevel::Node
        };

        BackupStrength {
            level,
            site_count: sites.len(),
            rack_count: racks.len(),
            machine_count: machines.len(),
        }
    }

    /// The inequality `max_group * (backups + 1) <= member_count` applied to
    /// one grouping axis.
    fn is_strong_possible<K: std::hash::Hash + Eq>(
        keys: impl Iterator<Item = K>,
        total: usize,
        backup_count: usize,
    ) -> bool {
        let mut counts: std::collections::HashMap<K, usize> = std::collections::HashMap::new();
        for key in keys {
            *counts.entry(key).or_default() += 1;
        }

        let max_group = counts.values().copied().max().unwrap_or(0);
        max_group * (backup_count + 1) <= total
    }

    /// The classified safety level.
    pub fn level(&self) -> SafetyLevel {
        self.level
    }

    /// The number of distinct sites among the ownership members.
    pub fn site_count(&self) -> usize {
        self.site_count
    }

    /// The number of distinct racks among the ownership members.
    pub fn rack_count(&self) -> usize {
        self.rack_count
    }

    /// The number of distinct machines among the ownership members.
    pub fn machine_count(&self) -> usize {
        self.machine_count
    }

    /// The same census at the next weaker safety level.
    ///
    /// # Panics
    ///
    /// Panics if the strength is already node-level; node safety is the
    /// weakest target the engine can aim for, and weakening past it is a
    /// logic error.
    pub fn weaker(&self) -> BackupStrength {
        let level = self
            .level
            .weaker()
            .expect("NODE-SAFE is the weakest backup strength");
        BackupStrength {
            level,
            ..self.clone()
        }
    }

    /// True if the two members are mutually strong at this strength's level.
    pub fn is_strong(&self, a: &MemberInfo, b: &MemberInfo) -> bool {
        match self.level {
            SafetyLevel::Node => a.id != b.id,
            SafetyLevel::Machine => a.machine_id != b.machine_id,
            SafetyLevel::Rack => a.rack != b.rack,
            SafetyLevel::Site => a.site != b.site,
        }
    }
}

impl fmt::Display for BackupStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackupStrength{{{}}}", self.level)
    }
}

/// High-availability status of a partitioned service, as exposed on the
/// reporting surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HaStatus {
    /// At least one partition has no primary owner.
    Orphaned,
    /// At least one backup storage index is unfilled.
    Endangered,
    /// Every partition's owners are distinct members.
    NodeSafe,
    /// Every partition's owners are on distinct machines.
    MachineSafe,
    /// Every partition's owners are on distinct racks.
    RackSafe,
    /// Every partition's owners are on distinct sites.
    SiteSafe,
}

impl HaStatus {
    /// Integer code: -1 orphaned, 0 endangered, then the safety-level codes.
    pub fn code(self) -> i32 {
        match self {
            HaStatus::Orphaned => -1,
            HaStatus::Endangered => 0,
            HaStatus::NodeSafe => SafetyLevel::Node as i32,
            HaStatus::MachineSafe => SafetyLevel::Machine as i32,
            HaStatus::RackSafe => SafetyLevel::Rack as i32,
            HaStatus::SiteSafe => SafetyLevel::Site as i32,
        }
    }

    /// Status name, e.g. `MACHINE-SAFE`.
    pub fn as_str(self) -> &'static str {
        match self {
            HaStatus::Orphaned => "ORPHANED",
            HaStatus::Endangered => "ENDANGERED",
            HaStatus::NodeSafe => SafetyLevel::Node.as_str(),
            HaStatus::MachineSafe => SafetyLevel::Machine.as_str(),
            HaStatus::RackSafe => SafetyLevel::Rack.as_str(),
            HaStatus::SiteSafe => SafetyLevel::Site.as_str(),
        }
    }

    /// The status corresponding to an achieved safety level.
    pub fn from_level(level: SafetyLevel) -> HaStatus {
        match level {
            SafetyLevel::Node => HaStatus::NodeSafe,
            SafetyLevel::Machine => HaStatus::MachineSafe,
            SafetyLevel::Rack => HaStatus::RackSafe,
            SafetyLevel::Site => HaStatus::SiteSafe,
        }
    }
}

impl fmt::Display for HaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
