//! Per-partition ownership records.
//!
//! An [`Ownership`] holds the member ids owning each storage index of one
//! partition: index 0 is the primary copy, indices `1..=K` are the backup
//! copies. Member id [`UNOWNED`](crate::partition::UNOWNED) marks an
//! endangered (backup) or orphaned (primary) storage index.

use std::fmt;

use super::member::{MemberId, UNOWNED};

/// Owners of a single partition, one member id per storage index.
///
/// The array length is fixed at construction and never resized; equality and
/// hashing are structural over the owner ids.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ownership {
    owners: Box<[MemberId]>,
}

impl Ownership {
    /// Construct an ownership record with the given backup count; every
    /// storage index starts unowned.
    pub fn new(backup_count: usize) -> Self {
        Ownership {
            owners: vec![UNOWNED; backup_count + 1].into_boxed_slice(),
        }
    }

    /// Construct an ownership record from explicit owner ids,
    /// `[primary, backup1, ..]`.
    ///
    /// # Panics
    ///
    /// Panics if `owners` is empty.
    pub fn from_owners(owners: &[MemberId]) -> Self {
        assert!(!owners.is_empty(), "ownership requires a primary slot");
        Ownership {
            owners: owners.to_vec().into_boxed_slice(),
        }
    }

    /// The number of backup storage indices.
    pub fn backup_count(&self) -> usize {
        self.owners.len() - 1
    }

    /// The owner of the given storage index; [`UNOWNED`] if the index has no
    /// owner.
    ///
    /// # Panics
    ///
    /// Panics if `store` exceeds the backup count.
    pub fn owner(&self, store: usize) -> MemberId {
        self.owners[store]
    }

    /// The primary owner, i.e. the owner of storage index 0.
    pub fn primary(&self) -> MemberId {
        self.owners[0]
    }

    /// Overwrite the owner of the given storage index unconditionally.
    pub fn set_owner(&mut self, store: usize, member: MemberId) {
        self.owners[store] = member;
    }

    /// A read-only view of the full owner array.
    pub fn owners(&self) -> &[MemberId] {
        &self.owners
    }

    /// True if the given member owns any storage index of this partition.
    pub fn is_owned_by(&self, member: MemberId) -> bool {
        member != UNOWNED && self.owners.contains(&member)
    }
}

impl fmt::Debug for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ownership{:?}", self.owners)
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ownership{{primary={}", self.owners[0])?;
        for (store, owner) in self.owners.iter().enumerate().skip(1) {
            write!(f, ", backup[{store}]={owner}")?;
        }
        write!(f, "}}")
    }
}

/// An [`Ownership`] carrying a monotonic version counter.
///
/// The version is caller-managed: by contract it is incremented exactly when
/// the primary owner changes, so replay listeners can distinguish a data
/// handover from harmless backup movement. Backup-only changes leave the
/// version untouched.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct VersionedOwnership {
    ownership: Ownership,
    version: u64,
}

impl VersionedOwnership {
    /// Construct with the given backup count and version 0.
    pub fn new(backup_count: usize) -> Self {
        VersionedOwnership {
            ownership: Ownership::new(backup_count),
            version: 0,
        }
    }

    /// Wrap an existing ownership record at the given version.
    pub fn from_ownership(ownership: Ownership, version: u64) -> Self {
        VersionedOwnership { ownership, version }
    }

    /// The current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Set the version. The data type does not auto-increment; the caller is
    /// responsible for bumping exactly on primary-owner change.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// The wrapped ownership record.
    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    /// Mutable access to the wrapped ownership record.
    pub fn ownership_mut(&mut self) -> &mut Ownership {
        &mut self.ownership
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get() {
        let mut owners = Ownership::new(2);
        assert_eq!(owners.backup_count(), 2);
        assert_eq!(owners.primary(), UNOWNED);

        owners.set_owner(0, 4);
        owners.set_owner(2, 7);
        assert_eq!(owners.owner(0), 4);
        assert_eq!(owners.owner(1), UNOWNED);
        assert_eq!(owners.owner(2), 7);
        assert!(owners.is_owned_by(7));
        assert!(!owners.is_owned_by(5));
    }

    #[test]
    fn structural_equality_and_hash() {
        use std::collections::HashSet;

        let a = Ownership::from_owners(&[1, 2, 3]);
        let b = Ownership::from_owners(&[1, 2, 3]);
        let c = Ownership::from_owners(&[1, 3, 2]);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn versioned_is_caller_managed() {
        let mut owners = VersionedOwnership::new(1);
        owners.ownership_mut().set_owner(0, 3);
        owners.ownership_mut().set_owner(1, 5);
        assert_eq!(owners.version(), 0, "type does not auto-increment");

        owners.set_version(1);
        assert_eq!(owners.version(), 1);
    }

    #[test]
    fn display_names_stores() {
        let owners = Ownership::from_owners(&[1, 0, 4]);
        assert_eq!(
            owners.to_string(),
            "Ownership{primary=1, backup[1]=0, backup[2]=4}"
        );
    }
}
