//! Ownership-record behavior, including the versioning contract as enacted
//! by a manager.

use tessera::partition::{
    DistributionManager, MemberInfo, MockDistributionManager, Ownership, PartitionSet,
    VersionedOwnership, UNOWNED,
};

#[test]
fn owner_array_is_fixed_and_structural() {
    let mut owners = Ownership::new(2);
    assert_eq!(owners.backup_count(), 2);
    owners.set_owner(0, 7);
    owners.set_owner(1, 9);

    let same = Ownership::from_owners(&[7, 9, UNOWNED]);
    assert_eq!(owners, same);
    assert_eq!(owners.owners(), &[7, 9, 0]);
}

#[test]
fn version_bumps_only_on_primary_change() {
    let manager = MockDistributionManager::builder("orders", 8, 1)
        .member(MemberInfo::new(1, 1))
        .member(MemberInfo::new(2, 2))
        .auto_enact(true)
        .build();
    for pid in 0..8 {
        manager.set_ownership(pid, &[1, 2]);
    }

    let parts = PartitionSet::with_partition(8, 3);

    // a backup-only change leaves the version untouched
    manager.suggest(&parts, &Ownership::from_owners(&[1, UNOWNED]));
    assert_eq!(manager.version(3), 0);

    // a primary change bumps it exactly once
    manager.suggest(&parts, &Ownership::from_owners(&[2, 1]));
    assert_eq!(manager.version(3), 1);
    assert_eq!(manager.partition_ownership(3).primary(), 2);

    // untouched partitions keep their version
    assert_eq!(manager.version(4), 0);
}

#[test]
fn versioned_ownership_round_trips_through_wrapper() {
    let inner = Ownership::from_owners(&[5, 6]);
    let versioned = VersionedOwnership::from_ownership(inner.clone(), 41);

    assert_eq!(versioned.ownership(), &inner);
    assert_eq!(versioned.version(), 41);
}
