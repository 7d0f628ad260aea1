mod common;

use shardheap::classname::ClassnameDirectory;
use shardheap::ids::{Oid, Vpid, GLOBAL_GROUPID};
use shardheap::lock::{LockManager, LockMode};
use shardheap::txn::Transaction;

fn oid(slot: i16) -> Oid {
    Oid::new(Vpid::new(1, 0), slot, GLOBAL_GROUPID)
}

#[test]
fn reserve_then_find_before_commit_is_visible_only_to_the_owner() {
    let locks = LockManager::new();
    let dir = ClassnameDirectory::new(&locks);
    let tx = Transaction::new(vec![]);

    dir.reserve("widgets", oid(1), tx.id()).unwrap();
    let found = dir.find("widgets", tx.id(), LockMode::Shared).unwrap();
    assert_eq!(found, Some(oid(1)));
}

#[test]
fn commit_persists_a_reservation_and_rollback_discards_it() {
    let locks = LockManager::new();
    let dir = ClassnameDirectory::new(&locks);

    let tx1 = Transaction::new(vec![]);
    dir.reserve("committed_class", oid(1), tx1.id()).unwrap();
    dir.on_transaction_end(tx1.id(), true);
    assert!(dir.no_transient_entries_owned_by(tx1.id()));

    let tx2 = Transaction::new(vec![]);
    assert_eq!(dir.find("committed_class", tx2.id(), LockMode::Shared).unwrap(), Some(oid(1)));

    let tx3 = Transaction::new(vec![]);
    dir.reserve("rolled_back_class", oid(2), tx3.id()).unwrap();
    dir.on_transaction_end(tx3.id(), false);

    let tx4 = Transaction::new(vec![]);
    assert_eq!(dir.find("rolled_back_class", tx4.id(), LockMode::Shared).unwrap(), None);
}

#[test]
fn delete_then_commit_removes_a_previously_persisted_name() {
    let locks = LockManager::new();
    let dir = ClassnameDirectory::new(&locks);

    let tx1 = Transaction::new(vec![]);
    dir.reserve("to_drop", oid(1), tx1.id()).unwrap();
    dir.on_transaction_end(tx1.id(), true);

    let tx2 = Transaction::new(vec![]);
    dir.delete("to_drop", tx2.id()).unwrap();
    dir.on_transaction_end(tx2.id(), true);

    let tx3 = Transaction::new(vec![]);
    assert_eq!(dir.find("to_drop", tx3.id(), LockMode::Shared).unwrap(), None);
}

#[test]
fn reserving_an_already_reserved_name_from_another_transaction_conflicts() {
    let locks = LockManager::new();
    let dir = ClassnameDirectory::new(&locks);

    let tx1 = Transaction::new(vec![]);
    dir.reserve("contested", oid(1), tx1.id()).unwrap();

    let tx2 = Transaction::new(vec![]);
    let err = dir.reserve("contested", oid(2), tx2.id()).unwrap_err();
    assert_eq!(err.kind(), shardheap::ErrorKind::Conflict);
}

/// Spec §8 end-to-end scenario 4: an uncommitted rename is visible as a
/// dirty read to other transactions, and unwinds cleanly on abort.
#[test]
fn uncommitted_rename_is_visible_to_others_and_unwinds_on_abort() {
    let locks = LockManager::new();
    let dir = ClassnameDirectory::new(&locks);
    let class_c = oid(1);

    let tx0 = Transaction::new(vec![]);
    dir.reserve("x", class_c, tx0.id()).unwrap();
    dir.on_transaction_end(tx0.id(), true);

    let tx1 = Transaction::new(vec![]);
    dir.rename("x", "y", class_c, tx1.id()).unwrap();

    let tx2 = Transaction::new(vec![]);
    assert_eq!(dir.find("x", tx2.id(), LockMode::Shared).unwrap(), None);
    assert_eq!(dir.find("y", tx2.id(), LockMode::Shared).unwrap(), Some(class_c));

    dir.on_transaction_end(tx1.id(), false);
    assert!(dir.no_transient_entries_owned_by(tx1.id()));

    let tx3 = Transaction::new(vec![]);
    assert_eq!(dir.find("x", tx3.id(), LockMode::Shared).unwrap(), Some(class_c));
    assert_eq!(dir.find("y", tx3.id(), LockMode::Shared).unwrap(), None);
}
