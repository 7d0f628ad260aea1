mod common;

use shardheap::heap::HeapFile;
use shardheap::ids::{Vfid, GLOBAL_GROUPID};
use shardheap::record::RecordBuilder;
use shardheap::record::RecordState;
use shardheap::txn::Transaction;

fn row(n: i32) -> Vec<u8> {
    let mut b = RecordBuilder::new(0, GLOBAL_GROUPID, 1);
    b.push_fixed(&n.to_le_bytes(), 4, 0, true);
    b.build(None).unwrap()
}

#[test]
fn insert_get_update_delete_round_trip() {
    let h = common::setup(false);
    let mut tx = Transaction::new(vec![]);
    let class_oid = shardheap::ids::Oid::new(shardheap::ids::Vpid::new(1, 0), 0, GLOBAL_GROUPID);
    let hfid = HeapFile::create(&h.buffer, &h.log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();
    let heap = HeapFile {
        hfid,
        buffer: &h.buffer,
        best_space: &h.best_space,
        log: &h.log,
        page_size: shardheap::consts::PAGE_SIZE,
    };

    let oid = heap.insert(&mut tx, &row(42), class_oid, GLOBAL_GROUPID, false).unwrap();
    let got = heap.get(oid, None).unwrap();
    assert_eq!(got, row(42));

    let new_oid = heap.update(&mut tx, oid, &row(43), class_oid).unwrap();
    let got = heap.get(new_oid, None).unwrap();
    assert_eq!(got, row(43));

    heap.delete(&mut tx, new_oid).unwrap();
    assert!(heap.get(new_oid, None).is_err());
}

#[test]
fn insert_many_rows_spans_multiple_pages_via_scan() {
    let h = common::setup(false);
    let mut tx = Transaction::new(vec![]);
    let class_oid = shardheap::ids::Oid::new(shardheap::ids::Vpid::new(1, 0), 0, GLOBAL_GROUPID);
    let hfid = HeapFile::create(&h.buffer, &h.log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();
    let heap = HeapFile {
        hfid,
        buffer: &h.buffer,
        best_space: &h.best_space,
        log: &h.log,
        page_size: shardheap::consts::PAGE_SIZE,
    };

    let mut inserted = Vec::new();
    for i in 0..500 {
        let oid = heap.insert(&mut tx, &row(i), class_oid, GLOBAL_GROUPID, false).unwrap();
        inserted.push(oid);
    }

    let scanned: Vec<_> = heap.scan(None).collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(scanned.len(), 500);
}

#[test]
fn reserved_oid_has_no_content_until_first_update_promotes_it_to_home() {
    let h = common::setup(false);
    let mut tx = Transaction::new(vec![]);
    let class_oid = shardheap::ids::Oid::new(shardheap::ids::Vpid::new(1, 0), 0, GLOBAL_GROUPID);
    let hfid = HeapFile::create(&h.buffer, &h.log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();
    let heap = HeapFile {
        hfid,
        buffer: &h.buffer,
        best_space: &h.best_space,
        log: &h.log,
        page_size: shardheap::consts::PAGE_SIZE,
    };

    let oid = heap.insert_reserved(&mut tx, class_oid, GLOBAL_GROUPID, false).unwrap();
    // no content yet: a bare get on a still-reserved oid is not a logical record.
    assert!(heap.get(oid, None).is_err());

    let same_oid = heap.update(&mut tx, oid, &row(7), class_oid).unwrap();
    assert_eq!(same_oid, oid);
    assert_eq!(heap.get(oid, None).unwrap(), row(7));
}

#[test]
fn delete_tombstones_slot_and_subsequent_get_is_an_error() {
    let h = common::setup(false);
    let mut tx = Transaction::new(vec![]);
    let class_oid = shardheap::ids::Oid::new(shardheap::ids::Vpid::new(1, 0), 0, GLOBAL_GROUPID);
    let hfid = HeapFile::create(&h.buffer, &h.log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();
    let heap = HeapFile {
        hfid,
        buffer: &h.buffer,
        best_space: &h.best_space,
        log: &h.log,
        page_size: shardheap::consts::PAGE_SIZE,
    };

    let oid = heap.insert(&mut tx, &row(1), class_oid, GLOBAL_GROUPID, false).unwrap();
    heap.delete(&mut tx, oid).unwrap();
    let err = heap.get(oid, None).unwrap_err();
    let _ = RecordState::MarkDeleted; // documents which tombstone state this exercises
    assert!(err.kind() == shardheap::ErrorKind::NotFound || err.kind() == shardheap::ErrorKind::Invalid);
}
