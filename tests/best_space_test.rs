mod common;

use shardheap::best_space::HeapPageSource;
use shardheap::heap::HeapFile;
use shardheap::ids::{Oid, Vfid, Vpid, GLOBAL_GROUPID};
use shardheap::record::RecordBuilder;
use shardheap::txn::Transaction;

fn row(n: i32) -> Vec<u8> {
    let mut b = RecordBuilder::new(0, GLOBAL_GROUPID, 1);
    b.push_fixed(&n.to_le_bytes(), 4, 0, true);
    b.build(None).unwrap()
}

#[test]
fn deleting_most_of_a_page_makes_it_a_placement_candidate_again() {
    let h = common::setup(false);
    let mut tx = Transaction::new(vec![]);
    let class_oid = Oid::new(Vpid::new(1, 0), 0, GLOBAL_GROUPID);
    let hfid = HeapFile::create(&h.buffer, &h.log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();
    let heap = HeapFile {
        hfid,
        buffer: &h.buffer,
        best_space: &h.best_space,
        log: &h.log,
        page_size: shardheap::consts::PAGE_SIZE,
    };

    let mut oids = Vec::new();
    for i in 0..400 {
        oids.push(heap.insert(&mut tx, &row(i), class_oid, GLOBAL_GROUPID, false).unwrap());
    }
    let pages_before = heap.num_pages(hfid).unwrap();
    assert!(pages_before > 1, "expected the batch to span more than one page");

    // delete everything on the first data page's worth of rows so its free
    // space clears the drop threshold and it re-enters the cache via sync.
    for oid in &oids[..100] {
        heap.delete(&mut tx, *oid).unwrap();
    }

    h.best_space.sync_all(&heap, true).unwrap();
    assert!(h.best_space.len() > 0, "sync should have found pages with reclaimable space");

    // a fresh insert should be able to reuse freed space rather than
    // growing the file further.
    let pages_after_reuse_insert = {
        heap.insert(&mut tx, &row(9999), class_oid, GLOBAL_GROUPID, false).unwrap();
        heap.num_pages(hfid).unwrap()
    };
    assert!(pages_after_reuse_insert <= pages_before + 1);
}

#[test]
fn del_all_by_hfid_removes_every_entry_for_that_heap() {
    let h = common::setup(false);
    let mut tx = Transaction::new(vec![]);
    let class_oid = Oid::new(Vpid::new(1, 0), 0, GLOBAL_GROUPID);
    let hfid = HeapFile::create(&h.buffer, &h.log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();
    let heap = HeapFile {
        hfid,
        buffer: &h.buffer,
        best_space: &h.best_space,
        log: &h.log,
        page_size: shardheap::consts::PAGE_SIZE,
    };

    for i in 0..50 {
        heap.insert(&mut tx, &row(i), class_oid, GLOBAL_GROUPID, false).unwrap();
    }
    h.best_space.sync_all(&heap, true).unwrap();
    h.best_space.del_all_by_hfid(hfid);
    assert_eq!(h.best_space.len(), 0);
}
