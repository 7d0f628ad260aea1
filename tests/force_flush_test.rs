mod common;

use shardheap::catalog::{AttrDef, ClassRepresentation, ClassSchema, IndexDef};
use shardheap::force::{ForceEngine, ForceOp, Intent};
use shardheap::heap::HeapFile;
use shardheap::ids::{Btid, Oid, Vfid, Vpid, GLOBAL_GROUPID};
use shardheap::record::RecordBuilder;
use shardheap::txn::Transaction;

fn row(n: i32) -> Vec<u8> {
    let mut b = RecordBuilder::new(0, GLOBAL_GROUPID, 1);
    b.push_fixed(&n.to_le_bytes(), 4, 0, true);
    b.build(None).unwrap()
}

fn schema(class_oid: Oid, btid: Btid) -> ClassSchema {
    ClassSchema {
        class_oid,
        is_shard_table: false,
        current_repr_id: 0,
        representations: vec![ClassRepresentation {
            repr_id: 0,
            attrs: vec![AttrDef::fixed(1, 4, vec![0; 4])],
            indexes: vec![IndexDef { btid, attr_ids: vec![1], is_primary_key: true }],
        }],
    }
}

#[test]
fn batch_of_insert_update_delete_maintains_the_primary_key_index() {
    let h = common::setup(true);
    let mut tx = Transaction::new(vec![]);
    let class_oid = Oid::new(Vpid::new(1, 0), 0, GLOBAL_GROUPID);
    let btid = Btid::new(Vfid::new(1, 9), 0);
    h.catalog.catalog_insert(schema(class_oid, btid));
    let hfid = HeapFile::create(&h.buffer, &h.log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();

    let engine = ForceEngine {
        buffer: &h.buffer,
        best_space: &h.best_space,
        log: &h.log,
        catalog: &h.catalog,
        indexes: &h.indexes,
        locks: &h.locks,
        root_class_oid: Oid::NULL,
    };

    let insert = Intent {
        op: ForceOp::Insert,
        hfid,
        class_oid,
        oid: None,
        payload: row(1),
        group: GLOBAL_GROUPID,
        is_shard_table: false,
        reserve_only: false,
    };
    let counters = engine.apply_batch(&mut tx, vec![insert]).unwrap();
    assert_eq!(counters.inserts, 1);
    assert_eq!(h.indexes.with_index(btid, |i| Ok(i.len())).unwrap(), 1);

    let heap = HeapFile {
        hfid,
        buffer: &h.buffer,
        best_space: &h.best_space,
        log: &h.log,
        page_size: shardheap::consts::PAGE_SIZE,
    };
    let (oid, _) = heap.scan(None).collect::<Result<Vec<_>, _>>().unwrap().remove(0);

    let update = Intent {
        op: ForceOp::Update,
        hfid,
        class_oid,
        oid: Some(oid),
        payload: row(2),
        group: GLOBAL_GROUPID,
        is_shard_table: false,
        reserve_only: false,
    };
    let counters = engine.apply_batch(&mut tx, vec![update]).unwrap();
    assert_eq!(counters.updates, 1);

    let delete = Intent {
        op: ForceOp::Delete,
        hfid,
        class_oid,
        oid: Some(oid),
        payload: vec![],
        group: GLOBAL_GROUPID,
        is_shard_table: false,
        reserve_only: false,
    };
    let counters = engine.apply_batch(&mut tx, vec![delete]).unwrap();
    assert_eq!(counters.deletes, 1);
    assert_eq!(h.indexes.with_index(btid, |i| Ok(i.len())).unwrap(), 0);
}

#[test]
fn a_failing_intent_aborts_the_whole_batch() {
    let h = common::setup(false);
    let mut tx = Transaction::new(vec![]);
    let class_oid = Oid::new(Vpid::new(1, 0), 0, GLOBAL_GROUPID);
    let btid = Btid::new(Vfid::new(1, 9), 0);
    h.catalog.catalog_insert(schema(class_oid, btid));
    let hfid = HeapFile::create(&h.buffer, &h.log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();

    let engine = ForceEngine {
        buffer: &h.buffer,
        best_space: &h.best_space,
        log: &h.log,
        catalog: &h.catalog,
        indexes: &h.indexes,
        locks: &h.locks,
        root_class_oid: Oid::NULL,
    };

    let bogus_update = Intent {
        op: ForceOp::Update,
        hfid,
        class_oid,
        oid: Some(Oid::new(Vpid::new(1, 77), 0, GLOBAL_GROUPID)),
        payload: row(1),
        group: GLOBAL_GROUPID,
        is_shard_table: false,
        reserve_only: false,
    };
    let err = engine.apply_batch(&mut tx, vec![bogus_update]).unwrap_err();
    assert!(err.kind() == shardheap::ErrorKind::NotFound || err.kind() == shardheap::ErrorKind::Invalid);
    assert_eq!(h.indexes.with_index(btid, |i| Ok(i.len())).unwrap(), 0);
}
