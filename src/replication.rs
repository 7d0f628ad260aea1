//! Replication apply engine. Same physical shape as
//! the force engine but driven by an external log reader instead of a local
//! client: the OID is not known up front and must be rediscovered via the
//! primary-key index, and a failing row is recorded and skipped rather than
//! aborting the whole batch. Grounded on `force.rs`'s batch/system-op
//! structure, widened with the PK-lookup and shard-key-lock steps the
//! teacher's own replica-apply path (`transaction/replication/...` in the
//! broader source tree) performs before dispatch.

use crate::attr_info::AttributeInfo;
use crate::best_space::BestSpaceCache;
use crate::btree_index::pkey_btid;
use crate::catalog::Catalog;
use crate::classname::ClassnameDirectory;
use crate::error::StoreError;
use crate::force::IndexRegistry;
use crate::heap::HeapFile;
use crate::ids::{ClassOid, Hfid, ShardGroupId};
use crate::lock::{LockManager, LockMode, ShardKeyLock, Wait};
use crate::page::buffer::PageBuffer;
use crate::tx_log::LogManager;
use crate::txn::{SystemOpOutcome, Transaction};
use crate::types::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplOp {
    Insert,
    Update,
    Delete,
    /// `HA_CATALOG_ANALYZER_UPDATE` / `HA_CATALOG_APPLIER_UPDATE`: upsert
    /// straight into the catalog rather than a user heap.
    CatalogUpsert,
}

/// One row off the replication log reader: the packed PK value and class
/// name have already been pulled out of the payload head by the caller
/// before constructing this.
#[derive(Debug, Clone)]
pub struct ReplicationIntent {
    pub op: ReplOp,
    pub class_name: String,
    pub pk_key: Vec<u8>,
    pub payload: Vec<u8>,
    pub group: ShardGroupId,
}

#[derive(Debug, Clone)]
pub struct FailedRow {
    pub pk_key: Vec<u8>,
    pub error_kind: String,
    pub message: String,
}

/// The reply copy-area sent back to the log reader: lets it
/// checkpoint past whatever rows were skipped.
#[derive(Debug, Clone, Default)]
pub struct ReplicationOutcome {
    pub applied: usize,
    pub failed: Vec<FailedRow>,
}

impl ReplicationOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }
}

pub struct ReplicationEngine<'a> {
    pub buffer: &'a PageBuffer,
    pub best_space: &'a BestSpaceCache,
    pub log: &'a LogManager,
    pub catalog: &'a Catalog,
    pub classname: &'a ClassnameDirectory<'a>,
    pub locks: &'a LockManager,
    pub indexes: &'a IndexRegistry,
    /// Resolves a class's heap location; stands in for the system catalog
    /// lookup a full deployment would do.
    pub hfid_for_class: &'a dyn Fn(ClassOid) -> Option<Hfid>,
}

impl<'a> ReplicationEngine<'a> {
    fn heap_for(&self, hfid: Hfid) -> HeapFile<'a> {
        HeapFile {
            hfid,
            buffer: self.buffer,
            best_space: self.best_space,
            log: self.log,
            page_size: crate::consts::PAGE_SIZE,
        }
    }

    /// Apply a whole batch under one top-level system op, the same
    /// batching discipline as `force::ForceEngine::apply_batch`. Rows whose
    /// error is in the "ignore on apply" set are recorded in the returned
    /// outcome rather than aborting the batch; any other error aborts and
    /// propagates.
    pub fn apply_batch(&self, tx: &mut Transaction, intents: Vec<ReplicationIntent>) -> StoreResult<ReplicationOutcome> {
        self.log.start_system_op(tx);
        let mut outcome = ReplicationOutcome::default();

        for intent in &intents {
            self.log.start_system_op(tx);
            match self.apply_one(tx, intent) {
                Ok(()) => {
                    self.log.end_system_op(tx, SystemOpOutcome::AttachToOuter);
                    outcome.applied += 1;
                }
                Err(e) if e.ignorable_on_apply() => {
                    log::warn!("replication row for key {:?} ignored: {}", intent.pk_key, e);
                    self.log.end_system_op(tx, SystemOpOutcome::AttachToOuter);
                    outcome.failed.push(FailedRow {
                        pk_key: intent.pk_key.clone(),
                        error_kind: format!("{:?}", e.kind()),
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    self.log.end_system_op(tx, SystemOpOutcome::Abort);
                    self.log.end_system_op(tx, SystemOpOutcome::Abort);
                    return Err(e);
                }
            }
        }

        self.log.end_system_op(tx, SystemOpOutcome::Commit);
        Ok(outcome)
    }

    fn apply_one(&self, tx: &mut Transaction, intent: &ReplicationIntent) -> StoreResult<()> {
        // resolve class-oid by name.
        let class_oid = self
            .classname
            .find(&intent.class_name, tx.id(), LockMode::Shared)?
            .ok_or_else(|| StoreError::not_found(format!("UNKNOWN_CLASSNAME: {}", intent.class_name)))?;

        // the classname lookup above already takes a shared class lock via
        // `find`'s lock_object call; nothing further needed here.

        let hfid = (self.hfid_for_class)(class_oid)
            .ok_or_else(|| StoreError::not_found(format!("no heap registered for class {}", class_oid)))?;
        let heap = self.heap_for(hfid);
        let schema = self.catalog.catalog_get_class_info(class_oid)?;

        if intent.op == ReplOp::CatalogUpsert {
            // the payload already carries a full decoded schema from the
            // sender, so applying it is just a catalog upsert, not a heap
            // write.
            self.catalog.catalog_update(schema);
            return Ok(());
        }

        match intent.op {
            ReplOp::Insert => {
                let oid = heap.insert(tx, &intent.payload, class_oid, intent.group, schema.is_shard_table)?;
                let btid = pkey_btid(&schema.current().indexes)
                    .ok_or_else(|| StoreError::invalid("class has no primary key index"))?;
                self.indexes.ensure(btid, crate::btree_index::IndexKind::Primary);
                let key = AttributeInfo::get_key(&schema, schema.current().find_index(btid).unwrap(), oid, &intent.payload)?;
                self.indexes.with_index(btid, |idx| idx.btree_insert(key, oid))?;
                Ok(())
            }
            ReplOp::Update | ReplOp::Delete => {
                // resolve OID via the primary-key index.
                let btid = pkey_btid(&schema.current().indexes)
                    .ok_or_else(|| StoreError::invalid("class has no primary key index"))?;
                self.indexes.ensure(btid, crate::btree_index::IndexKind::Primary);
                let oid = self
                    .indexes
                    .with_index(btid, |idx| idx.btree_find_unique(&intent.pk_key))
                    .map_err(|_| StoreError::not_found("failed to apply update/delete: primary key not found"))?;

                // validate the serialized shard-group matches.
                if intent.group != crate::ids::GLOBAL_GROUPID && intent.group != oid.group {
                    return Err(StoreError::invalid("replicated record's shard group does not match resolved OID"));
                }

                // shard-key lock.
                let shard_lock = ShardKeyLock {
                    group: oid.group,
                    key: intent.pk_key.clone(),
                    class_oid,
                    is_shard: schema.is_shard_table,
                    for_update: true,
                };
                self.locks.lock_shard_key(shard_lock.clone(), tx.id(), Wait::Unconditional)?;

                let index_def = schema.current().find_index(btid).unwrap().clone();
                let result = if intent.op == ReplOp::Update {
                    let old_bytes = heap.get(oid, None)?;
                    heap.update(tx, oid, &intent.payload, class_oid)?;
                    let new_key = AttributeInfo::get_key(&schema, &index_def, oid, &intent.payload)?;
                    let old_key = AttributeInfo::get_key(&schema, &index_def, oid, &old_bytes)?;
                    self.indexes.with_index(btid, |idx| idx.btree_update(&old_key, new_key, oid))
                } else {
                    heap.delete(tx, oid)?;
                    self.indexes.with_index(btid, |idx| idx.btree_delete(&intent.pk_key))
                };

                self.locks.unlock_shard_key(&shard_lock, tx.id());
                result
            }
            ReplOp::Insert | ReplOp::CatalogUpsert => unreachable!("handled above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AttrDef, ClassRepresentation, ClassSchema, IndexDef};
    use crate::ids::{Btid, Oid, Vfid, Vpid, GLOBAL_GROUPID};
    use crate::record::RecordBuilder;

    fn encode_row(id: i32) -> Vec<u8> {
        let mut b = RecordBuilder::new(0, GLOBAL_GROUPID, 1);
        b.push_fixed(&id.to_le_bytes(), 4, 0, true);
        b.build(None).unwrap()
    }

    #[test]
    fn insert_then_update_by_primary_key_resolves_oid() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = PageBuffer::new(dir.path(), crate::consts::PAGE_SIZE);
        let best_space = BestSpaceCache::new(crate::consts::BEST_SPACE_DEFAULT_CAP);
        let log = LogManager::new(true);
        let catalog = Catalog::new();
        let locks = LockManager::new();
        let classname_lock_mgr = LockManager::new();
        let classname = ClassnameDirectory::new(&classname_lock_mgr);
        let indexes = IndexRegistry::new();

        let mut tx = Transaction::new(vec![]);
        let class_oid = Oid::new(Vpid::new(1, 0), 0, GLOBAL_GROUPID);
        let btid = Btid::new(Vfid::new(1, 9), 0);
        catalog.catalog_insert(ClassSchema {
            class_oid,
            is_shard_table: false,
            current_repr_id: 0,
            representations: vec![ClassRepresentation {
                repr_id: 0,
                attrs: vec![AttrDef::fixed(1, 4, vec![0; 4])],
                indexes: vec![IndexDef { btid, attr_ids: vec![1], is_primary_key: true }],
            }],
        });
        classname.reserve("widgets", class_oid, tx.id()).unwrap();
        classname.on_transaction_end(tx.id(), true);

        let hfid = HeapFile::create(&buffer, &log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();
        let hfid_for_class = move |oid: ClassOid| if oid == class_oid { Some(hfid) } else { None };

        let engine = ReplicationEngine {
            buffer: &buffer,
            best_space: &best_space,
            log: &log,
            catalog: &catalog,
            classname: &classname,
            locks: &locks,
            indexes: &indexes,
            hfid_for_class: &hfid_for_class,
        };

        let insert = ReplicationIntent {
            op: ReplOp::Insert,
            class_name: "widgets".to_string(),
            pk_key: vec![],
            payload: encode_row(7),
            group: GLOBAL_GROUPID,
        };
        let outcome = engine.apply_batch(&mut tx, vec![insert]).unwrap();
        assert_eq!(outcome.applied, 1);
        assert!(!outcome.is_partial());

        let update = ReplicationIntent {
            op: ReplOp::Update,
            class_name: "widgets".to_string(),
            pk_key: 7i32.to_le_bytes().to_vec(),
            payload: encode_row(8),
            group: GLOBAL_GROUPID,
        };
        let outcome = engine.apply_batch(&mut tx, vec![update]).unwrap();
        assert_eq!(outcome.applied, 1);
    }

    #[test]
    fn unknown_classname_is_reported_as_a_failed_row_not_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = PageBuffer::new(dir.path(), crate::consts::PAGE_SIZE);
        let best_space = BestSpaceCache::new(crate::consts::BEST_SPACE_DEFAULT_CAP);
        let log = LogManager::new(false);
        let catalog = Catalog::new();
        let locks = LockManager::new();
        let classname_lock_mgr = LockManager::new();
        let classname = ClassnameDirectory::new(&classname_lock_mgr);
        let indexes = IndexRegistry::new();
        let hfid_for_class = |_: ClassOid| None;

        let engine = ReplicationEngine {
            buffer: &buffer,
            best_space: &best_space,
            log: &log,
            catalog: &catalog,
            classname: &classname,
            locks: &locks,
            indexes: &indexes,
            hfid_for_class: &hfid_for_class,
        };

        let mut tx = Transaction::new(vec![]);
        let insert = ReplicationIntent {
            op: ReplOp::Update,
            class_name: "ghost_table".to_string(),
            pk_key: vec![1],
            payload: vec![],
            group: GLOBAL_GROUPID,
        };
        let outcome = engine.apply_batch(&mut tx, vec![insert]).unwrap();
        assert!(outcome.is_partial());
        assert_eq!(outcome.failed[0].error_kind, "NotFound");
    }
}
