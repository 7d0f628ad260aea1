//! Force / flush engine. Applies a batched `copy-area` of intents to the
//! heap and to every affected index under one top-level system op per
//! batch: mutate the physical structure, then maintain every index off
//! the logical key, the same shape a single insert/delete fans out to,
//! widened to a whole batch rather than one call.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::attr_info::AttributeInfo;
use crate::best_space::BestSpaceCache;
use crate::btree_index::{Index, IndexKind};
use crate::catalog::{Catalog, ClassSchema};
use crate::classname::ClassnameDirectory;
use crate::error::StoreError;
use crate::heap::HeapFile;
use crate::ids::{Btid, ClassOid, Hfid, Oid, ShardGroupId};
use crate::lock::{LockManager, LockMode, Wait};
use crate::page::buffer::PageBuffer;
use crate::tx_log::{LogManager, ReplOpKind};
use crate::txn::{SystemOpOutcome, Transaction};
use crate::types::StoreResult;
use crate::utils::HandyRwLock;

/// Registry of live indexes keyed by BTID, generalized to hold more than
/// one index per process.
#[derive(Default)]
pub struct IndexRegistry {
    indexes: RwLock<HashMap<Btid, Index>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure(&self, btid: Btid, kind: IndexKind) {
        if self.indexes.rl().contains_key(&btid) {
            return;
        }
        self.indexes.wl().entry(btid).or_insert_with(|| Index::new(btid, kind));
    }

    pub fn with_index<R>(&self, btid: Btid, f: impl FnOnce(&Index) -> StoreResult<R>) -> StoreResult<R> {
        let indexes = self.indexes.rl();
        let index = indexes
            .get(&btid)
            .ok_or_else(|| StoreError::not_found(format!("no index registered for {}", btid)))?;
        f(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceOp {
    Insert,
    Update,
    Delete,
}

/// Carried by an `Intent` whose `class_oid` is the root class: a row written
/// to the root class describes a class's own schema, so applying it also
/// has to reconcile the classname directory and the in-memory catalog for
/// the class the row describes, not just the root class's own heap record.
#[derive(Debug, Clone)]
pub enum SchemaChange {
    /// CREATE or ALTER: install the schema under `name` and bring the
    /// catalog's entry for `schema.class_oid` up to date.
    Upsert { name: String, schema: ClassSchema },
    /// DROP: remove the name and the catalog entry for `class_oid`.
    Drop { name: String, class_oid: ClassOid },
}

/// One descriptor out of the `copy-area`: `oid` is `None` for a
/// fresh insert (or an `ASSIGN_ADDRESS` record), `Some` for
/// update/delete. `payload`/`group` stand in for the shared copy-area's
/// offset/length-addressed blob; the wire-framing that packs several
/// intents into one physical buffer is out of scope here, see DESIGN.md.
#[derive(Debug, Clone)]
pub struct Intent {
    pub op: ForceOp,
    pub hfid: Hfid,
    pub class_oid: ClassOid,
    pub oid: Option<Oid>,
    pub payload: Vec<u8>,
    pub group: ShardGroupId,
    pub is_shard_table: bool,
    /// Set when this `FLUSH_INSERT`'s record is `ASSIGN_ADDRESS`: reserve
    /// a fresh OID with no content rather than writing `payload`, and
    /// take an exclusive lock on it.
    pub reserve_only: bool,
    /// Set when `class_oid` is the root class: the schema-change side
    /// effects `apply_one` applies instead of user-index maintenance.
    pub schema_change: Option<SchemaChange>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ForceCounters {
    pub inserts: u32,
    pub updates: u32,
    pub deletes: u32,
}

pub struct ForceEngine<'a> {
    pub buffer: &'a PageBuffer,
    pub best_space: &'a BestSpaceCache,
    pub log: &'a LogManager,
    pub catalog: &'a Catalog,
    pub classname: &'a ClassnameDirectory<'a>,
    pub indexes: &'a IndexRegistry,
    /// Exclusive-locks a freshly reserved `ASSIGN_ADDRESS` OID.
    pub locks: &'a LockManager,
    /// Schema-change writes (the root class) skip user-index maintenance.
    pub root_class_oid: ClassOid,
}

impl<'a> ForceEngine<'a> {
    fn heap_for(&self, hfid: Hfid) -> HeapFile<'a> {
        HeapFile {
            hfid,
            buffer: self.buffer,
            best_space: self.best_space,
            log: self.log,
            page_size: self.buffer_page_size(),
        }
    }

    fn buffer_page_size(&self) -> usize {
        crate::consts::PAGE_SIZE
    }

    /// Apply the whole batch under one top-level system op.
    /// Aborts and returns the first error; on success every intent's
    /// counters are reflected and index maintenance has already run.
    pub fn apply_batch(&self, tx: &mut Transaction, intents: Vec<Intent>) -> StoreResult<ForceCounters> {
        self.log.start_system_op(tx);
        let mut counters = ForceCounters::default();

        for intent in &intents {
            if let Err(e) = self.apply_one(tx, intent, &mut counters) {
                log::error!("force batch aborting on intent for class {}: {}", intent.class_oid, e);
                self.log.end_system_op(tx, SystemOpOutcome::Abort);
                return Err(e);
            }
        }

        self.log.end_system_op(tx, SystemOpOutcome::Commit);
        Ok(counters)
    }

    fn apply_one(&self, tx: &mut Transaction, intent: &Intent, counters: &mut ForceCounters) -> StoreResult<()> {
        let heap = self.heap_for(intent.hfid);
        let is_schema_write = intent.class_oid == self.root_class_oid;

        match intent.op {
            ForceOp::Insert => {
                let oid = if intent.reserve_only {
                    // treat as a new OID and take an exclusive
                    // lock on it rather than writing payload/maintaining
                    // indexes yet (there's no content to index).
                    let oid = heap.insert_reserved(tx, intent.class_oid, intent.group, intent.is_shard_table)?;
                    self.locks.lock_object(oid, tx.id(), LockMode::Exclusive, Wait::Unconditional)?;
                    oid
                } else {
                    heap.insert(tx, &intent.payload, intent.class_oid, intent.group, intent.is_shard_table)?
                };
                counters.inserts += 1;
                if is_schema_write {
                    self.apply_schema_change(intent)?;
                } else if !intent.reserve_only {
                    self.maintain_indexes(tx, intent.class_oid, oid, None, Some(&intent.payload))?;
                }
            }
            ForceOp::Update => {
                let oid = intent.oid.ok_or_else(|| StoreError::invalid("update intent missing oid"))?;
                let old_bytes = heap.get(oid, None)?;
                heap.update(tx, oid, &intent.payload, intent.class_oid)?;
                counters.updates += 1;
                if is_schema_write {
                    self.apply_schema_change(intent)?;
                } else {
                    self.maintain_indexes(tx, intent.class_oid, oid, Some(&old_bytes), Some(&intent.payload))?;
                }
            }
            ForceOp::Delete => {
                let oid = intent.oid.ok_or_else(|| StoreError::invalid("delete intent missing oid"))?;
                let old_bytes = heap.get(oid, None)?;
                heap.delete(tx, oid)?;
                counters.deletes += 1;
                if is_schema_write {
                    self.apply_schema_change(intent)?;
                } else {
                    self.maintain_indexes(tx, intent.class_oid, oid, Some(&old_bytes), None)?;
                }
            }
        }
        Ok(())
    }

    /// A schema-change row carries no user indexes of its own to maintain;
    /// instead it has to reconcile the three places a class's identity and
    /// shape are cached outside its own heap record: the classname
    /// directory's persistent hash, the in-memory catalog entry, and any
    /// cached query plan for the class, which this invalidates by emitting
    /// a replication-log schema record rather than tracking plans directly.
    fn apply_schema_change(&self, intent: &Intent) -> StoreResult<()> {
        let change = match &intent.schema_change {
            Some(c) => c,
            None => return Ok(()),
        };

        match change {
            SchemaChange::Upsert { name, schema } => {
                self.classname.install_persistent(name, schema.class_oid);
                self.catalog.catalog_update(schema.clone());
                self.log.repl_log_insert_schema(schema.class_oid);
            }
            SchemaChange::Drop { name, class_oid } => {
                self.classname.remove_persistent(name);
                self.catalog.catalog_delete(*class_oid);
                self.log.repl_log_insert_schema(*class_oid);
            }
        }
        Ok(())
    }

    /// For each of the class's indexes, compute the old/new key and
    /// call the matching btree operation; a PK index additionally emits a
    /// replication log record when replication is enabled.
    fn maintain_indexes(
        &self,
        _tx: &mut Transaction,
        class_oid: ClassOid,
        oid: Oid,
        old_record: Option<&[u8]>,
        new_record: Option<&[u8]>,
    ) -> StoreResult<()> {
        let schema = self.catalog.catalog_get_class_info(class_oid)?;
        let repr = schema.current();

        for index in &repr.indexes {
            self.indexes.ensure(index.btid, if index.is_primary_key { IndexKind::Primary } else { IndexKind::Secondary });

            let old_key = old_record.map(|r| AttributeInfo::get_key(&schema, index, oid, r)).transpose()?;
            let new_key = new_record.map(|r| AttributeInfo::get_key(&schema, index, oid, r)).transpose()?;

            let repl_kind = match (&old_key, &new_key) {
                (None, Some(_)) => ReplOpKind::Insert,
                (Some(_), Some(_)) => ReplOpKind::Update,
                (Some(_), None) => ReplOpKind::Delete,
                (None, None) => unreachable!("maintain_indexes called with neither old nor new record"),
            };

            self.indexes.with_index(index.btid, |idx| match (&old_key, &new_key) {
                (None, Some(k)) => idx.btree_insert(k.clone(), oid),
                (Some(old), Some(new)) => idx.btree_update(old, new.clone(), oid),
                (Some(old), None) => idx.btree_delete(old),
                (None, None) => unreachable!(),
            })?;

            if index.is_primary_key && self.log.log_does_allow_replication() {
                // a primary-key index's key is already the bare packed value
                // get_key produces, nothing to strip.
                let pk_key = new_key.clone().or_else(|| old_key.clone()).unwrap();
                self.log.repl_log_insert(class_oid, pk_key, repl_kind);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{AttrDef, ClassRepresentation, ClassSchema, IndexDef};
    use crate::ids::{Oid, Vfid, Vpid, GLOBAL_GROUPID};
    use crate::txn::Transaction;

    fn setup() -> (tempfile::TempDir, PageBuffer, BestSpaceCache, LogManager, Catalog, IndexRegistry, LockManager) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = PageBuffer::new(dir.path(), crate::consts::PAGE_SIZE);
        let best_space = BestSpaceCache::new(crate::consts::BEST_SPACE_DEFAULT_CAP);
        let log = LogManager::new(true);
        let catalog = Catalog::new();
        let indexes = IndexRegistry::new();
        let locks = LockManager::new();
        (dir, buffer, best_space, log, catalog, indexes, locks)
    }

    fn one_attr_schema(class_oid: ClassOid, btid: Btid) -> ClassSchema {
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
    fn insert_intent_applies_and_maintains_pk_index() {
        let (_dir, buffer, best_space, log, catalog, indexes, locks) = setup();
        let mut tx = Transaction::new(vec![]);
        let class_oid = Oid::new(Vpid::new(1, 0), 0, GLOBAL_GROUPID);
        let btid = Btid::new(Vfid::new(1, 9), 0);
        catalog.catalog_insert(one_attr_schema(class_oid, btid));

        let classname = ClassnameDirectory::new(&locks);
        let engine = ForceEngine {
            buffer: &buffer,
            best_space: &best_space,
            log: &log,
            catalog: &catalog,
            classname: &classname,
            indexes: &indexes,
            locks: &locks,
            root_class_oid: Oid::NULL,
        };

        let hfid = HeapFile::create(&buffer, &log, &mut tx, Vfid::new(1, 1), class_oid).unwrap();
        let mut builder = crate::record::RecordBuilder::new(0, GLOBAL_GROUPID, 1);
        builder.push_fixed(&7i32.to_le_bytes(), 4, 0, true);
        let record = builder.build(None).unwrap();

        let intent = Intent {
            op: ForceOp::Insert,
            hfid,
            class_oid,
            oid: None,
            payload: record,
            group: GLOBAL_GROUPID,
            is_shard_table: false,
            reserve_only: false,
            schema_change: None,
        };
        let counters = engine.apply_batch(&mut tx, vec![intent]).unwrap();
        assert_eq!(counters.inserts, 1);
        assert_eq!(indexes.with_index(btid, |idx| Ok(idx.len())).unwrap(), 1);
    }

    #[test]
    fn reserve_only_insert_takes_an_exclusive_lock_and_skips_index_maintenance() {
        let (_dir, buffer, best_space, log, catalog, indexes, locks) = setup();
        let mut tx = Transaction::new(vec![]);
        let class_oid = Oid::new(Vpid::new(1, 0), 0, GLOBAL_GROUPID);
        let btid = Btid::new(Vfid::new(1, 9), 0);
        catalog.catalog_insert(one_attr_schema(class_oid, btid));

        let classname = ClassnameDirectory::new(&locks);
        let engine = ForceEngine {
            buffer: &buffer,
            best_space: &best_space,
            log: &log,
            catalog: &catalog,
            classname: &classname,
            indexes: &indexes,
            locks: &locks,
            root_class_oid: Oid::NULL,
        };

        let hfid = HeapFile::create(&buffer, &log, &mut tx, Vfid::new(1, 2), class_oid).unwrap();
        let intent = Intent {
            op: ForceOp::Insert,
            hfid,
            class_oid,
            oid: None,
            payload: Vec::new(),
            group: GLOBAL_GROUPID,
            is_shard_table: false,
            reserve_only: true,
            schema_change: None,
        };
        let counters = engine.apply_batch(&mut tx, vec![intent]).unwrap();
        assert_eq!(counters.inserts, 1);
        // no index maintenance ran: the reserved OID has no content yet, so
        // the index was never registered.
        assert!(indexes.with_index(btid, |idx| Ok(idx.len())).is_err());
    }

    #[test]
    fn schema_write_reconciles_classname_and_catalog_and_invalidates_plan_cache() {
        let (_dir, buffer, best_space, log, catalog, indexes, locks) = setup();
        let mut tx = Transaction::new(vec![]);
        let root_class_oid = Oid::new(Vpid::new(0, 0), 0, GLOBAL_GROUPID);
        let new_class_oid = Oid::new(Vpid::new(2, 0), 0, GLOBAL_GROUPID);
        let btid = Btid::new(Vfid::new(1, 9), 0);

        let classname = ClassnameDirectory::new(&locks);
        let engine = ForceEngine {
            buffer: &buffer,
            best_space: &best_space,
            log: &log,
            catalog: &catalog,
            classname: &classname,
            indexes: &indexes,
            locks: &locks,
            root_class_oid,
        };

        let hfid = HeapFile::create(&buffer, &log, &mut tx, Vfid::new(1, 3), root_class_oid).unwrap();
        let schema = one_attr_schema(new_class_oid, btid);
        let intent = Intent {
            op: ForceOp::Insert,
            hfid,
            class_oid: root_class_oid,
            oid: None,
            payload: Vec::new(),
            group: GLOBAL_GROUPID,
            is_shard_table: false,
            reserve_only: false,
            schema_change: Some(SchemaChange::Upsert { name: "widgets".to_string(), schema }),
        };
        engine.apply_batch(&mut tx, vec![intent]).unwrap();

        assert_eq!(classname.find("widgets", tx.id(), LockMode::Share).unwrap(), Some(new_class_oid));
        assert_eq!(catalog.catalog_get_class_info(new_class_oid).unwrap().class_oid, new_class_oid);

        let drop_hfid = HeapFile::create(&buffer, &log, &mut tx, Vfid::new(1, 4), root_class_oid).unwrap();
        let drop_intent = Intent {
            op: ForceOp::Delete,
            hfid: drop_hfid,
            class_oid: root_class_oid,
            oid: Some(
                heap_insert_for_delete_test(&buffer, &log, &best_space, &mut tx, drop_hfid, root_class_oid)
                    .unwrap(),
            ),
            payload: Vec::new(),
            group: GLOBAL_GROUPID,
            is_shard_table: false,
            reserve_only: false,
            schema_change: Some(SchemaChange::Drop { name: "widgets".to_string(), class_oid: new_class_oid }),
        };
        engine.apply_batch(&mut tx, vec![drop_intent]).unwrap();

        assert_eq!(classname.find("widgets", tx.id(), LockMode::Share).unwrap(), None);
        assert!(catalog.catalog_get_class_info(new_class_oid).is_err());
    }

    fn heap_insert_for_delete_test(
        buffer: &PageBuffer,
        log: &LogManager,
        best_space: &BestSpaceCache,
        tx: &mut Transaction,
        hfid: Hfid,
        class_oid: ClassOid,
    ) -> StoreResult<Oid> {
        let heap = HeapFile { hfid, buffer, best_space, log, page_size: crate::consts::PAGE_SIZE };
        heap.insert(tx, &[0u8; 8], class_oid, GLOBAL_GROUPID, false)
    }
}
