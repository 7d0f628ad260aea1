//! Classname directory mapping class names to their OIDs. Grounded on the
//! teacher's `common::catalog::Catalog` name->oid map, widened with a
//! transient DDL overlay so in-flight reserve/rename/delete operations are
//! visible to their own transaction before commit; the persistent side is
//! modeled as a single hash map rather than the real extendible hash file
//! format, since that on-disk structure is outside this subsystem's
//! heap/cache/force scope — see DESIGN.md.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::consts::CLASSNAME_EXIST_CACHE_CAP;
use crate::error::StoreError;
use crate::ids::ClassOid;
use crate::lock::{LockManager, LockMode, Wait};
use crate::txn::TransactionId;
use crate::types::StoreResult;
use crate::utils::HandyRwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Reserved,
    ReservedRename,
    Deleted,
    DeletedRename,
    Exist,
}

#[derive(Debug, Clone)]
struct TransientEntry {
    tran_index: TransactionId,
    action: Action,
    oid: ClassOid,
}

pub struct ClassnameDirectory<'a> {
    persistent: RwLock<HashMap<String, ClassOid>>,
    transient: Mutex<HashMap<String, TransientEntry>>,
    lock_mgr: &'a LockManager,
}

impl<'a> ClassnameDirectory<'a> {
    pub fn new(lock_mgr: &'a LockManager) -> Self {
        Self {
            persistent: RwLock::new(HashMap::new()),
            transient: Mutex::new(HashMap::new()),
            lock_mgr,
        }
    }

    fn exist_cache_len(transient: &HashMap<String, TransientEntry>) -> usize {
        transient.values().filter(|e| e.action == Action::Exist).count()
    }

    /// Evict arbitrary EXIST entries once the cache exceeds its cap: these
    /// are just a read-through cache of the persistent hash, so any of them
    /// may be decached without losing information.
    fn evict_exist_if_needed(transient: &mut HashMap<String, TransientEntry>) {
        while Self::exist_cache_len(transient) > CLASSNAME_EXIST_CACHE_CAP {
            let victim = transient
                .iter()
                .find(|(_, e)| e.action == Action::Exist)
                .map(|(name, _)| name.clone());
            match victim {
                Some(name) => {
                    transient.remove(&name);
                }
                None => break,
            }
        }
    }

    /// `reserve`: stage a `RESERVED` entry for a brand-new
    /// class name under `tx`, taking an exclusive lock on `oid`.
    pub fn reserve(&self, name: &str, oid: ClassOid, tx: TransactionId) -> StoreResult<()> {
        let mut transient = self.transient.lock().unwrap();
        if let Some(entry) = transient.get(name) {
            if entry.tran_index == tx {
                if matches!(entry.action, Action::Deleted | Action::Reserved) {
                    transient.insert(
                        name.to_string(),
                        TransientEntry { tran_index: tx, action: Action::Reserved, oid },
                    );
                    return Ok(());
                }
                return Err(StoreError::conflict(format!("{} cannot be reserved in its current state", name)));
            }
            return Err(StoreError::conflict(format!("{} reserved by another transaction", name)));
        }

        if self.persistent.rl().contains_key(name) {
            return Err(StoreError::conflict(format!("class {} already exists", name)));
        }

        transient.insert(name.to_string(), TransientEntry { tran_index: tx, action: Action::Reserved, oid });
        drop(transient);

        if let Err(e) = self.lock_mgr.lock_object(oid, tx, LockMode::Exclusive, Wait::ConditionalZero) {
            self.transient.lock().unwrap().remove(name);
            return Err(e);
        }
        Ok(())
    }

    /// `delete`: stage a `DELETED` entry for `name` under `tx`. Retries once
    /// after waiting on another transaction's lock, since a dirty read that
    /// finds the name owned elsewhere just means we need to wait our turn.
    pub fn delete(&self, name: &str, tx: TransactionId) -> StoreResult<()> {
        self.delete_inner(name, tx, true)
    }

    fn delete_inner(&self, name: &str, tx: TransactionId, allow_retry: bool) -> StoreResult<()> {
        let mut transient = self.transient.lock().unwrap();
        if let Some(entry) = transient.get(name).cloned() {
            if entry.tran_index != tx {
                let oid = entry.oid;
                drop(transient);
                if allow_retry {
                    self.lock_mgr.lock_object(oid, tx, LockMode::Exclusive, Wait::Unconditional)?;
                    self.lock_mgr.unlock_object(oid, tx);
                    return self.delete_inner(name, tx, false);
                }
                return Err(StoreError::conflict(format!("{} owned by another transaction", name)));
            }
            transient.insert(name.to_string(), TransientEntry { tran_index: tx, action: Action::Deleted, oid: entry.oid });
            return Ok(());
        }

        let oid = *self
            .persistent
            .rl()
            .get(name)
            .ok_or_else(|| StoreError::not_found(format!("class {} not found", name)))?;
        transient.insert(name.to_string(), TransientEntry { tran_index: tx, action: Action::Deleted, oid });
        Ok(())
    }

    /// `rename`: reserve(new) then delete(old), then flip both
    /// actions to the `*_RENAME` variants.
    pub fn rename(&self, old: &str, new: &str, oid: ClassOid, tx: TransactionId) -> StoreResult<()> {
        self.reserve(new, oid, tx)?;
        self.delete(old, tx)?;

        let mut transient = self.transient.lock().unwrap();
        if let Some(e) = transient.get_mut(new) {
            e.action = Action::ReservedRename;
        }
        if let Some(e) = transient.get_mut(old) {
            e.action = Action::DeletedRename;
        }
        Ok(())
    }

    /// `find`: resolves the transient overlay first, falling
    /// through to the persistent hash (and caching an `EXIST` entry),
    /// then acquires `mode` on the resolved class-OID.
    pub fn find(&self, name: &str, tx: TransactionId, mode: LockMode) -> StoreResult<Option<ClassOid>> {
        let resolved = {
            let mut transient = self.transient.lock().unwrap();
            match transient.get(name) {
                Some(e) => match e.action {
                    Action::Reserved | Action::ReservedRename | Action::Exist => Some(e.oid),
                    Action::Deleted | Action::DeletedRename => None,
                },
                None => match self.persistent.rl().get(name).copied() {
                    Some(oid) => {
                        transient.insert(name.to_string(), TransientEntry { tran_index: tx, action: Action::Exist, oid });
                        Self::evict_exist_if_needed(&mut transient);
                        Some(oid)
                    }
                    None => None,
                },
            }
        };

        if let Some(oid) = resolved {
            self.lock_mgr.lock_object(oid, tx, mode, Wait::Unconditional)?;
        }
        Ok(resolved)
    }

    /// Transaction end: commit persists and
    /// converts non-EXIST entries owned by `tx`; rollback simply drops them.
    pub fn on_transaction_end(&self, tx: TransactionId, commit: bool) {
        let mut transient = self.transient.lock().unwrap();
        let names: Vec<String> = transient
            .iter()
            .filter(|(_, e)| e.tran_index == tx && e.action != Action::Exist)
            .map(|(n, _)| n.clone())
            .collect();

        for name in names {
            let entry = transient.get(&name).cloned().unwrap();
            if !commit {
                transient.remove(&name);
                continue;
            }
            match entry.action {
                Action::Reserved | Action::ReservedRename => {
                    self.persistent.wl().insert(name.clone(), entry.oid);
                    transient.insert(name, TransientEntry { tran_index: tx, action: Action::Exist, oid: entry.oid });
                }
                Action::Deleted | Action::DeletedRename => {
                    self.persistent.wl().remove(&name);
                    transient.remove(&name);
                }
                Action::Exist => unreachable!("filtered out above"),
            }
        }
    }

    /// Invariant check for tests: a committed or rolled-back transaction
    /// must leave nothing of its own behind in the transient overlay.
    pub fn no_transient_entries_owned_by(&self, tx: TransactionId) -> bool {
        !self.transient.lock().unwrap().values().any(|e| e.tran_index == tx)
    }

    /// Install (or overwrite) a persistent name->oid mapping directly,
    /// bypassing the transient reserve/commit workflow. Used by the force
    /// engine when a schema-change row lands on the root class: by the time
    /// it reaches force-apply the DDL negotiation has already happened
    /// elsewhere, so the name is installed straight into the persistent hash.
    pub fn install_persistent(&self, name: &str, oid: ClassOid) {
        self.persistent.wl().insert(name.to_string(), oid);
    }

    /// Remove a persistent name->oid mapping directly, the drop-side
    /// counterpart to [`Self::install_persistent`].
    pub fn remove_persistent(&self, name: &str) {
        self.persistent.wl().remove(name);
    }
}
