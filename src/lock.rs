//! Object lock manager.
//! Grounded on the teacher's `transaction::concurrent_status::ConcurrentStatus`
//! (per-page `s_latch_map`/`x_latch_map` plus a wait-for graph), narrowed to
//! the two operations this subsystem actually calls: locking a class-OID
//! (DDL/class-rep/instance locks) and locking a shard key (replica apply).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::ids::{ClassOid, ShardGroupId};
use crate::txn::TransactionId;
use crate::types::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Lock-acquire wait policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Unconditional,
    /// Try once, fail immediately rather than blocking.
    ConditionalZero,
}

/// A lockable shard key: `(group, key bytes, class, is_shard, for_update)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardKeyLock {
    pub group: ShardGroupId,
    pub key: Vec<u8>,
    pub class_oid: ClassOid,
    pub is_shard: bool,
    pub for_update: bool,
}

#[derive(Default)]
struct LockTable<K: Eq + std::hash::Hash + Clone> {
    shared: HashMap<K, HashSet<TransactionId>>,
    exclusive: HashMap<K, TransactionId>,
}

impl<K: Eq + std::hash::Hash + Clone> LockTable<K> {
    fn try_acquire(&mut self, key: &K, tx: TransactionId, mode: LockMode) -> bool {
        if let Some(holder) = self.exclusive.get(key) {
            if *holder != tx {
                return false;
            }
        }
        match mode {
            LockMode::Shared => {
                if self.exclusive.get(key).map_or(true, |h| *h == tx) {
                    self.shared.entry(key.clone()).or_default().insert(tx);
                    true
                } else {
                    false
                }
            }
            LockMode::Exclusive => {
                if let Some(holders) = self.shared.get(key) {
                    if holders.iter().any(|h| *h != tx) {
                        return false;
                    }
                }
                self.exclusive.insert(key.clone(), tx);
                true
            }
        }
    }

    fn release(&mut self, key: &K, tx: TransactionId) {
        if let Some(holders) = self.shared.get_mut(key) {
            holders.remove(&tx);
            if holders.is_empty() {
                self.shared.remove(key);
            }
        }
        if self.exclusive.get(key) == Some(&tx) {
            self.exclusive.remove(key);
        }
    }
}

/// In-memory lock manager covering class-OID object locks and shard-key
/// locks. One global instance per process, matching `ConcurrentStatus`'s own
/// singleton shape in the teacher.
#[derive(Default)]
pub struct LockManager {
    objects: Mutex<LockTable<ClassOid>>,
    shard_keys: Mutex<LockTable<ShardKeyLock>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `lock_object(lock, mode, cond|uncond)`. Unconditional spins
    /// briefly; this crate has no external wakeup channel for a lock
    /// release, so unconditional is a short bounded retry rather than an
    /// indefinite block, which is sufficient for the single-process,
    /// short-held locks this subsystem takes (class-oid reservation,
    /// schema-change lock, shard-key lock during replica apply).
    pub fn lock_object(&self, oid: ClassOid, tx: TransactionId, mode: LockMode, wait: Wait) -> StoreResult<()> {
        let mut table = self.objects.lock().unwrap();
        if table.try_acquire(&oid, tx, mode) {
            return Ok(());
        }
        if wait == Wait::ConditionalZero {
            return Err(StoreError::conflict(format!("lock on {} could not be granted", oid)));
        }
        drop(table);
        for _ in 0..200 {
            std::thread::sleep(std::time::Duration::from_millis(5));
            let mut table = self.objects.lock().unwrap();
            if table.try_acquire(&oid, tx, mode) {
                return Ok(());
            }
        }
        Err(StoreError::conflict(format!("lock on {} timed out", oid)))
    }

    pub fn unlock_object(&self, oid: ClassOid, tx: TransactionId) {
        self.objects.lock().unwrap().release(&oid, tx);
    }

    pub fn lock_shard_key(&self, key: ShardKeyLock, tx: TransactionId, wait: Wait) -> StoreResult<()> {
        let mode = if key.for_update { LockMode::Exclusive } else { LockMode::Shared };
        let mut table = self.shard_keys.lock().unwrap();
        if table.try_acquire(&key, tx, mode) {
            return Ok(());
        }
        if wait == Wait::ConditionalZero {
            return Err(StoreError::conflict("shard-key lock could not be granted"));
        }
        drop(table);
        for _ in 0..200 {
            std::thread::sleep(std::time::Duration::from_millis(5));
            let mut table = self.shard_keys.lock().unwrap();
            if table.try_acquire(&key, tx, mode) {
                return Ok(());
            }
        }
        Err(StoreError::conflict("shard-key lock timed out"))
    }

    pub fn unlock_shard_key(&self, key: &ShardKeyLock, tx: TransactionId) {
        self.shard_keys.lock().unwrap().release(key, tx);
    }
}
