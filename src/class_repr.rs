//! Class-representation cache: a bounded, pinned cache of decoded class
//! schemas keyed by class-oid. Grounded on
//! the teacher's `btree::buffer_pool` (bounded pool, pin-count-guards-
//! eviction) combined with `transaction::concurrent_status`'s lock-queue
//! shape, rendered here as one `Vec`-backed slab with
//! typed indices plus a `Condvar` per waiting bucket rather than raw
//! pointers or a thread-entry linked list.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::catalog::{Catalog, ClassSchema};
use crate::error::StoreError;
use crate::ids::{ClassOid, ReprId, LATEST_REPR};
use crate::types::StoreResult;

struct Slot {
    class_oid: ClassOid,
    schema: ClassSchema,
    fix_count: u32,
    force_decache: bool,
}

struct Inner {
    slots: Vec<Option<Slot>>,
    free_list: Vec<usize>,
    hash: HashMap<ClassOid, usize>,
    /// Front = least-recently-used (eviction candidate), back = MRU.
    lru: VecDeque<usize>,
}

/// A pinned handle returned by [`ClassReprCache::get`]; callers pass it
/// back to [`ClassReprCache::free`] when done.
pub struct ClassReprHandle {
    pub class_oid: ClassOid,
    pub schema: ClassSchema,
    pub repr_id: ReprId,
    cached: bool,
}

pub struct ClassReprCache<'a> {
    capacity: usize,
    catalog: &'a Catalog,
    inner: Mutex<Inner>,
    locked_buckets: Mutex<HashSet<ClassOid>>,
    bucket_condvar: Condvar,
}

impl<'a> ClassReprCache<'a> {
    pub fn new(capacity: usize, catalog: &'a Catalog) -> Self {
        Self {
            capacity,
            catalog,
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                free_list: Vec::new(),
                hash: HashMap::new(),
                lru: VecDeque::new(),
            }),
            locked_buckets: Mutex::new(HashSet::new()),
            bucket_condvar: Condvar::new(),
        }
    }

    fn wait_if_locked(&self, class_oid: ClassOid) {
        let mut locked = self.locked_buckets.lock().unwrap();
        while locked.contains(&class_oid) {
            let (guard, _) = self
                .bucket_condvar
                .wait_timeout(locked, Duration::from_millis(20))
                .unwrap();
            locked = guard;
        }
    }

    fn touch_lru(inner: &mut Inner, slot_idx: usize) {
        inner.lru.retain(|&i| i != slot_idx);
        inner.lru.push_back(slot_idx);
    }

    fn evict_one(inner: &mut Inner) -> Option<usize> {
        let candidate = inner
            .lru
            .iter()
            .copied()
            .find(|&i| inner.slots[i].as_ref().map_or(false, |s| s.fix_count == 0))?;
        inner.lru.retain(|&i| i != candidate);
        let slot = inner.slots[candidate].take().unwrap();
        inner.hash.remove(&slot.class_oid);
        Some(candidate)
    }

    /// `get(class-oid, repr-id|LATEST)`.
    pub fn get(&self, class_oid: ClassOid, repr_id: ReprId) -> StoreResult<ClassReprHandle> {
        self.wait_if_locked(class_oid);

        let mut inner = self.inner.lock().unwrap();
        if let Some(&slot_idx) = inner.hash.get(&class_oid) {
            let slot = inner.slots[slot_idx].as_mut().unwrap();
            slot.fix_count += 1;
            let schema = slot.schema.clone();
            Self::touch_lru(&mut inner, slot_idx);
            let resolved = if repr_id == LATEST_REPR { schema.current_repr_id } else { repr_id };
            return Ok(ClassReprHandle { class_oid, schema, repr_id: resolved, cached: true });
        }

        let schema = self.catalog.catalog_get_class_info(class_oid)?;
        let resolved = if repr_id == LATEST_REPR { schema.current_repr_id } else { repr_id };
        if schema.representation(resolved).is_none() {
            return Err(StoreError::invalid(format!("unknown representation id {} for class {}", resolved, class_oid)));
        }

        let slot_idx = if let Some(idx) = inner.free_list.pop() {
            Some(idx)
        } else if inner.slots.len() < self.capacity {
            inner.slots.push(None);
            Some(inner.slots.len() - 1)
        } else {
            Self::evict_one(&mut inner)
        };

        match slot_idx {
            Some(idx) => {
                inner.slots[idx] = Some(Slot {
                    class_oid,
                    schema: schema.clone(),
                    fix_count: 1,
                    force_decache: false,
                });
                inner.hash.insert(class_oid, idx);
                inner.lru.push_back(idx);
                Ok(ClassReprHandle { class_oid, schema, repr_id: resolved, cached: true })
            }
            None => {
                // Cache full with every entry pinned: decode but don't cache.
                log::warn!("class-rep cache full and every entry pinned, returning uncached decode for {}", class_oid);
                Ok(ClassReprHandle { class_oid, schema, repr_id: resolved, cached: false })
            }
        }
    }

    /// `free(entry)`.
    pub fn free(&self, handle: ClassReprHandle) {
        if !handle.cached {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let slot_idx = match inner.hash.get(&handle.class_oid).copied() {
            Some(idx) => idx,
            None => return, // already decached out from under us
        };
        let slot = inner.slots[slot_idx].as_mut().unwrap();
        slot.fix_count = slot.fix_count.saturating_sub(1);
        if slot.fix_count == 0 && slot.force_decache {
            inner.lru.retain(|&i| i != slot_idx);
            inner.hash.remove(&handle.class_oid);
            inner.slots[slot_idx] = None;
            inner.free_list.push(slot_idx);
        } else if slot.fix_count == 0 {
            Self::touch_lru(&mut inner, slot_idx);
        }
    }

    /// `decache_and_lock(class-oid)`: wait for the fix count to
    /// reach zero, evict, and install a class-modification lock that blocks
    /// newcomers until [`unlock_class`] is called.
    pub fn decache_and_lock(&self, class_oid: ClassOid) {
        loop {
            let mut inner = self.inner.lock().unwrap();
            match inner.hash.get(&class_oid).copied() {
                None => break,
                Some(slot_idx) => {
                    let fix_count = inner.slots[slot_idx].as_ref().unwrap().fix_count;
                    if fix_count == 0 {
                        inner.lru.retain(|&i| i != slot_idx);
                        inner.hash.remove(&class_oid);
                        inner.slots[slot_idx] = None;
                        inner.free_list.push(slot_idx);
                        break;
                    }
                    inner.slots[slot_idx].as_mut().unwrap().force_decache = true;
                    drop(inner);
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
        self.locked_buckets.lock().unwrap().insert(class_oid);
    }

    /// `unlock_class(class-oid)`: wake all waiters with a
    /// "retry" status so they re-scan the bucket.
    pub fn unlock_class(&self, class_oid: ClassOid) {
        self.locked_buckets.lock().unwrap().remove(&class_oid);
        self.bucket_condvar.notify_all();
    }

    /// Diagnostic: how many classes currently hold a cache slot — should
    /// stay in lockstep with the number of live slots, exactly one per
    /// class-oid.
    pub fn resident_count(&self) -> usize {
        self.inner.lock().unwrap().hash.len()
    }
}
