//! Best-space cache: tracks recently-seen free space per page so insert can
//! place a new record without scanning the heap. Grounded on the teacher's
//! `btree::buffer_pool`'s dual-indexed bookkeeping style (a page keyed both
//! by its own id and by a coarser owning-file id) generalized to a
//! two-key `{vpid_ht, hfid_ht}` shape, with one process-wide
//! `Mutex` the way `ConcurrentStatus` guards its latch maps.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::consts::{
    BEST_SPACE_DROP_THRESHOLD_PCT, BEST_SPACE_MAX_CANDIDATES, BEST_SPACE_SYNC_MAX_PAGES,
    BEST_SPACE_SYNC_PCT, BEST_SPACE_UNFILL_MARGIN_PCT,
};
use crate::error::StoreError;
use crate::ids::{ClassOid, Hfid, Vpid};
use crate::types::StoreResult;
use crate::utils::HandyRwLock;

pub fn drop_threshold(page_size: usize) -> usize {
    (page_size as f64 * BEST_SPACE_DROP_THRESHOLD_PCT) as usize
}

pub fn unfill_margin(need_bytes: usize) -> usize {
    (need_bytes as f64 * BEST_SPACE_UNFILL_MARGIN_PCT).ceil() as usize
}

/// What the sync algorithm needs from the heap manager to walk a chain and
/// persist its resume cursor; implemented by
/// `heap::HeapFile` and injected here so this module stays independent of
/// the concrete on-disk heap layout.
pub trait HeapPageSource {
    /// Next non-header page after `cursor` (`None` starts from the first
    /// page after the header); `None` result means "wrapped to the start".
    fn next_chain_page(&self, hfid: Hfid, cursor: Option<Vpid>) -> StoreResult<Option<Vpid>>;
    fn free_space(&self, hfid: Hfid, vpid: Vpid) -> StoreResult<usize>;
    fn page_class_oid(&self, hfid: Hfid, vpid: Vpid) -> StoreResult<ClassOid>;
    fn persist_full_search_cursor(&self, hfid: Hfid, vpid: Option<Vpid>) -> StoreResult<()>;
    fn num_pages(&self, hfid: Hfid) -> StoreResult<usize>;
    fn page_size(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    hfid: Hfid,
    free: usize,
}

struct Tables {
    by_vpid: HashMap<Vpid, Entry>,
    /// Per-hfid insertion-ordered chain of vpids; the tail is the MRU entry,
    /// so `remove` always prefers the MRU of that hfid's chain.
    by_hfid: HashMap<Hfid, Vec<Vpid>>,
}

pub struct BestSpaceCache {
    cap: usize,
    tables: Mutex<Tables>,
    sync_list: Mutex<Vec<(Hfid, ClassOid)>>,
    stop_sync: Mutex<HashSet<Hfid>>,
}

impl BestSpaceCache {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            tables: Mutex::new(Tables {
                by_vpid: HashMap::new(),
                by_hfid: HashMap::new(),
            }),
            sync_list: Mutex::new(Vec::new()),
            stop_sync: Mutex::new(HashSet::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.lock().unwrap().by_vpid.len()
    }

    /// Invariant check for tests: the two indexes
    /// agree on total entry count.
    pub fn counts_agree(&self) -> bool {
        let t = self.tables.lock().unwrap();
        t.by_vpid.len() == t.by_hfid.values().map(|v| v.len()).sum::<usize>()
    }

    /// `add(hfid,vpid,free)`: upsert; soft-errors when the cap
    /// is reached and the entry is new.
    pub fn add(&self, hfid: Hfid, vpid: Vpid, free: usize) -> StoreResult<()> {
        let mut t = self.tables.lock().unwrap();
        if !t.by_vpid.contains_key(&vpid) && t.by_vpid.len() >= self.cap {
            log::warn!("bestspace cache maxed at {} entries, dropping add for {}", self.cap, vpid);
            return Err(StoreError::resource("bestspace maxed"));
        }
        t.by_vpid.insert(vpid, Entry { hfid, free });
        let chain = t.by_hfid.entry(hfid).or_default();
        chain.retain(|v| *v != vpid);
        chain.push(vpid);
        Ok(())
    }

    /// `update(page, hfid, prev-free)`: recompute the entry's
    /// free value; re-add/overwrite only if it grew or still clears the
    /// drop threshold, `current_free`/`page_size` supplied by the caller
    /// (the slotted page, not this module, owns free-space accounting).
    pub fn update(&self, hfid: Hfid, vpid: Vpid, current_free: usize, page_size: usize) -> StoreResult<()> {
        let prev = self.tables.lock().unwrap().by_vpid.get(&vpid).map(|e| e.free);
        let grew = prev.map_or(true, |p| current_free > p);
        if grew || current_free > drop_threshold(page_size) {
            return self.add(hfid, vpid, current_free);
        }
        Ok(())
    }

    /// `remove(hfid) -> {vpid, free}`: pop the MRU entry for
    /// this hfid.
    pub fn remove(&self, hfid: Hfid) -> Option<(Vpid, usize)> {
        let mut t = self.tables.lock().unwrap();
        let vpid = t.by_hfid.get_mut(&hfid)?.pop()?;
        if t.by_hfid.get(&hfid).map_or(false, |v| v.is_empty()) {
            t.by_hfid.remove(&hfid);
        }
        let entry = t.by_vpid.remove(&vpid)?;
        Some((vpid, entry.free))
    }

    pub fn del_entry_by_vpid(&self, vpid: Vpid) {
        let mut t = self.tables.lock().unwrap();
        if let Some(entry) = t.by_vpid.remove(&vpid) {
            if let Some(chain) = t.by_hfid.get_mut(&entry.hfid) {
                chain.retain(|v| *v != vpid);
                if chain.is_empty() {
                    t.by_hfid.remove(&entry.hfid);
                }
            }
        }
    }

    /// `del-all-by-hfid(hfid)`: drop all entries for a heap and
    /// raise its stop-sync flag so an in-flight `sync_all` bails out.
    pub fn del_all_by_hfid(&self, hfid: Hfid) {
        let mut t = self.tables.lock().unwrap();
        if let Some(vpids) = t.by_hfid.remove(&hfid) {
            for vpid in vpids {
                t.by_vpid.remove(&vpid);
            }
        }
        self.stop_sync.lock().unwrap().insert(hfid);
    }

    pub fn append_to_sync_list(&self, hfid: Hfid, class_oid: ClassOid) {
        self.sync_list.lock().unwrap().push((hfid, class_oid));
    }

    /// `sync-all`: drain and coalesce the sync worklist, then for each
    /// distinct hfid run the resumable scan.
    pub fn sync_all(&self, source: &dyn HeapPageSource, scan_all: bool) -> StoreResult<()> {
        let worklist: Vec<(Hfid, ClassOid)> = {
            let mut list = self.sync_list.lock().unwrap();
            let drained = list.drain(..).collect::<Vec<_>>();
            drained
        };
        let mut seen = HashSet::new();
        for (hfid, _class_oid) in worklist {
            if !seen.insert(hfid) {
                continue;
            }
            self.stop_sync.lock().unwrap().remove(&hfid);
            self.sync_one(source, hfid, scan_all)?;
        }
        Ok(())
    }

    fn sync_one(&self, source: &dyn HeapPageSource, hfid: Hfid, scan_all: bool) -> StoreResult<()> {
        let num_pages = source.num_pages(hfid)?;
        let bound = if scan_all {
            usize::MAX
        } else {
            ((num_pages as f64 * BEST_SPACE_SYNC_PCT) as usize).min(BEST_SPACE_SYNC_MAX_PAGES).max(1)
        };

        let mut cursor = None;
        let mut visited = 0;
        let page_size = source.page_size();
        loop {
            if !scan_all && visited >= bound {
                source.persist_full_search_cursor(hfid, cursor)?;
                return Ok(());
            }
            if self.stop_sync.lock().unwrap().contains(&hfid) {
                return Ok(());
            }
            let next = source.next_chain_page(hfid, cursor)?;
            let vpid = match next {
                Some(v) => v,
                None => {
                    if !scan_all {
                        source.persist_full_search_cursor(hfid, None)?;
                    }
                    return Ok(());
                }
            };
            let free = source.free_space(hfid, vpid)?;
            if free > drop_threshold(page_size) {
                self.update(hfid, vpid, free, page_size).ok();
            }
            cursor = Some(vpid);
            visited += 1;
        }
    }

    /// Placement algorithm for insert: pop up to 100 candidates,
    /// invoke `try_page` (the caller's zero-wait fix + free-space/class-oid
    /// check, returning `(refreshed_free, qualifies)`) for each; reinsert
    /// ones that don't qualify with their refreshed free value, returning
    /// the first that does.
    pub fn find_page_for_insert(
        &self,
        hfid: Hfid,
        need_bytes: usize,
        mut try_page: impl FnMut(Vpid) -> StoreResult<Option<(usize, bool)>>,
    ) -> StoreResult<Option<Vpid>> {
        let margin = unfill_margin(need_bytes);
        for _ in 0..BEST_SPACE_MAX_CANDIDATES {
            let (vpid, _old_free) = match self.remove(hfid) {
                Some(v) => v,
                None => return Ok(None),
            };
            match try_page(vpid)? {
                Some((refreshed_free, true)) if refreshed_free >= need_bytes + margin => {
                    return Ok(Some(vpid));
                }
                Some((refreshed_free, _)) => {
                    self.add(hfid, vpid, refreshed_free).ok();
                }
                None => {
                    // page was contended (zero-wait latch failed); drop it,
                    // a later sync will rediscover it.
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{Vfid, Vpid};

    fn hfid(n: i32) -> Hfid {
        Hfid::new(Vfid::new(1, n), 0)
    }

    #[test]
    fn add_then_remove_round_trips() {
        let cache = BestSpaceCache::new(10);
        let h = hfid(1);
        cache.add(h, Vpid::new(1, 1), 500).unwrap();
        cache.add(h, Vpid::new(1, 2), 800).unwrap();
        assert!(cache.counts_agree());

        let (vpid, free) = cache.remove(h).unwrap();
        assert_eq!(vpid, Vpid::new(1, 2)); // MRU
        assert_eq!(free, 800);
        assert!(cache.counts_agree());
    }

    #[test]
    fn cap_reached_is_a_soft_error() {
        let cache = BestSpaceCache::new(1);
        let h = hfid(1);
        cache.add(h, Vpid::new(1, 1), 100).unwrap();
        let err = cache.add(h, Vpid::new(1, 2), 100).unwrap_err();
        assert!(err.is_soft());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_on_empty_bucket_returns_none() {
        let cache = BestSpaceCache::new(10);
        assert!(cache.remove(hfid(9)).is_none());
    }

    #[test]
    fn del_all_by_hfid_clears_entries_and_raises_stop_flag() {
        let cache = BestSpaceCache::new(10);
        let h = hfid(1);
        cache.add(h, Vpid::new(1, 1), 500).unwrap();
        cache.del_all_by_hfid(h);
        assert_eq!(cache.len(), 0);
        assert!(cache.stop_sync.lock().unwrap().contains(&h));
    }
}
