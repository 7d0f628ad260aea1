//! Minimal ordered-key index: `btree_find_unique`/
//! `btree_insert`/`btree_delete`/`btree_update`/`btree_get_pkey_btid`.
//! Grounded on the
//! teacher's `btree::table` insert/delete path, adapted from a full on-disk
//! B+tree to a generic in-memory ordered map — the physical B+tree itself is
//! out of this subsystem's scope; what the heap manager and force
//! engine need from it is just "insert/delete/update a key -> oid mapping
//! and look one up", which `BTreeMap<Vec<u8>, Oid>` gives faithfully.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::StoreError;
use crate::ids::{Btid, Oid};
use crate::types::StoreResult;
use crate::utils::HandyRwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Primary,
    Secondary,
}

pub struct Index {
    pub btid: Btid,
    pub kind: IndexKind,
    entries: RwLock<BTreeMap<Vec<u8>, Oid>>,
}

impl Index {
    pub fn new(btid: Btid, kind: IndexKind) -> Self {
        Self {
            btid,
            kind,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.kind == IndexKind::Primary
    }

    pub fn btree_insert(&self, key: Vec<u8>, oid: Oid) -> StoreResult<()> {
        let mut entries = self.entries.wl();
        if self.kind == IndexKind::Primary && entries.contains_key(&key) {
            return Err(StoreError::conflict("duplicate primary key"));
        }
        entries.insert(key, oid);
        Ok(())
    }

    pub fn btree_delete(&self, key: &[u8]) -> StoreResult<()> {
        self.entries
            .wl()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("key not present in index"))
    }

    pub fn btree_update(&self, old_key: &[u8], new_key: Vec<u8>, oid: Oid) -> StoreResult<()> {
        let mut entries = self.entries.wl();
        entries.remove(old_key);
        entries.insert(new_key, oid);
        Ok(())
    }

    pub fn btree_find_unique(&self, key: &[u8]) -> StoreResult<Oid> {
        self.entries
            .rl()
            .get(key)
            .copied()
            .ok_or_else(|| StoreError::not_found("primary key not found"))
    }

    pub fn len(&self) -> usize {
        self.entries.rl().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `btree_get_pkey_btid`: the primary-key index among a class's
/// index list.
pub fn pkey_btid(indexes: &[crate::catalog::IndexDef]) -> Option<Btid> {
    indexes.iter().find(|i| i.is_primary_key).map(|i| i.btid)
}
