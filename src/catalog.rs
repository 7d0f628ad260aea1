//! Class schema storage (`catalog_insert`/`catalog_update`/`catalog_delete`,
//! `catalog_get_class_info`). Grounded on the teacher's
//! `common::catalog::Catalog` (a name/type/index list per table) widened with
//! a representation-id history: an array indexed by representation-id, with
//! the last entry always the current representation.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StoreError;
use crate::ids::{Btid, ClassOid, ReprId};
use crate::types::StoreResult;
use crate::utils::HandyRwLock;

/// One attribute: its id, storage shape, and default value. `fixed_len`
/// distinguishes a fixed attribute (padded to this width in the wire
/// format) from a variable one (`None`).
#[derive(Debug, Clone)]
pub struct AttrDef {
    pub id: i32,
    pub fixed_len: Option<usize>,
    pub default: Vec<u8>,
}

impl AttrDef {
    pub fn fixed(id: i32, len: usize, default: Vec<u8>) -> Self {
        Self { id, fixed_len: Some(len), default }
    }

    pub fn variable(id: i32, default: Vec<u8>) -> Self {
        Self { id, fixed_len: None, default }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_len.is_some()
    }
}

/// An index attached to a class: the attribute ids it covers, in key order,
/// and whether it is the primary key — only PK updates emit a
/// replication record.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub btid: Btid,
    pub attr_ids: Vec<i32>,
    pub is_primary_key: bool,
}

/// A decoded schema for one representation-id.
#[derive(Debug, Clone)]
pub struct ClassRepresentation {
    pub repr_id: ReprId,
    pub attrs: Vec<AttrDef>,
    pub indexes: Vec<IndexDef>,
}

impl ClassRepresentation {
    pub fn fixed_attrs(&self) -> impl Iterator<Item = &AttrDef> {
        self.attrs.iter().filter(|a| a.is_fixed())
    }

    pub fn variable_attrs(&self) -> impl Iterator<Item = &AttrDef> {
        self.attrs.iter().filter(|a| !a.is_fixed())
    }

    pub fn fixed_area_len(&self) -> usize {
        self.fixed_attrs().map(|a| a.fixed_len.unwrap()).sum()
    }

    pub fn n_variable(&self) -> usize {
        self.variable_attrs().count()
    }

    pub fn attr(&self, id: i32) -> Option<&AttrDef> {
        self.attrs.iter().find(|a| a.id == id)
    }

    pub fn find_index(&self, btid: Btid) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.btid == btid)
    }
}

/// Full schema of a class: one or more representations (a class gains a new
/// one each time its DDL changes) plus which is current.
#[derive(Debug, Clone)]
pub struct ClassSchema {
    pub class_oid: ClassOid,
    pub is_shard_table: bool,
    pub representations: Vec<ClassRepresentation>,
    pub current_repr_id: ReprId,
}

impl ClassSchema {
    pub fn current(&self) -> &ClassRepresentation {
        self.representation(self.current_repr_id)
            .expect("current_repr_id must name an existing representation")
    }

    pub fn representation(&self, id: ReprId) -> Option<&ClassRepresentation> {
        self.representations.iter().find(|r| r.repr_id == id)
    }
}

/// In-memory class catalog keyed by class-OID. A
/// production deployment backs this by the root heap's system catalog
/// record; this crate's own force/
/// replication engines drive it directly through this API, matching how
/// `table_schema::schema` is consulted without re-deriving it from disk on
/// every access in the teacher.
#[derive(Default)]
pub struct Catalog {
    classes: RwLock<HashMap<ClassOid, ClassSchema>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog_insert(&self, schema: ClassSchema) {
        self.classes.wl().insert(schema.class_oid, schema);
    }

    pub fn catalog_update(&self, schema: ClassSchema) {
        self.classes.wl().insert(schema.class_oid, schema);
    }

    pub fn catalog_delete(&self, class_oid: ClassOid) {
        self.classes.wl().remove(&class_oid);
    }

    pub fn catalog_get_class_info(&self, class_oid: ClassOid) -> StoreResult<ClassSchema> {
        self.classes
            .rl()
            .get(&class_oid)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("no catalog entry for class {}", class_oid)))
    }
}
