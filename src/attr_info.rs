//! Attribute-info facility: an accessor that decodes a class's wanted
//! attributes out of a raw record and re-encodes a fresh record from
//! whatever values the caller set, built on the explicit
//! fixed/variable/bound-bit wire format in `record::repr`.

use std::collections::HashMap;

use crate::catalog::{AttrDef, ClassRepresentation, ClassSchema, IndexDef};
use crate::error::StoreError;
use crate::ids::{Oid, ShardGroupId, GLOBAL_GROUPID};
use crate::record::repr::{parse, OffsetWidth, RecordBuilder, ReprWord};
use crate::types::StoreResult;

#[derive(Debug, Clone)]
pub struct DbValue {
    pub bytes: Vec<u8>,
    pub is_bound: bool,
}

impl DbValue {
    pub fn bound(bytes: Vec<u8>) -> Self {
        Self { bytes, is_bound: true }
    }
}

/// Typed accessor over one instance of a class's current representation.
/// `start` pins the representation to decode/encode against;
/// `read_dbvalues`/`transform_to_disk` move data in and out of the
/// on-disk wire format.
pub struct AttributeInfo {
    repr: ClassRepresentation,
    wanted: Vec<i32>,
    values: HashMap<i32, DbValue>,
    group: ShardGroupId,
}

impl AttributeInfo {
    /// `start(class-oid, attr-ids)`: the caller supplies the
    /// already-pinned representation (from [`crate::class_repr`]) rather
    /// than a class-oid, since this facility doesn't itself own the cache.
    pub fn start(repr: ClassRepresentation, attr_ids: &[i32]) -> Self {
        Self {
            repr,
            wanted: attr_ids.to_vec(),
            values: HashMap::new(),
            group: GLOBAL_GROUPID,
        }
    }

    pub fn group(&self) -> ShardGroupId {
        self.group
    }

    pub fn clear_dbvalues(&mut self) {
        self.values.clear();
    }

    pub fn get(&self, attr_id: i32) -> Option<&DbValue> {
        self.values.get(&attr_id)
    }

    pub fn set(&mut self, attr_id: i32, value: DbValue) {
        self.values.insert(attr_id, value);
    }

    /// `read_dbvalues(oid, record)`. `schema` carries every
    /// representation of the class so a record written under an older
    /// representation than `self.repr` still decodes correctly, falling
    /// back to the *current* representation's default for attributes that
    /// representation added.
    pub fn read_dbvalues(&mut self, schema: &ClassSchema, record: &[u8]) -> StoreResult<()> {
        self.values.clear();
        if record.len() < 4 {
            return Err(StoreError::resize(4));
        }
        let word = u32::from_le_bytes(record[0..4].try_into().unwrap());
        let written_repr_id = ReprWord::decode(word).repr_id;
        let written = schema.representation(written_repr_id).unwrap_or(&self.repr);

        let fixed_attrs: Vec<&AttrDef> = written.fixed_attrs().collect();
        let variable_attrs: Vec<&AttrDef> = written.variable_attrs().collect();
        let parsed = parse(record, variable_attrs.len(), written.fixed_area_len(), fixed_attrs.len())?;
        self.group = parsed.group;

        for attr_id in self.wanted.clone() {
            if let Some(pos) = fixed_attrs.iter().position(|a| a.id == attr_id) {
                let attr = fixed_attrs[pos];
                let offset: usize = fixed_attrs[..pos].iter().map(|a| a.fixed_len.unwrap()).sum();
                let len = attr.fixed_len.unwrap();
                let bytes = parsed.fixed_area[offset..offset + len].to_vec();
                let is_bound = parsed.bound_bits.as_ref().map_or(true, |bb| bb.get(pos).unwrap_or(false));
                self.values.insert(attr_id, DbValue { bytes, is_bound });
            } else if let Some(pos) = variable_attrs.iter().position(|a| a.id == attr_id) {
                let start = if pos == 0 { 0 } else { parsed.variable_offsets[pos - 1] };
                let end = parsed.variable_offsets[pos];
                let bytes = parsed.variable_area[start..end].to_vec();
                self.values.insert(attr_id, DbValue::bound(bytes));
            } else if let Some(current_attr) = self.repr.attr(attr_id) {
                // attribute was added by a later schema change than the one
                // this record was written under; fall back to its default.
                self.values.insert(attr_id, DbValue { bytes: current_attr.default.clone(), is_bound: false });
            } else {
                return Err(StoreError::invalid(format!("unknown attribute {}", attr_id)));
            }
        }
        Ok(())
    }

    pub fn get_disksize(&self) -> usize {
        self.transform_to_disk(self.group, None).map(|b| b.len()).unwrap_or(0)
    }

    /// `transform_to_disk(old-record, new-record-buffer, shard-group-id)`:
    /// encodes the accessor's current values under
    /// `self.repr` (always the class's current representation — a write
    /// never stamps a stale repr-id). Returns `StoreError::resize(n)` when
    /// `max_size` is too small, mirroring `DoesntFit`/`-expected_size`.
    pub fn transform_to_disk(&self, group: ShardGroupId, max_size: Option<usize>) -> StoreResult<Vec<u8>> {
        let n_fixed = self.repr.fixed_attrs().count();
        let mut builder = RecordBuilder::new(self.repr.repr_id, group, n_fixed);

        for (fixed_idx, attr) in self.repr.fixed_attrs().enumerate() {
            let (bytes, is_bound) = match self.values.get(&attr.id) {
                Some(v) => (v.bytes.clone(), v.is_bound),
                None => (attr.default.clone(), false),
            };
            builder.push_fixed(&bytes, attr.fixed_len.unwrap(), fixed_idx, is_bound);
        }
        for attr in self.repr.variable_attrs() {
            let bytes = self.values.get(&attr.id).map(|v| v.bytes.clone()).unwrap_or_else(|| attr.default.clone());
            builder.push_variable(bytes);
        }
        builder.build(max_size)
    }

    /// `get_key(index-ordinal, oid, record)`: decode the index's attribute
    /// list from `record` into a key. A primary-key index is keyed by the
    /// raw attribute bytes alone — its btree already maps that value to a
    /// single OID, so the key must match the packed primary-key value a
    /// replication sender transmits byte for byte, with nothing appended.
    /// Every other index stores duplicate values across rows, so each
    /// component gets a length prefix and the OID is appended as the
    /// rightmost component to keep entries distinct.
    pub fn get_key(schema: &ClassSchema, index: &IndexDef, oid: Oid, record: &[u8]) -> StoreResult<Vec<u8>> {
        let mut accessor = AttributeInfo::start(schema.current().clone(), &index.attr_ids);
        accessor.read_dbvalues(schema, record)?;

        let mut key = Vec::new();
        for attr_id in &index.attr_ids {
            let value = accessor
                .get(*attr_id)
                .ok_or_else(|| StoreError::invalid(format!("index attribute {} missing from record", attr_id)))?;
            if !index.is_primary_key {
                key.extend_from_slice(&(value.bytes.len() as u32).to_le_bytes());
            }
            key.extend_from_slice(&value.bytes);
        }
        if !index.is_primary_key {
            key.extend_from_slice(&oid.encode());
        }
        Ok(key)
    }
}

/// `OffsetWidth`/`OFFSET_SIZE_SHIFT` re-exported for callers building a key
/// directly rather than through `get_key`.
pub use crate::record::repr::OffsetWidth as KeyOffsetWidth;

/// Shard-group validation: a negative
/// serialized group means "from a migration sender, accept and convert to
/// positive"; a positive group must be owned by the transaction; a global
/// (non-shard) table's group must equal the global constant.
pub fn validate_shard_group(
    is_shard_table: bool,
    group: ShardGroupId,
    owns_group: impl Fn(ShardGroupId) -> bool,
) -> StoreResult<ShardGroupId> {
    if !is_shard_table {
        if group != GLOBAL_GROUPID {
            return Err(StoreError::invalid("global table record carries a non-global shard group"));
        }
        return Ok(group);
    }

    if group < 0 {
        return Ok(-group);
    }
    if group < 1 {
        return Err(StoreError::invalid("shard table record must carry a positive group >= 1"));
    }
    if !owns_group(group) {
        return Err(StoreError::invalid(format!("transaction does not own shard group {}", group)));
    }
    Ok(group)
}
