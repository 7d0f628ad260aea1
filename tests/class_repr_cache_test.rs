mod common;

use shardheap::attr_info::AttributeInfo;
use shardheap::catalog::{AttrDef, Catalog, ClassRepresentation, ClassSchema};
use shardheap::class_repr::ClassReprCache;
use shardheap::ids::{ClassOid, Oid, Vpid, GLOBAL_GROUPID, LATEST_REPR};
use shardheap::record::RecordBuilder;

fn class_oid(n: i32) -> ClassOid {
    Oid::new(Vpid::new(1, n), 0, GLOBAL_GROUPID)
}

fn one_attr_schema(oid: ClassOid) -> ClassSchema {
    ClassSchema {
        class_oid: oid,
        is_shard_table: false,
        current_repr_id: 0,
        representations: vec![ClassRepresentation {
            repr_id: 0,
            attrs: vec![AttrDef::fixed(1, 4, vec![0; 4])],
            indexes: vec![],
        }],
    }
}

#[test]
fn get_then_free_round_trips_the_decoded_schema() {
    let catalog = Catalog::new();
    let oid = class_oid(1);
    catalog.catalog_insert(one_attr_schema(oid));
    let cache = ClassReprCache::new(8, &catalog);

    let handle = cache.get(oid, LATEST_REPR).unwrap();
    assert_eq!(handle.schema.class_oid, oid);
    assert_eq!(handle.repr_id, 0);
    cache.free(handle);
    assert_eq!(cache.resident_count(), 1);
}

/// Spec §8 boundary behavior: "Class-rep cache full with all entries
/// pinned: `get` of a missing class returns the decoded representation
/// but does not cache it; callers free it via the same API."
#[test]
fn cache_full_with_every_entry_pinned_returns_uncached_decode() {
    let catalog = Catalog::new();
    let oid1 = class_oid(1);
    let oid2 = class_oid(2);
    let oid3 = class_oid(3);
    catalog.catalog_insert(one_attr_schema(oid1));
    catalog.catalog_insert(one_attr_schema(oid2));
    catalog.catalog_insert(one_attr_schema(oid3));

    let cache = ClassReprCache::new(2, &catalog);
    let h1 = cache.get(oid1, LATEST_REPR).unwrap();
    let h2 = cache.get(oid2, LATEST_REPR).unwrap();
    assert_eq!(cache.resident_count(), 2);

    // both slots are pinned (fix count > 0): a third class still decodes
    // successfully but must not evict a pinned entry to make room.
    let h3 = cache.get(oid3, LATEST_REPR).unwrap();
    assert_eq!(h3.schema.class_oid, oid3);
    assert_eq!(cache.resident_count(), 2);

    cache.free(h1);
    cache.free(h2);
    cache.free(h3);
}

/// `decache_and_lock` evicts an unpinned entry immediately and blocks
/// subsequent `get`s on that class-oid until `unlock_class` is called.
#[test]
fn decache_and_lock_then_unlock_allows_refetch() {
    let catalog = Catalog::new();
    let oid = class_oid(1);
    catalog.catalog_insert(one_attr_schema(oid));
    let cache = ClassReprCache::new(8, &catalog);

    let handle = cache.get(oid, LATEST_REPR).unwrap();
    cache.free(handle);
    assert_eq!(cache.resident_count(), 1);

    cache.decache_and_lock(oid);
    assert_eq!(cache.resident_count(), 0);

    cache.unlock_class(oid);
    let refetched = cache.get(oid, LATEST_REPR).unwrap();
    assert_eq!(refetched.schema.class_oid, oid);
    cache.free(refetched);
}

/// An attribute added by a later schema change than the one a stored
/// record was written under decodes from the *current* representation's
/// default rather than failing.
#[test]
fn stale_representation_falls_back_to_default() {
    let oid = class_oid(1);
    let old_repr = ClassRepresentation {
        repr_id: 0,
        attrs: vec![AttrDef::fixed(1, 4, vec![0; 4])],
        indexes: vec![],
    };
    let new_repr = ClassRepresentation {
        repr_id: 1,
        attrs: vec![
            AttrDef::fixed(1, 4, vec![0; 4]),
            AttrDef::fixed(2, 4, 99i32.to_le_bytes().to_vec()),
        ],
        indexes: vec![],
    };
    let schema = ClassSchema {
        class_oid: oid,
        is_shard_table: false,
        current_repr_id: 1,
        representations: vec![old_repr.clone(), new_repr.clone()],
    };

    // a record written back when repr 0 was current: only attribute 1 is
    // physically present.
    let mut builder = RecordBuilder::new(0, GLOBAL_GROUPID, 1);
    builder.push_fixed(&7i32.to_le_bytes(), 4, 0, true);
    let old_record = builder.build(None).unwrap();

    let mut accessor = AttributeInfo::start(new_repr, &[1, 2]);
    accessor.read_dbvalues(&schema, &old_record).unwrap();

    assert_eq!(accessor.get(1).unwrap().bytes, 7i32.to_le_bytes().to_vec());
    let fallback = accessor.get(2).unwrap();
    assert_eq!(fallback.bytes, 99i32.to_le_bytes().to_vec());
    assert!(!fallback.is_bound);
}
