//! The key layout.
//!
//! Every persisted datum lives under a prefix built from storage ids, all of
//! them written with the prefix-free order-preserving varint from
//! `stratadb-primitives`, so a scan bounded by a prefix returns exactly one
//! subspace:
//!
//! | key | contents |
//! |---|---|
//! | `objid` | object row: schema-id header + inline simple values |
//! | `field-id ∥ objid` | out-of-line value (counters) |
//! | `field-id ∥ objid ∥ sub-key` | set element / list slot / map entry |
//! | `index-id ∥ value ∥ objid [∥ extra]` | index entry |
//! | `0x00 ∥ 0x01 ∥ schema-id` | schema manifest |
//!
//! Storage id `0` is reserved for the meta subspace and never assigned to a
//! type, field or index.

use stratadb_encoding::prefix_successor;
use stratadb_primitives::{write_storage_id, FieldId, ObjId, SchemaId, TypeId};

/// Reserved storage id introducing the meta subspace.
pub const META_STORAGE_ID: u32 = 0;

const META_TAG_SCHEMA: u8 = 0x01;

/// A half-open key range; `None` means "to the end of the keyspace".
pub type KeyRange = (Vec<u8>, Option<Vec<u8>>);

fn storage_prefix(id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    write_storage_id(&mut out, id);
    out
}

/// The range covering every key that starts with `prefix`.
pub fn prefix_range(prefix: Vec<u8>) -> KeyRange {
    let to = prefix_successor(&prefix);
    (prefix, to)
}

/// The whole subspace of one storage id.
pub fn subspace_range(id: u32) -> KeyRange {
    prefix_range(storage_prefix(id))
}

/// Primary row key of an object: the object id itself.
pub fn object_key(id: ObjId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

/// The range holding every object row of `type_id`.
pub fn type_objects_range(type_id: TypeId) -> KeyRange {
    prefix_range(storage_prefix(type_id.0))
}

/// Out-of-line value key for `field` of `id` (used by counters).
pub fn field_key(field: FieldId, id: ObjId) -> Vec<u8> {
    let mut out = storage_prefix(field.0);
    out.extend_from_slice(id.as_bytes());
    out
}

/// Sub-entry key of a complex field: element / list slot / map key.
pub fn sub_key(field: FieldId, id: ObjId, suffix: &[u8]) -> Vec<u8> {
    let mut out = field_key(field, id);
    out.extend_from_slice(suffix);
    out
}

/// The range holding every sub-entry of `field` on `id`.
pub fn field_entries_range(field: FieldId, id: ObjId) -> KeyRange {
    prefix_range(field_key(field, id))
}

/// An index entry key: `index-id ∥ value ∥ objid ∥ extra`.
///
/// `extra` carries the map key or list position for the index flavors that
/// yield one; it is empty for plain field indexes.
pub fn index_entry_key(index: u32, value: &[u8], id: ObjId, extra: &[u8]) -> Vec<u8> {
    let mut out = storage_prefix(index);
    out.extend_from_slice(value);
    out.extend_from_slice(id.as_bytes());
    out.extend_from_slice(extra);
    out
}

/// The range of index entries under one encoded value.
pub fn index_value_range(index: u32, value: &[u8]) -> KeyRange {
    let mut prefix = storage_prefix(index);
    prefix.extend_from_slice(value);
    prefix_range(prefix)
}

/// The range of index entries whose encoded value lies in
/// `[from_value, to_value)`, either bound optional.
pub fn index_bounds_range(index: u32, from_value: Option<&[u8]>, to_value: Option<&[u8]>) -> KeyRange {
    let base = storage_prefix(index);
    let from = match from_value {
        Some(value) => {
            let mut key = base.clone();
            key.extend_from_slice(value);
            key
        }
        None => base.clone(),
    };
    let to = match to_value {
        Some(value) => {
            let mut key = base;
            key.extend_from_slice(value);
            Some(key)
        }
        None => prefix_successor(&base),
    };
    (from, to)
}

/// Key of a persisted schema manifest.
pub fn schema_key(schema_id: SchemaId) -> Vec<u8> {
    let mut out = storage_prefix(META_STORAGE_ID);
    out.push(META_TAG_SCHEMA);
    out.extend_from_slice(schema_id.as_bytes());
    out
}

/// The range holding every persisted schema manifest.
pub fn schema_range() -> KeyRange {
    let mut prefix = storage_prefix(META_STORAGE_ID);
    prefix.push(META_TAG_SCHEMA);
    prefix_range(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn subspaces_do_not_overlap() {
        // A one-byte id subspace must exclude keys of the next id.
        let (from, to) = subspace_range(7);
        assert_eq!(from, vec![7]);
        assert_eq!(to, Some(vec![8]));
        // Multi-byte ids stay inside their header.
        let (from, to) = subspace_range(0x1234);
        assert_eq!(from, vec![0xF9, 0x12, 0x34]);
        assert_eq!(to, Some(vec![0xF9, 0x12, 0x35]));
    }

    #[test]
    fn index_value_range_brackets_entries() {
        let id = ObjId::first_for_type(stratadb_primitives::TypeId(3));
        let key = index_entry_key(9, b"\x01abc\x00", id, b"");
        let (from, to) = index_value_range(9, b"\x01abc\x00");
        assert!(key >= from);
        assert!(key < to.unwrap());
    }

    #[test]
    fn meta_subspace_sorts_below_user_subspaces() {
        let schema = schema_key(SchemaId::from_bytes([0xAB; 32]));
        let (user, _) = subspace_range(1);
        assert!(schema < user);
    }
}
