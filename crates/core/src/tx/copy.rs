//! Copy cascades.
//!
//! Copy traverses named cascades: starting at the root, every referent
//! reachable through a field whose forward-cascade set intersects the
//! requested names is enqueued, as is every referrer whose field declares a
//! matching inverse cascade. Traversal stops at the caller's depth (zero
//! copies the root alone, negative is unbounded). Identity in the
//! destination follows the caller's id map; ids without an entry are kept.
//!
//! Copied rows are installed bytes-up, bypassing the reference-existence
//! check: inside a cascade the referent of an already-copied object may not
//! have arrived yet.

use super::index::{composite_tuple_bytes, encode_index_value};
use super::Transaction;
use crate::error::{ObjectError, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use stratadb_encoding::{read_value, FieldValue, ValueEncoding};
use stratadb_kv::keyspace;
use stratadb_primitives::ObjId;
use stratadb_schema::{ElementDecl, FieldKind, TypeSchema};

fn remap(id_map: &BTreeMap<ObjId, ObjId>, id: ObjId) -> ObjId {
    id_map.get(&id).copied().unwrap_or(id)
}

fn remap_value(id_map: &BTreeMap<ObjId, ObjId>, value: FieldValue) -> FieldValue {
    match value {
        FieldValue::Ref(id) => FieldValue::Ref(remap(id_map, id)),
        other => other,
    }
}

fn reencode(encoding: &ValueEncoding, value: &FieldValue) -> Result<Vec<u8>> {
    encode_index_value(encoding, value)
}

impl Transaction {
    /// Copies `root` and its cascade-reachable subgraph into `dest`.
    /// Returns the root's id in the destination.
    pub fn copy_to(
        &mut self,
        dest: &mut Transaction,
        root: ObjId,
        depth: i64,
        cascades: &[&str],
        id_map: &BTreeMap<ObjId, ObjId>,
    ) -> Result<ObjId> {
        if dest.schema.id() != self.schema.id() {
            return Err(ObjectError::DestinationSchema.into());
        }
        let cascade_set: BTreeSet<&str> = cascades.iter().copied().collect();
        let schema = Arc::clone(&self.schema);
        let mut queue: VecDeque<(ObjId, i64)> = VecDeque::from([(root, depth)]);
        let mut visited: BTreeSet<ObjId> = BTreeSet::new();

        while let Some((obj, remaining)) = queue.pop_front() {
            if !visited.insert(obj) {
                continue;
            }
            self.copy_object(dest, obj, id_map)?;
            if remaining == 0 {
                continue;
            }
            let next = if remaining < 0 { -1 } else { remaining - 1 };
            let Some(ty) = schema.get_type(obj.type_id()) else {
                continue;
            };
            for position in ty.ref_positions() {
                let follows = position
                    .spec
                    .forward_cascades
                    .iter()
                    .any(|name| cascade_set.contains(name.as_str()));
                if !follows {
                    continue;
                }
                for target in
                    self.raw_ref_values(obj, position.container, position.slot, position.place)?
                {
                    queue.push_back((target, next));
                }
            }
            // Inverse cascades: referrers found through the inverse index,
            // each admitted only if its own declaration names the cascade.
            let target_bytes =
                encode_index_value(&ValueEncoding::Reference, &FieldValue::Ref(obj))?;
            for (&slot, _) in schema.ref_slots() {
                for (referrer, _) in self.index_scan_value(slot.0, &target_bytes)? {
                    let Some(referrer_ty) = schema.get_type(referrer.type_id()) else {
                        continue;
                    };
                    let Some(position) = referrer_ty.ref_position(slot) else {
                        continue;
                    };
                    let follows = position
                        .spec
                        .inverse_cascades
                        .iter()
                        .any(|name| cascade_set.contains(name.as_str()));
                    if follows {
                        queue.push_back((referrer, next));
                    }
                }
            }
        }
        Ok(remap(id_map, root))
    }

    /// Emits one object into `dest` under its (possibly remapped) identity,
    /// overwriting whatever the destination held there.
    fn copy_object(
        &mut self,
        dest: &mut Transaction,
        obj: ObjId,
        id_map: &BTreeMap<ObjId, ObjId>,
    ) -> Result<()> {
        let row = self.ensure_current(obj)?;
        let schema = Arc::clone(&self.schema);
        let ty = schema.get_type(obj.type_id()).expect("migrated object");
        let dest_id = remap(id_map, obj);

        // Clear any previous incarnation in the destination.
        if dest.exists(dest_id)? {
            let old_row = dest.ensure_current(dest_id)?;
            dest.drop_inline_index_entries(ty, dest_id, &old_row.values)?;
            for field in ty.fields() {
                match &field.kind {
                    FieldKind::Counter => {
                        dest.kv.remove(&keyspace::field_key(field.id, dest_id))?;
                    }
                    FieldKind::Set(_) | FieldKind::List(_) | FieldKind::Map { .. } => {
                        dest.drop_collection(ty, field.id, dest_id)?;
                    }
                    _ => {}
                }
            }
        }

        let values: BTreeMap<_, _> = row
            .values
            .into_iter()
            .map(|(field_id, value)| (field_id, remap_value(id_map, value)))
            .collect();
        dest.write_row(ty, dest_id, &values)?;
        for field in ty.inline_fields().filter(|f| f.indexed) {
            let encoding = field.kind.inline_encoding().expect("inline field");
            let value = values.get(&field.id).cloned().unwrap_or(FieldValue::Null);
            let bytes = reencode(&encoding, &value)?;
            dest.index_put(field.id.0, &bytes, dest_id, &[])?;
        }
        for composite in ty.composites() {
            let tuple = composite_tuple_bytes(ty, composite, &values)?;
            dest.index_put(composite.id.0, &tuple, dest_id, &[])?;
        }

        self.copy_collections(dest, ty, obj, dest_id, id_map)?;
        dest.enqueue_validation(ty, dest_id);
        Ok(())
    }

    fn copy_collections(
        &mut self,
        dest: &mut Transaction,
        ty: &TypeSchema,
        obj: ObjId,
        dest_id: ObjId,
        id_map: &BTreeMap<ObjId, ObjId>,
    ) -> Result<()> {
        let decode = |encoding: &ValueEncoding, mut bytes: &[u8]| -> Result<FieldValue> {
            Ok(read_value(&mut bytes, encoding)?)
        };
        for field in ty.fields() {
            match &field.kind {
                FieldKind::Counter => {
                    if let Some(raw) = self.kv.get(&keyspace::field_key(field.id, obj))? {
                        dest.kv.put(keyspace::field_key(field.id, dest_id), raw)?;
                    }
                }
                FieldKind::Set(element) => {
                    let encoding = element.encoding();
                    for (sub, _) in self.collection_entries(field, obj)? {
                        let value = remap_value(id_map, decode(&encoding, &sub)?);
                        let sub = reencode(&encoding, &value)?;
                        dest.kv
                            .put(keyspace::sub_key(field.id, dest_id, &sub), Vec::new())?;
                        if element.indexed {
                            dest.index_put(element.id.0, &sub, dest_id, &[])?;
                        }
                    }
                }
                FieldKind::List(element) => {
                    let encoding = element.encoding();
                    for (sub, bytes) in self.collection_entries(field, obj)? {
                        let value = remap_value(id_map, decode(&encoding, &bytes)?);
                        let bytes = reencode(&encoding, &value)?;
                        dest.kv
                            .put(keyspace::sub_key(field.id, dest_id, &sub), bytes.clone())?;
                        if element.indexed {
                            dest.index_put(element.id.0, &bytes, dest_id, &sub)?;
                        }
                    }
                }
                FieldKind::Map { key, value } => {
                    let key_encoding = key.encoding();
                    let value_encoding = value.encoding();
                    for (sub, bytes) in self.collection_entries(field, obj)? {
                        let map_key = remap_value(id_map, decode(&key_encoding, &sub)?);
                        let map_value = remap_value(id_map, decode(&value_encoding, &bytes)?);
                        let sub = reencode(&key_encoding, &map_key)?;
                        let bytes = reencode(&value_encoding, &map_value)?;
                        copy_map_entry(dest, field.id, dest_id, key, value, &sub, &bytes)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn copy_map_entry(
    dest: &mut Transaction,
    field_id: stratadb_primitives::FieldId,
    dest_id: ObjId,
    key: &ElementDecl,
    value: &ElementDecl,
    sub: &[u8],
    bytes: &[u8],
) -> Result<()> {
    dest.kv
        .put(keyspace::sub_key(field_id, dest_id, sub), bytes.to_vec())?;
    if key.indexed {
        dest.index_put(key.id.0, sub, dest_id, &[])?;
    }
    if value.indexed {
        dest.index_put(value.id.0, bytes, dest_id, sub)?;
    }
    Ok(())
}
