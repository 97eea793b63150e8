//! Per-object lazy schema migration.
//!
//! An object row records the schema id its encoding conforms to. Whenever a
//! field operation touches an object stored under an older version, the row
//! is rewritten under the current schema first: shared fields are carried
//! over (converting where the encoding changed, per the field's upgrade
//! policy), removed fields are dropped together with their index entries,
//! added fields start at their defaults. Indexed slots are shape-pinned
//! across versions by the registry, so migration never rewrites index
//! subspaces except to drop removed fields and seed added ones.

use super::index::{composite_tuple_bytes, encode_index_value};
use super::Transaction;
use crate::error::{MigrateError, ObjectError, Result};
use crate::event::{OldValues, SchemaChangeEvent};
use crate::row::ObjRow;
use std::collections::BTreeMap;
use std::sync::Arc;
use stratadb_encoding::{default_value, EnumModel, FieldValue, ValueEncoding};
use stratadb_kv::keyspace;
use stratadb_primitives::{FieldId, ObjId};
use stratadb_schema::{FieldKind, TypeSchema, UpgradePolicy};

impl Transaction {
    /// Loads an object's row, migrating it to the current schema first when
    /// its stored version differs.
    pub(crate) fn ensure_current(&mut self, id: ObjId) -> Result<ObjRow> {
        let (stored, row) = self
            .load_stored_row(id)?
            .ok_or(ObjectError::Deleted(id))?;
        if row.schema_id == self.schema.id() {
            return Ok(row);
        }
        self.migrate_row(id, &stored, row)
    }

    /// Explicitly migrates one object; a no-op when it is already current.
    pub fn migrate(&mut self, id: ObjId) -> Result<()> {
        self.ensure_current(id).map(|_| ())
    }

    fn migrate_row(
        &mut self,
        id: ObjId,
        stored: &Arc<stratadb_schema::Schema>,
        row: ObjRow,
    ) -> Result<ObjRow> {
        let schema = Arc::clone(&self.schema);
        let current_ty = schema
            .get_type(id.type_id())
            .ok_or(MigrateError::TypeNotInSchema(id.type_id()))?;
        let stored_ty = stored
            .get_type(id.type_id())
            .ok_or(ObjectError::BadRow(id))?;
        log::debug!(
            "migrating {} from schema {} to {}",
            id,
            row.schema_id.to_abbreviated_hex(),
            schema.id().to_abbreviated_hex()
        );

        let mut old_values = OldValues::default();
        for field in stored_ty.inline_fields() {
            let encoding = field.kind.inline_encoding().expect("inline field");
            let value = row
                .values
                .get(&field.id)
                .cloned()
                .unwrap_or_else(|| default_value(&encoding));
            old_values.insert(&field.name, field.id, value);
        }

        // The per-field plan: shared fields convert, added fields default.
        let mut new_values: BTreeMap<FieldId, FieldValue> = BTreeMap::new();
        for field in current_ty.inline_fields() {
            let new_encoding = field.kind.inline_encoding().expect("inline field");
            let old_encoding = stored_ty
                .field(field.id)
                .and_then(|f| f.kind.inline_encoding());
            let value = match old_encoding {
                Some(old_encoding) => {
                    let old = row
                        .values
                        .get(&field.id)
                        .cloned()
                        .unwrap_or_else(|| default_value(&old_encoding));
                    if old_encoding == new_encoding {
                        old
                    } else {
                        match field.upgrade {
                            UpgradePolicy::Reset => default_value(&new_encoding),
                            UpgradePolicy::Attempt => {
                                convert_value(&old, &old_encoding, &new_encoding)
                                    .unwrap_or_else(|| default_value(&new_encoding))
                            }
                            UpgradePolicy::Require => {
                                convert_value(&old, &old_encoding, &new_encoding).ok_or(
                                    MigrateError::UpgradeConversion {
                                        field: field.name.clone(),
                                        from: old_encoding.kind_name(),
                                        to: new_encoding.kind_name(),
                                    },
                                )?
                            }
                        }
                    }
                }
                None => default_value(&new_encoding),
            };
            new_values.insert(field.id, value);
        }

        // Move the index state: drop the stored row's entries, seed the new
        // row's. Unchanged slots are deleted and re-inserted under the same
        // key, which nets out to presence.
        self.drop_inline_index_entries(stored_ty, id, &row.values)?;
        self.drop_removed_out_of_line(stored_ty, current_ty, id)?;
        for field in current_ty.inline_fields().filter(|f| f.indexed) {
            let encoding = field.kind.inline_encoding().expect("inline field");
            let value = new_values.get(&field.id).cloned().unwrap_or(FieldValue::Null);
            let bytes = encode_index_value(&encoding, &value)?;
            self.index_put(field.id.0, &bytes, id, &[])?;
        }
        for composite in current_ty.composites() {
            let tuple = composite_tuple_bytes(current_ty, composite, &new_values)?;
            self.index_put(composite.id.0, &tuple, id, &[])?;
        }

        self.write_row(current_ty, id, &new_values)?;

        let event = SchemaChangeEvent {
            id,
            from: row.schema_id,
            to: schema.id(),
            old_values,
        };
        let callbacks: Vec<_> = self
            .schema_change_callbacks
            .iter()
            .filter(|(filter, _)| filter.is_none() || *filter == Some(id.type_id()))
            .map(|(_, cb)| std::rc::Rc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(&event);
        }

        Ok(ObjRow {
            schema_id: schema.id(),
            values: new_values,
        })
    }

    pub(crate) fn drop_inline_index_entries(
        &mut self,
        ty: &TypeSchema,
        id: ObjId,
        values: &BTreeMap<FieldId, FieldValue>,
    ) -> Result<()> {
        for field in ty.inline_fields().filter(|f| f.indexed) {
            let encoding = field.kind.inline_encoding().expect("inline field");
            let value = values
                .get(&field.id)
                .cloned()
                .unwrap_or_else(|| default_value(&encoding));
            let bytes = encode_index_value(&encoding, &value)?;
            self.index_del(field.id.0, &bytes, id, &[])?;
        }
        for composite in ty.composites() {
            let tuple = composite_tuple_bytes(ty, composite, values)?;
            self.index_del(composite.id.0, &tuple, id, &[])?;
        }
        Ok(())
    }

    /// Drops counters and collections that the current schema no longer
    /// declares for this type.
    fn drop_removed_out_of_line(
        &mut self,
        stored_ty: &TypeSchema,
        current_ty: &TypeSchema,
        id: ObjId,
    ) -> Result<()> {
        for field in stored_ty.fields() {
            let kept = current_ty
                .field(field.id)
                .is_some_and(|f| f.kind.kind_name() == field.kind.kind_name());
            if kept {
                continue;
            }
            match &field.kind {
                FieldKind::Counter => {
                    self.kv.remove(&keyspace::field_key(field.id, id))?;
                }
                FieldKind::Set(_) | FieldKind::List(_) | FieldKind::Map { .. } => {
                    self.drop_collection(stored_ty, field.id, id)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn drop_collection(
        &mut self,
        ty: &TypeSchema,
        field_id: FieldId,
        id: ObjId,
    ) -> Result<()> {
        let field = ty.field(field_id).expect("caller resolved the field");
        let entries = self.collection_entries(field, id)?;
        match &field.kind {
            FieldKind::Set(element) => {
                for (sub, _) in &entries {
                    if element.indexed {
                        self.index_del(element.id.0, sub, id, &[])?;
                    }
                }
            }
            FieldKind::List(element) => {
                for (sub, bytes) in &entries {
                    if element.indexed {
                        self.index_del(element.id.0, bytes, id, sub)?;
                    }
                }
            }
            FieldKind::Map { key, value } => {
                for (sub, bytes) in &entries {
                    if key.indexed {
                        self.index_del(key.id.0, sub, id, &[])?;
                    }
                    if value.indexed {
                        self.index_del(value.id.0, bytes, id, sub)?;
                    }
                }
            }
            _ => unreachable!("drop_collection on a non-complex field"),
        }
        let (from, to) = keyspace::field_entries_range(field.id, id);
        self.kv.remove_range(&from, to.as_deref())?;
        Ok(())
    }
}

/// The defined conversions of the `ATTEMPT`/`REQUIRE` upgrade policies:
/// lossless numeric casts, to-string, enum-by-name, and deep element-wise
/// array mapping. Returns `None` when no exact conversion exists.
pub(crate) fn convert_value(
    old: &FieldValue,
    from: &ValueEncoding,
    to: &ValueEncoding,
) -> Option<FieldValue> {
    if from == to {
        return Some(old.clone());
    }
    if old.is_null() {
        return to.is_nullable().then_some(FieldValue::Null);
    }
    match (old, to) {
        // Lossless integer-to-integer.
        (_, _) if to.is_integer() => {
            let wide = as_i128(old)?;
            make_int(wide, to)
        }
        // Number to float, when exactly representable.
        (_, ValueEncoding::F64) => {
            if let Some(wide) = as_i128(old) {
                let f = wide as f64;
                (f as i128 == wide).then(|| FieldValue::F64(f.into()))
            } else if let FieldValue::F32(x) = old {
                Some(FieldValue::F64((x.into_inner() as f64).into()))
            } else {
                None
            }
        }
        (_, ValueEncoding::F32) => {
            if let Some(wide) = as_i128(old) {
                let f = wide as f32;
                (f as i128 == wide).then(|| FieldValue::F32(f.into()))
            } else if let FieldValue::F64(x) = old {
                let narrow = x.into_inner() as f32;
                (narrow as f64).to_bits().eq(&x.into_inner().to_bits())
                    .then(|| FieldValue::F32(narrow.into()))
            } else {
                None
            }
        }
        // To-string.
        (_, ValueEncoding::String) => Some(FieldValue::String(match old {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::I8(x) => x.to_string(),
            FieldValue::U8(x) => x.to_string(),
            FieldValue::I16(x) => x.to_string(),
            FieldValue::U16(x) => x.to_string(),
            FieldValue::I32(x) => x.to_string(),
            FieldValue::U32(x) => x.to_string(),
            FieldValue::I64(x) => x.to_string(),
            FieldValue::U64(x) => x.to_string(),
            FieldValue::F32(x) => x.to_string(),
            FieldValue::F64(x) => x.to_string(),
            FieldValue::Enum(lit) => lit.name.clone(),
            _ => return None,
        })),
        // Enum-by-name into a different identifier list.
        (FieldValue::Enum(lit), ValueEncoding::Enum(model)) => {
            enum_by_name(&lit.name, model)
        }
        // Deep element-wise array mapping.
        (FieldValue::Array(items), ValueEncoding::Array(to_elem)) => {
            let ValueEncoding::Array(from_elem) = from else {
                return None;
            };
            items
                .iter()
                .map(|item| convert_value(item, from_elem, to_elem))
                .collect::<Option<Vec<_>>>()
                .map(FieldValue::Array)
        }
        _ => None,
    }
}

fn enum_by_name(name: &str, model: &EnumModel) -> Option<FieldValue> {
    model.find_by_name(name).map(FieldValue::Enum)
}

fn as_i128(value: &FieldValue) -> Option<i128> {
    Some(match value {
        FieldValue::I8(x) => *x as i128,
        FieldValue::U8(x) => *x as i128,
        FieldValue::I16(x) => *x as i128,
        FieldValue::U16(x) => *x as i128,
        FieldValue::I32(x) => *x as i128,
        FieldValue::U32(x) => *x as i128,
        FieldValue::I64(x) => *x as i128,
        FieldValue::U64(x) => *x as i128,
        FieldValue::F32(x) => {
            let f = x.into_inner();
            if f.fract() != 0.0 || !f.is_finite() {
                return None;
            }
            f as i128
        }
        FieldValue::F64(x) => {
            let f = x.into_inner();
            if f.fract() != 0.0 || !f.is_finite() {
                return None;
            }
            f as i128
        }
        _ => return None,
    })
}

fn make_int(wide: i128, to: &ValueEncoding) -> Option<FieldValue> {
    Some(match to {
        ValueEncoding::I8 => FieldValue::I8(i8::try_from(wide).ok()?),
        ValueEncoding::U8 => FieldValue::U8(u8::try_from(wide).ok()?),
        ValueEncoding::I16 => FieldValue::I16(i16::try_from(wide).ok()?),
        ValueEncoding::U16 => FieldValue::U16(u16::try_from(wide).ok()?),
        ValueEncoding::I32 => FieldValue::I32(i32::try_from(wide).ok()?),
        ValueEncoding::U32 => FieldValue::U32(u32::try_from(wide).ok()?),
        ValueEncoding::I64 => FieldValue::I64(i64::try_from(wide).ok()?),
        ValueEncoding::U64 => FieldValue::U64(u64::try_from(wide).ok()?),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_to_string_conversion() {
        assert_eq!(
            convert_value(
                &FieldValue::I32(1234),
                &ValueEncoding::I32,
                &ValueEncoding::String
            ),
            Some(FieldValue::from("1234"))
        );
    }

    #[test]
    fn narrowing_requires_fit() {
        assert_eq!(
            convert_value(&FieldValue::I32(200), &ValueEncoding::I32, &ValueEncoding::U8),
            Some(FieldValue::U8(200))
        );
        assert_eq!(
            convert_value(&FieldValue::I32(-1), &ValueEncoding::I32, &ValueEncoding::U8),
            None
        );
    }

    #[test]
    fn enum_converts_by_name_not_ordinal() {
        let old = FieldValue::Enum(stratadb_encoding::EnumLit::new("GREEN", 1));
        let from = ValueEncoding::Enum(EnumModel::new(["RED", "GREEN"]));
        let to_model = EnumModel::new(["GREEN", "BLUE"]);
        assert_eq!(
            convert_value(&old, &from, &ValueEncoding::Enum(to_model)),
            Some(FieldValue::Enum(stratadb_encoding::EnumLit::new("GREEN", 0)))
        );
    }

    #[test]
    fn deep_array_maps_elements() {
        let from_model = EnumModel::new(["A", "B"]);
        let to_model = EnumModel::new(["B", "A"]);
        let from = ValueEncoding::Array(Box::new(ValueEncoding::Enum(from_model)));
        let to = ValueEncoding::Array(Box::new(ValueEncoding::Enum(to_model)));
        let old = FieldValue::Array(vec![FieldValue::Enum(stratadb_encoding::EnumLit::new(
            "B", 1,
        ))]);
        assert_eq!(
            convert_value(&old, &from, &to),
            Some(FieldValue::Array(vec![FieldValue::Enum(
                stratadb_encoding::EnumLit::new("B", 0)
            )]))
        );
    }

    #[test]
    fn float_to_int_requires_integral_value() {
        assert_eq!(
            convert_value(
                &FieldValue::F64(2.0.into()),
                &ValueEncoding::F64,
                &ValueEncoding::I32
            ),
            Some(FieldValue::I32(2))
        );
        assert_eq!(
            convert_value(
                &FieldValue::F64(2.5.into()),
                &ValueEncoding::F64,
                &ValueEncoding::I32
            ),
            None
        );
    }
}
