//! Index maintenance.
//!
//! Invoked on every field mutation with the before/after value pair: the
//! old entry is removed and the new one inserted when the value changed,
//! and every composite index containing the field has its full tuple
//! re-derived and moved. Everything happens inside the enclosing store
//! transaction, so index state is always consistent with the primary data
//! it was derived from.

use super::Transaction;
use crate::error::Result;
use std::collections::BTreeMap;
use stratadb_encoding::{write_value, FieldValue, ValueEncoding};
use stratadb_kv::keyspace;
use stratadb_primitives::{FieldId, ObjId};
use stratadb_schema::{CompositeIndexDecl, FieldDecl, TypeSchema};

/// Encodes one index-key component.
pub(crate) fn encode_index_value(
    encoding: &ValueEncoding,
    value: &FieldValue,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_value(&mut out, encoding, value)?;
    Ok(out)
}

/// Derives the concatenated tuple encoding of a composite index entry.
pub(crate) fn composite_tuple_bytes(
    ty: &TypeSchema,
    composite: &CompositeIndexDecl,
    values: &BTreeMap<FieldId, FieldValue>,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for field_id in &composite.fields {
        let field = ty.field(*field_id).expect("validated composite position");
        let encoding = field.kind.inline_encoding().expect("inline position");
        let value = values.get(field_id).cloned().unwrap_or(FieldValue::Null);
        write_value(&mut out, &encoding, &value)?;
    }
    Ok(out)
}

/// Splits an index entry key into its target id and trailing extra bytes,
/// given the length of the `index-id ∥ value` prefix it was scanned under.
pub(crate) fn parse_index_entry(key: &[u8], prefix_len: usize) -> Option<(ObjId, Vec<u8>)> {
    let mut input = key.get(prefix_len..)?;
    let id = ObjId::read_from(&mut input).ok()?;
    Some((id, input.to_vec()))
}

impl Transaction {
    pub(crate) fn index_put(
        &mut self,
        index: u32,
        value_bytes: &[u8],
        id: ObjId,
        extra: &[u8],
    ) -> Result<()> {
        self.kv
            .put(keyspace::index_entry_key(index, value_bytes, id, extra), Vec::new())?;
        Ok(())
    }

    pub(crate) fn index_del(
        &mut self,
        index: u32,
        value_bytes: &[u8],
        id: ObjId,
        extra: &[u8],
    ) -> Result<()> {
        self.kv
            .remove(&keyspace::index_entry_key(index, value_bytes, id, extra))?;
        Ok(())
    }

    /// Moves the simple-field index entry and every composite entry whose
    /// tuple contains `field`, after `field` changed from `old` to `new`.
    ///
    /// `old_values` must hold the row as it was before the change and
    /// `new_values` the row after it.
    pub(crate) fn update_inline_indexes(
        &mut self,
        ty: &TypeSchema,
        id: ObjId,
        field: &FieldDecl,
        old_values: &BTreeMap<FieldId, FieldValue>,
        new_values: &BTreeMap<FieldId, FieldValue>,
    ) -> Result<()> {
        let old = old_values.get(&field.id);
        let new = new_values.get(&field.id);
        if old == new {
            return Ok(());
        }
        if field.indexed {
            let encoding = field.kind.inline_encoding().expect("indexed inline field");
            if let Some(old) = old {
                let bytes = encode_index_value(&encoding, old)?;
                self.index_del(field.id.0, &bytes, id, &[])?;
            }
            if let Some(new) = new {
                let bytes = encode_index_value(&encoding, new)?;
                self.index_put(field.id.0, &bytes, id, &[])?;
            }
        }
        for composite in ty.composites() {
            if !composite.fields.contains(&field.id) {
                continue;
            }
            let old_tuple = composite_tuple_bytes(ty, composite, old_values)?;
            let new_tuple = composite_tuple_bytes(ty, composite, new_values)?;
            if old_tuple != new_tuple {
                self.index_del(composite.id.0, &old_tuple, id, &[])?;
                self.index_put(composite.id.0, &new_tuple, id, &[])?;
            }
        }
        Ok(())
    }

    /// Collects every `(target, extra)` pair under one encoded value of an
    /// index subspace.
    pub(crate) fn index_scan_value(
        &self,
        index: u32,
        value_bytes: &[u8],
    ) -> Result<Vec<(ObjId, Vec<u8>)>> {
        let (from, to) = keyspace::index_value_range(index, value_bytes);
        let prefix_len = from.len();
        let mut out = Vec::new();
        for (key, _) in self.kv.scan(&from, to.as_deref())? {
            if let Some(entry) = parse_index_entry(&key, prefix_len) {
                out.push(entry);
            }
        }
        Ok(out)
    }
}
