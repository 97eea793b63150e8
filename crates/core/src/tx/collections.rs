//! Set, list and map field operations.
//!
//! Collection entries live under `field-id ∥ objid ∥ sub-key`. Sets keep
//! the element encoding as the sub-key; lists use a big-endian position;
//! maps use the encoded key with the encoded value as the entry's payload.
//! Every mutation keeps the element/key/value indexes in step and feeds the
//! notification path.

use super::index::encode_index_value;
use super::Transaction;
use crate::error::{ObjectError, Result};
use crate::event::FieldChange;
use std::sync::Arc;
use stratadb_encoding::{read_value, FieldValue, ValueEncoding};
use stratadb_kv::keyspace;
use stratadb_primitives::ObjId;
use stratadb_schema::{ElementDecl, FieldDecl, FieldKind, Schema};

fn be64(index: u64) -> [u8; 8] {
    index.to_be_bytes()
}

fn decode_one(encoding: &ValueEncoding, mut bytes: &[u8], id: ObjId) -> Result<FieldValue> {
    let value = read_value(&mut bytes, encoding)?;
    if bytes.is_empty() {
        Ok(value)
    } else {
        Err(ObjectError::BadRow(id).into())
    }
}

impl Transaction {
    fn complex_field<'s>(
        &self,
        schema: &'s Schema,
        id: ObjId,
        field: &str,
        expected: &'static str,
    ) -> Result<&'s FieldDecl> {
        let ty = schema
            .get_type(id.type_id())
            .ok_or(crate::error::MigrateError::TypeNotInSchema(id.type_id()))?;
        let decl = self.field_of(ty, field)?;
        let matches = match (&decl.kind, expected) {
            (FieldKind::Set(_), "set")
            | (FieldKind::List(_), "list")
            | (FieldKind::Map { .. }, "map") => true,
            _ => false,
        };
        if !matches {
            return Err(ObjectError::WrongFieldKind {
                field: field.to_owned(),
                expected,
            }
            .into());
        }
        Ok(decl)
    }

    fn check_element(
        &self,
        field_name: &str,
        element: &ElementDecl,
        value: &FieldValue,
    ) -> Result<Vec<u8>> {
        if value.is_null() {
            return Err(ObjectError::BadValue {
                field: field_name.to_owned(),
                value: "null",
            }
            .into());
        }
        let encoding = element.encoding();
        if !encoding.admits(value) {
            return Err(ObjectError::BadValue {
                field: field_name.to_owned(),
                value: value.kind_name(),
            }
            .into());
        }
        if let Some(spec) = element.ref_spec() {
            self.check_reference(field_name, spec, value)?;
        }
        encode_index_value(&encoding, value)
    }

    /// Raw `(sub-key, payload)` pairs of one complex field, in sub-key
    /// order. The sub-key is the part after the `field-id ∥ objid` prefix.
    pub(crate) fn collection_entries(
        &self,
        decl: &FieldDecl,
        id: ObjId,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let (from, to) = keyspace::field_entries_range(decl.id, id);
        let prefix_len = from.len();
        self.kv
            .scan(&from, to.as_deref())?
            .map(|(key, value)| Ok((key[prefix_len..].to_vec(), value)))
            .collect()
    }

    // ---- sets -------------------------------------------------------------

    /// Adds `value`; returns `false` when it was already present.
    pub fn set_insert(&mut self, id: ObjId, field: &str, value: FieldValue) -> Result<bool> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "set")?.clone();
        let FieldKind::Set(element) = &decl.kind else {
            unreachable!()
        };
        let sub = self.check_element(&decl.name, element, &value)?;
        let key = keyspace::sub_key(decl.id, id, &sub);
        if self.kv.get(&key)?.is_some() {
            return Ok(false);
        }
        self.kv.put(key, Vec::new())?;
        if element.indexed {
            self.index_put(element.id.0, &sub, id, &[])?;
        }
        let ty = schema.get_type(id.type_id()).expect("checked above");
        self.enqueue_validation(ty, id);
        self.dispatch_change(id, &decl, FieldChange::SetAdd { element: value })?;
        Ok(true)
    }

    /// Removes `value`; returns `false` when it was not present.
    pub fn set_remove(&mut self, id: ObjId, field: &str, value: &FieldValue) -> Result<bool> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "set")?.clone();
        let FieldKind::Set(element) = &decl.kind else {
            unreachable!()
        };
        let sub = encode_index_value(&element.encoding(), value)?;
        let key = keyspace::sub_key(decl.id, id, &sub);
        if self.kv.get(&key)?.is_none() {
            return Ok(false);
        }
        self.kv.remove(&key)?;
        if element.indexed {
            self.index_del(element.id.0, &sub, id, &[])?;
        }
        let ty = schema.get_type(id.type_id()).expect("checked above");
        self.enqueue_validation(ty, id);
        self.dispatch_change(
            id,
            &decl,
            FieldChange::SetRemove {
                element: value.clone(),
            },
        )?;
        Ok(true)
    }

    pub fn set_contains(&mut self, id: ObjId, field: &str, value: &FieldValue) -> Result<bool> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "set")?;
        let FieldKind::Set(element) = &decl.kind else {
            unreachable!()
        };
        let sub = encode_index_value(&element.encoding(), value)?;
        Ok(self.kv.get(&keyspace::sub_key(decl.id, id, &sub))?.is_some())
    }

    /// Elements in their natural order.
    pub fn set_iter(&mut self, id: ObjId, field: &str) -> Result<Vec<FieldValue>> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "set")?;
        let FieldKind::Set(element) = &decl.kind else {
            unreachable!()
        };
        let encoding = element.encoding();
        self.collection_entries(decl, id)?
            .into_iter()
            .map(|(sub, _)| decode_one(&encoding, &sub, id))
            .collect()
    }

    pub fn set_len(&mut self, id: ObjId, field: &str) -> Result<u64> {
        Ok(self.set_iter(id, field)?.len() as u64)
    }

    pub fn set_clear(&mut self, id: ObjId, field: &str) -> Result<()> {
        for element in self.set_iter(id, field)? {
            self.set_remove(id, field, &element)?;
        }
        Ok(())
    }

    // ---- lists ------------------------------------------------------------

    fn list_parts<'d>(decl: &'d FieldDecl) -> &'d ElementDecl {
        match &decl.kind {
            FieldKind::List(element) => element,
            _ => unreachable!("caller checked the field kind"),
        }
    }

    pub fn list_len(&mut self, id: ObjId, field: &str) -> Result<u64> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "list")?;
        Ok(self.collection_entries(decl, id)?.len() as u64)
    }

    pub fn list_push(&mut self, id: ObjId, field: &str, value: FieldValue) -> Result<u64> {
        let len = self.list_len(id, field)?;
        self.list_insert(id, field, len, value)?;
        Ok(len)
    }

    /// Inserts at `index`, shifting every later element one slot up.
    pub fn list_insert(
        &mut self,
        id: ObjId,
        field: &str,
        index: u64,
        value: FieldValue,
    ) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "list")?.clone();
        let element = Self::list_parts(&decl);
        let value_bytes = self.check_element(&decl.name, element, &value)?;
        let len = self.collection_entries(&decl, id)?.len() as u64;
        if index > len {
            return Err(ObjectError::ListIndex { index, len }.into());
        }
        for slot in (index..len).rev() {
            let from_key = keyspace::sub_key(decl.id, id, &be64(slot));
            let bytes = self.kv.get(&from_key)?.ok_or(ObjectError::BadRow(id))?;
            self.kv
                .put(keyspace::sub_key(decl.id, id, &be64(slot + 1)), bytes.clone())?;
            if element.indexed {
                self.index_del(element.id.0, &bytes, id, &be64(slot))?;
                self.index_put(element.id.0, &bytes, id, &be64(slot + 1))?;
            }
        }
        self.kv
            .put(keyspace::sub_key(decl.id, id, &be64(index)), value_bytes.clone())?;
        if element.indexed {
            self.index_put(element.id.0, &value_bytes, id, &be64(index))?;
        }
        let ty = schema.get_type(id.type_id()).expect("checked above");
        self.enqueue_validation(ty, id);
        self.dispatch_change(
            id,
            &decl,
            FieldChange::ListInsert {
                index,
                element: value,
            },
        )?;
        Ok(())
    }

    pub fn list_get(&mut self, id: ObjId, field: &str) -> Result<Vec<FieldValue>> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "list")?;
        let encoding = Self::list_parts(decl).encoding();
        self.collection_entries(decl, id)?
            .into_iter()
            .map(|(_, bytes)| decode_one(&encoding, &bytes, id))
            .collect()
    }

    pub fn list_at(&mut self, id: ObjId, field: &str, index: u64) -> Result<FieldValue> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "list")?;
        let encoding = Self::list_parts(decl).encoding();
        let key = keyspace::sub_key(decl.id, id, &be64(index));
        match self.kv.get(&key)? {
            Some(bytes) => decode_one(&encoding, &bytes, id),
            None => {
                let len = self.collection_entries(decl, id)?.len() as u64;
                Err(ObjectError::ListIndex { index, len }.into())
            }
        }
    }

    /// Replaces the element at `index`, returning the previous value.
    pub fn list_set(
        &mut self,
        id: ObjId,
        field: &str,
        index: u64,
        value: FieldValue,
    ) -> Result<FieldValue> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "list")?.clone();
        let element = Self::list_parts(&decl);
        let value_bytes = self.check_element(&decl.name, element, &value)?;
        let key = keyspace::sub_key(decl.id, id, &be64(index));
        let old_bytes = match self.kv.get(&key)? {
            Some(bytes) => bytes,
            None => {
                let len = self.collection_entries(&decl, id)?.len() as u64;
                return Err(ObjectError::ListIndex { index, len }.into());
            }
        };
        let old = decode_one(&element.encoding(), &old_bytes, id)?;
        self.kv.put(key, value_bytes.clone())?;
        if element.indexed && old_bytes != value_bytes {
            self.index_del(element.id.0, &old_bytes, id, &be64(index))?;
            self.index_put(element.id.0, &value_bytes, id, &be64(index))?;
        }
        let ty = schema.get_type(id.type_id()).expect("checked above");
        self.enqueue_validation(ty, id);
        self.dispatch_change(
            id,
            &decl,
            FieldChange::ListSet {
                index,
                old: old.clone(),
                new: value,
            },
        )?;
        Ok(old)
    }

    /// Removes the element at `index`, shifting every later element one
    /// slot down. Returns the removed value.
    pub fn list_remove(&mut self, id: ObjId, field: &str, index: u64) -> Result<FieldValue> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "list")?.clone();
        let element = Self::list_parts(&decl);
        let encoding = element.encoding();
        let len = self.collection_entries(&decl, id)?.len() as u64;
        if index >= len {
            return Err(ObjectError::ListIndex { index, len }.into());
        }
        let removed_key = keyspace::sub_key(decl.id, id, &be64(index));
        let removed_bytes = self.kv.get(&removed_key)?.ok_or(ObjectError::BadRow(id))?;
        let removed = decode_one(&encoding, &removed_bytes, id)?;
        if element.indexed {
            self.index_del(element.id.0, &removed_bytes, id, &be64(index))?;
        }
        for slot in index + 1..len {
            let from_key = keyspace::sub_key(decl.id, id, &be64(slot));
            let bytes = self.kv.get(&from_key)?.ok_or(ObjectError::BadRow(id))?;
            self.kv
                .put(keyspace::sub_key(decl.id, id, &be64(slot - 1)), bytes.clone())?;
            if element.indexed {
                self.index_del(element.id.0, &bytes, id, &be64(slot))?;
                self.index_put(element.id.0, &bytes, id, &be64(slot - 1))?;
            }
        }
        self.kv
            .remove(&keyspace::sub_key(decl.id, id, &be64(len - 1)))?;
        let ty = schema.get_type(id.type_id()).expect("checked above");
        self.enqueue_validation(ty, id);
        self.dispatch_change(
            id,
            &decl,
            FieldChange::ListRemove {
                index,
                element: removed.clone(),
            },
        )?;
        Ok(removed)
    }

    pub fn list_clear(&mut self, id: ObjId, field: &str) -> Result<()> {
        while self.list_len(id, field)? > 0 {
            let len = self.list_len(id, field)?;
            self.list_remove(id, field, len - 1)?;
        }
        Ok(())
    }

    // ---- maps -------------------------------------------------------------

    fn map_parts<'d>(decl: &'d FieldDecl) -> (&'d ElementDecl, &'d ElementDecl) {
        match &decl.kind {
            FieldKind::Map { key, value } => (key, value),
            _ => unreachable!("caller checked the field kind"),
        }
    }

    /// Inserts or replaces; returns the previous value under `key`.
    pub fn map_insert(
        &mut self,
        id: ObjId,
        field: &str,
        key: FieldValue,
        value: FieldValue,
    ) -> Result<Option<FieldValue>> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "map")?.clone();
        let (key_elem, value_elem) = Self::map_parts(&decl);
        let key_bytes = self.check_element(&decl.name, key_elem, &key)?;
        let value_bytes = self.check_element(&decl.name, value_elem, &value)?;
        let entry_key = keyspace::sub_key(decl.id, id, &key_bytes);
        let old = match self.kv.get(&entry_key)? {
            Some(bytes) => Some(decode_one(&value_elem.encoding(), &bytes, id)?),
            None => None,
        };
        if old.is_none() && key_elem.indexed {
            self.index_put(key_elem.id.0, &key_bytes, id, &[])?;
        }
        if value_elem.indexed {
            if let Some(old) = &old {
                let old_bytes = encode_index_value(&value_elem.encoding(), old)?;
                self.index_del(value_elem.id.0, &old_bytes, id, &key_bytes)?;
            }
            self.index_put(value_elem.id.0, &value_bytes, id, &key_bytes)?;
        }
        self.kv.put(entry_key, value_bytes)?;
        let ty = schema.get_type(id.type_id()).expect("checked above");
        self.enqueue_validation(ty, id);
        self.dispatch_change(
            id,
            &decl,
            FieldChange::MapPut {
                key,
                old: old.clone(),
                new: value,
            },
        )?;
        Ok(old)
    }

    pub fn map_get(&mut self, id: ObjId, field: &str, key: &FieldValue) -> Result<Option<FieldValue>> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "map")?;
        let (key_elem, value_elem) = Self::map_parts(decl);
        let key_bytes = encode_index_value(&key_elem.encoding(), key)?;
        match self.kv.get(&keyspace::sub_key(decl.id, id, &key_bytes))? {
            Some(bytes) => Ok(Some(decode_one(&value_elem.encoding(), &bytes, id)?)),
            None => Ok(None),
        }
    }

    pub fn map_contains_key(&mut self, id: ObjId, field: &str, key: &FieldValue) -> Result<bool> {
        Ok(self.map_get(id, field, key)?.is_some())
    }

    /// Removes the entry under `key`, returning its value.
    pub fn map_remove(
        &mut self,
        id: ObjId,
        field: &str,
        key: &FieldValue,
    ) -> Result<Option<FieldValue>> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "map")?.clone();
        let (key_elem, value_elem) = Self::map_parts(&decl);
        let key_bytes = encode_index_value(&key_elem.encoding(), key)?;
        let entry_key = keyspace::sub_key(decl.id, id, &key_bytes);
        let Some(old_bytes) = self.kv.get(&entry_key)? else {
            return Ok(None);
        };
        let old = decode_one(&value_elem.encoding(), &old_bytes, id)?;
        self.kv.remove(&entry_key)?;
        if key_elem.indexed {
            self.index_del(key_elem.id.0, &key_bytes, id, &[])?;
        }
        if value_elem.indexed {
            self.index_del(value_elem.id.0, &old_bytes, id, &key_bytes)?;
        }
        let ty = schema.get_type(id.type_id()).expect("checked above");
        self.enqueue_validation(ty, id);
        self.dispatch_change(
            id,
            &decl,
            FieldChange::MapRemove {
                key: key.clone(),
                old: old.clone(),
            },
        )?;
        Ok(Some(old))
    }

    /// Entries in key order.
    pub fn map_iter(&mut self, id: ObjId, field: &str) -> Result<Vec<(FieldValue, FieldValue)>> {
        let schema = Arc::clone(&self.schema);
        self.ensure_current(id)?;
        let decl = self.complex_field(&schema, id, field, "map")?;
        let (key_elem, value_elem) = Self::map_parts(decl);
        let key_encoding = key_elem.encoding();
        let value_encoding = value_elem.encoding();
        self.collection_entries(decl, id)?
            .into_iter()
            .map(|(sub, bytes)| {
                Ok((
                    decode_one(&key_encoding, &sub, id)?,
                    decode_one(&value_encoding, &bytes, id)?,
                ))
            })
            .collect()
    }

    pub fn map_len(&mut self, id: ObjId, field: &str) -> Result<u64> {
        Ok(self.map_iter(id, field)?.len() as u64)
    }

    pub fn map_clear(&mut self, id: ObjId, field: &str) -> Result<()> {
        for (key, _) in self.map_iter(id, field)? {
            self.map_remove(id, field, &key)?;
        }
        Ok(())
    }
}
