//! Simple-field reads and writes, counters, and the reference checks run
//! before any reference lands in the store.

use super::Transaction;
use crate::error::{ObjectError, Result};
use crate::event::FieldChange;
use std::sync::Arc;
use stratadb_encoding::FieldValue;
use stratadb_kv::keyspace;
use stratadb_primitives::ObjId;
use stratadb_schema::{FieldDecl, FieldKind, RefSpec, Schema, TypeSchema};

impl Transaction {
    fn current_type<'s>(&self, schema: &'s Schema, id: ObjId) -> Result<&'s TypeSchema> {
        schema
            .get_type(id.type_id())
            .ok_or_else(|| crate::error::MigrateError::TypeNotInSchema(id.type_id()).into())
    }

    pub(crate) fn field_of<'s>(
        &self,
        ty: &'s TypeSchema,
        name: &str,
    ) -> Result<&'s FieldDecl> {
        ty.field_named(name).ok_or_else(|| {
            ObjectError::UnknownField {
                ty: ty.name.clone(),
                field: name.to_owned(),
            }
            .into()
        })
    }

    /// Reads a simple-kind field (simple, reference, enum, enum-array).
    pub fn read_field(&mut self, id: ObjId, field: &str) -> Result<FieldValue> {
        let schema = Arc::clone(&self.schema);
        let ty = self.current_type(&schema, id)?;
        let row = self.ensure_current(id)?;
        let decl = self.field_of(ty, field)?;
        let encoding = decl.kind.inline_encoding().ok_or_else(|| {
            ObjectError::WrongFieldKind {
                field: field.to_owned(),
                expected: "simple",
            }
        })?;
        Ok(row
            .values
            .get(&decl.id)
            .cloned()
            .unwrap_or_else(|| stratadb_encoding::default_value(&encoding)))
    }

    /// Writes a simple-kind field, maintaining its indexes and dispatching
    /// change notifications.
    pub fn write_field(&mut self, id: ObjId, field: &str, value: FieldValue) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let ty = self.current_type(&schema, id)?;
        let row = self.ensure_current(id)?;
        let decl = self.field_of(ty, field)?.clone();
        let encoding = decl.kind.inline_encoding().ok_or_else(|| {
            ObjectError::WrongFieldKind {
                field: field.to_owned(),
                expected: "simple",
            }
        })?;
        if !encoding.admits(&value) {
            if value.is_null() {
                return Err(stratadb_encoding::EncodingError::NullOnPrimitive(
                    encoding.kind_name(),
                )
                .into());
            }
            return Err(ObjectError::BadValue {
                field: field.to_owned(),
                value: value.kind_name(),
            }
            .into());
        }
        if let FieldKind::Reference(spec) = &decl.kind {
            self.check_reference(&decl.name, spec, &value)?;
        }

        let old_values = row.values;
        let old = old_values
            .get(&decl.id)
            .cloned()
            .unwrap_or_else(|| stratadb_encoding::default_value(&encoding));
        if old == value {
            return Ok(());
        }
        let mut new_values = old_values.clone();
        new_values.insert(decl.id, value.clone());
        self.write_row(ty, id, &new_values)?;
        self.update_inline_indexes(ty, id, &decl, &old_values, &new_values)?;
        self.enqueue_validation(ty, id);
        self.dispatch_change(id, &decl, FieldChange::Simple { old, new: value })?;
        Ok(())
    }

    /// Rejects a reference whose runtime target type is outside the
    /// declared restriction, and dangling references unless the field
    /// allows them. Runs before anything reaches the store.
    pub(crate) fn check_reference(
        &self,
        field_name: &str,
        spec: &RefSpec,
        value: &FieldValue,
    ) -> Result<()> {
        let Some(target) = value.as_ref_id() else {
            return Ok(());
        };
        if !spec.admits_target(target.type_id()) {
            return Err(ObjectError::IncompatibleReference {
                field: field_name.to_owned(),
                target,
            }
            .into());
        }
        if !spec.allow_deleted && !self.exists(target)? {
            return Err(ObjectError::Deleted(target).into());
        }
        Ok(())
    }

    // ---- counters ---------------------------------------------------------
    //
    // Counters live out of line under their own field key and bypass both
    // the index manager and the change-notification machinery.

    fn counter_key(&self, id: ObjId, field: &str) -> Result<Vec<u8>> {
        let schema = Arc::clone(&self.schema);
        let ty = self.current_type(&schema, id)?;
        let decl = self.field_of(ty, field)?;
        if !matches!(decl.kind, FieldKind::Counter) {
            return Err(ObjectError::WrongFieldKind {
                field: field.to_owned(),
                expected: "counter",
            }
            .into());
        }
        Ok(keyspace::field_key(decl.id, id))
    }

    pub fn counter_get(&mut self, id: ObjId, field: &str) -> Result<i64> {
        self.ensure_current(id)?;
        let key = self.counter_key(id, field)?;
        Ok(match self.kv.get(&key)? {
            Some(bytes) => i64::from_le_bytes(
                bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| ObjectError::BadRow(id))?,
            ),
            None => 0,
        })
    }

    pub fn counter_set(&mut self, id: ObjId, field: &str, value: i64) -> Result<()> {
        self.ensure_current(id)?;
        let key = self.counter_key(id, field)?;
        self.kv.put(key, value.to_le_bytes().to_vec())?;
        Ok(())
    }

    /// Atomic add; returns the post-adjustment value.
    pub fn counter_adjust(&mut self, id: ObjId, field: &str, delta: i64) -> Result<i64> {
        let current = self.counter_get(id, field)?;
        let next = current.wrapping_add(delta);
        let key = self.counter_key(id, field)?;
        self.kv.put(key, next.to_le_bytes().to_vec())?;
        Ok(next)
    }
}
