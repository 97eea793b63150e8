//! The typed facade: object handles whose accessors translate into core
//! transaction operations.
//!
//! A handle is a borrow-like view bound to its transaction; it holds no
//! state beyond the object id. Collection views read through to the store
//! on every call, so iteration after a mutation from the same transaction
//! observes that mutation. Counter handles bypass the change-notification
//! machinery entirely.

use crate::error::{ObjectError, Result};
use crate::tx::Transaction;
use stratadb_encoding::FieldValue;
use stratadb_primitives::{ObjId, SchemaId};

/// What `get` hands back: a typed handle when the stored type is part of
/// the current schema, otherwise an untyped handle that can be examined
/// and deleted but not field-accessed.
pub enum Handle<'tx> {
    Typed(ObjHandle<'tx>),
    Untyped(UntypedHandle<'tx>),
}

impl Transaction {
    /// Looks up an object and returns the appropriate handle flavor.
    pub fn get(&mut self, id: ObjId) -> Result<Handle<'_>> {
        if !self.exists(id)? {
            return Err(ObjectError::Deleted(id).into());
        }
        Ok(match self.schema().get_type(id.type_id()) {
            Some(_) => Handle::Typed(ObjHandle { tx: self, id }),
            None => Handle::Untyped(UntypedHandle { tx: self, id }),
        })
    }

    /// Looks up an object, insisting it is a live instance of `type_name`.
    pub fn get_as(&mut self, id: ObjId, type_name: &str) -> Result<ObjHandle<'_>> {
        if !self.exists(id)? {
            return Err(ObjectError::Deleted(id).into());
        }
        let expected = self
            .schema()
            .type_named(type_name)
            .ok_or_else(|| ObjectError::UnknownType(type_name.to_owned()))?
            .id;
        if id.type_id() != expected {
            return Err(ObjectError::TypeMismatch {
                id,
                actual: id.type_id(),
                expected: type_name.to_owned(),
            }
            .into());
        }
        Ok(ObjHandle { tx: self, id })
    }
}

/// A typed view of one object.
pub struct ObjHandle<'tx> {
    tx: &'tx mut Transaction,
    id: ObjId,
}

impl<'tx> ObjHandle<'tx> {
    pub fn id(&self) -> ObjId {
        self.id
    }

    pub fn get(&mut self, field: &str) -> Result<FieldValue> {
        self.tx.read_field(self.id, field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<()> {
        self.tx.write_field(self.id, field, value.into())
    }

    pub fn set_view<'h>(&'h mut self, field: &str) -> SetView<'h> {
        SetView {
            tx: &mut *self.tx,
            id: self.id,
            field: field.to_owned(),
        }
    }

    pub fn list_view<'h>(&'h mut self, field: &str) -> ListView<'h> {
        ListView {
            tx: &mut *self.tx,
            id: self.id,
            field: field.to_owned(),
        }
    }

    pub fn map_view<'h>(&'h mut self, field: &str) -> MapView<'h> {
        MapView {
            tx: &mut *self.tx,
            id: self.id,
            field: field.to_owned(),
        }
    }

    pub fn counter<'h>(&'h mut self, field: &str) -> CounterHandle<'h> {
        CounterHandle {
            tx: &mut *self.tx,
            id: self.id,
            field: field.to_owned(),
        }
    }

    pub fn delete(self) -> Result<bool> {
        self.tx.delete(self.id)
    }
}

/// A view of an object whose stored type is absent from the current
/// schema.
pub struct UntypedHandle<'tx> {
    tx: &'tx mut Transaction,
    id: ObjId,
}

impl<'tx> UntypedHandle<'tx> {
    pub fn id(&self) -> ObjId {
        self.id
    }

    /// The schema version the stored encoding conforms to.
    pub fn schema_id(&self) -> Result<SchemaId> {
        self.tx.schema_id_of(self.id)
    }

    /// The references this object holds, resolved through its stored
    /// schema: `(field name, target)` pairs.
    pub fn references(&self) -> Result<Vec<(String, ObjId)>> {
        let Some((stored, _)) = self.tx.load_stored_row(self.id)? else {
            return Ok(Vec::new());
        };
        let Some(ty) = stored.get_type(self.id.type_id()) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for position in ty.ref_positions() {
            for target in self.tx.raw_ref_values(
                self.id,
                position.container,
                position.slot,
                position.place,
            )? {
                out.push((position.field_name.clone(), target));
            }
        }
        Ok(out)
    }

    pub fn delete(self) -> Result<bool> {
        self.tx.delete(self.id)
    }
}

/// Live view of a set field.
pub struct SetView<'a> {
    tx: &'a mut Transaction,
    id: ObjId,
    field: String,
}

impl SetView<'_> {
    pub fn insert(&mut self, value: impl Into<FieldValue>) -> Result<bool> {
        self.tx.set_insert(self.id, &self.field, value.into())
    }

    pub fn remove(&mut self, value: &FieldValue) -> Result<bool> {
        self.tx.set_remove(self.id, &self.field, value)
    }

    pub fn contains(&mut self, value: &FieldValue) -> Result<bool> {
        self.tx.set_contains(self.id, &self.field, value)
    }

    pub fn iter(&mut self) -> Result<Vec<FieldValue>> {
        self.tx.set_iter(self.id, &self.field)
    }

    pub fn len(&mut self) -> Result<u64> {
        self.tx.set_len(self.id, &self.field)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.tx.set_clear(self.id, &self.field)
    }
}

/// Live view of a list field.
pub struct ListView<'a> {
    tx: &'a mut Transaction,
    id: ObjId,
    field: String,
}

impl ListView<'_> {
    pub fn push(&mut self, value: impl Into<FieldValue>) -> Result<u64> {
        self.tx.list_push(self.id, &self.field, value.into())
    }

    pub fn insert(&mut self, index: u64, value: impl Into<FieldValue>) -> Result<()> {
        self.tx.list_insert(self.id, &self.field, index, value.into())
    }

    pub fn get(&mut self) -> Result<Vec<FieldValue>> {
        self.tx.list_get(self.id, &self.field)
    }

    pub fn at(&mut self, index: u64) -> Result<FieldValue> {
        self.tx.list_at(self.id, &self.field, index)
    }

    pub fn set(&mut self, index: u64, value: impl Into<FieldValue>) -> Result<FieldValue> {
        self.tx.list_set(self.id, &self.field, index, value.into())
    }

    pub fn remove(&mut self, index: u64) -> Result<FieldValue> {
        self.tx.list_remove(self.id, &self.field, index)
    }

    pub fn len(&mut self) -> Result<u64> {
        self.tx.list_len(self.id, &self.field)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.tx.list_clear(self.id, &self.field)
    }
}

/// Live view of a map field.
pub struct MapView<'a> {
    tx: &'a mut Transaction,
    id: ObjId,
    field: String,
}

impl MapView<'_> {
    pub fn insert(
        &mut self,
        key: impl Into<FieldValue>,
        value: impl Into<FieldValue>,
    ) -> Result<Option<FieldValue>> {
        self.tx
            .map_insert(self.id, &self.field, key.into(), value.into())
    }

    pub fn get(&mut self, key: &FieldValue) -> Result<Option<FieldValue>> {
        self.tx.map_get(self.id, &self.field, key)
    }

    pub fn remove(&mut self, key: &FieldValue) -> Result<Option<FieldValue>> {
        self.tx.map_remove(self.id, &self.field, key)
    }

    pub fn contains_key(&mut self, key: &FieldValue) -> Result<bool> {
        self.tx.map_contains_key(self.id, &self.field, key)
    }

    pub fn iter(&mut self) -> Result<Vec<(FieldValue, FieldValue)>> {
        self.tx.map_iter(self.id, &self.field)
    }

    pub fn len(&mut self) -> Result<u64> {
        self.tx.map_len(self.id, &self.field)
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.tx.map_clear(self.id, &self.field)
    }
}

/// A counter handle: atomic get/set/adjust, no indexes, no notifications.
pub struct CounterHandle<'a> {
    tx: &'a mut Transaction,
    id: ObjId,
    field: String,
}

impl CounterHandle<'_> {
    pub fn get(&mut self) -> Result<i64> {
        self.tx.counter_get(self.id, &self.field)
    }

    pub fn set(&mut self, value: i64) -> Result<()> {
        self.tx.counter_set(self.id, &self.field, value)
    }

    pub fn adjust(&mut self, delta: i64) -> Result<i64> {
        self.tx.counter_adjust(self.id, &self.field, delta)
    }
}
