//! The core transaction: the read/write surface over the key-value
//! gateway.
//!
//! All object, field, index, cascade and validation work funnels through
//! [`Transaction`]. Side effects (index maintenance, notification dispatch,
//! cascade traversal) run synchronously inside the triggering call, so they
//! are visible to every subsequent read in the same transaction. Durability
//! is established only by [`Transaction::commit`].

mod collections;
mod copy;
mod delete;
mod fields;
mod index;
mod migrate;
mod notify;
mod queries;
mod validate;

pub use queries::{CompositeQuery, IndexEntry, IndexExtra, IndexQuery};

use crate::error::{Error, ObjectError, Result};
use crate::event::{ChangeEvent, ChangeKind, SchemaChangeEvent};
use crate::row::{self, ObjRow};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;
use stratadb_encoding::default_value;
use stratadb_kv::{keyspace, KvTx};
use stratadb_primitives::{ObjId, SchemaId, TypeId};
use stratadb_schema::{path, FieldKind, ListenerError, Schema, SchemaError, TypeSchema};

pub type CreateFn = dyn Fn(&mut Transaction, ObjId);
pub type DeleteFn = dyn Fn(&mut Transaction, ObjId);
pub type ValidatorFn = dyn Fn(&mut Transaction, ObjId) -> std::result::Result<(), String>;
pub type ChangeFn = dyn Fn(&ChangeEvent);
pub type SchemaChangeFn = dyn Fn(&SchemaChangeEvent);

#[derive(Clone)]
pub(crate) struct ChangeListener {
    pub(crate) path: path::ResolvedPath,
    pub(crate) kind: ChangeKind,
    pub(crate) callback: Rc<ChangeFn>,
}

/// A transaction over one store snapshot.
///
/// The transaction exclusively owns every object it exposes; handles are
/// views bound to it. It is single-threaded and cooperative: there is no
/// parallelism inside a transaction, and two transactions only ever share
/// state through the store.
pub struct Transaction {
    pub(crate) kv: Box<dyn KvTx>,
    pub(crate) schema: Arc<Schema>,
    /// Every schema version persisted in the store, current included.
    pub(crate) known_schemas: Vec<Arc<Schema>>,
    /// Objects awaiting validation; kept sorted so validation order is
    /// deterministic.
    pub(crate) to_validate: BTreeSet<ObjId>,
    /// Objects currently inside a delete cascade; re-entry is a no-op.
    pub(crate) deleting: BTreeSet<ObjId>,
    pub(crate) listeners: Vec<ChangeListener>,
    pub(crate) create_callbacks: Vec<(Option<TypeId>, Rc<CreateFn>)>,
    pub(crate) delete_callbacks: Vec<(Option<TypeId>, Rc<DeleteFn>)>,
    pub(crate) schema_change_callbacks: Vec<(Option<TypeId>, Rc<SchemaChangeFn>)>,
    pub(crate) validators: Vec<(TypeId, Rc<ValidatorFn>)>,
}

impl Transaction {
    pub(crate) fn new(kv: Box<dyn KvTx>, schema: Arc<Schema>, known: Vec<Arc<Schema>>) -> Self {
        let mut known_schemas = known;
        if !known_schemas.iter().any(|s| s.id() == schema.id()) {
            known_schemas.push(Arc::clone(&schema));
        }
        Self {
            kv,
            schema,
            known_schemas,
            to_validate: BTreeSet::new(),
            deleting: BTreeSet::new(),
            listeners: Vec::new(),
            create_callbacks: Vec::new(),
            delete_callbacks: Vec::new(),
            schema_change_callbacks: Vec::new(),
            validators: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Runs the validation queue, then commits the underlying snapshot.
    pub fn commit(mut self) -> Result<()> {
        self.validate()?;
        self.kv.commit()?;
        Ok(())
    }

    pub fn rollback(mut self) {
        self.kv.rollback();
    }

    pub fn is_closed(&self) -> bool {
        self.kv.is_closed()
    }

    // ---- object lifecycle -------------------------------------------------

    /// Creates a fresh object of `type_name` and returns its id.
    pub fn create(&mut self, type_name: &str) -> Result<ObjId> {
        let schema = Arc::clone(&self.schema);
        let ty = schema
            .type_named(type_name)
            .ok_or_else(|| ObjectError::UnknownType(type_name.to_owned()))?;
        let mut rng = rand::thread_rng();
        let id = loop {
            let id = ObjId::generate(ty.id, &mut rng);
            if self.kv.get(&keyspace::object_key(id))?.is_none() {
                break id;
            }
            log::warn!("object id collision on {id}, retrying");
        };
        self.materialize(ty, id)?;
        log::trace!("OBJECT CREATED: {} {}", ty.name, id);
        self.dispatch_create(ty.id, id);
        Ok(id)
    }

    /// Recreates a previously deleted (or never-existing) object under a
    /// known id. Returns `false` when the object already exists.
    pub fn recreate(&mut self, id: ObjId) -> Result<bool> {
        let schema = Arc::clone(&self.schema);
        let ty = schema
            .get_type(id.type_id())
            .ok_or(crate::error::MigrateError::TypeNotInSchema(id.type_id()))?;
        if self.exists(id)? {
            return Ok(false);
        }
        self.materialize(ty, id)?;
        log::trace!("OBJECT RECREATED: {} {}", ty.name, id);
        self.dispatch_create(ty.id, id);
        Ok(true)
    }

    /// Writes the initial row, default index entries and validation-queue
    /// entry for a fresh object.
    fn materialize(&mut self, ty: &TypeSchema, id: ObjId) -> Result<()> {
        let mut values = BTreeMap::new();
        for field in ty.inline_fields() {
            let encoding = field.kind.inline_encoding().expect("inline field");
            values.insert(field.id, default_value(&encoding));
        }
        let bytes = row::encode_row(self.schema.id(), ty, &values)?;
        self.kv.put(keyspace::object_key(id), bytes)?;
        for field in ty.inline_fields().filter(|f| f.indexed) {
            let encoding = field.kind.inline_encoding().expect("inline field");
            let value_bytes = index::encode_index_value(&encoding, &values[&field.id])?;
            self.index_put(field.id.0, &value_bytes, id, &[])?;
        }
        for composite in ty.composites() {
            let tuple = index::composite_tuple_bytes(ty, composite, &values)?;
            self.index_put(composite.id.0, &tuple, id, &[])?;
        }
        self.enqueue_validation(ty, id);
        Ok(())
    }

    pub fn exists(&self, id: ObjId) -> Result<bool> {
        Ok(self.kv.get(&keyspace::object_key(id))?.is_some())
    }

    /// The schema id an object's on-disk encoding currently conforms to.
    pub fn schema_id_of(&self, id: ObjId) -> Result<SchemaId> {
        let bytes = self
            .kv
            .get(&keyspace::object_key(id))?
            .ok_or(ObjectError::Deleted(id))?;
        row::header_schema_id(id, &bytes)
    }

    /// Every object of `type_name`, in id order.
    pub fn get_all(&self, type_name: &str) -> Result<Vec<ObjId>> {
        let ty = self
            .schema
            .type_named(type_name)
            .ok_or_else(|| ObjectError::UnknownType(type_name.to_owned()))?;
        let (from, to) = keyspace::type_objects_range(ty.id);
        self.kv
            .scan(&from, to.as_deref())?
            .map(|(key, _)| {
                let mut input = &key[..];
                ObjId::read_from(&mut input)
                    .map_err(|_| Error::Object(ObjectError::BadRow(ObjId::first_for_type(ty.id))))
            })
            .collect()
    }

    pub fn count(&self, type_name: &str) -> Result<u64> {
        Ok(self.get_all(type_name)?.len() as u64)
    }

    // ---- row plumbing -----------------------------------------------------

    /// Resolves a persisted schema version by id.
    pub(crate) fn stored_schema(&self, id: ObjId, schema_id: SchemaId) -> Result<Arc<Schema>> {
        self.known_schemas
            .iter()
            .find(|s| s.id() == schema_id)
            .cloned()
            .ok_or_else(|| {
                crate::error::MigrateError::UnknownSchema {
                    id,
                    schema: schema_id,
                }
                .into()
            })
    }

    /// Loads an object's row decoded against its *stored* schema.
    pub(crate) fn load_stored_row(&self, id: ObjId) -> Result<Option<(Arc<Schema>, ObjRow)>> {
        let Some(bytes) = self.kv.get(&keyspace::object_key(id))? else {
            return Ok(None);
        };
        let schema_id = row::header_schema_id(id, &bytes)?;
        let stored = self.stored_schema(id, schema_id)?;
        let ty = stored
            .get_type(id.type_id())
            .ok_or(ObjectError::BadRow(id))?;
        let row = row::decode_row(id, &bytes, ty)?;
        Ok(Some((stored, row)))
    }

    /// Rewrites an object's row under the current schema.
    pub(crate) fn write_row(
        &mut self,
        ty: &TypeSchema,
        id: ObjId,
        values: &BTreeMap<stratadb_primitives::FieldId, stratadb_encoding::FieldValue>,
    ) -> Result<()> {
        let bytes = row::encode_row(self.schema.id(), ty, values)?;
        self.kv.put(keyspace::object_key(id), bytes)?;
        Ok(())
    }

    // ---- validation queue -------------------------------------------------

    fn needs_validation(&self, ty: &TypeSchema) -> bool {
        ty.fields().iter().any(|f| f.unique)
            || ty.composites().iter().any(|c| c.unique)
            || self.validators.iter().any(|(t, _)| *t == ty.id)
    }

    pub(crate) fn enqueue_validation(&mut self, ty: &TypeSchema, id: ObjId) {
        if self.needs_validation(ty) {
            self.to_validate.insert(id);
        }
    }

    /// Objects currently queued for validation.
    pub fn pending_validation(&self) -> impl Iterator<Item = ObjId> + '_ {
        self.to_validate.iter().copied()
    }

    // ---- callback registration --------------------------------------------

    fn resolve_type_filter(&self, type_name: Option<&str>) -> Result<Option<TypeId>> {
        match type_name {
            None => Ok(None),
            Some(name) => self
                .schema
                .type_named(name)
                .map(|ty| Some(ty.id))
                .ok_or_else(|| ObjectError::UnknownType(name.to_owned()).into()),
        }
    }

    /// Registers a callback fired after each create of `type_name` (or of
    /// any type when `None`).
    pub fn on_create(
        &mut self,
        type_name: Option<&str>,
        callback: impl Fn(&mut Transaction, ObjId) + 'static,
    ) -> Result<()> {
        let filter = self.resolve_type_filter(type_name)?;
        self.create_callbacks.push((filter, Rc::new(callback)));
        Ok(())
    }

    /// Registers a callback fired exactly once per object deletion.
    pub fn on_delete(
        &mut self,
        type_name: Option<&str>,
        callback: impl Fn(&mut Transaction, ObjId) + 'static,
    ) -> Result<()> {
        let filter = self.resolve_type_filter(type_name)?;
        self.delete_callbacks.push((filter, Rc::new(callback)));
        Ok(())
    }

    /// Registers a callback observing per-object schema migrations.
    pub fn on_schema_change(
        &mut self,
        type_name: Option<&str>,
        callback: impl Fn(&SchemaChangeEvent) + 'static,
    ) -> Result<()> {
        let filter = self.resolve_type_filter(type_name)?;
        self.schema_change_callbacks.push((filter, Rc::new(callback)));
        Ok(())
    }

    /// Registers a predicate validator run at `validate()` against every
    /// queued object of `type_name`.
    pub fn add_validator(
        &mut self,
        type_name: &str,
        callback: impl Fn(&mut Transaction, ObjId) -> std::result::Result<(), String> + 'static,
    ) -> Result<()> {
        let ty = self
            .schema
            .type_named(type_name)
            .ok_or_else(|| ObjectError::UnknownType(type_name.to_owned()))?;
        self.validators.push((ty.id, Rc::new(callback)));
        Ok(())
    }

    /// Registers a change listener rooted at `start_type` watching the
    /// reference path `path_text`.
    pub fn add_change_listener(
        &mut self,
        start_type: &str,
        path_text: &str,
        kind: ChangeKind,
        callback: impl Fn(&ChangeEvent) + 'static,
    ) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let start = schema
            .type_named(start_type)
            .ok_or_else(|| ObjectError::UnknownType(start_type.to_owned()))?;
        let parsed = path::RefPath::parse(path_text)?;
        let resolved = path::resolve(&schema, start.id, &parsed)?;
        self.check_listener_kind(&schema, &resolved, kind)?;
        self.listeners.push(ChangeListener {
            path: resolved,
            kind,
            callback: Rc::new(callback),
        });
        Ok(())
    }

    /// Rejects listener declarations whose parameter kind can never occur
    /// at the path's tail.
    fn check_listener_kind(
        &self,
        schema: &Schema,
        resolved: &path::ResolvedPath,
        kind: ChangeKind,
    ) -> Result<()> {
        let Some(field_name) = &resolved.target_field else {
            // Watching every field: any kind can occur.
            return Ok(());
        };
        let endpoint_types: Vec<&TypeSchema> = match &resolved.endpoint_types {
            Some(types) => types.iter().filter_map(|id| schema.get_type(*id)).collect(),
            None => schema.types().collect(),
        };
        let mut possible = false;
        for ty in endpoint_types {
            let Some(field) = ty.field_named(field_name) else {
                continue;
            };
            let field_kind = match &field.kind {
                FieldKind::Counter => {
                    return Err(SchemaError::CounterConstraint(field.name.clone()).into())
                }
                FieldKind::Set(_) => ChangeKind::Set,
                FieldKind::List(_) => ChangeKind::List,
                FieldKind::Map { .. } => ChangeKind::Map,
                FieldKind::Simple(_)
                | FieldKind::Reference(_)
                | FieldKind::Enum(_)
                | FieldKind::EnumArray { .. } => ChangeKind::Simple,
            };
            if field_kind == kind {
                possible = true;
            }
        }
        if possible {
            Ok(())
        } else {
            Err(ListenerError::ImpossibleKind {
                kind: match kind {
                    ChangeKind::Simple => "simple-change",
                    ChangeKind::Set => "set-change",
                    ChangeKind::List => "list-change",
                    ChangeKind::Map => "map-change",
                },
                field: field_name.clone(),
            }
            .into())
        }
    }

    fn dispatch_create(&mut self, ty: TypeId, id: ObjId) {
        let callbacks: Vec<Rc<CreateFn>> = self
            .create_callbacks
            .iter()
            .filter(|(filter, _)| filter.is_none() || *filter == Some(ty))
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(self, id);
        }
    }
}
