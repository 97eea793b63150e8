//! Change events delivered to path listeners.

use std::collections::BTreeMap;
use stratadb_encoding::FieldValue;
use stratadb_primitives::{FieldId, ObjId, SchemaId};

/// The parameter kind a change listener declares. A listener only ever
/// receives changes of its declared kind; declaring a kind that can never
/// occur at the path's tail is rejected at registration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    Simple,
    Set,
    List,
    Map,
}

/// What happened to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    Simple {
        old: FieldValue,
        new: FieldValue,
    },
    SetAdd {
        element: FieldValue,
    },
    SetRemove {
        element: FieldValue,
    },
    ListInsert {
        index: u64,
        element: FieldValue,
    },
    ListSet {
        index: u64,
        old: FieldValue,
        new: FieldValue,
    },
    ListRemove {
        index: u64,
        element: FieldValue,
    },
    MapPut {
        key: FieldValue,
        old: Option<FieldValue>,
        new: FieldValue,
    },
    MapRemove {
        key: FieldValue,
        old: FieldValue,
    },
}

impl FieldChange {
    pub fn kind(&self) -> ChangeKind {
        match self {
            FieldChange::Simple { .. } => ChangeKind::Simple,
            FieldChange::SetAdd { .. } | FieldChange::SetRemove { .. } => ChangeKind::Set,
            FieldChange::ListInsert { .. }
            | FieldChange::ListSet { .. }
            | FieldChange::ListRemove { .. } => ChangeKind::List,
            FieldChange::MapPut { .. } | FieldChange::MapRemove { .. } => ChangeKind::Map,
        }
    }
}

/// One notification: `source.field` changed, reaching the listener through
/// the path root `root`.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub root: ObjId,
    pub source: ObjId,
    pub field: FieldId,
    pub field_name: String,
    pub change: FieldChange,
}

/// The old values handed to on-schema-change callbacks, keyed both ways so
/// legacy consumers keyed by storage id keep matching.
#[derive(Debug, Clone, Default)]
pub struct OldValues {
    pub by_name: BTreeMap<String, FieldValue>,
    pub by_id: BTreeMap<FieldId, FieldValue>,
}

impl OldValues {
    pub(crate) fn insert(&mut self, name: &str, id: FieldId, value: FieldValue) {
        self.by_name.insert(name.to_owned(), value.clone());
        self.by_id.insert(id, value);
    }
}

/// A schema migration notification: `id` moved from `from` to `to`.
#[derive(Debug, Clone)]
pub struct SchemaChangeEvent {
    pub id: ObjId,
    pub from: SchemaId,
    pub to: SchemaId,
    pub old_values: OldValues,
}
