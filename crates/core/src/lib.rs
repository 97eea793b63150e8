//! stratadb: an object persistence engine layered over an ordered
//! byte-to-byte key-value store.
//!
//! Application code declares object types (a schema), opens a
//! [`Database`], and works inside [`Transaction`]s: create objects, read
//! and write typed fields, run ordered index queries, and let the engine
//! keep secondary indexes, referential constraints, uniqueness and
//! change notifications consistent with every mutation. Objects persisted
//! under older schema versions migrate lazily as they are touched.

pub mod current;
mod database;
mod detached;
mod error;
mod event;
mod handle;
mod row;
mod tx;

pub use database::Database;
pub use detached::DetachedTransaction;
pub use error::{Error, IndexError, MigrateError, ObjectError, Result, ValidationError};
pub use event::{ChangeEvent, ChangeKind, FieldChange, OldValues, SchemaChangeEvent};
pub use handle::{CounterHandle, Handle, ListView, MapView, ObjHandle, SetView, UntypedHandle};
pub use tx::{CompositeQuery, IndexEntry, IndexExtra, IndexQuery, Transaction};

pub use stratadb_encoding::{EnumLit, EnumModel, FieldValue, ValueEncoding, F32, F64};
pub use stratadb_kv::{KvError, KvStore, KvTx, MemKv};
pub use stratadb_primitives::{FieldId, IndexId, ObjId, SchemaId, TypeId};
pub use stratadb_schema::{
    CompositeIndexDecl, DeleteAction, ElementDecl, ElementKind, Exclude, FieldDecl, FieldKind,
    ObjectTypeDecl, RefSpec, Schema, UpgradePolicy,
};
