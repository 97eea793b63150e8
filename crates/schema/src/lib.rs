//! Schema definitions, validation, the persisted registry and listener
//! paths for the stratadb object engine.

pub mod def;
mod error;
pub mod manifest;
pub mod path;
pub mod registry;
mod schema;

pub use def::{
    CompositeIndexDecl, DeleteAction, ElementDecl, ElementKind, Exclude, FieldDecl, FieldKind,
    ObjectTypeDecl, RefSpec, UpgradePolicy,
};
pub use error::{ListenerError, SchemaError};
pub use schema::{RefPosition, Schema, SlotPlace, SlotShape, TypeSchema};
