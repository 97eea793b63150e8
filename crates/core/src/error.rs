use enum_as_inner::EnumAsInner;
use stratadb_encoding::EncodingError;
use stratadb_kv::KvError;
use stratadb_primitives::{FieldId, ObjId, SchemaId, TypeId};
use stratadb_schema::{ListenerError, SchemaError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything the engine can fail with.
#[derive(Error, Debug, EnumAsInner)]
pub enum Error {
    #[error("SchemaError: {0}")]
    Schema(#[from] SchemaError),
    #[error("ListenerError: {0}")]
    Listener(#[from] ListenerError),
    #[error("EncodingError: {0}")]
    Encoding(#[from] EncodingError),
    #[error("ObjectError: {0}")]
    Object(#[from] ObjectError),
    #[error("IndexError: {0}")]
    Index(#[from] IndexError),
    #[error("MigrateError: {0}")]
    Migrate(#[from] MigrateError),
    #[error("ValidationError: {0}")]
    Validation(#[from] ValidationError),
    /// The underlying snapshot was closed; the transaction must be
    /// abandoned.
    #[error("StaleTransaction: {0}")]
    Kv(#[from] KvError),
}

#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("unknown object type `{0}`")]
    UnknownType(String),
    #[error("object {0} does not exist")]
    Deleted(ObjId),
    #[error("object {id} has type {actual}, expected `{expected}`")]
    TypeMismatch {
        id: ObjId,
        actual: TypeId,
        expected: String,
    },
    #[error("object {id} is still referenced through field `{field}`")]
    Referenced { id: ObjId, field: String },
    #[error("reference target {target} is outside the restriction declared on `{field}`")]
    IncompatibleReference { field: String, target: ObjId },
    #[error("type `{ty}` has no field `{field}`")]
    UnknownField { ty: String, field: String },
    #[error("field `{field}` is not a {expected} field")]
    WrongFieldKind {
        field: String,
        expected: &'static str,
    },
    #[error("value of kind {value} does not fit field `{field}`")]
    BadValue {
        field: String,
        value: &'static str,
    },
    #[error("list index {index} out of bounds (len {len})")]
    ListIndex { index: u64, len: u64 },
    #[error("copy destination uses a different schema")]
    DestinationSchema,
    #[error("object {0} has a malformed primary row")]
    BadRow(ObjId),
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("field `{0}` is not indexed")]
    NotIndexed(String),
    #[error("field name `{0}` resolves to more than one storage id across types")]
    AmbiguousField(String),
    #[error("no composite index named `{0}`")]
    UnknownComposite(String),
    #[error("query value type `{requested}` is not comparable to indexed type `{declared}`")]
    IncomparableValueType {
        requested: &'static str,
        declared: &'static str,
    },
    #[error("composite query supplies {got} value types, index `{index}` has {expected}")]
    Arity {
        index: String,
        got: usize,
        expected: usize,
    },
}

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("type {0} is not in the current schema")]
    TypeNotInSchema(TypeId),
    #[error("object {id} was stored under unknown schema {schema}")]
    UnknownSchema { id: ObjId, schema: SchemaId },
    #[error("no exact conversion for field `{field}` from {from} to {to}")]
    UpgradeConversion {
        field: String,
        from: &'static str,
        to: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("unique constraint on field {field} violated: {count} objects share one value")]
    Unique { field: FieldId, count: usize },
    #[error("unique composite index `{index}` violated: {count} objects share one tuple")]
    CompositeUnique { index: String, count: usize },
    #[error("validator rejected object {id}: {message}")]
    Predicate { id: ObjId, message: String },
}
