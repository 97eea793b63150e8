use stratadb_encoding::EncodingError;
use stratadb_primitives::{FieldId, IndexId, TypeId};
use thiserror::Error;

/// Rejections raised while validating, persisting or loading a schema.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("schema declares no object types")]
    Empty,
    #[error("storage id 0 is reserved (declared on `{0}`)")]
    ReservedStorageId(String),
    #[error("duplicate type name `{0}`")]
    DuplicateTypeName(String),
    #[error("duplicate type storage id {0}")]
    DuplicateTypeId(TypeId),
    #[error("type `{ty}` declares duplicate field name `{field}`")]
    DuplicateFieldName { ty: String, field: String },
    #[error("type `{ty}` declares duplicate field storage id {field}")]
    DuplicateFieldId { ty: String, field: FieldId },
    #[error("storage id {0} is used for more than one of type/field/index")]
    StorageIdClash(u32),
    #[error("field storage id {field} is declared with incompatible shapes (`{a}` vs `{b}`)")]
    IncongruentField { field: FieldId, a: String, b: String },
    #[error("enum on `{0}` declares no identifiers or a duplicate identifier")]
    BadEnumModel(String),
    #[error("counter field `{0}` may not be indexed, unique or validated")]
    CounterConstraint(String),
    #[error("simple field `{0}` must use a scalar encoding")]
    BadSimpleEncoding(String),
    #[error("enum-array field `{0}` must have rank of at least 1")]
    BadEnumArrayRank(String),
    #[error("complex field `{0}` carries the indexed flag; index its element instead")]
    IndexedComplex(String),
    #[error("unique field `{0}` must be indexed")]
    UniqueUnindexed(String),
    #[error("unique constraint on `{field}` is not supported for {kind} fields")]
    UniqueOnKind { field: String, kind: &'static str },
    #[error("reference field `{field}` combines `IGNORE` on delete with allow-deleted = false")]
    DanglingIgnore { field: String },
    #[error("delete action {action} is not valid on field `{field}`")]
    BadDeleteAction { field: String, action: &'static str },
    #[error("exclusion on `{field}` does not fit the field: {why}")]
    BadExclude { field: String, why: String },
    #[error("composite index `{index}` must span 2 to 4 simple fields, got {got}")]
    CompositeArity { index: String, got: usize },
    #[error("composite index `{index}` names unknown or non-indexable field {field}")]
    CompositeField { index: String, field: FieldId },
    #[error("composite index `{index}` exclusion tuple has {got} positions, expected {expected}")]
    CompositeExcludeArity {
        index: String,
        got: usize,
        expected: usize,
    },
    #[error("null exclusion marker on primitive position {position} of composite index `{index}`")]
    NullOnPrimitivePosition { index: String, position: usize },
    #[error("duplicate composite index id {0}")]
    DuplicateIndexId(IndexId),
    #[error(
        "field storage id {field} changes shape across schema versions (`{old}` vs `{new}`)"
    )]
    IncompatibleUpgrade {
        field: FieldId,
        old: String,
        new: String,
    },
    #[error("indexed reference {field} widens its target restriction across schema versions")]
    WidenedReference { field: FieldId },
    #[error("composite index id {0} changes its positions across schema versions")]
    IncompatibleComposite(IndexId),
    #[error("schema manifest is malformed: {0}")]
    BadManifest(String),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("store error while accessing the schema registry: {0}")]
    Kv(#[from] stratadb_kv::KvError),
}

/// Rejections raised while parsing or resolving a change-listener path.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ListenerError {
    #[error("listener path has invalid syntax near `{0}`")]
    Syntax(String),
    #[error("listener path step `{step}` does not resolve to a reference on any reachable type")]
    Unresolved { step: String },
    #[error("listener path names unknown type `{0}`")]
    UnknownType(String),
    #[error("listener path watches unknown field `{0}`")]
    UnknownField(String),
    #[error("listener parameter kind `{kind}` is impossible for field `{field}`")]
    ImpossibleKind { kind: &'static str, field: String },
}
