//! Storage-level primitives shared by every `stratadb` crate:
//! the storage-id newtypes, the prefix-free storage-id byte encoding,
//! and the object identifier [`ObjId`].

mod ids;
mod objid;
mod varint;

pub use ids::{FieldId, IndexId, SchemaId, TypeId};
pub use objid::{ObjId, ParseObjIdError, OBJ_ID_LEN};
pub use varint::{read_storage_id, storage_id_len, write_storage_id, InvalidStorageId};
