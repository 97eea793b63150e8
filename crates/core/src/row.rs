//! The primary object row: a schema-id header followed by the inline
//! values of every simple-kind field, each tagged with its storage id.
//!
//! Counters and collections live out of line; everything else is decoded
//! against the *stored* schema's type descriptor, which is how an object
//! persisted under an older schema stays readable until it migrates.

use crate::error::{Error, ObjectError, Result};
use std::collections::BTreeMap;
use stratadb_encoding::{default_value, read_value, write_value, FieldValue};
use stratadb_primitives::{read_storage_id, write_storage_id, FieldId, ObjId, SchemaId};
use stratadb_schema::TypeSchema;

#[derive(Debug, Clone)]
pub(crate) struct ObjRow {
    pub schema_id: SchemaId,
    pub values: BTreeMap<FieldId, FieldValue>,
}

/// Reads just the header, without needing any schema.
pub(crate) fn header_schema_id(id: ObjId, bytes: &[u8]) -> Result<SchemaId> {
    let head: [u8; SchemaId::LEN] = bytes
        .get(..SchemaId::LEN)
        .and_then(|head| head.try_into().ok())
        .ok_or(ObjectError::BadRow(id))?;
    Ok(SchemaId::from_bytes(head))
}

pub(crate) fn encode_row(
    schema_id: SchemaId,
    ty: &TypeSchema,
    values: &BTreeMap<FieldId, FieldValue>,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(SchemaId::LEN + values.len() * 8);
    out.extend_from_slice(schema_id.as_bytes());
    for field in ty.inline_fields() {
        let encoding = field.kind.inline_encoding().expect("inline field");
        let value = values
            .get(&field.id)
            .cloned()
            .unwrap_or_else(|| default_value(&encoding));
        write_storage_id(&mut out, field.id.0);
        write_value(&mut out, &encoding, &value).map_err(Error::Encoding)?;
    }
    Ok(out)
}

pub(crate) fn decode_row(id: ObjId, bytes: &[u8], ty: &TypeSchema) -> Result<ObjRow> {
    let schema_id = header_schema_id(id, bytes)?;
    let mut input = &bytes[SchemaId::LEN..];
    let mut values = BTreeMap::new();
    while !input.is_empty() {
        let raw = read_storage_id(&mut input)
            .map_err(|_| Error::Object(ObjectError::BadRow(id)))?;
        let field = ty
            .field(FieldId(raw))
            .ok_or(ObjectError::BadRow(id))?;
        let encoding = field
            .kind
            .inline_encoding()
            .ok_or(ObjectError::BadRow(id))?;
        let value = read_value(&mut input, &encoding)?;
        values.insert(field.id, value);
    }
    Ok(ObjRow { schema_id, values })
}
