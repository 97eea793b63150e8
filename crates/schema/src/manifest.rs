//! The private binary codec for persisted schema manifests.
//!
//! The encoding is deterministic: types in storage-id order, fields in
//! storage-id order, sets in their sorted order. The schema id is the
//! blake3 hash of these bytes, so determinism is what makes the id a
//! content address. The format is internal to the registry subspace and is
//! versioned by its magic.

use crate::def::{
    CompositeIndexDecl, DeleteAction, ElementDecl, ElementKind, Exclude, FieldDecl, FieldKind,
    ObjectTypeDecl, RefSpec, UpgradePolicy,
};
use crate::error::SchemaError;
use crate::schema::Schema;
use std::collections::BTreeMap;
use std::ops::Bound;
use stratadb_encoding::{read_value, write_value, EnumModel, FieldValue, ValueEncoding};
use stratadb_primitives::{FieldId, TypeId};

const MAGIC: &[u8; 4] = b"SDM1";

/// Serializes a validated schema into its canonical manifest bytes.
pub fn encode(schema: &Schema) -> Vec<u8> {
    let mut w = Writer::default();
    w.buf.extend_from_slice(MAGIC);
    let types: Vec<_> = schema.types().collect();
    w.put_u32(types.len() as u32);
    for ty in types {
        w.put_str(&ty.name);
        w.put_u32(ty.id.0);
        w.put_u32(ty.fields().len() as u32);
        for field in ty.fields() {
            put_field(&mut w, field);
        }
        w.put_u32(ty.composites().len() as u32);
        for composite in ty.composites() {
            put_composite(&mut w, composite, ty.fields());
        }
    }
    w.buf
}

/// Reconstructs and re-validates a schema from manifest bytes.
pub fn decode(bytes: &[u8]) -> Result<Schema, SchemaError> {
    let mut r = Reader { input: bytes };
    let magic = r.take_n(4, "magic")?;
    if magic != MAGIC {
        return Err(SchemaError::BadManifest("bad magic".into()));
    }
    let type_count = r.take_u32("type count")?;
    let mut decls = Vec::with_capacity(type_count as usize);
    for _ in 0..type_count {
        let name = r.take_str("type name")?;
        let id = r.take_u32("type id")?;
        let field_count = r.take_u32("field count")?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(take_field(&mut r)?);
        }
        let encodings: BTreeMap<FieldId, ValueEncoding> = fields
            .iter()
            .filter_map(|f: &FieldDecl| f.kind.inline_encoding().map(|e| (f.id, e)))
            .collect();
        let composite_count = r.take_u32("composite count")?;
        let mut composites = Vec::with_capacity(composite_count as usize);
        for _ in 0..composite_count {
            composites.push(take_composite(&mut r, &encodings)?);
        }
        decls.push(ObjectTypeDecl {
            name,
            id: TypeId(id),
            fields,
            composites,
        });
    }
    if !r.input.is_empty() {
        return Err(SchemaError::BadManifest("trailing bytes".into()));
    }
    Schema::build(decls)
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn put_u8(&mut self, x: u8) {
        self.buf.push(x);
    }

    fn put_bool(&mut self, x: bool) {
        self.put_u8(x as u8);
    }

    fn put_u32(&mut self, x: u32) {
        self.buf.extend_from_slice(&x.to_le_bytes());
    }

    fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

struct Reader<'a> {
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    fn bad(what: &str) -> SchemaError {
        SchemaError::BadManifest(format!("truncated or invalid {what}"))
    }

    fn take_n(&mut self, n: usize, what: &str) -> Result<&'a [u8], SchemaError> {
        if self.input.len() < n {
            return Err(Self::bad(what));
        }
        let (head, rest) = self.input.split_at(n);
        self.input = rest;
        Ok(head)
    }

    fn take_u8(&mut self, what: &str) -> Result<u8, SchemaError> {
        Ok(self.take_n(1, what)?[0])
    }

    fn take_bool(&mut self, what: &str) -> Result<bool, SchemaError> {
        match self.take_u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Self::bad(what)),
        }
    }

    fn take_u32(&mut self, what: &str) -> Result<u32, SchemaError> {
        let bytes = self.take_n(4, what)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn take_str(&mut self, what: &str) -> Result<String, SchemaError> {
        let len = self.take_u32(what)? as usize;
        let bytes = self.take_n(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Self::bad(what))
    }
}

fn put_encoding(w: &mut Writer, encoding: &ValueEncoding) {
    let tag = match encoding {
        ValueEncoding::Bool => 0u8,
        ValueEncoding::I8 => 1,
        ValueEncoding::U8 => 2,
        ValueEncoding::I16 => 3,
        ValueEncoding::U16 => 4,
        ValueEncoding::I32 => 5,
        ValueEncoding::U32 => 6,
        ValueEncoding::I64 => 7,
        ValueEncoding::U64 => 8,
        ValueEncoding::F32 => 9,
        ValueEncoding::F64 => 10,
        ValueEncoding::String => 11,
        ValueEncoding::Bytes => 12,
        ValueEncoding::Reference => 13,
        ValueEncoding::Enum(_) => 14,
        ValueEncoding::Array(_) => 15,
    };
    w.put_u8(tag);
    match encoding {
        ValueEncoding::Enum(model) => put_enum_model(w, model),
        ValueEncoding::Array(elem) => put_encoding(w, elem),
        _ => {}
    }
}

fn take_encoding(r: &mut Reader) -> Result<ValueEncoding, SchemaError> {
    Ok(match r.take_u8("encoding tag")? {
        0 => ValueEncoding::Bool,
        1 => ValueEncoding::I8,
        2 => ValueEncoding::U8,
        3 => ValueEncoding::I16,
        4 => ValueEncoding::U16,
        5 => ValueEncoding::I32,
        6 => ValueEncoding::U32,
        7 => ValueEncoding::I64,
        8 => ValueEncoding::U64,
        9 => ValueEncoding::F32,
        10 => ValueEncoding::F64,
        11 => ValueEncoding::String,
        12 => ValueEncoding::Bytes,
        13 => ValueEncoding::Reference,
        14 => ValueEncoding::Enum(take_enum_model(r)?),
        15 => ValueEncoding::Array(Box::new(take_encoding(r)?)),
        _ => return Err(Reader::bad("encoding tag")),
    })
}

fn put_enum_model(w: &mut Writer, model: &EnumModel) {
    w.put_u32(model.len() as u32);
    for ident in model.idents() {
        w.put_str(ident);
    }
}

fn take_enum_model(r: &mut Reader) -> Result<EnumModel, SchemaError> {
    let count = r.take_u32("enum ident count")?;
    let mut idents = Vec::with_capacity(count as usize);
    for _ in 0..count {
        idents.push(r.take_str("enum ident")?);
    }
    Ok(EnumModel::new(idents))
}

fn put_ref_spec(w: &mut Writer, spec: &RefSpec) {
    w.put_u32(spec.targets.len() as u32);
    for target in &spec.targets {
        w.put_u32(target.0);
    }
    w.put_u8(match spec.on_target_delete {
        DeleteAction::Exception => 0,
        DeleteAction::Nullify => 1,
        DeleteAction::Remove => 2,
        DeleteAction::Cascade => 3,
        DeleteAction::Ignore => 4,
    });
    w.put_bool(spec.forward_delete);
    w.put_bool(spec.allow_deleted);
    for cascades in [&spec.forward_cascades, &spec.inverse_cascades] {
        w.put_u32(cascades.len() as u32);
        for name in cascades {
            w.put_str(name);
        }
    }
}

fn take_ref_spec(r: &mut Reader) -> Result<RefSpec, SchemaError> {
    let target_count = r.take_u32("target count")?;
    let mut targets = std::collections::BTreeSet::new();
    for _ in 0..target_count {
        targets.insert(TypeId(r.take_u32("target id")?));
    }
    let on_target_delete = match r.take_u8("delete action")? {
        0 => DeleteAction::Exception,
        1 => DeleteAction::Nullify,
        2 => DeleteAction::Remove,
        3 => DeleteAction::Cascade,
        4 => DeleteAction::Ignore,
        _ => return Err(Reader::bad("delete action")),
    };
    let forward_delete = r.take_bool("forward delete")?;
    let allow_deleted = r.take_bool("allow deleted")?;
    let mut sets = [std::collections::BTreeSet::new(), std::collections::BTreeSet::new()];
    for set in &mut sets {
        let count = r.take_u32("cascade count")?;
        for _ in 0..count {
            set.insert(r.take_str("cascade name")?);
        }
    }
    let [forward_cascades, inverse_cascades] = sets;
    Ok(RefSpec {
        targets,
        on_target_delete,
        forward_delete,
        allow_deleted,
        forward_cascades,
        inverse_cascades,
    })
}

fn put_element(w: &mut Writer, element: &ElementDecl) {
    w.put_u32(element.id.0);
    match &element.kind {
        ElementKind::Simple(encoding) => {
            w.put_u8(0);
            put_encoding(w, encoding);
        }
        ElementKind::Reference(spec) => {
            w.put_u8(1);
            put_ref_spec(w, spec);
        }
    }
    w.put_bool(element.indexed);
}

fn take_element(r: &mut Reader) -> Result<ElementDecl, SchemaError> {
    let id = r.take_u32("element id")?;
    let kind = match r.take_u8("element kind")? {
        0 => ElementKind::Simple(take_encoding(r)?),
        1 => ElementKind::Reference(take_ref_spec(r)?),
        _ => return Err(Reader::bad("element kind")),
    };
    let indexed = r.take_bool("element indexed")?;
    Ok(ElementDecl {
        id: FieldId(id),
        kind,
        indexed,
    })
}

fn put_exclude(w: &mut Writer, encoding: &ValueEncoding, exclude: &Exclude) {
    let put_value = |w: &mut Writer, value: &FieldValue| {
        write_value(&mut w.buf, encoding, value).expect("validated exclusion value failed to encode")
    };
    match exclude {
        Exclude::Null => w.put_u8(0),
        Exclude::NonNull => w.put_u8(1),
        Exclude::Value(value) => {
            w.put_u8(2);
            put_value(w, value);
        }
        Exclude::Range { from, to } => {
            w.put_u8(3);
            for bound in [from, to] {
                match bound {
                    Bound::Unbounded => w.put_u8(0),
                    Bound::Included(value) => {
                        w.put_u8(1);
                        put_value(w, value);
                    }
                    Bound::Excluded(value) => {
                        w.put_u8(2);
                        put_value(w, value);
                    }
                }
            }
        }
    }
}

fn take_exclude(r: &mut Reader, encoding: &ValueEncoding) -> Result<Exclude, SchemaError> {
    let take_bound = |r: &mut Reader| -> Result<Bound<FieldValue>, SchemaError> {
        Ok(match r.take_u8("range bound tag")? {
            0 => Bound::Unbounded,
            1 => Bound::Included(read_value(&mut r.input, encoding)?),
            2 => Bound::Excluded(read_value(&mut r.input, encoding)?),
            _ => return Err(Reader::bad("range bound tag")),
        })
    };
    Ok(match r.take_u8("exclude tag")? {
        0 => Exclude::Null,
        1 => Exclude::NonNull,
        2 => Exclude::Value(read_value(&mut r.input, encoding)?),
        3 => {
            let from = take_bound(r)?;
            let to = take_bound(r)?;
            Exclude::Range { from, to }
        }
        _ => return Err(Reader::bad("exclude tag")),
    })
}

fn put_field(w: &mut Writer, field: &FieldDecl) {
    w.put_str(&field.name);
    w.put_u32(field.id.0);
    match &field.kind {
        FieldKind::Simple(encoding) => {
            w.put_u8(0);
            put_encoding(w, encoding);
        }
        FieldKind::Counter => w.put_u8(1),
        FieldKind::Reference(spec) => {
            w.put_u8(2);
            put_ref_spec(w, spec);
        }
        FieldKind::Set(element) => {
            w.put_u8(3);
            put_element(w, element);
        }
        FieldKind::List(element) => {
            w.put_u8(4);
            put_element(w, element);
        }
        FieldKind::Map { key, value } => {
            w.put_u8(5);
            put_element(w, key);
            put_element(w, value);
        }
        FieldKind::Enum(model) => {
            w.put_u8(6);
            put_enum_model(w, model);
        }
        FieldKind::EnumArray { model, rank } => {
            w.put_u8(7);
            put_enum_model(w, model);
            w.put_u8(*rank);
        }
    }
    w.put_bool(field.indexed);
    w.put_bool(field.unique);
    w.put_u8(match field.upgrade {
        UpgradePolicy::Attempt => 0,
        UpgradePolicy::Reset => 1,
        UpgradePolicy::Require => 2,
    });
    w.put_u32(field.excludes.len() as u32);
    if let Some(encoding) = field.kind.inline_encoding() {
        for exclude in &field.excludes {
            put_exclude(w, &encoding, exclude);
        }
    }
}

fn take_field(r: &mut Reader) -> Result<FieldDecl, SchemaError> {
    let name = r.take_str("field name")?;
    let id = r.take_u32("field id")?;
    let kind = match r.take_u8("field kind")? {
        0 => FieldKind::Simple(take_encoding(r)?),
        1 => FieldKind::Counter,
        2 => FieldKind::Reference(take_ref_spec(r)?),
        3 => FieldKind::Set(take_element(r)?),
        4 => FieldKind::List(take_element(r)?),
        5 => FieldKind::Map {
            key: take_element(r)?,
            value: take_element(r)?,
        },
        6 => FieldKind::Enum(take_enum_model(r)?),
        7 => {
            let model = take_enum_model(r)?;
            let rank = r.take_u8("enum-array rank")?;
            FieldKind::EnumArray { model, rank }
        }
        _ => return Err(Reader::bad("field kind")),
    };
    let indexed = r.take_bool("field indexed")?;
    let unique = r.take_bool("field unique")?;
    let upgrade = match r.take_u8("upgrade policy")? {
        0 => UpgradePolicy::Attempt,
        1 => UpgradePolicy::Reset,
        2 => UpgradePolicy::Require,
        _ => return Err(Reader::bad("upgrade policy")),
    };
    let exclude_count = r.take_u32("exclude count")?;
    let mut excludes = Vec::with_capacity(exclude_count as usize);
    if exclude_count > 0 {
        let encoding = kind
            .inline_encoding()
            .ok_or_else(|| Reader::bad("excludes on valueless field"))?;
        for _ in 0..exclude_count {
            excludes.push(take_exclude(r, &encoding)?);
        }
    }
    Ok(FieldDecl {
        name,
        id: FieldId(id),
        kind,
        indexed,
        unique,
        excludes,
        upgrade,
    })
}

fn put_composite(w: &mut Writer, composite: &CompositeIndexDecl, fields: &[FieldDecl]) {
    w.put_str(&composite.name);
    w.put_u32(composite.id.0);
    w.put_u8(composite.fields.len() as u8);
    for field in &composite.fields {
        w.put_u32(field.0);
    }
    w.put_bool(composite.unique);
    w.put_u32(composite.excludes.len() as u32);
    let encodings: Vec<ValueEncoding> = composite
        .fields
        .iter()
        .map(|id| {
            fields
                .iter()
                .find(|f| f.id == *id)
                .and_then(|f| f.kind.inline_encoding())
                .expect("validated composite position lost its encoding")
        })
        .collect();
    for tuple in &composite.excludes {
        for (exclude, encoding) in tuple.iter().zip(&encodings) {
            put_exclude(w, encoding, exclude);
        }
    }
}

fn take_composite(
    r: &mut Reader,
    encodings: &BTreeMap<FieldId, ValueEncoding>,
) -> Result<CompositeIndexDecl, SchemaError> {
    let name = r.take_str("composite name")?;
    let id = r.take_u32("composite id")?;
    let field_count = r.take_u8("composite field count")?;
    let mut fields = smallvec::SmallVec::new();
    for _ in 0..field_count {
        fields.push(FieldId(r.take_u32("composite field id")?));
    }
    let unique = r.take_bool("composite unique")?;
    let tuple_count = r.take_u32("composite exclude count")?;
    let position_encodings: Vec<&ValueEncoding> = fields
        .iter()
        .map(|id: &FieldId| {
            encodings
                .get(id)
                .ok_or_else(|| Reader::bad("composite position encoding"))
        })
        .collect::<Result<_, _>>()?;
    let mut excludes = Vec::with_capacity(tuple_count as usize);
    for _ in 0..tuple_count {
        let mut tuple = Vec::with_capacity(field_count as usize);
        for encoding in &position_encodings {
            tuple.push(take_exclude(r, encoding)?);
        }
        excludes.push(tuple);
    }
    Ok(CompositeIndexDecl {
        name,
        id: stratadb_primitives::IndexId(id),
        fields,
        unique,
        excludes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{FieldDecl, ObjectTypeDecl, RefSpec};
    use pretty_assertions::assert_eq;

    fn sample() -> Schema {
        let color = EnumModel::new(["RED", "GREEN"]);
        Schema::build(vec![
            ObjectTypeDecl::new("Account", 2),
            ObjectTypeDecl::new("Person", 1)
                .with_field(
                    FieldDecl::simple("name", 10, ValueEncoding::String)
                        .unique()
                        .with_exclude(Exclude::Value(FieldValue::from("frob"))),
                )
                .with_field(FieldDecl::simple("age", 11, ValueEncoding::I32).indexed())
                .with_field(FieldDecl::new("shade", 13, FieldKind::Enum(color)))
                .with_field(FieldDecl::reference(
                    "account",
                    12,
                    RefSpec::to_type(TypeId(2)).with_on_delete(DeleteAction::Nullify),
                ))
                .with_field(FieldDecl::new(
                    "tags",
                    14,
                    FieldKind::Set(ElementDecl::simple(15, ValueEncoding::String).indexed()),
                ))
                .with_field(FieldDecl::new(
                    "scores",
                    16,
                    FieldKind::Map {
                        key: ElementDecl::simple(17, ValueEncoding::String),
                        value: ElementDecl::simple(18, ValueEncoding::I64).indexed(),
                    },
                ))
                .with_composite(
                    CompositeIndexDecl::new("name_age", 20, [10, 11])
                        .unique()
                        .with_exclude_tuple(vec![Exclude::Null, Exclude::NonNull]),
                ),
        ])
        .unwrap()
    }

    #[test]
    fn manifest_round_trips_and_preserves_id() {
        let schema = sample();
        let bytes = encode(&schema);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.id(), schema.id());
        let person = decoded.type_named("Person").unwrap();
        assert_eq!(person.fields().len(), 6);
        assert!(person.field_named("name").unwrap().unique);
        assert_eq!(person.composites().len(), 1);
        // Encoding the decoded schema reproduces identical bytes.
        assert_eq!(encode(&decoded), bytes);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode(b"nope"), Err(SchemaError::BadManifest(_))));
        let mut bytes = encode(&sample());
        bytes.truncate(bytes.len() - 3);
        assert!(decode(&bytes).is_err());
    }
}
