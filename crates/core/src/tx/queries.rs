//! Index query views.
//!
//! A query resolves the field (or composite index) to its storage slot up
//! front and captures its bounds; the store is only scanned when the view
//! is iterated, so views are cheap to build and always observe the
//! transaction's latest writes. Results come back in encoded-key order:
//! value-major, then target id, then the list position or map key for the
//! flavors that carry one.

use super::Transaction;
use crate::error::{IndexError, ObjectError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use stratadb_encoding::{prefix_successor, read_value, write_value, FieldValue, ValueEncoding};
use stratadb_primitives::{storage_id_len, FieldId, ObjId, TypeId};
use stratadb_schema::{FieldKind, Schema, SlotPlace, TypeSchema};

/// The trailing component an index entry carries beyond its target id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexExtra {
    None,
    ListIndex(u64),
    MapKey(FieldValue),
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub value: FieldValue,
    pub id: ObjId,
    pub extra: IndexExtra,
}

/// A lazy ordered view over one simple or collection-position index.
pub struct IndexQuery<'tx> {
    tx: &'tx Transaction,
    slot: FieldId,
    encoding: ValueEncoding,
    place: SlotPlace,
    /// Key encoding of the enclosing map, for map-value views.
    extra_encoding: Option<ValueEncoding>,
    start_type: Option<TypeId>,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    target_lower: Bound<ObjId>,
    target_upper: Bound<ObjId>,
}

impl<'tx> IndexQuery<'tx> {
    fn new(
        tx: &'tx Transaction,
        slot: FieldId,
        encoding: ValueEncoding,
        place: SlotPlace,
        extra_encoding: Option<ValueEncoding>,
        start_type: Option<TypeId>,
    ) -> Self {
        Self {
            tx,
            slot,
            encoding,
            place,
            extra_encoding,
            start_type,
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            target_lower: Bound::Unbounded,
            target_upper: Bound::Unbounded,
        }
    }

    /// Restricts the view to a sub-range of values, inclusive or exclusive
    /// at each end.
    pub fn with_value_bounds(
        mut self,
        lower: Bound<&FieldValue>,
        upper: Bound<&FieldValue>,
    ) -> Result<Self> {
        self.lower = encode_bound(&self.encoding, lower)?;
        self.upper = encode_bound(&self.encoding, upper)?;
        Ok(self)
    }

    /// Restricts the view to a sub-range of target object ids.
    pub fn with_target_bounds(mut self, lower: Bound<ObjId>, upper: Bound<ObjId>) -> Self {
        self.target_lower = lower;
        self.target_upper = upper;
        self
    }

    fn scan_range(&self) -> (Vec<u8>, Option<Vec<u8>>) {
        let mut prefix = Vec::new();
        stratadb_primitives::write_storage_id(&mut prefix, self.slot.0);
        let from = match &self.lower {
            Bound::Unbounded => prefix.clone(),
            Bound::Included(value) => {
                let mut key = prefix.clone();
                key.extend_from_slice(value);
                key
            }
            // Excluding a value skips its whole entry group.
            Bound::Excluded(value) => {
                let mut key = prefix.clone();
                key.extend_from_slice(value);
                prefix_successor(&key).unwrap_or_default()
            }
        };
        let to = match &self.upper {
            Bound::Unbounded => prefix_successor(&prefix),
            Bound::Included(value) => {
                let mut key = prefix.clone();
                key.extend_from_slice(value);
                prefix_successor(&key)
            }
            Bound::Excluded(value) => {
                let mut key = prefix;
                key.extend_from_slice(value);
                Some(key)
            }
        };
        (from, to)
    }

    fn admits_target(&self, id: ObjId) -> bool {
        if let Some(start) = self.start_type {
            if id.type_id() != start {
                return false;
            }
        }
        let above = match &self.target_lower {
            Bound::Unbounded => true,
            Bound::Included(lo) => id >= *lo,
            Bound::Excluded(lo) => id > *lo,
        };
        let below = match &self.target_upper {
            Bound::Unbounded => true,
            Bound::Included(hi) => id <= *hi,
            Bound::Excluded(hi) => id < *hi,
        };
        above && below
    }

    /// Scans the subspace now, yielding entries in index order.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        let (from, to) = self.scan_range();
        let prefix_len = storage_id_len(self.slot.0);
        let mut out = Vec::new();
        for (key, _) in self.tx.kv.scan(&from, to.as_deref())? {
            let mut input = &key[prefix_len..];
            let value = read_value(&mut input, &self.encoding)?;
            let Ok(id) = ObjId::read_from(&mut input) else {
                continue;
            };
            if !self.admits_target(id) {
                continue;
            }
            let extra = match self.place {
                SlotPlace::ListElement => {
                    let bytes: [u8; 8] = input
                        .try_into()
                        .map_err(|_| ObjectError::BadRow(id))?;
                    IndexExtra::ListIndex(u64::from_be_bytes(bytes))
                }
                SlotPlace::MapValue => {
                    let key_encoding = self
                        .extra_encoding
                        .as_ref()
                        .expect("map-value views carry the key encoding");
                    IndexExtra::MapKey(read_value(&mut input, key_encoding)?)
                }
                _ => IndexExtra::None,
            };
            out.push(IndexEntry { value, id, extra });
        }
        Ok(out)
    }

    /// The classic query shape: an ordered map from value to the ordered
    /// set of object ids holding it.
    pub fn collect_map(&self) -> Result<BTreeMap<FieldValue, BTreeSet<ObjId>>> {
        let mut out: BTreeMap<FieldValue, BTreeSet<ObjId>> = BTreeMap::new();
        for entry in self.entries()? {
            out.entry(entry.value).or_default().insert(entry.id);
        }
        Ok(out)
    }
}

fn encode_bound(
    encoding: &ValueEncoding,
    bound: Bound<&FieldValue>,
) -> Result<Bound<Vec<u8>>> {
    Ok(match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(value) => {
            let mut bytes = Vec::new();
            write_value(&mut bytes, encoding, value)?;
            Bound::Included(bytes)
        }
        Bound::Excluded(value) => {
            let mut bytes = Vec::new();
            write_value(&mut bytes, encoding, value)?;
            Bound::Excluded(bytes)
        }
    })
}

/// A lazy ordered view over one composite index.
pub struct CompositeQuery<'tx> {
    tx: &'tx Transaction,
    index_id: u32,
    name: String,
    encodings: Vec<ValueEncoding>,
    start_type: Option<TypeId>,
}

impl CompositeQuery<'_> {
    /// Entries in tuple order: `(values, object id)`.
    pub fn entries(&self) -> Result<Vec<(Vec<FieldValue>, ObjId)>> {
        let (from, to) = stratadb_kv::keyspace::subspace_range(self.index_id);
        let prefix_len = storage_id_len(self.index_id);
        let mut out = Vec::new();
        for (key, _) in self.tx.kv.scan(&from, to.as_deref())? {
            let mut input = &key[prefix_len..];
            let mut values = Vec::with_capacity(self.encodings.len());
            for encoding in &self.encodings {
                values.push(read_value(&mut input, encoding)?);
            }
            let Ok(id) = ObjId::read_from(&mut input) else {
                continue;
            };
            if let Some(start) = self.start_type {
                if id.type_id() != start {
                    continue;
                }
            }
            out.push((values, id));
        }
        Ok(out)
    }

    pub fn collect_map(&self) -> Result<BTreeMap<Vec<FieldValue>, BTreeSet<ObjId>>> {
        let mut out: BTreeMap<Vec<FieldValue>, BTreeSet<ObjId>> = BTreeMap::new();
        for (values, id) in self.entries()? {
            out.entry(values).or_default().insert(id);
        }
        Ok(out)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn check_comparable(declared: &ValueEncoding, requested: &ValueEncoding) -> Result<()> {
    if declared == requested {
        Ok(())
    } else {
        Err(IndexError::IncomparableValueType {
            requested: requested.kind_name(),
            declared: declared.kind_name(),
        }
        .into())
    }
}

impl Transaction {
    fn resolve_start(&self, schema: &Schema, start_type: Option<&str>) -> Result<Option<TypeId>> {
        match start_type {
            None => Ok(None),
            Some(name) => schema
                .type_named(name)
                .map(|ty| Some(ty.id))
                .ok_or_else(|| ObjectError::UnknownType(name.to_owned()).into()),
        }
    }

    /// Resolves `field` on the start type, or across every type when the
    /// start is unrestricted; cross-type resolution requires all
    /// declarations to share one storage id.
    fn resolve_field<'s>(
        &self,
        schema: &'s Schema,
        start_type: Option<TypeId>,
        field: &str,
    ) -> Result<&'s stratadb_schema::FieldDecl> {
        let types: Vec<&TypeSchema> = match start_type {
            Some(start) => schema.get_type(start).into_iter().collect(),
            None => schema.types().collect(),
        };
        let mut found: Option<&stratadb_schema::FieldDecl> = None;
        for ty in types {
            let Some(decl) = ty.field_named(field) else {
                continue;
            };
            match found {
                None => found = Some(decl),
                Some(existing) if existing.id == decl.id => {}
                Some(_) => return Err(IndexError::AmbiguousField(field.to_owned()).into()),
            }
        }
        found.ok_or_else(|| {
            ObjectError::UnknownField {
                ty: start_type
                    .and_then(|id| schema.get_type(id))
                    .map(|ty| ty.name.clone())
                    .unwrap_or_else(|| "<any>".to_owned()),
                field: field.to_owned(),
            }
            .into()
        })
    }

    /// Queries a simple-field index: `value → ordered set of object ids`,
    /// restricted to `start_type` when given.
    pub fn query_index(
        &self,
        start_type: Option<&str>,
        field: &str,
        value_type: &ValueEncoding,
    ) -> Result<IndexQuery<'_>> {
        let schema: &Schema = &self.schema;
        let start = self.resolve_start(schema, start_type)?;
        let decl = self.resolve_field(schema, start, field)?;
        let declared = decl.kind.inline_encoding().ok_or_else(|| {
            ObjectError::WrongFieldKind {
                field: field.to_owned(),
                expected: "simple",
            }
        })?;
        if !decl.indexed {
            return Err(IndexError::NotIndexed(field.to_owned()).into());
        }
        check_comparable(&declared, value_type)?;
        Ok(IndexQuery::new(
            self,
            decl.id,
            declared,
            SlotPlace::Field,
            None,
            start,
        ))
    }

    /// Queries a set- or list-element index; list views additionally carry
    /// the element's position.
    pub fn query_element_index(
        &self,
        start_type: Option<&str>,
        field: &str,
        value_type: &ValueEncoding,
    ) -> Result<IndexQuery<'_>> {
        let schema: &Schema = &self.schema;
        let start = self.resolve_start(schema, start_type)?;
        let decl = self.resolve_field(schema, start, field)?;
        let (element, place) = match &decl.kind {
            FieldKind::Set(element) => (element, SlotPlace::SetElement),
            FieldKind::List(element) => (element, SlotPlace::ListElement),
            _ => {
                return Err(ObjectError::WrongFieldKind {
                    field: field.to_owned(),
                    expected: "set or list",
                }
                .into())
            }
        };
        if !element.indexed {
            return Err(IndexError::NotIndexed(field.to_owned()).into());
        }
        let declared = element.encoding();
        check_comparable(&declared, value_type)?;
        Ok(IndexQuery::new(self, element.id, declared, place, None, start))
    }

    /// Queries a map-key index.
    pub fn query_map_key_index(
        &self,
        start_type: Option<&str>,
        field: &str,
        value_type: &ValueEncoding,
    ) -> Result<IndexQuery<'_>> {
        let schema: &Schema = &self.schema;
        let start = self.resolve_start(schema, start_type)?;
        let decl = self.resolve_field(schema, start, field)?;
        let FieldKind::Map { key, .. } = &decl.kind else {
            return Err(ObjectError::WrongFieldKind {
                field: field.to_owned(),
                expected: "map",
            }
            .into());
        };
        if !key.indexed {
            return Err(IndexError::NotIndexed(field.to_owned()).into());
        }
        let declared = key.encoding();
        check_comparable(&declared, value_type)?;
        Ok(IndexQuery::new(
            self,
            key.id,
            declared,
            SlotPlace::MapKey,
            None,
            start,
        ))
    }

    /// Queries a map-value index; entries additionally carry the map key.
    pub fn query_map_value_index(
        &self,
        start_type: Option<&str>,
        field: &str,
        value_type: &ValueEncoding,
    ) -> Result<IndexQuery<'_>> {
        let schema: &Schema = &self.schema;
        let start = self.resolve_start(schema, start_type)?;
        let decl = self.resolve_field(schema, start, field)?;
        let FieldKind::Map { key, value } = &decl.kind else {
            return Err(ObjectError::WrongFieldKind {
                field: field.to_owned(),
                expected: "map",
            }
            .into());
        };
        if !value.indexed {
            return Err(IndexError::NotIndexed(field.to_owned()).into());
        }
        let declared = value.encoding();
        check_comparable(&declared, value_type)?;
        Ok(IndexQuery::new(
            self,
            value.id,
            declared,
            SlotPlace::MapValue,
            Some(key.encoding()),
            start,
        ))
    }

    /// Queries a composite index by name.
    pub fn query_composite(
        &self,
        start_type: Option<&str>,
        name: &str,
        value_types: &[ValueEncoding],
    ) -> Result<CompositeQuery<'_>> {
        let schema: &Schema = &self.schema;
        let start = self.resolve_start(schema, start_type)?;
        let types: Vec<&TypeSchema> = match start {
            Some(start) => schema.get_type(start).into_iter().collect(),
            None => schema.types().collect(),
        };
        let mut found: Option<(&TypeSchema, &stratadb_schema::CompositeIndexDecl)> = None;
        for ty in types {
            let Some(composite) = ty.composite_named(name) else {
                continue;
            };
            match &found {
                None => found = Some((ty, composite)),
                Some((_, existing)) if existing.id == composite.id => {}
                Some(_) => return Err(IndexError::AmbiguousField(name.to_owned()).into()),
            }
        }
        let (ty, composite) =
            found.ok_or_else(|| IndexError::UnknownComposite(name.to_owned()))?;
        if value_types.len() != composite.fields.len() {
            return Err(IndexError::Arity {
                index: name.to_owned(),
                got: value_types.len(),
                expected: composite.fields.len(),
            }
            .into());
        }
        let mut encodings = Vec::with_capacity(composite.fields.len());
        for (field_id, requested) in composite.fields.iter().zip(value_types) {
            let declared = ty
                .field(*field_id)
                .and_then(|f| f.kind.inline_encoding())
                .expect("validated composite position");
            check_comparable(&declared, requested)?;
            encodings.push(declared);
        }
        Ok(CompositeQuery {
            tx: self,
            index_id: composite.id.0,
            name: name.to_owned(),
            encodings,
            start_type: start,
        })
    }
}
