//! Schema validation and the in-memory catalog.

use crate::def::{
    CompositeIndexDecl, DeleteAction, ElementDecl, ElementKind, Exclude, FieldDecl, FieldKind,
    ObjectTypeDecl, RefSpec,
};
use crate::error::SchemaError;
use crate::manifest;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use stratadb_encoding::{EnumModel, ValueEncoding};
use stratadb_primitives::{FieldId, IndexId, SchemaId, TypeId};

/// Where a value slot sits inside its declaring type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPlace {
    Field,
    SetElement,
    ListElement,
    MapKey,
    MapValue,
}

/// The shape of a storage-id slot. Two declarations sharing a storage id
/// must be congruent so that their shared index subspace stays decodable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotShape {
    Inline {
        kind: &'static str,
        encoding: Option<ValueEncoding>,
        indexed: bool,
    },
    SetElement {
        encoding: ValueEncoding,
        indexed: bool,
    },
    ListElement {
        encoding: ValueEncoding,
        indexed: bool,
    },
    MapKey {
        encoding: ValueEncoding,
        indexed: bool,
    },
    MapValue {
        encoding: ValueEncoding,
        /// The sibling key encoding: a value-index entry embeds the map key,
        /// so key congruence is required whenever the value is indexed.
        key_encoding: ValueEncoding,
        indexed: bool,
    },
}

impl SlotShape {
    /// Congruence between two declarations of the same storage id.
    ///
    /// Map keys are congruent whenever their encodings agree, even when only
    /// one side indexes the key.
    pub fn congruent(&self, other: &SlotShape) -> bool {
        use SlotShape::*;
        match (self, other) {
            (
                Inline { kind: ka, encoding: ea, indexed: ia },
                Inline { kind: kb, encoding: eb, indexed: ib },
            ) => ka == kb && ea == eb && ia == ib,
            (
                SetElement { encoding: ea, indexed: ia },
                SetElement { encoding: eb, indexed: ib },
            )
            | (
                ListElement { encoding: ea, indexed: ia },
                ListElement { encoding: eb, indexed: ib },
            ) => ea == eb && ia == ib,
            (MapKey { encoding: ea, .. }, MapKey { encoding: eb, .. }) => ea == eb,
            (
                MapValue { encoding: ea, key_encoding: kea, indexed: ia },
                MapValue { encoding: eb, key_encoding: keb, indexed: ib },
            ) => ea == eb && kea == keb && ia == ib,
            _ => false,
        }
    }

    pub fn place(&self) -> SlotPlace {
        match self {
            SlotShape::Inline { .. } => SlotPlace::Field,
            SlotShape::SetElement { .. } => SlotPlace::SetElement,
            SlotShape::ListElement { .. } => SlotPlace::ListElement,
            SlotShape::MapKey { .. } => SlotPlace::MapKey,
            SlotShape::MapValue { .. } => SlotPlace::MapValue,
        }
    }

    pub fn encoding(&self) -> Option<&ValueEncoding> {
        match self {
            SlotShape::Inline { encoding, .. } => encoding.as_ref(),
            SlotShape::SetElement { encoding, .. }
            | SlotShape::ListElement { encoding, .. }
            | SlotShape::MapKey { encoding, .. }
            | SlotShape::MapValue { encoding, .. } => Some(encoding),
        }
    }

    pub fn is_indexed(&self) -> bool {
        match self {
            SlotShape::Inline { indexed, .. }
            | SlotShape::SetElement { indexed, .. }
            | SlotShape::ListElement { indexed, .. }
            | SlotShape::MapKey { indexed, .. }
            | SlotShape::MapValue { indexed, .. } => *indexed,
        }
    }

    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// One reference-valued slot of a type, precomputed for cascade traversal.
#[derive(Debug, Clone)]
pub struct RefPosition {
    /// Storage id of the slot itself; names the inverse index subspace.
    pub slot: FieldId,
    /// Storage id of the enclosing field (equal to `slot` for plain
    /// reference fields).
    pub container: FieldId,
    pub place: SlotPlace,
    pub spec: RefSpec,
    /// Name of the enclosing field.
    pub field_name: String,
}

/// A validated object type with its lookup tables.
#[derive(Debug, Clone)]
pub struct TypeSchema {
    pub name: String,
    pub id: TypeId,
    fields: Vec<FieldDecl>,
    by_name: BTreeMap<String, usize>,
    by_id: BTreeMap<FieldId, usize>,
    composites: Vec<CompositeIndexDecl>,
    composite_by_name: BTreeMap<String, usize>,
    ref_positions: Vec<RefPosition>,
}

impl TypeSchema {
    /// Fields in storage-id order.
    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldDecl> {
        self.by_id.get(&id).map(|&i| &self.fields[i])
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDecl> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn composites(&self) -> &[CompositeIndexDecl] {
        &self.composites
    }

    pub fn composite_named(&self, name: &str) -> Option<&CompositeIndexDecl> {
        self.composite_by_name.get(name).map(|&i| &self.composites[i])
    }

    /// Every reference slot of this type, including the ones nested in
    /// collections.
    pub fn ref_positions(&self) -> &[RefPosition] {
        &self.ref_positions
    }

    pub fn ref_position(&self, slot: FieldId) -> Option<&RefPosition> {
        self.ref_positions.iter().find(|p| p.slot == slot)
    }

    /// Fields whose values live inline in the object row.
    pub fn inline_fields(&self) -> impl Iterator<Item = &FieldDecl> {
        self.fields
            .iter()
            .filter(|f| f.kind.inline_encoding().is_some())
    }
}

/// A validated, immutable schema: the unit the registry persists and the
/// transaction executes against.
#[derive(Debug, Clone)]
pub struct Schema {
    id: SchemaId,
    types: BTreeMap<TypeId, TypeSchema>,
    by_name: BTreeMap<String, TypeId>,
    slot_shapes: BTreeMap<u32, SlotShape>,
    composite_shapes: BTreeMap<u32, Vec<ValueEncoding>>,
    ref_slots: BTreeMap<FieldId, SlotPlace>,
}

enum Owner {
    Type,
    Slot(SlotShape),
    Composite(Vec<ValueEncoding>),
}

impl Schema {
    /// Validates `decls` into a schema and computes its content id.
    pub fn build(decls: Vec<ObjectTypeDecl>) -> Result<Schema, SchemaError> {
        if decls.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut registry: BTreeMap<u32, Owner> = BTreeMap::new();
        let mut types = BTreeMap::new();
        let mut by_name = BTreeMap::new();

        for decl in decls {
            if decl.id.0 == 0 {
                return Err(SchemaError::ReservedStorageId(decl.name));
            }
            register(&mut registry, decl.id.0, Owner::Type)?;
            if by_name.insert(decl.name.clone(), decl.id).is_some() {
                return Err(SchemaError::DuplicateTypeName(decl.name));
            }
            let ty = validate_type(decl, &mut registry)?;
            if types.insert(ty.id, ty).is_some() {
                // Unreachable: the registry already rejected the id.
                unreachable!("duplicate type id survived registration");
            }
        }

        let slot_shapes = registry
            .iter()
            .filter_map(|(&raw, owner)| match owner {
                Owner::Slot(shape) => Some((raw, shape.clone())),
                _ => None,
            })
            .collect();
        let composite_shapes = registry
            .iter()
            .filter_map(|(&raw, owner)| match owner {
                Owner::Composite(encodings) => Some((raw, encodings.clone())),
                _ => None,
            })
            .collect();
        let ref_slots = types
            .values()
            .flat_map(|ty: &TypeSchema| ty.ref_positions.iter())
            .map(|position| (position.slot, position.place))
            .collect();

        let mut schema = Schema {
            id: SchemaId::from_bytes([0; 32]),
            types,
            by_name,
            slot_shapes,
            composite_shapes,
            ref_slots,
        };
        let bytes = manifest::encode(&schema);
        schema.id = SchemaId::from_bytes(*blake3::hash(&bytes).as_bytes());
        log::debug!(
            "schema validated: {} types, id {}",
            schema.types.len(),
            schema.id.to_abbreviated_hex()
        );
        Ok(schema)
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeSchema> {
        self.types.values()
    }

    pub fn get_type(&self, id: TypeId) -> Option<&TypeSchema> {
        self.types.get(&id)
    }

    pub fn type_named(&self, name: &str) -> Option<&TypeSchema> {
        self.by_name.get(name).and_then(|id| self.types.get(id))
    }

    pub fn contains_type(&self, id: TypeId) -> bool {
        self.types.contains_key(&id)
    }

    pub fn slot_shape(&self, raw: u32) -> Option<&SlotShape> {
        self.slot_shapes.get(&raw)
    }

    /// Every reference slot declared anywhere in the schema, with its place.
    pub fn ref_slots(&self) -> &BTreeMap<FieldId, SlotPlace> {
        &self.ref_slots
    }

    /// Checks that `new` may be registered alongside `old`.
    ///
    /// Indexed slots share their subspace across versions, so their shape
    /// is pinned; unindexed inline slots may change freely (migration
    /// converts the stored values). Indexed reference restrictions may only
    /// narrow.
    pub fn check_compatible(old: &Schema, new: &Schema) -> Result<(), SchemaError> {
        for (&raw, new_shape) in &new.slot_shapes {
            if old.types.contains_key(&TypeId(raw)) || old.composite_shapes.contains_key(&raw) {
                return Err(SchemaError::StorageIdClash(raw));
            }
            if let Some(old_shape) = old.slot_shapes.get(&raw) {
                if !new_shape.congruent(old_shape) {
                    let both_loose = matches!(
                        (old_shape, new_shape),
                        (
                            SlotShape::Inline { indexed: false, .. },
                            SlotShape::Inline { indexed: false, .. },
                        )
                    );
                    if !both_loose {
                        return Err(SchemaError::IncompatibleUpgrade {
                            field: FieldId(raw),
                            old: old_shape.describe(),
                            new: new_shape.describe(),
                        });
                    }
                }
            }
        }
        for &raw in new.types.keys() {
            if old.slot_shapes.contains_key(&raw.0) || old.composite_shapes.contains_key(&raw.0) {
                return Err(SchemaError::StorageIdClash(raw.0));
            }
        }
        for (&raw, new_positions) in &new.composite_shapes {
            if old.types.contains_key(&TypeId(raw)) || old.slot_shapes.contains_key(&raw) {
                return Err(SchemaError::StorageIdClash(raw));
            }
            if let Some(old_positions) = old.composite_shapes.get(&raw) {
                if old_positions != new_positions {
                    return Err(SchemaError::IncompatibleComposite(IndexId(raw)));
                }
            }
        }
        // Indexed reference restrictions may only narrow.
        for (type_id, new_ty) in &new.types {
            let Some(old_ty) = old.types.get(type_id) else {
                continue;
            };
            for new_position in &new_ty.ref_positions {
                let Some(old_position) = old_ty.ref_position(new_position.slot) else {
                    continue;
                };
                let old_targets = &old_position.spec.targets;
                let new_targets = &new_position.spec.targets;
                if old_targets.is_empty() {
                    continue;
                }
                if new_targets.is_empty() || !new_targets.is_subset(old_targets) {
                    return Err(SchemaError::WidenedReference {
                        field: new_position.slot,
                    });
                }
            }
        }
        Ok(())
    }
}

fn register(
    registry: &mut BTreeMap<u32, Owner>,
    raw: u32,
    owner: Owner,
) -> Result<(), SchemaError> {
    if raw == 0 {
        return Err(SchemaError::ReservedStorageId(format!("storage id {raw}")));
    }
    match registry.get(&raw) {
        None => {
            registry.insert(raw, owner);
            Ok(())
        }
        Some(Owner::Type) => match owner {
            Owner::Type => Err(SchemaError::DuplicateTypeId(TypeId(raw))),
            _ => Err(SchemaError::StorageIdClash(raw)),
        },
        Some(Owner::Slot(existing)) => match owner {
            Owner::Slot(shape) if shape.congruent(existing) => Ok(()),
            Owner::Slot(shape) => Err(SchemaError::IncongruentField {
                field: FieldId(raw),
                a: existing.describe(),
                b: shape.describe(),
            }),
            _ => Err(SchemaError::StorageIdClash(raw)),
        },
        Some(Owner::Composite(existing)) => match owner {
            Owner::Composite(encodings) if &encodings == existing => Ok(()),
            Owner::Composite(_) => Err(SchemaError::DuplicateIndexId(IndexId(raw))),
            _ => Err(SchemaError::StorageIdClash(raw)),
        },
    }
}

fn scalar_encoding(encoding: &ValueEncoding) -> bool {
    !matches!(
        encoding,
        ValueEncoding::Reference | ValueEncoding::Enum(_) | ValueEncoding::Array(_)
    )
}

fn check_enum_model(field: &str, model: &EnumModel) -> Result<(), SchemaError> {
    let mut seen = BTreeSet::new();
    if model.is_empty() || !model.idents().iter().all(|ident| seen.insert(ident)) {
        return Err(SchemaError::BadEnumModel(field.to_owned()));
    }
    Ok(())
}

fn check_ref_spec(
    field: &str,
    spec: &RefSpec,
    place: SlotPlace,
) -> Result<(), SchemaError> {
    let action = spec.on_target_delete;
    let top_level = place == SlotPlace::Field;
    if top_level && action == DeleteAction::Remove {
        return Err(SchemaError::BadDeleteAction {
            field: field.to_owned(),
            action: "REMOVE",
        });
    }
    if !top_level && action == DeleteAction::Nullify {
        return Err(SchemaError::BadDeleteAction {
            field: field.to_owned(),
            action: "NULLIFY",
        });
    }
    if action == DeleteAction::Ignore && !spec.allow_deleted {
        return Err(SchemaError::DanglingIgnore {
            field: field.to_owned(),
        });
    }
    Ok(())
}

fn check_excludes(
    field: &str,
    encoding: &ValueEncoding,
    excludes: &[Exclude],
) -> Result<(), SchemaError> {
    let bad = |why: &str| SchemaError::BadExclude {
        field: field.to_owned(),
        why: why.to_owned(),
    };
    for exclude in excludes {
        match exclude {
            Exclude::Null if !encoding.is_nullable() => {
                return Err(bad("null marker on a non-nullable slot"))
            }
            Exclude::Null | Exclude::NonNull => {}
            Exclude::Value(value) => {
                if value.is_null() || !encoding.admits(value) {
                    return Err(bad("excluded value does not fit the field encoding"));
                }
            }
            Exclude::Range { from, to } => {
                for bound in [from, to] {
                    match bound {
                        Bound::Included(v) | Bound::Excluded(v) => {
                            if v.is_null() || !encoding.admits(v) {
                                return Err(bad("range bound does not fit the field encoding"));
                            }
                        }
                        Bound::Unbounded => {}
                    }
                }
            }
        }
    }
    Ok(())
}

fn element_shape(
    field: &str,
    element: &ElementDecl,
    place: SlotPlace,
    sibling_key: Option<&ValueEncoding>,
) -> Result<SlotShape, SchemaError> {
    let encoding = element.encoding();
    if let ElementKind::Simple(enc) = &element.kind {
        if matches!(enc, ValueEncoding::Reference) {
            return Err(SchemaError::BadSimpleEncoding(field.to_owned()));
        }
        if let ValueEncoding::Enum(model) = enc {
            check_enum_model(field, model)?;
        }
    }
    if let Some(spec) = element.ref_spec() {
        check_ref_spec(field, spec, place)?;
    }
    Ok(match place {
        SlotPlace::SetElement => SlotShape::SetElement {
            encoding,
            indexed: element.indexed,
        },
        SlotPlace::ListElement => SlotShape::ListElement {
            encoding,
            indexed: element.indexed,
        },
        SlotPlace::MapKey => SlotShape::MapKey {
            encoding,
            indexed: element.indexed,
        },
        SlotPlace::MapValue => SlotShape::MapValue {
            encoding,
            key_encoding: sibling_key.expect("map value shape needs its key encoding").clone(),
            indexed: element.indexed,
        },
        SlotPlace::Field => unreachable!("element_shape is only for collection positions"),
    })
}

fn validate_type(
    decl: ObjectTypeDecl,
    registry: &mut BTreeMap<u32, Owner>,
) -> Result<TypeSchema, SchemaError> {
    let ObjectTypeDecl {
        name: type_name,
        id: type_id,
        mut fields,
        composites,
    } = decl;

    fields.sort_by_key(|field| field.id);

    // References are implicitly indexed, wherever they sit: the inverse
    // index is what delete actions and backward path walks scan.
    for field in &mut fields {
        match &mut field.kind {
            FieldKind::Reference(_) => field.indexed = true,
            FieldKind::Set(element) | FieldKind::List(element) => {
                if matches!(element.kind, ElementKind::Reference(_)) {
                    element.indexed = true;
                }
            }
            FieldKind::Map { key, value } => {
                for element in [key, value] {
                    if matches!(element.kind, ElementKind::Reference(_)) {
                        element.indexed = true;
                    }
                }
            }
            _ => {}
        }
    }

    let mut by_name = BTreeMap::new();
    let mut by_id = BTreeMap::new();
    let mut ref_positions = Vec::new();

    for (position, field) in fields.iter().enumerate() {
        if field.id.0 == 0 {
            return Err(SchemaError::ReservedStorageId(field.name.clone()));
        }
        if by_name.insert(field.name.clone(), position).is_some() {
            return Err(SchemaError::DuplicateFieldName {
                ty: type_name.clone(),
                field: field.name.clone(),
            });
        }
        if by_id.insert(field.id, position).is_some() {
            return Err(SchemaError::DuplicateFieldId {
                ty: type_name.clone(),
                field: field.id,
            });
        }

        // Kind-specific checks.
        match &field.kind {
            FieldKind::Simple(encoding) => {
                if !scalar_encoding(encoding) {
                    return Err(SchemaError::BadSimpleEncoding(field.name.clone()));
                }
            }
            FieldKind::Counter => {
                if field.indexed || field.unique || !field.excludes.is_empty() {
                    return Err(SchemaError::CounterConstraint(field.name.clone()));
                }
            }
            FieldKind::Reference(spec) => {
                check_ref_spec(&field.name, spec, SlotPlace::Field)?;
            }
            FieldKind::Enum(model) => check_enum_model(&field.name, model)?,
            FieldKind::EnumArray { model, rank } => {
                if *rank == 0 {
                    return Err(SchemaError::BadEnumArrayRank(field.name.clone()));
                }
                check_enum_model(&field.name, model)?;
            }
            FieldKind::Set(_) | FieldKind::List(_) | FieldKind::Map { .. } => {
                if field.indexed {
                    return Err(SchemaError::IndexedComplex(field.name.clone()));
                }
            }
        }

        if field.unique {
            if field.kind.inline_encoding().is_none() {
                return Err(SchemaError::UniqueOnKind {
                    field: field.name.clone(),
                    kind: field.kind.kind_name(),
                });
            }
            if !field.indexed {
                return Err(SchemaError::UniqueUnindexed(field.name.clone()));
            }
        }
        if let Some(encoding) = field.kind.inline_encoding() {
            check_excludes(&field.name, &encoding, &field.excludes)?;
        } else if !field.excludes.is_empty() {
            return Err(SchemaError::BadExclude {
                field: field.name.clone(),
                why: "exclusions require an inline value".to_owned(),
            });
        }

        // Register the field's slots and collect reference positions.
        match &field.kind {
            FieldKind::Counter => {
                register(
                    registry,
                    field.id.0,
                    Owner::Slot(SlotShape::Inline {
                        kind: "counter",
                        encoding: None,
                        indexed: false,
                    }),
                )?;
            }
            FieldKind::Simple(_)
            | FieldKind::Reference(_)
            | FieldKind::Enum(_)
            | FieldKind::EnumArray { .. } => {
                register(
                    registry,
                    field.id.0,
                    Owner::Slot(SlotShape::Inline {
                        kind: field.kind.kind_name(),
                        encoding: field.kind.inline_encoding(),
                        indexed: field.indexed,
                    }),
                )?;
                if let Some(spec) = field.kind.ref_spec() {
                    ref_positions.push(RefPosition {
                        slot: field.id,
                        container: field.id,
                        place: SlotPlace::Field,
                        spec: spec.clone(),
                        field_name: field.name.clone(),
                    });
                }
            }
            FieldKind::Set(element) | FieldKind::List(element) => {
                let place = if matches!(field.kind, FieldKind::Set(_)) {
                    SlotPlace::SetElement
                } else {
                    SlotPlace::ListElement
                };
                register(
                    registry,
                    field.id.0,
                    Owner::Slot(SlotShape::Inline {
                        kind: field.kind.kind_name(),
                        encoding: None,
                        indexed: false,
                    }),
                )?;
                let shape = element_shape(&field.name, element, place, None)?;
                register(registry, element.id.0, Owner::Slot(shape))?;
                if let Some(spec) = element.ref_spec() {
                    ref_positions.push(RefPosition {
                        slot: element.id,
                        container: field.id,
                        place,
                        spec: spec.clone(),
                        field_name: field.name.clone(),
                    });
                }
            }
            FieldKind::Map { key, value } => {
                register(
                    registry,
                    field.id.0,
                    Owner::Slot(SlotShape::Inline {
                        kind: "map",
                        encoding: None,
                        indexed: false,
                    }),
                )?;
                let key_shape = element_shape(&field.name, key, SlotPlace::MapKey, None)?;
                register(registry, key.id.0, Owner::Slot(key_shape))?;
                let value_shape =
                    element_shape(&field.name, value, SlotPlace::MapValue, Some(&key.encoding()))?;
                register(registry, value.id.0, Owner::Slot(value_shape))?;
                if let Some(spec) = key.ref_spec() {
                    ref_positions.push(RefPosition {
                        slot: key.id,
                        container: field.id,
                        place: SlotPlace::MapKey,
                        spec: spec.clone(),
                        field_name: field.name.clone(),
                    });
                }
                if let Some(spec) = value.ref_spec() {
                    ref_positions.push(RefPosition {
                        slot: value.id,
                        container: field.id,
                        place: SlotPlace::MapValue,
                        spec: spec.clone(),
                        field_name: field.name.clone(),
                    });
                }
            }
        }
    }

    let mut composite_by_name = BTreeMap::new();
    for (position, composite) in composites.iter().enumerate() {
        if !(2..=4).contains(&composite.fields.len()) {
            return Err(SchemaError::CompositeArity {
                index: composite.name.clone(),
                got: composite.fields.len(),
            });
        }
        if composite_by_name
            .insert(composite.name.clone(), position)
            .is_some()
        {
            return Err(SchemaError::DuplicateIndexId(composite.id));
        }
        let mut encodings = Vec::with_capacity(composite.fields.len());
        for &field_id in &composite.fields {
            let field = by_id
                .get(&field_id)
                .map(|&i: &usize| &fields[i])
                .ok_or(SchemaError::CompositeField {
                    index: composite.name.clone(),
                    field: field_id,
                })?;
            let encoding = field.kind.inline_encoding().ok_or(SchemaError::CompositeField {
                index: composite.name.clone(),
                field: field_id,
            })?;
            encodings.push(encoding);
        }
        for tuple in &composite.excludes {
            if tuple.len() != composite.fields.len() {
                return Err(SchemaError::CompositeExcludeArity {
                    index: composite.name.clone(),
                    got: tuple.len(),
                    expected: composite.fields.len(),
                });
            }
            for (position, (exclude, encoding)) in tuple.iter().zip(&encodings).enumerate() {
                if matches!(exclude, Exclude::Null) && !encoding.is_nullable() {
                    return Err(SchemaError::NullOnPrimitivePosition {
                        index: composite.name.clone(),
                        position,
                    });
                }
                check_excludes(&composite.name, encoding, std::slice::from_ref(exclude))?;
            }
        }
        register(registry, composite.id.0, Owner::Composite(encodings))?;
    }

    Ok(TypeSchema {
        name: type_name,
        id: type_id,
        fields,
        by_name,
        by_id,
        composites,
        composite_by_name,
        ref_positions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{CompositeIndexDecl, ElementDecl, FieldDecl, ObjectTypeDecl, RefSpec};
    use stratadb_encoding::{FieldValue, ValueEncoding};

    fn person() -> ObjectTypeDecl {
        ObjectTypeDecl::new("Person", 1)
            .with_field(FieldDecl::simple("name", 10, ValueEncoding::String).indexed())
            .with_field(FieldDecl::simple("age", 11, ValueEncoding::I32).indexed())
            .with_field(FieldDecl::reference("friend", 12, RefSpec::to_type(TypeId(1))))
    }

    #[test]
    fn builds_and_orders_fields_by_id() {
        let schema = Schema::build(vec![person()]).unwrap();
        let ty = schema.type_named("Person").unwrap();
        let ids: Vec<u32> = ty.fields().iter().map(|f| f.id.0).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert!(ty.field_named("friend").unwrap().indexed);
    }

    #[test]
    fn schema_id_is_content_deterministic() {
        let a = Schema::build(vec![person()]).unwrap();
        let b = Schema::build(vec![person()]).unwrap();
        assert_eq!(a.id(), b.id());
        let c = Schema::build(vec![ObjectTypeDecl::new("Person", 1)
            .with_field(FieldDecl::simple("name", 10, ValueEncoding::String))]).unwrap();
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn rejects_type_field_id_clash() {
        let decl = ObjectTypeDecl::new("T", 1)
            .with_field(FieldDecl::simple("x", 1, ValueEncoding::I32));
        assert!(matches!(
            Schema::build(vec![decl]),
            Err(SchemaError::StorageIdClash(1))
        ));
    }

    #[test]
    fn shared_field_id_must_be_congruent() {
        let a = ObjectTypeDecl::new("A", 1)
            .with_field(FieldDecl::simple("x", 10, ValueEncoding::I32).indexed());
        let b = ObjectTypeDecl::new("B", 2)
            .with_field(FieldDecl::simple("x", 10, ValueEncoding::String).indexed());
        assert!(matches!(
            Schema::build(vec![a, b]),
            Err(SchemaError::IncongruentField { .. })
        ));
    }

    #[test]
    fn shared_congruent_field_id_is_allowed() {
        let a = ObjectTypeDecl::new("A", 1)
            .with_field(FieldDecl::simple("x", 10, ValueEncoding::I32).indexed());
        let b = ObjectTypeDecl::new("B", 2)
            .with_field(FieldDecl::simple("x", 10, ValueEncoding::I32).indexed());
        Schema::build(vec![a, b]).unwrap();
    }

    #[test]
    fn ignore_requires_allow_deleted() {
        let decl = ObjectTypeDecl::new("T", 1).with_field(FieldDecl::reference(
            "r",
            10,
            RefSpec::any().with_on_delete(DeleteAction::Ignore),
        ));
        assert!(matches!(
            Schema::build(vec![decl]),
            Err(SchemaError::DanglingIgnore { .. })
        ));
    }

    #[test]
    fn counter_may_not_be_indexed() {
        let decl =
            ObjectTypeDecl::new("T", 1).with_field(FieldDecl::counter("hits", 10).indexed());
        assert!(matches!(
            Schema::build(vec![decl]),
            Err(SchemaError::CounterConstraint(_))
        ));
    }

    #[test]
    fn composite_null_exclude_on_primitive_is_rejected() {
        let decl = ObjectTypeDecl::new("T", 1)
            .with_field(FieldDecl::simple("a", 10, ValueEncoding::I32))
            .with_field(FieldDecl::simple("b", 11, ValueEncoding::String))
            .with_composite(
                CompositeIndexDecl::new("ab", 20, [10, 11])
                    .unique()
                    .with_exclude_tuple(vec![Exclude::Null, Exclude::NonNull]),
            );
        assert!(matches!(
            Schema::build(vec![decl]),
            Err(SchemaError::NullOnPrimitivePosition { position: 0, .. })
        ));
    }

    #[test]
    fn narrowing_reference_targets_is_compatible() {
        let old = Schema::build(vec![
            ObjectTypeDecl::new("A", 1),
            ObjectTypeDecl::new("B", 2),
            ObjectTypeDecl::new("T", 3).with_field(FieldDecl::reference("r", 10, RefSpec::any())),
        ])
        .unwrap();
        let new = Schema::build(vec![
            ObjectTypeDecl::new("A", 1),
            ObjectTypeDecl::new("B", 2),
            ObjectTypeDecl::new("T", 3)
                .with_field(FieldDecl::reference("r", 10, RefSpec::to_type(TypeId(1)))),
        ])
        .unwrap();
        Schema::check_compatible(&old, &new).unwrap();
        assert!(matches!(
            Schema::check_compatible(&new, &old),
            Err(SchemaError::WidenedReference { .. })
        ));
    }

    #[test]
    fn unindexed_simple_field_may_change_encoding_across_versions() {
        let old = Schema::build(vec![ObjectTypeDecl::new("T", 1)
            .with_field(FieldDecl::simple("v", 10, ValueEncoding::I32))])
        .unwrap();
        let new = Schema::build(vec![ObjectTypeDecl::new("T", 1)
            .with_field(FieldDecl::simple("v", 10, ValueEncoding::String))])
        .unwrap();
        Schema::check_compatible(&old, &new).unwrap();
    }

    #[test]
    fn indexed_field_encoding_is_pinned_across_versions() {
        let old = Schema::build(vec![ObjectTypeDecl::new("T", 1)
            .with_field(FieldDecl::simple("v", 10, ValueEncoding::I32).indexed())])
        .unwrap();
        let new = Schema::build(vec![ObjectTypeDecl::new("T", 1)
            .with_field(FieldDecl::simple("v", 10, ValueEncoding::String).indexed())])
        .unwrap();
        assert!(matches!(
            Schema::check_compatible(&old, &new),
            Err(SchemaError::IncompatibleUpgrade { .. })
        ));
    }

    #[test]
    fn unique_exclusion_values_are_type_checked() {
        let decl = ObjectTypeDecl::new("T", 1).with_field(
            FieldDecl::simple("v", 10, ValueEncoding::I32)
                .unique()
                .with_exclude(Exclude::Value(FieldValue::from("nope"))),
        );
        assert!(matches!(
            Schema::build(vec![decl]),
            Err(SchemaError::BadExclude { .. })
        ));
    }

    #[test]
    fn map_key_congruence_ignores_key_indexing() {
        let a = ObjectTypeDecl::new("A", 1).with_field(FieldDecl::new(
            "m",
            10,
            FieldKind::Map {
                key: ElementDecl::simple(11, ValueEncoding::String).indexed(),
                value: ElementDecl::simple(12, ValueEncoding::I64),
            },
        ));
        let b = ObjectTypeDecl::new("B", 2).with_field(FieldDecl::new(
            "m",
            10,
            FieldKind::Map {
                key: ElementDecl::simple(11, ValueEncoding::String),
                value: ElementDecl::simple(12, ValueEncoding::I64),
            },
        ));
        Schema::build(vec![a, b]).unwrap();
    }
}
