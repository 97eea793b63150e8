//! Change-listener reference paths.
//!
//! A path is declared by the listener's owner and walked backwards by the
//! engine when a field changes. Syntax, composing left to right:
//!
//! - `->field`: follow a reference field forward;
//! - `->field.element` / `->field.key` / `->field.value`: follow the
//!   references inside a collection field;
//! - `<-Type.field`: follow the inverse of a reference owned by `Type`;
//!   only objects whose runtime type is exactly `Type` match;
//! - an optional trailing plain name watches that field on the endpoint;
//!   without it every field of the endpoint is watched. A path may also be
//!   just a bare field name (watch the root itself), or empty.

use crate::error::ListenerError;
use crate::schema::{Schema, SlotPlace, TypeSchema};
use crate::def::FieldKind;
use std::collections::BTreeSet;
use stratadb_primitives::{FieldId, TypeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawStep {
    Forward { field: String, into: Option<CollectionPart> },
    Inverse { type_name: String, field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionPart {
    Element,
    Key,
    Value,
}

/// A parsed but unresolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPath {
    pub steps: Vec<RawStep>,
    pub target_field: Option<String>,
}

impl RefPath {
    pub fn parse(text: &str) -> Result<Self, ListenerError> {
        if text.is_empty() {
            return Ok(Self {
                steps: Vec::new(),
                target_field: None,
            });
        }
        if !text.starts_with("->") && !text.starts_with("<-") {
            check_ident(text)?;
            return Ok(Self {
                steps: Vec::new(),
                target_field: Some(text.to_owned()),
            });
        }

        let mut steps = Vec::new();
        let mut target_field = None;
        let mut rest = text;
        while !rest.is_empty() {
            let inverse = match (rest.strip_prefix("->"), rest.strip_prefix("<-")) {
                (Some(tail), _) => {
                    rest = tail;
                    false
                }
                (None, Some(tail)) => {
                    rest = tail;
                    true
                }
                (None, None) => return Err(ListenerError::Syntax(rest.to_owned())),
            };
            let end = rest
                .find("->")
                .into_iter()
                .chain(rest.find("<-"))
                .min()
                .unwrap_or(rest.len());
            let segment = &rest[..end];
            let last = end == rest.len();
            rest = &rest[end..];

            let mut parts = segment.split('.');
            if inverse {
                let type_name = parts.next().unwrap_or("");
                let field = parts.next().ok_or_else(|| ListenerError::Syntax(segment.to_owned()))?;
                check_ident(type_name)?;
                check_ident(field)?;
                steps.push(RawStep::Inverse {
                    type_name: type_name.to_owned(),
                    field: field.to_owned(),
                });
            } else {
                let field = parts.next().unwrap_or("");
                check_ident(field)?;
                let mut into = None;
                if let Some(next) = parts.next() {
                    match next {
                        "element" => into = Some(CollectionPart::Element),
                        "key" => into = Some(CollectionPart::Key),
                        "value" => into = Some(CollectionPart::Value),
                        tail if last && parts.next().is_none() => {
                            check_ident(tail)?;
                            target_field = Some(tail.to_owned());
                        }
                        other => return Err(ListenerError::Syntax(other.to_owned())),
                    }
                }
                steps.push(RawStep::Forward {
                    field: field.to_owned(),
                    into,
                });
            }
            // One trailing token may remain after a collection part.
            if let Some(tail) = parts.next() {
                if !last || target_field.is_some() || parts.next().is_some() {
                    return Err(ListenerError::Syntax(tail.to_owned()));
                }
                check_ident(tail)?;
                target_field = Some(tail.to_owned());
            }
        }
        Ok(Self {
            steps,
            target_field,
        })
    }
}

fn check_ident(text: &str) -> Result<(), ListenerError> {
    let valid = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ListenerError::Syntax(text.to_owned()))
    }
}

/// A forward step resolved against the schema: per source type, the slot
/// holding the reference.
#[derive(Debug, Clone)]
pub enum ResolvedStep {
    Forward {
        field: String,
        /// `(source type, reference slot)` for every type the step can
        /// start from.
        resolutions: Vec<(TypeId, FieldId)>,
    },
    Inverse {
        source_type: TypeId,
        /// The enclosing field on `source_type`.
        container: FieldId,
        /// The reference slot inside it.
        slot: FieldId,
        place: SlotPlace,
    },
}

/// A path resolved against a schema from a start type.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub start: TypeId,
    pub steps: Vec<ResolvedStep>,
    /// Types the path can end on; `None` means unrestricted.
    pub endpoint_types: Option<BTreeSet<TypeId>>,
    pub target_field: Option<String>,
}

impl ResolvedPath {
    /// Whether a change on an object of `ty` to field `field` is at this
    /// path's tail.
    pub fn watches(&self, schema: &Schema, ty: TypeId, field: FieldId) -> bool {
        if let Some(endpoint_types) = &self.endpoint_types {
            if !endpoint_types.contains(&ty) {
                return false;
            }
        }
        match &self.target_field {
            None => true,
            Some(name) => schema
                .get_type(ty)
                .and_then(|t| t.field_named(name))
                .is_some_and(|f| f.id == field),
        }
    }
}

fn ref_slot_of(
    ty: &TypeSchema,
    field_name: &str,
    into: Option<CollectionPart>,
) -> Option<(FieldId, FieldId, SlotPlace, BTreeSet<TypeId>)> {
    let field = ty.field_named(field_name)?;
    let (slot, place, spec) = match (&field.kind, into) {
        (FieldKind::Reference(spec), None) => (field.id, SlotPlace::Field, spec),
        (FieldKind::Set(element), Some(CollectionPart::Element)) => {
            (element.id, SlotPlace::SetElement, element.ref_spec()?)
        }
        (FieldKind::List(element), Some(CollectionPart::Element)) => {
            (element.id, SlotPlace::ListElement, element.ref_spec()?)
        }
        (FieldKind::Map { key, .. }, Some(CollectionPart::Key)) => {
            (key.id, SlotPlace::MapKey, key.ref_spec()?)
        }
        (FieldKind::Map { value, .. }, Some(CollectionPart::Value)) => {
            (value.id, SlotPlace::MapValue, value.ref_spec()?)
        }
        _ => return None,
    };
    Some((field.id, slot, place, spec.targets.clone()))
}

/// Resolves `path` against `schema`, rooted at `start`.
pub fn resolve(
    schema: &Schema,
    start: TypeId,
    path: &RefPath,
) -> Result<ResolvedPath, ListenerError> {
    let mut current: Option<BTreeSet<TypeId>> = Some(BTreeSet::from([start]));
    let mut steps = Vec::with_capacity(path.steps.len());

    for step in &path.steps {
        match step {
            RawStep::Forward { field, into } => {
                let candidates: Vec<&TypeSchema> = match &current {
                    Some(types) => types
                        .iter()
                        .filter_map(|id| schema.get_type(*id))
                        .collect(),
                    None => schema.types().collect(),
                };
                let mut resolutions = Vec::new();
                let mut next: Option<BTreeSet<TypeId>> = Some(BTreeSet::new());
                for ty in candidates {
                    let Some((_, slot, _, targets)) = ref_slot_of(ty, field, *into) else {
                        continue;
                    };
                    resolutions.push((ty.id, slot));
                    match (&mut next, targets.is_empty()) {
                        (_, true) => next = None,
                        (Some(set), false) => set.extend(targets),
                        (None, false) => {}
                    }
                }
                if resolutions.is_empty() {
                    return Err(ListenerError::Unresolved {
                        step: field.clone(),
                    });
                }
                steps.push(ResolvedStep::Forward {
                    field: field.clone(),
                    resolutions,
                });
                current = next;
            }
            RawStep::Inverse { type_name, field } => {
                let ty = schema
                    .type_named(type_name)
                    .ok_or_else(|| ListenerError::UnknownType(type_name.clone()))?;
                let positions: Vec<_> = ty
                    .ref_positions()
                    .iter()
                    .filter(|p| &p.field_name == field)
                    .collect();
                let [position] = positions.as_slice() else {
                    return Err(ListenerError::Unresolved { step: field.clone() });
                };
                steps.push(ResolvedStep::Inverse {
                    source_type: ty.id,
                    container: position.container,
                    slot: position.slot,
                    place: position.place,
                });
                current = Some(BTreeSet::from([ty.id]));
            }
        }
    }

    if let Some(name) = &path.target_field {
        let known = match &current {
            Some(types) => types
                .iter()
                .filter_map(|id| schema.get_type(*id))
                .any(|ty| ty.field_named(name).is_some()),
            None => schema.types().any(|ty| ty.field_named(name).is_some()),
        };
        if !known {
            return Err(ListenerError::UnknownField(name.clone()));
        }
    }

    Ok(ResolvedPath {
        start,
        steps,
        endpoint_types: current,
        target_field: path.target_field.clone(),
    })
}
