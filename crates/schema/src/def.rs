//! Object-type and field declarations, the raw input to schema validation.

use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::ops::Bound;
use strum::Display;
use stratadb_encoding::{EnumModel, FieldValue, ValueEncoding};
use stratadb_primitives::{FieldId, IndexId, TypeId};

/// The policy applied to an inbound reference when its target is deleted.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum DeleteAction {
    /// Deletion of the target fails with a referenced-object error.
    Exception,
    /// The reference is cleared to null.
    Nullify,
    /// The reference's entry is removed from its enclosing collection.
    Remove,
    /// The referring object is deleted in turn.
    Cascade,
    /// Nothing happens; the reference dangles.
    Ignore,
}

/// Per-field policy for transforming values when the stored schema differs
/// from the current one.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Default)]
pub enum UpgradePolicy {
    /// Convert when a defined conversion exists, otherwise reset to default.
    #[default]
    Attempt,
    /// Always reset to the default value.
    Reset,
    /// Abort the migration when no exact conversion is available.
    Require,
}

/// Everything a reference slot declares beyond its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefSpec {
    /// Allowed target types; empty means any type.
    pub targets: BTreeSet<TypeId>,
    pub on_target_delete: DeleteAction,
    /// Delete the referent when the owner is deleted.
    pub forward_delete: bool,
    /// Permit the reference to keep pointing at a deleted object.
    pub allow_deleted: bool,
    pub forward_cascades: BTreeSet<String>,
    pub inverse_cascades: BTreeSet<String>,
}

impl Default for DeleteAction {
    fn default() -> Self {
        DeleteAction::Exception
    }
}

impl RefSpec {
    pub fn to_type(target: TypeId) -> Self {
        Self {
            targets: BTreeSet::from([target]),
            ..Self::default()
        }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_on_delete(mut self, action: DeleteAction) -> Self {
        self.on_target_delete = action;
        self
    }

    pub fn with_forward_delete(mut self) -> Self {
        self.forward_delete = true;
        self
    }

    pub fn with_allow_deleted(mut self) -> Self {
        self.allow_deleted = true;
        self
    }

    pub fn with_forward_cascade(mut self, name: impl Into<String>) -> Self {
        self.forward_cascades.insert(name.into());
        self
    }

    pub fn with_inverse_cascade(mut self, name: impl Into<String>) -> Self {
        self.inverse_cascades.insert(name.into());
        self
    }

    /// Whether `ty` is an allowed referent.
    pub fn admits_target(&self, ty: TypeId) -> bool {
        self.targets.is_empty() || self.targets.contains(&ty)
    }
}

/// The sub-descriptor of a collection position (set/list element, map key
/// or value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementDecl {
    /// Storage id of the sub-field; owns the position's index subspace.
    pub id: FieldId,
    pub kind: ElementKind,
    pub indexed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Simple(ValueEncoding),
    Reference(RefSpec),
}

impl ElementDecl {
    pub fn simple(id: u32, encoding: ValueEncoding) -> Self {
        Self {
            id: FieldId(id),
            kind: ElementKind::Simple(encoding),
            indexed: false,
        }
    }

    pub fn reference(id: u32, spec: RefSpec) -> Self {
        Self {
            id: FieldId(id),
            kind: ElementKind::Reference(spec),
            indexed: false,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// The key encoding of values in this position.
    pub fn encoding(&self) -> ValueEncoding {
        match &self.kind {
            ElementKind::Simple(encoding) => encoding.clone(),
            ElementKind::Reference(_) => ValueEncoding::Reference,
        }
    }

    pub fn ref_spec(&self) -> Option<&RefSpec> {
        match &self.kind {
            ElementKind::Reference(spec) => Some(spec),
            ElementKind::Simple(_) => None,
        }
    }
}

/// The capability tag of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Simple(ValueEncoding),
    Counter,
    Reference(RefSpec),
    Set(ElementDecl),
    List(ElementDecl),
    Map { key: ElementDecl, value: ElementDecl },
    Enum(EnumModel),
    EnumArray { model: EnumModel, rank: u8 },
}

impl FieldKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldKind::Simple(_) => "simple",
            FieldKind::Counter => "counter",
            FieldKind::Reference(_) => "reference",
            FieldKind::Set(_) => "set",
            FieldKind::List(_) => "list",
            FieldKind::Map { .. } => "map",
            FieldKind::Enum(_) => "enum",
            FieldKind::EnumArray { .. } => "enum-array",
        }
    }

    /// The inline value encoding, for the kinds stored in the object row.
    pub fn inline_encoding(&self) -> Option<ValueEncoding> {
        match self {
            FieldKind::Simple(encoding) => Some(encoding.clone()),
            FieldKind::Reference(_) => Some(ValueEncoding::Reference),
            FieldKind::Enum(model) => Some(ValueEncoding::Enum(model.clone())),
            FieldKind::EnumArray { model, rank } => {
                let mut encoding = ValueEncoding::Enum(model.clone());
                for _ in 0..*rank {
                    encoding = ValueEncoding::Array(Box::new(encoding));
                }
                Some(encoding)
            }
            FieldKind::Counter | FieldKind::Set(_) | FieldKind::List(_) | FieldKind::Map { .. } => {
                None
            }
        }
    }

    pub fn ref_spec(&self) -> Option<&RefSpec> {
        match self {
            FieldKind::Reference(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            FieldKind::Set(_) | FieldKind::List(_) | FieldKind::Map { .. }
        )
    }
}

/// A value or range carved out of a unique constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclude {
    /// Null values are not checked.
    Null,
    /// Every non-null value is exempt.
    NonNull,
    /// One discrete value.
    Value(FieldValue),
    /// A range of values, inclusive or exclusive at each end.
    Range {
        from: Bound<FieldValue>,
        to: Bound<FieldValue>,
    },
}

impl Exclude {
    pub fn range(from: Bound<FieldValue>, to: Bound<FieldValue>) -> Self {
        Exclude::Range { from, to }
    }

    pub fn matches(&self, value: &FieldValue) -> bool {
        match self {
            Exclude::Null => value.is_null(),
            Exclude::NonNull => !value.is_null(),
            Exclude::Value(excluded) => excluded == value,
            Exclude::Range { from, to } => {
                if value.is_null() {
                    return false;
                }
                let above_from = match from {
                    Bound::Included(lo) => value >= lo,
                    Bound::Excluded(lo) => value > lo,
                    Bound::Unbounded => true,
                };
                let below_to = match to {
                    Bound::Included(hi) => value <= hi,
                    Bound::Excluded(hi) => value < hi,
                    Bound::Unbounded => true,
                };
                above_from && below_to
            }
        }
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub id: FieldId,
    pub kind: FieldKind,
    pub indexed: bool,
    pub unique: bool,
    pub excludes: Vec<Exclude>,
    pub upgrade: UpgradePolicy,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, id: u32, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            id: FieldId(id),
            kind,
            indexed: false,
            unique: false,
            excludes: Vec::new(),
            upgrade: UpgradePolicy::default(),
        }
    }

    pub fn simple(name: impl Into<String>, id: u32, encoding: ValueEncoding) -> Self {
        Self::new(name, id, FieldKind::Simple(encoding))
    }

    pub fn counter(name: impl Into<String>, id: u32) -> Self {
        Self::new(name, id, FieldKind::Counter)
    }

    pub fn reference(name: impl Into<String>, id: u32, spec: RefSpec) -> Self {
        Self::new(name, id, FieldKind::Reference(spec))
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.indexed = true;
        self.unique = true;
        self
    }

    pub fn with_exclude(mut self, exclude: Exclude) -> Self {
        self.excludes.push(exclude);
        self
    }

    pub fn with_upgrade(mut self, policy: UpgradePolicy) -> Self {
        self.upgrade = policy;
        self
    }

    /// Whether `value` is exempted from this field's unique constraint.
    pub fn is_excluded(&self, value: &FieldValue) -> bool {
        self.excludes.iter().any(|exclude| exclude.matches(value))
    }
}

/// A composite index over 2 to 4 simple fields of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeIndexDecl {
    pub name: String,
    pub id: IndexId,
    pub fields: SmallVec<[FieldId; 4]>,
    pub unique: bool,
    /// Tuples exempt from the unique constraint; a tuple is exempt iff some
    /// entry matches every position.
    pub excludes: Vec<Vec<Exclude>>,
}

impl CompositeIndexDecl {
    pub fn new(name: impl Into<String>, id: u32, fields: impl IntoIterator<Item = u32>) -> Self {
        Self {
            name: name.into(),
            id: IndexId(id),
            fields: fields.into_iter().map(FieldId).collect(),
            unique: false,
            excludes: Vec::new(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_exclude_tuple(mut self, tuple: Vec<Exclude>) -> Self {
        self.excludes.push(tuple);
        self
    }

    /// Whether `values` (one per position) is exempt from uniqueness.
    pub fn is_excluded(&self, values: &[FieldValue]) -> bool {
        self.excludes.iter().any(|tuple| {
            tuple.len() == values.len()
                && tuple
                    .iter()
                    .zip(values)
                    .all(|(exclude, value)| exclude.matches(value))
        })
    }
}

/// An object-type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTypeDecl {
    pub name: String,
    pub id: TypeId,
    pub fields: Vec<FieldDecl>,
    pub composites: Vec<CompositeIndexDecl>,
}

impl ObjectTypeDecl {
    pub fn new(name: impl Into<String>, id: u32) -> Self {
        Self {
            name: name.into(),
            id: TypeId(id),
            fields: Vec::new(),
            composites: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_composite(mut self, index: CompositeIndexDecl) -> Self {
        self.composites.push(index);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclude_range_bounds() {
        // [10, 20) and (30, 40], as in a typical unique-exclude declaration.
        let lo = Exclude::range(
            Bound::Included(FieldValue::I32(10)),
            Bound::Excluded(FieldValue::I32(20)),
        );
        let hi = Exclude::range(
            Bound::Excluded(FieldValue::I32(30)),
            Bound::Included(FieldValue::I32(40)),
        );
        assert!(lo.matches(&FieldValue::I32(10)));
        assert!(lo.matches(&FieldValue::I32(15)));
        assert!(!lo.matches(&FieldValue::I32(20)));
        assert!(!hi.matches(&FieldValue::I32(30)));
        assert!(hi.matches(&FieldValue::I32(31)));
        assert!(hi.matches(&FieldValue::I32(40)));
    }

    #[test]
    fn exclude_markers() {
        assert!(Exclude::Null.matches(&FieldValue::Null));
        assert!(!Exclude::Null.matches(&FieldValue::I32(0)));
        assert!(Exclude::NonNull.matches(&FieldValue::I32(0)));
        assert!(!Exclude::NonNull.matches(&FieldValue::Null));
    }

    #[test]
    fn composite_exclusion_needs_every_position() {
        let index = CompositeIndexDecl::new("ix", 30, [1, 2]).unique().with_exclude_tuple(vec![
            Exclude::Value(FieldValue::I32(1)),
            Exclude::NonNull,
        ]);
        assert!(index.is_excluded(&[FieldValue::I32(1), FieldValue::from("x")]));
        assert!(!index.is_excluded(&[FieldValue::I32(1), FieldValue::Null]));
        assert!(!index.is_excluded(&[FieldValue::I32(2), FieldValue::from("x")]));
    }
}
