use core::fmt;
use derive_more::{From, Into};

/// The durable storage id of an object type.
///
/// Storage ids are small positive integers. A `TypeId` doubles as the key
/// prefix of every object row of that type, so two types may never share an
/// id. `0` is reserved for the meta subspace and is rejected during schema
/// validation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct TypeId(pub u32);

/// The durable storage id of a field, or of a collection sub-field
/// (set element, list element, map key, map value).
///
/// Unique within its declaring type. Two sibling types may deliberately
/// declare the *same* field id to share one index subspace; the registry
/// checks that such declarations agree on kind and encoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct FieldId(pub u32);

/// The durable storage id of a composite index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct IndexId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The deterministic content hash identifying a schema version.
///
/// Computed over the canonical manifest encoding; equal manifests always
/// produce equal ids, across processes and releases.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaId([u8; 32]);

impl SchemaId {
    pub const LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Abbreviated form used in log output.
    pub fn to_abbreviated_hex(self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaId({})", self.to_abbreviated_hex())
    }
}
