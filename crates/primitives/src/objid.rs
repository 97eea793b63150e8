use crate::ids::TypeId;
use crate::varint::{read_storage_id, storage_id_len, write_storage_id};
use core::fmt;
use core::str::FromStr;
use rand::Rng;
use thiserror::Error;

/// Width of an [`ObjId`] in bytes, and of its key encoding.
pub const OBJ_ID_LEN: usize = 8;

/// The identity of a persisted object.
///
/// The first bytes are the prefix-free encoding of the object's [`TypeId`];
/// the remaining bytes are drawn uniformly at random when the object is
/// created (the transaction retries on the astronomically unlikely
/// collision). An `ObjId` is also the byte key of the object's primary row,
/// so a scan over a type-id prefix visits exactly the objects of that type.
///
/// Ordering is lexicographic over the encoded bytes. The printable form is a
/// fixed-width 16-digit lowercase hex string, and the parser accepts exactly
/// that width.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId([u8; OBJ_ID_LEN]);

#[derive(Error, Debug, PartialEq)]
pub enum ParseObjIdError {
    #[error("object id must be exactly {} hex digits", OBJ_ID_LEN * 2)]
    BadLength,
    #[error("object id is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
    #[error("object id has an invalid type prefix")]
    BadPrefix,
}

impl ObjId {
    /// Draws a fresh id of type `type_id`, filling the suffix from `rng`.
    ///
    /// The caller is responsible for the collision check against the store.
    pub fn generate(type_id: TypeId, rng: &mut impl Rng) -> Self {
        let mut prefix = Vec::with_capacity(OBJ_ID_LEN);
        write_storage_id(&mut prefix, type_id.0);
        debug_assert!(prefix.len() < OBJ_ID_LEN);
        let mut bytes = [0u8; OBJ_ID_LEN];
        bytes[..prefix.len()].copy_from_slice(&prefix);
        rng.fill(&mut bytes[prefix.len()..]);
        Self(bytes)
    }

    /// Reconstructs an id from its key bytes, validating the type prefix.
    pub fn try_from_bytes(bytes: [u8; OBJ_ID_LEN]) -> Result<Self, ParseObjIdError> {
        let mut input = &bytes[..];
        let id = read_storage_id(&mut input).map_err(|_| ParseObjIdError::BadPrefix)?;
        if storage_id_len(id) >= OBJ_ID_LEN {
            return Err(ParseObjIdError::BadPrefix);
        }
        Ok(Self(bytes))
    }

    /// Reconstructs an id from the front of a longer key, advancing it.
    pub fn read_from(input: &mut &[u8]) -> Result<Self, ParseObjIdError> {
        if input.len() < OBJ_ID_LEN {
            return Err(ParseObjIdError::BadLength);
        }
        let mut bytes = [0u8; OBJ_ID_LEN];
        bytes.copy_from_slice(&input[..OBJ_ID_LEN]);
        let id = Self::try_from_bytes(bytes)?;
        *input = &input[OBJ_ID_LEN..];
        Ok(id)
    }

    /// The type storage id embedded in this object id.
    pub fn type_id(&self) -> TypeId {
        let mut input = &self.0[..];
        let id = read_storage_id(&mut input).expect("ObjId constructed with invalid prefix");
        TypeId(id)
    }

    /// The smallest id of `type_id`; with [`ObjId::last_for_type`] it bounds
    /// the inclusive key range holding every object of one type.
    pub fn first_for_type(type_id: TypeId) -> Self {
        let mut bytes = [0u8; OBJ_ID_LEN];
        let mut prefix = Vec::with_capacity(OBJ_ID_LEN);
        write_storage_id(&mut prefix, type_id.0);
        bytes[..prefix.len()].copy_from_slice(&prefix);
        Self(bytes)
    }

    pub fn last_for_type(type_id: TypeId) -> Self {
        let mut bytes = [0xFFu8; OBJ_ID_LEN];
        let mut prefix = Vec::with_capacity(OBJ_ID_LEN);
        write_storage_id(&mut prefix, type_id.0);
        bytes[..prefix.len()].copy_from_slice(&prefix);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; OBJ_ID_LEN] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; OBJ_ID_LEN] {
        self.0
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({self})")
    }
}

impl FromStr for ObjId {
    type Err = ParseObjIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != OBJ_ID_LEN * 2 {
            return Err(ParseObjIdError::BadLength);
        }
        let mut bytes = [0u8; OBJ_ID_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Self::try_from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn embeds_type_id() {
        let mut rng = StdRng::seed_from_u64(17);
        for raw in [1u32, 0xF7, 0xF8, 40_000] {
            let id = ObjId::generate(TypeId(raw), &mut rng);
            assert_eq!(id.type_id(), TypeId(raw));
        }
    }

    #[test]
    fn hex_round_trip() {
        let mut rng = StdRng::seed_from_u64(3);
        let id = ObjId::generate(TypeId(7), &mut rng);
        let text = id.to_string();
        assert_eq!(text.len(), 16);
        assert_eq!(text.parse::<ObjId>().unwrap(), id);
    }

    #[test]
    fn parser_requires_exact_width() {
        assert_eq!("0a".parse::<ObjId>(), Err(ParseObjIdError::BadLength));
        assert_eq!(
            "00112233445566778899".parse::<ObjId>(),
            Err(ParseObjIdError::BadLength)
        );
    }

    #[test]
    fn type_range_brackets_generated_ids() {
        let mut rng = StdRng::seed_from_u64(11);
        let ty = TypeId(9);
        let id = ObjId::generate(ty, &mut rng);
        assert!(ObjId::first_for_type(ty) <= id);
        assert!(id <= ObjId::last_for_type(ty));
        // Ids of a larger type id sort strictly after the whole range.
        assert!(ObjId::first_for_type(TypeId(10)) > ObjId::last_for_type(ty));
    }
}
