//! The byte encoding of storage ids.
//!
//! Every persisted key starts with one or more storage ids, so the encoding
//! has to satisfy two properties at once:
//!
//! - *prefix-free*: no encoded id is a prefix of another, so a scan bounded
//!   by an id's encoding returns exactly that subspace;
//! - *order-preserving*: `a < b` implies `encode(a) <lex encode(b)`, so id
//!   subspaces appear in id order.
//!
//! Values below [`SINGLE_BYTE_MAX`] encode as themselves in one byte. Larger
//! values encode as a header byte `0xF8 + (n - 1)` followed by the `n`
//! big-endian significant bytes. Header bytes compare above every single-byte
//! encoding and longer encodings hold strictly larger values, which gives
//! both properties by construction.

use thiserror::Error;

/// Largest id that encodes in a single byte.
pub const SINGLE_BYTE_MAX: u32 = 0xF7;

const HEADER_BASE: u8 = 0xF8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidStorageId {
    #[error("truncated storage id")]
    Truncated,
    #[error("non-minimal storage id encoding")]
    NonMinimal,
}

/// Appends the encoding of `id` to `out`.
pub fn write_storage_id(out: &mut Vec<u8>, id: u32) {
    if id <= SINGLE_BYTE_MAX {
        out.push(id as u8);
        return;
    }
    let n = 4 - (id.leading_zeros() / 8) as usize;
    out.push(HEADER_BASE + (n as u8 - 1));
    out.extend_from_slice(&id.to_be_bytes()[4 - n..]);
}

/// The encoded length of `id`, without encoding it.
pub fn storage_id_len(id: u32) -> usize {
    if id <= SINGLE_BYTE_MAX {
        1
    } else {
        1 + 4 - (id.leading_zeros() / 8) as usize
    }
}

/// Decodes a storage id from the front of `input`, advancing it.
pub fn read_storage_id(input: &mut &[u8]) -> Result<u32, InvalidStorageId> {
    let (&first, rest) = input.split_first().ok_or(InvalidStorageId::Truncated)?;
    if first < HEADER_BASE {
        *input = rest;
        return Ok(first as u32);
    }
    let n = (first - HEADER_BASE) as usize + 1;
    if n > 4 || rest.len() < n {
        return Err(InvalidStorageId::Truncated);
    }
    let mut buf = [0u8; 4];
    buf[4 - n..].copy_from_slice(&rest[..n]);
    let id = u32::from_be_bytes(buf);
    // Reject paddable encodings so every id has exactly one byte form.
    if storage_id_len(id) != 1 + n {
        return Err(InvalidStorageId::NonMinimal);
    }
    *input = &rest[n..];
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(id: u32) -> Vec<u8> {
        let mut out = Vec::new();
        write_storage_id(&mut out, id);
        out
    }

    #[test]
    fn single_byte_boundary() {
        assert_eq!(encode(0), vec![0]);
        assert_eq!(encode(0xF7), vec![0xF7]);
        assert_eq!(encode(0xF8), vec![0xF8, 0xF8]);
        assert_eq!(encode(0x100), vec![0xF9, 0x01, 0x00]);
    }

    #[test]
    fn rejects_truncation() {
        assert_eq!(read_storage_id(&mut &[][..]), Err(InvalidStorageId::Truncated));
        assert_eq!(read_storage_id(&mut &[0xF9, 0x01][..]), Err(InvalidStorageId::Truncated));
    }

    #[test]
    fn rejects_padded_encoding() {
        // 5 fits in one byte; a two-byte form must not decode.
        assert_eq!(read_storage_id(&mut &[0xF8, 0x05][..]), Err(InvalidStorageId::NonMinimal));
    }

    proptest! {
        #[test]
        fn round_trip(id in any::<u32>()) {
            let bytes = encode(id);
            prop_assert_eq!(bytes.len(), storage_id_len(id));
            let mut input = &bytes[..];
            prop_assert_eq!(read_storage_id(&mut input), Ok(id));
            prop_assert!(input.is_empty());
        }

        #[test]
        fn order_preserving(a in any::<u32>(), b in any::<u32>()) {
            prop_assert_eq!(a.cmp(&b), encode(a).cmp(&encode(b)));
        }

        #[test]
        fn prefix_free(a in any::<u32>(), b in any::<u32>()) {
            prop_assume!(a != b);
            let (ea, eb) = (encode(a), encode(b));
            prop_assert!(!ea.starts_with(&eb) && !eb.starts_with(&ea));
        }
    }
}
