//! The byte codec itself.
//!
//! Layout rules:
//!
//! - fixed-width scalars write their payload directly (sign-flipped
//!   big-endian integers, transformed big-endian floats, one byte for bool);
//! - nullable slots prefix a marker byte, `0x00` for null and `0x01` for a
//!   present value, so null sorts before everything;
//! - strings and byte arrays escape interior `0x00` as `0x00 0xFF` and
//!   terminate with a bare `0x00`;
//! - enums write their ordinal as a storage varint;
//! - arrays write `0x01` before each element and terminate with `0x00`; the
//!   terminator can never be confused with an element because elements are
//!   introduced by their marker, not by their first payload byte.
//!
//! Every form is self-delimiting, so tuple encodings are plain
//! concatenation.

use crate::error::EncodingError;
use crate::float::{f32_from_key_bits, f32_key_bits, f64_from_key_bits, f64_key_bits};
use crate::value::{EnumModel, FieldValue, ValueEncoding};
use stratadb_primitives::{read_storage_id, write_storage_id, ObjId};

const NULL_MARKER: u8 = 0x00;
const VALUE_MARKER: u8 = 0x01;
const TERMINATOR: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// Appends the key encoding of `value` under `encoding` to `out`.
pub fn write_value(
    out: &mut Vec<u8>,
    encoding: &ValueEncoding,
    value: &FieldValue,
) -> Result<(), EncodingError> {
    if value.is_null() {
        if !encoding.is_nullable() {
            return Err(EncodingError::NullOnPrimitive(encoding.kind_name()));
        }
        out.push(NULL_MARKER);
        return Ok(());
    }
    match (encoding, value) {
        (ValueEncoding::Bool, FieldValue::Bool(b)) => out.push(*b as u8),
        (ValueEncoding::I8, FieldValue::I8(x)) => out.push((*x as u8) ^ 0x80),
        (ValueEncoding::U8, FieldValue::U8(x)) => out.push(*x),
        (ValueEncoding::I16, FieldValue::I16(x)) => {
            out.extend_from_slice(&((*x as u16) ^ (1 << 15)).to_be_bytes())
        }
        (ValueEncoding::U16, FieldValue::U16(x)) => out.extend_from_slice(&x.to_be_bytes()),
        (ValueEncoding::I32, FieldValue::I32(x)) => {
            out.extend_from_slice(&((*x as u32) ^ (1 << 31)).to_be_bytes())
        }
        (ValueEncoding::U32, FieldValue::U32(x)) => out.extend_from_slice(&x.to_be_bytes()),
        (ValueEncoding::I64, FieldValue::I64(x)) => {
            out.extend_from_slice(&((*x as u64) ^ (1 << 63)).to_be_bytes())
        }
        (ValueEncoding::U64, FieldValue::U64(x)) => out.extend_from_slice(&x.to_be_bytes()),
        (ValueEncoding::F32, FieldValue::F32(x)) => {
            out.extend_from_slice(&f32_key_bits(x.into_inner()).to_be_bytes())
        }
        (ValueEncoding::F64, FieldValue::F64(x)) => {
            out.extend_from_slice(&f64_key_bits(x.into_inner()).to_be_bytes())
        }
        (ValueEncoding::String, FieldValue::String(s)) => {
            out.push(VALUE_MARKER);
            write_escaped(out, s.as_bytes());
        }
        (ValueEncoding::Bytes, FieldValue::Bytes(b)) => {
            out.push(VALUE_MARKER);
            write_escaped(out, b);
        }
        (ValueEncoding::Reference, FieldValue::Ref(id)) => {
            out.push(VALUE_MARKER);
            out.extend_from_slice(id.as_bytes());
        }
        (ValueEncoding::Enum(model), FieldValue::Enum(lit)) => {
            if model.find(&lit.name, lit.ordinal).is_none() {
                return Err(EncodingError::EnumOrdinal(lit.ordinal));
            }
            out.push(VALUE_MARKER);
            write_storage_id(out, lit.ordinal);
        }
        (ValueEncoding::Array(elem), FieldValue::Array(items)) => {
            out.push(VALUE_MARKER);
            for item in items {
                out.push(VALUE_MARKER);
                write_value(out, elem, item)?;
            }
            out.push(TERMINATOR);
        }
        (encoding, value) => {
            return Err(EncodingError::ValueMismatch {
                encoding: encoding.kind_name(),
                value: value.kind_name(),
            })
        }
    }
    Ok(())
}

/// Decodes one value from the front of `input`, advancing it.
pub fn read_value(
    input: &mut &[u8],
    encoding: &ValueEncoding,
) -> Result<FieldValue, EncodingError> {
    if encoding.is_nullable() {
        let marker = take_byte(input, encoding.kind_name())?;
        match marker {
            NULL_MARKER => return Ok(FieldValue::Null),
            VALUE_MARKER => {}
            byte => {
                return Err(EncodingError::InvalidByte {
                    what: encoding.kind_name(),
                    byte,
                })
            }
        }
    }
    Ok(match encoding {
        ValueEncoding::Bool => match take_byte(input, "bool")? {
            0 => FieldValue::Bool(false),
            1 => FieldValue::Bool(true),
            byte => return Err(EncodingError::InvalidByte { what: "bool", byte }),
        },
        ValueEncoding::I8 => FieldValue::I8((take_byte(input, "i8")? ^ 0x80) as i8),
        ValueEncoding::U8 => FieldValue::U8(take_byte(input, "u8")?),
        ValueEncoding::I16 => {
            FieldValue::I16((u16::from_be_bytes(take_array(input, "i16")?) ^ (1 << 15)) as i16)
        }
        ValueEncoding::U16 => FieldValue::U16(u16::from_be_bytes(take_array(input, "u16")?)),
        ValueEncoding::I32 => {
            FieldValue::I32((u32::from_be_bytes(take_array(input, "i32")?) ^ (1 << 31)) as i32)
        }
        ValueEncoding::U32 => FieldValue::U32(u32::from_be_bytes(take_array(input, "u32")?)),
        ValueEncoding::I64 => {
            FieldValue::I64((u64::from_be_bytes(take_array(input, "i64")?) ^ (1 << 63)) as i64)
        }
        ValueEncoding::U64 => FieldValue::U64(u64::from_be_bytes(take_array(input, "u64")?)),
        ValueEncoding::F32 => FieldValue::F32(
            f32_from_key_bits(u32::from_be_bytes(take_array(input, "f32")?)).into(),
        ),
        ValueEncoding::F64 => FieldValue::F64(
            f64_from_key_bits(u64::from_be_bytes(take_array(input, "f64")?)).into(),
        ),
        ValueEncoding::String => {
            let bytes = read_escaped(input)?;
            FieldValue::String(String::from_utf8(bytes).map_err(|_| EncodingError::InvalidUtf8)?)
        }
        ValueEncoding::Bytes => FieldValue::Bytes(read_escaped(input)?),
        ValueEncoding::Reference => {
            FieldValue::Ref(ObjId::read_from(input).map_err(|_| EncodingError::BadRef)?)
        }
        ValueEncoding::Enum(model) => FieldValue::Enum(read_enum(input, model)?),
        ValueEncoding::Array(elem) => {
            let mut items = Vec::new();
            loop {
                match take_byte(input, "array")? {
                    TERMINATOR => break,
                    VALUE_MARKER => items.push(read_value(input, elem)?),
                    byte => return Err(EncodingError::InvalidByte { what: "array", byte }),
                }
            }
            FieldValue::Array(items)
        }
    })
}

fn read_enum(input: &mut &[u8], model: &EnumModel) -> Result<crate::EnumLit, EncodingError> {
    let ordinal = read_storage_id(input)?;
    model
        .find_by_ordinal(ordinal)
        .ok_or(EncodingError::EnumOrdinal(ordinal))
}

fn write_escaped(out: &mut Vec<u8>, data: &[u8]) {
    for &byte in data {
        out.push(byte);
        if byte == 0x00 {
            out.push(ESCAPE);
        }
    }
    out.push(TERMINATOR);
}

fn read_escaped(input: &mut &[u8]) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::new();
    loop {
        let byte = take_byte(input, "escaped bytes")?;
        if byte != 0x00 {
            out.push(byte);
            continue;
        }
        match input.first() {
            Some(&ESCAPE) => {
                out.push(0x00);
                *input = &input[1..];
            }
            _ => return Ok(out),
        }
    }
}

fn take_byte(input: &mut &[u8], what: &'static str) -> Result<u8, EncodingError> {
    let (&first, rest) = input
        .split_first()
        .ok_or(EncodingError::Truncated(what))?;
    *input = rest;
    Ok(first)
}

fn take_array<const N: usize>(
    input: &mut &[u8],
    what: &'static str,
) -> Result<[u8; N], EncodingError> {
    if input.len() < N {
        return Err(EncodingError::Truncated(what));
    }
    let mut buf = [0u8; N];
    buf.copy_from_slice(&input[..N]);
    *input = &input[N..];
    Ok(buf)
}

/// The smallest byte string strictly greater than every key starting with
/// `prefix`, or `None` when the prefix is all `0xFF` and no such bound
/// exists.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    while let Some(&last) = out.last() {
        if last == 0xFF {
            out.pop();
        } else {
            *out.last_mut().unwrap() = last + 1;
            return Some(out);
        }
    }
    None
}
