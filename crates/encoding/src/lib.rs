//! Reversible, order-preserving byte encodings for field values.
//!
//! Every value that lands in an index key is encoded so that the natural
//! order of the value agrees with the lexicographic order of its bytes, and
//! so that the encoding is self-delimiting when concatenated into composite
//! tuples. The primary object row reuses the same encodings inline, so one
//! codec covers both sides.

mod error;
mod float;
mod key;
mod value;

pub use error::EncodingError;
pub use float::{F32, F64};
pub use key::{prefix_successor, read_value, write_value};
pub use value::{default_value, EnumLit, EnumModel, FieldValue, ValueEncoding};

/// Test support: checks that the encoded order of `a` and `b` agrees with
/// their natural order under `encoding`, reporting
/// [`EncodingError::OrderingViolation`] when it does not.
pub fn check_key_order(
    encoding: &ValueEncoding,
    a: &FieldValue,
    b: &FieldValue,
) -> Result<(), EncodingError> {
    let mut ka = Vec::new();
    let mut kb = Vec::new();
    write_value(&mut ka, encoding, a)?;
    write_value(&mut kb, encoding, b)?;
    if a.cmp(b) == ka.cmp(&kb) {
        Ok(())
    } else {
        Err(EncodingError::OrderingViolation {
            what: encoding.kind_name(),
        })
    }
}
