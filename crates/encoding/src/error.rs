use stratadb_primitives::InvalidStorageId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unexpected end of input while decoding {0}")]
    Truncated(&'static str),
    #[error("invalid byte {byte:#04x} while decoding {what}")]
    InvalidByte { what: &'static str, byte: u8 },
    #[error("encoded string is not valid utf-8")]
    InvalidUtf8,
    #[error("invalid storage id: {0}")]
    StorageId(#[from] InvalidStorageId),
    #[error("encoded reference holds an invalid object id")]
    BadRef,
    #[error("enum ordinal {0} is outside the declared identifier list")]
    EnumOrdinal(u32),
    #[error("null written into a non-nullable {0} slot")]
    NullOnPrimitive(&'static str),
    #[error("value of kind {value} does not match encoding {encoding}")]
    ValueMismatch {
        encoding: &'static str,
        value: &'static str,
    },
    #[error("natural order of {what} disagrees with its encoded order")]
    OrderingViolation { what: &'static str },
}
