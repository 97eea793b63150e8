use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KvError {
    /// The underlying snapshot was committed, rolled back or otherwise
    /// closed; the owning transaction must be abandoned.
    #[error("transaction snapshot is no longer usable")]
    Stale,
    #[error("store rejected the operation: {0}")]
    Backend(String),
}

pub type ScanIter<'a> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

/// A handle on an ordered byte-to-byte store from which transactions are
/// begun.
pub trait KvStore: Send + Sync {
    fn begin(&self) -> Box<dyn KvTx>;
}

/// One transaction against the store.
///
/// Keys are totally ordered lexicographically; the empty byte string is the
/// minimum. Ranges are half-open `[from, to)`; an absent `to` means
/// "to the end of the keyspace". All reads observe the transaction's own
/// writes. After [`KvTx::commit`] or [`KvTx::rollback`] the transaction is
/// closed and every further call fails with [`KvError::Stale`].
pub trait KvTx {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), KvError>;

    fn remove(&mut self, key: &[u8]) -> Result<(), KvError>;

    fn remove_range(&mut self, from: &[u8], to: Option<&[u8]>) -> Result<(), KvError>;

    /// Ordered iteration over `[from, to)`.
    fn scan(&self, from: &[u8], to: Option<&[u8]>) -> Result<ScanIter<'_>, KvError>;

    fn commit(&mut self) -> Result<(), KvError>;

    fn rollback(&mut self);

    fn is_closed(&self) -> bool;
}
