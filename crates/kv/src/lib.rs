//! The ordered byte-to-byte store underneath the object engine.
//!
//! [`KvStore`]/[`KvTx`] is the full contract the engine consumes; any store
//! with transactional get/put/remove/scan over lexicographically ordered
//! byte keys can sit behind it. [`MemKv`] is the bundled implementation: a
//! committed `BTreeMap` with per-transaction snapshot and write overlay.
//! [`keyspace`] owns the key layout, namespacing every persisted datum under
//! prefix-free storage-id prefixes.

pub mod keyspace;
mod mem;
mod store;

pub use mem::{MemKv, MemTx};
pub use store::{KvError, KvStore, KvTx, ScanIter};
