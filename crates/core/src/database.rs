use crate::error::Result;
use crate::tx::Transaction;
use std::sync::Arc;
use stratadb_kv::KvStore;
use stratadb_schema::{registry, ObjectTypeDecl, Schema};

/// A database: a store plus the current schema.
///
/// Opening validates the schema, checks it against every version already
/// persisted in the store, and records its manifest in the registry
/// subspace when it is new. Transactions begun afterwards execute against
/// this schema; objects written under earlier versions migrate lazily as
/// they are touched.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn KvStore>,
    schema: Arc<Schema>,
}

impl Database {
    pub fn open(store: Arc<dyn KvStore>, decls: Vec<ObjectTypeDecl>) -> Result<Self> {
        let schema = Schema::build(decls)?;
        log::debug!(
            "opening database with schema {}",
            schema.id().to_abbreviated_hex()
        );
        let mut kv = store.begin();
        let schema = registry::register(&mut *kv, schema)?;
        kv.commit()?;
        Ok(Self { store, schema })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Begins a transaction over a fresh store snapshot.
    pub fn begin(&self) -> Result<Transaction> {
        let kv = self.store.begin();
        let known = registry::load_all(&*kv)?;
        Ok(Transaction::new(kv, Arc::clone(&self.schema), known))
    }
}
