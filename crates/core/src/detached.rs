//! Detached transactions: an in-memory mirror of the transaction API used
//! to stage object subgraphs outside the durable store.

use crate::error::Result;
use crate::tx::Transaction;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use stratadb_kv::{KvStore, MemKv};
use stratadb_primitives::ObjId;

/// An in-memory transaction owned by (and scoped to) the transaction that
/// created it. It shares the parent's schema, so subgraphs copy in and out
/// without translation; identity is preserved or remapped per the caller's
/// id map.
pub struct DetachedTransaction {
    tx: Transaction,
}

impl Transaction {
    /// Creates an empty detached transaction mirroring this one's schema.
    pub fn detach(&self) -> DetachedTransaction {
        let store = MemKv::new();
        let kv = store.begin();
        DetachedTransaction {
            tx: Transaction::new(kv, Arc::clone(self.schema()), self.known_schemas.clone()),
        }
    }
}

impl DetachedTransaction {
    /// Copies a subgraph from the live transaction into this one.
    pub fn copy_in(
        &mut self,
        live: &mut Transaction,
        root: ObjId,
        depth: i64,
        cascades: &[&str],
        id_map: &BTreeMap<ObjId, ObjId>,
    ) -> Result<ObjId> {
        live.copy_to(&mut self.tx, root, depth, cascades, id_map)
    }

    /// Copies a subgraph out of this transaction into the live one; this is
    /// an ordinary sequence of writes against `live`.
    pub fn copy_out(
        &mut self,
        live: &mut Transaction,
        root: ObjId,
        depth: i64,
        cascades: &[&str],
        id_map: &BTreeMap<ObjId, ObjId>,
    ) -> Result<ObjId> {
        self.tx.copy_to(live, root, depth, cascades, id_map)
    }
}

impl Deref for DetachedTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        &self.tx
    }
}

impl DerefMut for DetachedTransaction {
    fn deref_mut(&mut self) -> &mut Transaction {
        &mut self.tx
    }
}
