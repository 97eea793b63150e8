//! The ambient "current transaction" binding.
//!
//! One transaction is in force per flow of control, installed for a scope
//! and released on every exit path, panics included. The binding is
//! per-thread; nothing here is shared across threads.

use crate::tx::Transaction;
use scoped_tls::scoped_thread_local;
use std::cell::RefCell;

scoped_thread_local!(static CURRENT: RefCell<Transaction>);

/// Runs `body` with `tx` installed as the current transaction, returning
/// the transaction and the body's result. The binding is removed when
/// `body` returns or unwinds.
pub fn in_transaction<R>(tx: Transaction, body: impl FnOnce() -> R) -> (Transaction, R) {
    let cell = RefCell::new(tx);
    let result = CURRENT.set(&cell, body);
    (cell.into_inner(), result)
}

/// Whether a transaction is in force on this thread.
pub fn has_current() -> bool {
    CURRENT.is_set()
}

/// Calls `body` with the transaction in force on this flow of control.
///
/// # Panics
///
/// Panics when no transaction is installed, or when called re-entrantly
/// from inside another `with_current` body (the transaction is already
/// borrowed then).
pub fn with_current<R>(body: impl FnOnce(&mut Transaction) -> R) -> R {
    CURRENT.with(|cell| body(&mut cell.borrow_mut()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use std::sync::Arc;
    use stratadb_encoding::ValueEncoding;
    use stratadb_kv::MemKv;
    use stratadb_schema::{FieldDecl, ObjectTypeDecl};

    #[test]
    fn binding_is_scoped() {
        let db = Database::open(
            Arc::new(MemKv::new()),
            vec![ObjectTypeDecl::new("T", 1)
                .with_field(FieldDecl::simple("v", 10, ValueEncoding::I32))],
        )
        .unwrap();
        assert!(!has_current());
        let (tx, id) = in_transaction(db.begin().unwrap(), || {
            assert!(has_current());
            with_current(|tx| tx.create("T").unwrap())
        });
        assert!(!has_current());
        let mut tx = tx;
        assert!(tx.exists(id).unwrap());
        tx.commit().unwrap();
    }
}
