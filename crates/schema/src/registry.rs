//! Schema persistence and the process-wide catalog.
//!
//! Manifests live under the reserved meta prefix, keyed by schema id. The
//! catalog caches decoded schemas for the whole process; a schema is built
//! once and immutable afterwards, so readers share `Arc`s with no further
//! coordination.

use crate::error::SchemaError;
use crate::manifest;
use crate::schema::Schema;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use stratadb_kv::{keyspace, KvTx};
use stratadb_primitives::SchemaId;

static CATALOG: Lazy<RwLock<HashMap<SchemaId, Arc<Schema>>>> = Lazy::new(Default::default);

/// Looks up an already-decoded schema.
pub fn cached(id: SchemaId) -> Option<Arc<Schema>> {
    CATALOG.read().get(&id).cloned()
}

/// Inserts `schema` into the catalog, or returns the copy already there.
pub fn intern(schema: Schema) -> Arc<Schema> {
    let mut catalog = CATALOG.write();
    Arc::clone(
        catalog
            .entry(schema.id())
            .or_insert_with(|| Arc::new(schema)),
    )
}

fn schema_id_of_key(key: &[u8]) -> Result<SchemaId, SchemaError> {
    let tail: [u8; SchemaId::LEN] = key[key.len().saturating_sub(SchemaId::LEN)..]
        .try_into()
        .map_err(|_| SchemaError::BadManifest("registry key too short".into()))?;
    Ok(SchemaId::from_bytes(tail))
}

/// Reads back every schema persisted in the store.
pub fn load_all(kv: &dyn KvTx) -> Result<Vec<Arc<Schema>>, SchemaError> {
    let (from, to) = keyspace::schema_range();
    let entries: Vec<(Vec<u8>, Vec<u8>)> = kv.scan(&from, to.as_deref())?.collect();
    let mut schemas = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let id = schema_id_of_key(&key)?;
        let schema = match cached(id) {
            Some(schema) => schema,
            None => {
                let schema = manifest::decode(&value)?;
                if schema.id() != id {
                    return Err(SchemaError::BadManifest(format!(
                        "manifest stored under {} hashes to {}",
                        id.to_abbreviated_hex(),
                        schema.id().to_abbreviated_hex()
                    )));
                }
                intern(schema)
            }
        };
        schemas.push(schema);
    }
    Ok(schemas)
}

/// Registers `schema` in the store: validates compatibility against every
/// persisted version and writes the manifest if it is new. Returns the
/// interned catalog entry.
pub fn register(kv: &mut dyn KvTx, schema: Schema) -> Result<Arc<Schema>, SchemaError> {
    let existing = load_all(kv)?;
    let mut known = false;
    for old in &existing {
        if old.id() == schema.id() {
            known = true;
        } else {
            Schema::check_compatible(old, &schema)?;
        }
    }
    if !known {
        log::info!(
            "persisting new schema {} ({} types)",
            schema.id().to_abbreviated_hex(),
            schema.types().count()
        );
        kv.put(keyspace::schema_key(schema.id()), manifest::encode(&schema))?;
    }
    Ok(intern(schema))
}
