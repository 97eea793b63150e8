//! The validation queue: predicate validators, unique-field and
//! composite-unique constraints.
//!
//! Mutations enqueue their object; `validate()` drains the queue in id
//! order. A failure leaves the offending object queued, so the caller can
//! correct and re-run; `commit()` refuses to proceed until the queue
//! drains.

use super::index::{composite_tuple_bytes, encode_index_value};
use super::Transaction;
use crate::error::{Result, ValidationError};
use std::rc::Rc;
use std::sync::Arc;
use stratadb_encoding::FieldValue;
use stratadb_primitives::ObjId;
use stratadb_schema::TypeSchema;

impl Transaction {
    /// Runs the full validation queue.
    pub fn validate(&mut self) -> Result<()> {
        while let Some(id) = self.to_validate.iter().next().copied() {
            if !self.exists(id)? {
                self.to_validate.remove(&id);
                continue;
            }
            let schema = Arc::clone(&self.schema);
            let Some(ty) = schema.get_type(id.type_id()) else {
                // Objects of types outside the current schema cannot be
                // field-checked; they simply leave the queue.
                self.to_validate.remove(&id);
                continue;
            };
            self.validate_object(ty, id)?;
            self.to_validate.remove(&id);
        }
        Ok(())
    }

    fn validate_object(&mut self, ty: &TypeSchema, id: ObjId) -> Result<()> {
        let validators: Vec<Rc<super::ValidatorFn>> = self
            .validators
            .iter()
            .filter(|(filter, _)| *filter == ty.id)
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for validator in validators {
            validator(self, id).map_err(|message| ValidationError::Predicate { id, message })?;
        }

        let row = self.ensure_current(id)?;

        for field in ty.fields().iter().filter(|f| f.unique) {
            let encoding = field.kind.inline_encoding().expect("unique implies inline");
            let value = row
                .values
                .get(&field.id)
                .cloned()
                .unwrap_or_else(|| stratadb_encoding::default_value(&encoding));
            if field.is_excluded(&value) {
                continue;
            }
            let bytes = encode_index_value(&encoding, &value)?;
            let holders = self.index_scan_value(field.id.0, &bytes)?;
            if holders.len() > 1 {
                return Err(ValidationError::Unique {
                    field: field.id,
                    count: holders.len(),
                }
                .into());
            }
        }

        for composite in ty.composites().iter().filter(|c| c.unique) {
            let tuple: Vec<FieldValue> = composite
                .fields
                .iter()
                .map(|field_id| {
                    let field = ty.field(*field_id).expect("validated position");
                    let encoding = field.kind.inline_encoding().expect("inline position");
                    row.values
                        .get(field_id)
                        .cloned()
                        .unwrap_or_else(|| stratadb_encoding::default_value(&encoding))
                })
                .collect();
            if composite.is_excluded(&tuple) {
                continue;
            }
            let tuple_bytes = composite_tuple_bytes(ty, composite, &row.values)?;
            let holders = self.index_scan_value(composite.id.0, &tuple_bytes)?;
            if holders.len() > 1 {
                return Err(ValidationError::CompositeUnique {
                    index: composite.name.clone(),
                    count: holders.len(),
                }
                .into());
            }
        }
        Ok(())
    }
}
