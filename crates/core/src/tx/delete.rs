//! Object deletion and the inverse-reference protocol.
//!
//! Deleting `O` scans the inverse-reference index for every slot that can
//! hold a reference to `O` and applies each referring field's declared
//! action. Cycles are broken by the transaction's in-progress set: an
//! object already inside a delete cascade re-enters as a no-op, and its
//! inbound references are exempt from the `EXCEPTION` action.

use super::index::encode_index_value;
use super::Transaction;
use crate::error::{ObjectError, Result};
use crate::row::ObjRow;
use std::collections::BTreeSet;
use std::rc::Rc;
use stratadb_encoding::{FieldValue, ValueEncoding};
use stratadb_primitives::{FieldId, ObjId};
use stratadb_schema::{DeleteAction, FieldKind, SlotPlace, TypeSchema};

struct InboundRef {
    referrer: ObjId,
    field_name: String,
    place: SlotPlace,
    action: DeleteAction,
}

impl Transaction {
    /// Deletes an object, applying inverse-delete actions and forward
    /// deletes. Returns `true` exactly for the first successful deletion of
    /// a live object; deleting an absent or already-in-progress object is a
    /// no-op returning `false`.
    pub fn delete(&mut self, id: ObjId) -> Result<bool> {
        if !self.exists(id)? {
            return Ok(false);
        }
        if !self.deleting.insert(id) {
            return Ok(false);
        }
        let result = self.delete_inner(id);
        self.deleting.remove(&id);
        result.map(|()| true)
    }

    fn delete_inner(&mut self, id: ObjId) -> Result<()> {
        // Find every inbound reference and resolve its declared action,
        // failing fast on EXCEPTION before anything mutates.
        let inbound = self.collect_inbound(id)?;

        // The on-delete callback fires exactly once per object, while the
        // object's fields are still readable.
        let callbacks: Vec<Rc<super::DeleteFn>> = self
            .delete_callbacks
            .iter()
            .filter(|(filter, _)| filter.is_none() || *filter == Some(id.type_id()))
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(self, id);
        }

        // Apply the inverse actions. A referrer may have vanished while the
        // callbacks ran; re-check before touching it.
        let target = FieldValue::Ref(id);
        for entry in inbound {
            if !self.exists(entry.referrer)? {
                continue;
            }
            match entry.action {
                DeleteAction::Exception => unreachable!("rejected during collection"),
                DeleteAction::Ignore => {}
                DeleteAction::Nullify => {
                    self.write_field(entry.referrer, &entry.field_name, FieldValue::Null)?;
                }
                DeleteAction::Remove => {
                    self.remove_inbound_entry(&entry, &target)?;
                }
                DeleteAction::Cascade => {
                    self.delete(entry.referrer)?;
                }
            }
        }

        // Reload the row now: the callbacks and the inverse actions were
        // free to rewrite it.
        let (stored, row) = self
            .load_stored_row(id)?
            .ok_or(ObjectError::Deleted(id))?;
        let stored_ty = stored
            .get_type(id.type_id())
            .ok_or(ObjectError::BadRow(id))?
            .clone();

        // Forward deletes are collected before this object's state goes
        // away, applied after.
        let mut forward: BTreeSet<ObjId> = BTreeSet::new();
        for position in stored_ty.ref_positions() {
            if !position.spec.forward_delete {
                continue;
            }
            forward.extend(self.raw_ref_values(
                id,
                position.container,
                position.slot,
                position.place,
            )?);
        }

        self.cleanup(&stored_ty, id, &row)?;
        log::trace!("OBJECT DELETED: {} {}", stored_ty.name, id);

        for target in forward {
            self.delete(target)?;
        }
        Ok(())
    }

    /// Scans the inverse-reference index of every slot known to any schema
    /// version, resolving each referrer's declared action via its stored
    /// schema.
    fn collect_inbound(&self, id: ObjId) -> Result<Vec<InboundRef>> {
        let target_bytes = encode_index_value(&ValueEncoding::Reference, &FieldValue::Ref(id))?;
        let mut slots: BTreeSet<FieldId> = BTreeSet::new();
        for schema in &self.known_schemas {
            slots.extend(schema.ref_slots().keys().copied());
        }
        let mut inbound = Vec::new();
        let mut seen: BTreeSet<(ObjId, FieldId)> = BTreeSet::new();
        for slot in slots {
            for (referrer, _extra) in self.index_scan_value(slot.0, &target_bytes)? {
                if referrer == id || self.deleting.contains(&referrer) {
                    continue;
                }
                let Some((ref_schema, _)) = self.load_stored_row(referrer)? else {
                    continue;
                };
                let Some(ref_ty) = ref_schema.get_type(referrer.type_id()) else {
                    continue;
                };
                let Some(position) = ref_ty.ref_position(slot) else {
                    continue;
                };
                if position.spec.on_target_delete == DeleteAction::Exception {
                    return Err(ObjectError::Referenced {
                        id,
                        field: position.field_name.clone(),
                    }
                    .into());
                }
                // A list may hold the same reference several times; one
                // action per (referrer, slot) is enough, the removal paths
                // clear every occurrence.
                if seen.insert((referrer, slot)) {
                    inbound.push(InboundRef {
                        referrer,
                        field_name: position.field_name.clone(),
                        place: position.place,
                        action: position.spec.on_target_delete,
                    });
                }
            }
        }
        Ok(inbound)
    }

    /// Applies the `REMOVE` action: drops every occurrence of `target` from
    /// the referring collection.
    fn remove_inbound_entry(&mut self, entry: &InboundRef, target: &FieldValue) -> Result<()> {
        let referrer = entry.referrer;
        let field = entry.field_name.clone();
        match entry.place {
            SlotPlace::Field => unreachable!("REMOVE is rejected on plain reference fields"),
            SlotPlace::SetElement => {
                self.set_remove(referrer, &field, target)?;
            }
            SlotPlace::ListElement => loop {
                let items = self.list_get(referrer, &field)?;
                let Some(position) = items.iter().position(|item| item == target) else {
                    break;
                };
                self.list_remove(referrer, &field, position as u64)?;
            },
            SlotPlace::MapKey => {
                self.map_remove(referrer, &field, target)?;
            }
            SlotPlace::MapValue => {
                let doomed: Vec<FieldValue> = self
                    .map_iter(referrer, &field)?
                    .into_iter()
                    .filter(|(_, value)| value == target)
                    .map(|(key, _)| key)
                    .collect();
                for key in doomed {
                    self.map_remove(referrer, &field, &key)?;
                }
            }
        }
        Ok(())
    }

    /// Removes the object's primary row, out-of-line data and every index
    /// entry derived from it.
    fn cleanup(&mut self, ty: &TypeSchema, id: ObjId, row: &ObjRow) -> Result<()> {
        self.drop_inline_index_entries(ty, id, &row.values)?;
        for field in ty.fields() {
            match &field.kind {
                FieldKind::Counter => {
                    self.kv
                        .remove(&stratadb_kv::keyspace::field_key(field.id, id))?;
                }
                FieldKind::Set(_) | FieldKind::List(_) | FieldKind::Map { .. } => {
                    self.drop_collection(ty, field.id, id)?;
                }
                _ => {}
            }
        }
        self.kv.remove(&stratadb_kv::keyspace::object_key(id))?;
        Ok(())
    }
}
