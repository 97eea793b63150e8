//! Change-notification dispatch.
//!
//! When a field changes, every listener whose path tail watches that field
//! walks its path backwards from the changing object; each object the walk
//! reaches at the path root receives the notification exactly once.
//! Listeners observe events only; they hold no transaction access, so a
//! listener can never mutate the engine re-entrantly.

use super::index::encode_index_value;
use super::{ChangeListener, Transaction};
use crate::error::Result;
use crate::event::{ChangeEvent, FieldChange};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;
use stratadb_encoding::{FieldValue, ValueEncoding};
use stratadb_primitives::{FieldId, ObjId};
use stratadb_schema::path::{ResolvedPath, ResolvedStep};
use stratadb_schema::{FieldDecl, SlotPlace};

impl Transaction {
    /// Routes one field change through every matching listener path.
    pub(crate) fn dispatch_change(
        &mut self,
        source: ObjId,
        field: &FieldDecl,
        change: FieldChange,
    ) -> Result<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        let schema = Arc::clone(&self.schema);
        let listeners: Vec<ChangeListener> = self.listeners.clone();
        let mut pending = Vec::new();
        for listener in &listeners {
            if listener.kind != change.kind() {
                continue;
            }
            if !listener.path.watches(&schema, source.type_id(), field.id) {
                continue;
            }
            for root in self.walk_back(&listener.path, source)? {
                pending.push((
                    Rc::clone(&listener.callback),
                    ChangeEvent {
                        root,
                        source,
                        field: field.id,
                        field_name: field.name.clone(),
                        change: change.clone(),
                    },
                ));
            }
        }
        for (callback, event) in pending {
            callback(&event);
        }
        Ok(())
    }

    /// Walks `path` backwards from `source`, returning the set of path
    /// roots that can reach it.
    fn walk_back(&self, path: &ResolvedPath, source: ObjId) -> Result<BTreeSet<ObjId>> {
        let mut current = BTreeSet::from([source]);
        for step in path.steps.iter().rev() {
            let mut previous = BTreeSet::new();
            match step {
                ResolvedStep::Forward { resolutions, .. } => {
                    for &obj in &current {
                        let target_bytes =
                            encode_index_value(&ValueEncoding::Reference, &FieldValue::Ref(obj))?;
                        for (source_type, slot) in resolutions {
                            for (referrer, _) in self.index_scan_value(slot.0, &target_bytes)? {
                                if referrer.type_id() == *source_type {
                                    previous.insert(referrer);
                                }
                            }
                        }
                    }
                }
                ResolvedStep::Inverse {
                    source_type,
                    container,
                    slot,
                    place,
                } => {
                    // The inverse of an inverse step is reading the
                    // reference forward out of the endpoint object.
                    for &obj in &current {
                        if obj.type_id() != *source_type {
                            continue;
                        }
                        for target in self.raw_ref_values(obj, *container, *slot, *place)? {
                            previous.insert(target);
                        }
                    }
                }
            }
            current = previous;
            if current.is_empty() {
                break;
            }
        }
        current.retain(|id| id.type_id() == path.start);
        Ok(current)
    }

    /// Reads the reference values held in one slot of `obj`, decoding via
    /// its stored schema so old-version referrers stay traversable.
    pub(crate) fn raw_ref_values(
        &self,
        obj: ObjId,
        container: FieldId,
        _slot: FieldId,
        place: SlotPlace,
    ) -> Result<Vec<ObjId>> {
        let Some((stored, row)) = self.load_stored_row(obj)? else {
            return Ok(Vec::new());
        };
        let Some(ty) = stored.get_type(obj.type_id()) else {
            return Ok(Vec::new());
        };
        let Some(decl) = ty.field(container) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        match place {
            SlotPlace::Field => {
                if let Some(FieldValue::Ref(target)) = row.values.get(&container) {
                    out.push(*target);
                }
            }
            SlotPlace::SetElement => {
                for (sub, _) in self.collection_entries(decl, obj)? {
                    if let Ok(FieldValue::Ref(target)) =
                        decode_ref(&ValueEncoding::Reference, &sub)
                    {
                        out.push(target);
                    }
                }
            }
            SlotPlace::ListElement => {
                for (_, bytes) in self.collection_entries(decl, obj)? {
                    if let Ok(FieldValue::Ref(target)) =
                        decode_ref(&ValueEncoding::Reference, &bytes)
                    {
                        out.push(target);
                    }
                }
            }
            SlotPlace::MapKey => {
                for (sub, _) in self.collection_entries(decl, obj)? {
                    if let Ok(FieldValue::Ref(target)) =
                        decode_ref(&ValueEncoding::Reference, &sub)
                    {
                        out.push(target);
                    }
                }
            }
            SlotPlace::MapValue => {
                for (_, bytes) in self.collection_entries(decl, obj)? {
                    if let Ok(FieldValue::Ref(target)) =
                        decode_ref(&ValueEncoding::Reference, &bytes)
                    {
                        out.push(target);
                    }
                }
            }
        }
        Ok(out)
    }
}

fn decode_ref(encoding: &ValueEncoding, mut bytes: &[u8]) -> Result<FieldValue> {
    Ok(stratadb_encoding::read_value(&mut bytes, encoding)?)
}
