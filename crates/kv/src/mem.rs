use crate::store::{KvError, KvStore, KvTx, ScanIter};
use itertools::{EitherOrBoth, Itertools};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// An in-memory ordered store.
///
/// Committed state is one `BTreeMap` behind a lock. A transaction takes a
/// snapshot of it at begin and accumulates its writes in an overlay keyed
/// the same way, `None` standing for a tombstone; commit folds the overlay
/// back into the committed map. The snapshot/overlay split mirrors the
/// committed-state/tx-state split of a real datastore and gives snapshot
/// isolation between concurrent transactions.
#[derive(Default, Clone)]
pub struct MemKv {
    committed: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries; test support.
    pub fn committed_len(&self) -> usize {
        self.committed.read().len()
    }
}

impl KvStore for MemKv {
    fn begin(&self) -> Box<dyn KvTx> {
        Box::new(MemTx {
            base: self.committed.read().clone(),
            overlay: BTreeMap::new(),
            committed: Arc::clone(&self.committed),
            closed: false,
        })
    }
}

pub struct MemTx {
    base: BTreeMap<Vec<u8>, Vec<u8>>,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    committed: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    closed: bool,
}

impl MemTx {
    fn check_open(&self) -> Result<(), KvError> {
        if self.closed {
            Err(KvError::Stale)
        } else {
            Ok(())
        }
    }
}

fn upper_bound(to: Option<&[u8]>) -> Bound<&[u8]> {
    match to {
        Some(to) => Bound::Excluded(to),
        None => Bound::Unbounded,
    }
}

impl KvTx for MemTx {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.check_open()?;
        Ok(match self.overlay.get(key) {
            Some(slot) => slot.clone(),
            None => self.base.get(key).cloned(),
        })
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), KvError> {
        self.check_open()?;
        self.overlay.insert(key, Some(value));
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<(), KvError> {
        self.check_open()?;
        self.overlay.insert(key.to_vec(), None);
        Ok(())
    }

    fn remove_range(&mut self, from: &[u8], to: Option<&[u8]>) -> Result<(), KvError> {
        self.check_open()?;
        let doomed: Vec<Vec<u8>> = self.scan(from, to)?.map(|(key, _)| key).collect();
        for key in doomed {
            self.overlay.insert(key, None);
        }
        Ok(())
    }

    fn scan(&self, from: &[u8], to: Option<&[u8]>) -> Result<ScanIter<'_>, KvError> {
        self.check_open()?;
        if let Some(to) = to {
            if from >= to {
                return Ok(Box::new(std::iter::empty()));
            }
        }
        let bounds = (Bound::Included(from), upper_bound(to));
        let base = self.base.range::<[u8], _>(bounds);
        let overlay = self.overlay.range::<[u8], _>(bounds);
        let merged = base
            .merge_join_by(overlay, |(base_key, _), (overlay_key, _)| base_key.cmp(overlay_key))
            .filter_map(|entry| match entry {
                EitherOrBoth::Left((key, value)) => Some((key.clone(), value.clone())),
                EitherOrBoth::Right((key, slot)) | EitherOrBoth::Both(_, (key, slot)) => {
                    slot.as_ref().map(|value| (key.clone(), value.clone()))
                }
            });
        Ok(Box::new(merged))
    }

    fn commit(&mut self) -> Result<(), KvError> {
        self.check_open()?;
        let mut committed = self.committed.write();
        for (key, slot) in std::mem::take(&mut self.overlay) {
            match slot {
                Some(value) => committed.insert(key, value),
                None => committed.remove(&key),
            };
        }
        self.closed = true;
        Ok(())
    }

    fn rollback(&mut self) {
        self.overlay.clear();
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn collect(tx: &dyn KvTx, from: &[u8], to: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        tx.scan(from, to).unwrap().collect()
    }

    #[test]
    fn writes_visible_within_tx_and_after_commit() {
        let store = MemKv::new();
        let mut tx = store.begin();
        tx.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        assert_eq!(tx.get(b"a").unwrap(), Some(b"1".to_vec()));
        tx.commit().unwrap();

        let tx2 = store.begin();
        assert_eq!(tx2.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn snapshot_isolation() {
        let store = MemKv::new();
        let mut setup = store.begin();
        setup.put(b"k".to_vec(), b"old".to_vec()).unwrap();
        setup.commit().unwrap();

        let reader = store.begin();
        let mut writer = store.begin();
        writer.put(b"k".to_vec(), b"new".to_vec()).unwrap();
        writer.commit().unwrap();

        // The reader still sees its snapshot.
        assert_eq!(reader.get(b"k").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn scan_merges_overlay_over_base() {
        let store = MemKv::new();
        let mut setup = store.begin();
        setup.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        setup.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        setup.put(b"c".to_vec(), b"3".to_vec()).unwrap();
        setup.commit().unwrap();

        let mut tx = store.begin();
        tx.remove(b"b").unwrap();
        tx.put(b"c".to_vec(), b"3'".to_vec()).unwrap();
        tx.put(b"d".to_vec(), b"4".to_vec()).unwrap();
        assert_eq!(
            collect(&*tx, b"", None),
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"c".to_vec(), b"3'".to_vec()),
                (b"d".to_vec(), b"4".to_vec()),
            ]
        );
    }

    #[test]
    fn remove_range_is_half_open() {
        let store = MemKv::new();
        let mut tx = store.begin();
        for key in [b"a", b"b", b"c"] {
            tx.put(key.to_vec(), b"x".to_vec()).unwrap();
        }
        tx.remove_range(b"a", Some(b"c")).unwrap();
        assert_eq!(collect(&*tx, b"", None), vec![(b"c".to_vec(), b"x".to_vec())]);
    }

    #[test]
    fn closed_tx_is_stale() {
        let store = MemKv::new();
        let mut tx = store.begin();
        tx.commit().unwrap();
        assert!(tx.is_closed());
        assert_eq!(tx.get(b"a"), Err(KvError::Stale));
        assert_eq!(tx.put(b"a".to_vec(), vec![]), Err(KvError::Stale));
    }

    #[test]
    fn rollback_discards_writes() {
        let store = MemKv::new();
        let mut tx = store.begin();
        tx.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        tx.rollback();
        let tx2 = store.begin();
        assert_eq!(tx2.get(b"a").unwrap(), None);
    }
}
