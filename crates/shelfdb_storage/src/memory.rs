//! In-memory backing store.

use crate::error::{StoreError, StoreResult};
use crate::store::{BackingStore, RawRow, Snapshot};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Row versions in ascending snapshot order. `None` is a tombstone.
type Versions = Vec<(Snapshot, Option<RawRow>)>;

/// Staged batch operation, replayed in order at commit.
#[derive(Debug, Clone)]
enum BatchOp {
    Put {
        collection: String,
        key: String,
        data: Vec<u8>,
        metadata: Option<Vec<u8>>,
    },
    PutMetadata {
        collection: String,
        key: String,
        metadata: Option<Vec<u8>>,
    },
    Delete {
        collection: String,
        key: String,
    },
    DeleteCollection {
        collection: String,
    },
    DeleteAll,
}

#[derive(Debug, Default)]
struct Shared {
    /// collection -> key -> version chain.
    rows: BTreeMap<String, BTreeMap<String, Versions>>,
    /// Open write batch, if any.
    batch: Option<Vec<BatchOp>>,
}

/// A multi-versioned in-memory backing store.
///
/// Every committed batch appends versions stamped with the commit snapshot,
/// so concurrent readers pinned to older snapshots keep observing the state
/// they started from. Suitable for:
/// - Unit and integration tests
/// - Ephemeral databases that don't need persistence
///
/// Collections iterate in lexicographic order, which is stable for a fixed
/// snapshot as the contract requires.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    shared: RwLock<Shared>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolves a version chain at a snapshot bound.
fn resolve_at(versions: &Versions, snapshot: Snapshot) -> Option<&RawRow> {
    versions
        .iter()
        .rev()
        .find(|(stamp, _)| *stamp <= snapshot)
        .and_then(|(_, row)| row.as_ref())
}

impl Shared {
    fn stage(&mut self, op: BatchOp) -> StoreResult<()> {
        match self.batch.as_mut() {
            Some(ops) => {
                ops.push(op);
                Ok(())
            }
            None => Err(StoreError::NoOpenBatch),
        }
    }

    fn apply(&mut self, op: BatchOp, snapshot: Snapshot) {
        match op {
            BatchOp::Put {
                collection,
                key,
                data,
                metadata,
            } => {
                self.rows
                    .entry(collection)
                    .or_default()
                    .entry(key)
                    .or_default()
                    .push((snapshot, Some(RawRow::new(data, metadata))));
            }
            BatchOp::PutMetadata {
                collection,
                key,
                metadata,
            } => {
                // Skipped if the row is not live at this point in the batch.
                let Some(versions) = self
                    .rows
                    .get_mut(&collection)
                    .and_then(|keys| keys.get_mut(&key))
                else {
                    return;
                };
                let Some(current) = resolve_at(versions, snapshot).cloned() else {
                    return;
                };
                versions.push((snapshot, Some(RawRow::new(current.data, metadata))));
            }
            BatchOp::Delete { collection, key } => {
                if let Some(versions) = self
                    .rows
                    .get_mut(&collection)
                    .and_then(|keys| keys.get_mut(&key))
                {
                    versions.push((snapshot, None));
                }
            }
            BatchOp::DeleteCollection { collection } => {
                if let Some(keys) = self.rows.get_mut(&collection) {
                    for versions in keys.values_mut() {
                        if resolve_at(versions, snapshot).is_some() {
                            versions.push((snapshot, None));
                        }
                    }
                }
            }
            BatchOp::DeleteAll => {
                for keys in self.rows.values_mut() {
                    for versions in keys.values_mut() {
                        if resolve_at(versions, snapshot).is_some() {
                            versions.push((snapshot, None));
                        }
                    }
                }
            }
        }
    }
}

impl BackingStore for InMemoryStore {
    fn get(&self, collection: &str, key: &str, snapshot: Snapshot) -> StoreResult<Option<RawRow>> {
        let shared = self.shared.read();
        Ok(shared
            .rows
            .get(collection)
            .and_then(|keys| keys.get(key))
            .and_then(|versions| resolve_at(versions, snapshot))
            .cloned())
    }

    fn contains(&self, collection: &str, key: &str, snapshot: Snapshot) -> StoreResult<bool> {
        let shared = self.shared.read();
        Ok(shared
            .rows
            .get(collection)
            .and_then(|keys| keys.get(key))
            .and_then(|versions| resolve_at(versions, snapshot))
            .is_some())
    }

    fn collections(&self, snapshot: Snapshot) -> StoreResult<Vec<String>> {
        let shared = self.shared.read();
        Ok(shared
            .rows
            .iter()
            .filter(|(_, keys)| {
                keys.values()
                    .any(|versions| resolve_at(versions, snapshot).is_some())
            })
            .map(|(collection, _)| collection.clone())
            .collect())
    }

    fn keys_in_collection(
        &self,
        collection: &str,
        snapshot: Snapshot,
    ) -> StoreResult<Vec<String>> {
        let shared = self.shared.read();
        Ok(shared
            .rows
            .get(collection)
            .map(|keys| {
                keys.iter()
                    .filter(|(_, versions)| resolve_at(versions, snapshot).is_some())
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn scan_collection(
        &self,
        collection: &str,
        snapshot: Snapshot,
    ) -> StoreResult<Vec<(String, RawRow)>> {
        let shared = self.shared.read();
        Ok(shared
            .rows
            .get(collection)
            .map(|keys| {
                keys.iter()
                    .filter_map(|(key, versions)| {
                        resolve_at(versions, snapshot).map(|row| (key.clone(), row.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn key_count(&self, collection: &str, snapshot: Snapshot) -> StoreResult<usize> {
        let shared = self.shared.read();
        Ok(shared
            .rows
            .get(collection)
            .map(|keys| {
                keys.values()
                    .filter(|versions| resolve_at(versions, snapshot).is_some())
                    .count()
            })
            .unwrap_or(0))
    }

    fn total_key_count(&self, snapshot: Snapshot) -> StoreResult<usize> {
        let shared = self.shared.read();
        Ok(shared
            .rows
            .values()
            .map(|keys| {
                keys.values()
                    .filter(|versions| resolve_at(versions, snapshot).is_some())
                    .count()
            })
            .sum())
    }

    fn begin(&self) -> StoreResult<()> {
        let mut shared = self.shared.write();
        if shared.batch.is_some() {
            return Err(StoreError::BatchAlreadyOpen);
        }
        shared.batch = Some(Vec::new());
        Ok(())
    }

    fn put(
        &self,
        collection: &str,
        key: &str,
        data: Vec<u8>,
        metadata: Option<Vec<u8>>,
    ) -> StoreResult<()> {
        self.shared.write().stage(BatchOp::Put {
            collection: collection.to_owned(),
            key: key.to_owned(),
            data,
            metadata,
        })
    }

    fn put_metadata(
        &self,
        collection: &str,
        key: &str,
        metadata: Option<Vec<u8>>,
    ) -> StoreResult<()> {
        self.shared.write().stage(BatchOp::PutMetadata {
            collection: collection.to_owned(),
            key: key.to_owned(),
            metadata,
        })
    }

    fn delete(&self, collection: &str, key: &str) -> StoreResult<()> {
        self.shared.write().stage(BatchOp::Delete {
            collection: collection.to_owned(),
            key: key.to_owned(),
        })
    }

    fn delete_collection(&self, collection: &str) -> StoreResult<()> {
        self.shared.write().stage(BatchOp::DeleteCollection {
            collection: collection.to_owned(),
        })
    }

    fn delete_all(&self) -> StoreResult<()> {
        self.shared.write().stage(BatchOp::DeleteAll)
    }

    fn commit(&self, snapshot: Snapshot) -> StoreResult<()> {
        let mut shared = self.shared.write();
        let ops = shared.batch.take().ok_or(StoreError::NoOpenBatch)?;
        for op in ops {
            shared.apply(op, snapshot);
        }
        Ok(())
    }

    fn rollback(&self) -> StoreResult<()> {
        let mut shared = self.shared.write();
        if shared.batch.take().is_none() {
            return Err(StoreError::NoOpenBatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(store: &InMemoryStore, snapshot: Snapshot, rows: &[(&str, &str, &[u8])]) {
        store.begin().unwrap();
        for (collection, key, data) in rows {
            store.put(collection, key, data.to_vec(), None).unwrap();
        }
        store.commit(snapshot).unwrap();
    }

    #[test]
    fn get_missing_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get("c", "k", Snapshot::new(5)).unwrap().is_none());
    }

    #[test]
    fn put_then_get() {
        let store = InMemoryStore::new();
        committed(&store, Snapshot::new(1), &[("c", "k", b"v")]);

        let row = store.get("c", "k", Snapshot::new(1)).unwrap().unwrap();
        assert_eq!(row.data, b"v");
        assert!(row.metadata.is_none());
    }

    #[test]
    fn reads_are_snapshot_bounded() {
        let store = InMemoryStore::new();
        committed(&store, Snapshot::new(1), &[("c", "k", b"old")]);
        committed(&store, Snapshot::new(2), &[("c", "k", b"new")]);

        assert!(store.get("c", "k", Snapshot::new(0)).unwrap().is_none());
        assert_eq!(
            store.get("c", "k", Snapshot::new(1)).unwrap().unwrap().data,
            b"old"
        );
        assert_eq!(
            store.get("c", "k", Snapshot::new(2)).unwrap().unwrap().data,
            b"new"
        );
    }

    #[test]
    fn delete_tombstones_at_snapshot() {
        let store = InMemoryStore::new();
        committed(&store, Snapshot::new(1), &[("c", "k", b"v")]);

        store.begin().unwrap();
        store.delete("c", "k").unwrap();
        store.commit(Snapshot::new(2)).unwrap();

        assert!(store.contains("c", "k", Snapshot::new(1)).unwrap());
        assert!(!store.contains("c", "k", Snapshot::new(2)).unwrap());
    }

    #[test]
    fn put_metadata_preserves_data() {
        let store = InMemoryStore::new();
        committed(&store, Snapshot::new(1), &[("c", "k", b"v")]);

        store.begin().unwrap();
        store.put_metadata("c", "k", Some(b"m".to_vec())).unwrap();
        store.commit(Snapshot::new(2)).unwrap();

        let row = store.get("c", "k", Snapshot::new(2)).unwrap().unwrap();
        assert_eq!(row.data, b"v");
        assert_eq!(row.metadata, Some(b"m".to_vec()));
    }

    #[test]
    fn put_metadata_on_missing_row_is_skipped() {
        let store = InMemoryStore::new();
        store.begin().unwrap();
        store.put_metadata("c", "k", Some(b"m".to_vec())).unwrap();
        store.commit(Snapshot::new(1)).unwrap();

        assert!(store.get("c", "k", Snapshot::new(1)).unwrap().is_none());
    }

    #[test]
    fn delete_collection_removes_every_row() {
        let store = InMemoryStore::new();
        committed(
            &store,
            Snapshot::new(1),
            &[("a", "k1", b"1"), ("a", "k2", b"2"), ("b", "k1", b"3")],
        );

        store.begin().unwrap();
        store.delete_collection("a").unwrap();
        store.commit(Snapshot::new(2)).unwrap();

        assert_eq!(store.key_count("a", Snapshot::new(2)).unwrap(), 0);
        assert_eq!(store.key_count("a", Snapshot::new(1)).unwrap(), 2);
        assert_eq!(store.key_count("b", Snapshot::new(2)).unwrap(), 1);
        assert_eq!(store.collections(Snapshot::new(2)).unwrap(), vec!["b"]);
    }

    #[test]
    fn delete_all_empties_the_store() {
        let store = InMemoryStore::new();
        committed(
            &store,
            Snapshot::new(1),
            &[("a", "k1", b"1"), ("b", "k1", b"2")],
        );

        store.begin().unwrap();
        store.delete_all().unwrap();
        store.commit(Snapshot::new(2)).unwrap();

        assert_eq!(store.total_key_count(Snapshot::new(2)).unwrap(), 0);
        assert!(store.collections(Snapshot::new(2)).unwrap().is_empty());
        assert_eq!(store.total_key_count(Snapshot::new(1)).unwrap(), 2);
    }

    #[test]
    fn scan_is_in_key_order() {
        let store = InMemoryStore::new();
        committed(
            &store,
            Snapshot::new(1),
            &[("c", "b", b"2"), ("c", "a", b"1"), ("c", "c", b"3")],
        );

        let keys: Vec<String> = store
            .scan_collection("c", Snapshot::new(1))
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn rollback_discards_the_batch() {
        let store = InMemoryStore::new();
        store.begin().unwrap();
        store.put("c", "k", b"v".to_vec(), None).unwrap();
        store.rollback().unwrap();

        assert!(store.get("c", "k", Snapshot::new(1)).unwrap().is_none());
        // A new batch can be opened afterwards.
        store.begin().unwrap();
        store.commit(Snapshot::new(1)).unwrap();
    }

    #[test]
    fn write_outside_batch_fails() {
        let store = InMemoryStore::new();
        let result = store.put("c", "k", b"v".to_vec(), None);
        assert!(matches!(result, Err(StoreError::NoOpenBatch)));
    }

    #[test]
    fn double_begin_fails() {
        let store = InMemoryStore::new();
        store.begin().unwrap();
        assert!(matches!(store.begin(), Err(StoreError::BatchAlreadyOpen)));
    }

    #[test]
    fn batch_ops_apply_in_order() {
        let store = InMemoryStore::new();
        committed(&store, Snapshot::new(1), &[("c", "k", b"old")]);

        // Clear the collection, then re-insert one key in the same batch.
        store.begin().unwrap();
        store.delete_collection("c").unwrap();
        store.put("c", "k2", b"new".to_vec(), None).unwrap();
        store.commit(Snapshot::new(2)).unwrap();

        assert!(!store.contains("c", "k", Snapshot::new(2)).unwrap());
        assert!(store.contains("c", "k2", Snapshot::new(2)).unwrap());
        assert_eq!(store.key_count("c", Snapshot::new(2)).unwrap(), 1);
    }
}
