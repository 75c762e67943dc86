//! Buffered state of an in-flight read-write transaction.
//!
//! Writes never reach the backing store until commit: they accumulate here
//! as an ordered op log (replayed into one atomic store batch) plus a
//! materialized overlay the transaction's own reads consult before the
//! store. Rollback is therefore a pure in-memory discard.

use crate::changeset::ChangesetBuilder;
use shelfdb_storage::RawRow;
use std::collections::{HashMap, HashSet};

/// One buffered write, in issue order.
#[derive(Debug)]
pub(crate) enum WriteOp {
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

/// Result of consulting the overlay for a point read.
#[derive(Debug)]
pub(crate) enum OverlayLookup {
    /// The transaction wrote this row; here is its current raw form.
    Row(RawRow),
    /// The transaction removed this row (or cleared its collection).
    Deleted,
    /// The transaction has not touched this row; fall through to the store.
    Miss,
}

#[derive(Debug, Default)]
pub(crate) struct PendingWrites {
    pub(crate) ops: Vec<WriteOp>,
    pub(crate) changeset: ChangesetBuilder,
    pub(crate) rolled_back: bool,
    /// Row-level overlay. `None` marks a delete issued by this transaction.
    overlay: HashMap<(String, String), Option<RawRow>>,
    cleared_collections: HashSet<String>,
    all_cleared: bool,
}

impl PendingWrites {
    pub(crate) fn has_writes(&self) -> bool {
        !self.ops.is_empty()
    }

    pub(crate) fn lookup(&self, collection: &str, key: &str) -> OverlayLookup {
        if let Some(entry) = self.overlay.get(&(collection.to_owned(), key.to_owned())) {
            return match entry {
                Some(row) => OverlayLookup::Row(row.clone()),
                None => OverlayLookup::Deleted,
            };
        }
        if self.all_cleared || self.cleared_collections.contains(collection) {
            return OverlayLookup::Deleted;
        }
        OverlayLookup::Miss
    }

    pub(crate) fn is_collection_cleared(&self, collection: &str) -> bool {
        self.all_cleared || self.cleared_collections.contains(collection)
    }

    /// Overlay entries for one collection: key and whether the row survives.
    pub(crate) fn overlay_for_collection<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = (&'a str, Option<&'a RawRow>)> {
        self.overlay
            .iter()
            .filter(move |((c, _), _)| c == collection)
            .map(|((_, key), row)| (key.as_str(), row.as_ref()))
    }

    /// Collections into which this transaction has written at least one row.
    pub(crate) fn overlay_collections(&self) -> impl Iterator<Item = &str> {
        self.overlay
            .iter()
            .filter(|(_, row)| row.is_some())
            .map(|((collection, _), _)| collection.as_str())
    }

    pub(crate) fn put(
        &mut self,
        collection: &str,
        key: &str,
        data: Vec<u8>,
        metadata: Option<Vec<u8>>,
    ) {
        self.overlay.insert(
            (collection.to_owned(), key.to_owned()),
            Some(RawRow::new(data.clone(), metadata.clone())),
        );
        self.ops.push(WriteOp::Put {
            collection: collection.to_owned(),
            key: key.to_owned(),
            data,
            metadata,
        });
        self.changeset.record_update(collection, key);
    }

    /// Buffers a metadata-only rewrite. `current` is the row as visible to
    /// the transaction right now; its data bytes carry over unchanged.
    pub(crate) fn put_metadata(
        &mut self,
        collection: &str,
        key: &str,
        metadata: Option<Vec<u8>>,
        current: RawRow,
    ) {
        self.overlay.insert(
            (collection.to_owned(), key.to_owned()),
            Some(RawRow::new(current.data, metadata.clone())),
        );
        self.ops.push(WriteOp::PutMetadata {
            collection: collection.to_owned(),
            key: key.to_owned(),
            metadata,
        });
        self.changeset.record_update(collection, key);
    }

    pub(crate) fn delete(&mut self, collection: &str, key: &str) {
        self.overlay
            .insert((collection.to_owned(), key.to_owned()), None);
        self.ops.push(WriteOp::Delete {
            collection: collection.to_owned(),
            key: key.to_owned(),
        });
        self.changeset.record_removal(collection, key);
    }

    pub(crate) fn delete_collection(&mut self, collection: &str) {
        // Entries written earlier in this transaction are subsumed.
        self.overlay.retain(|(c, _), _| c != collection);
        self.cleared_collections.insert(collection.to_owned());
        self.ops.push(WriteOp::DeleteCollection {
            collection: collection.to_owned(),
        });
        self.changeset.record_collection_cleared(collection);
    }

    pub(crate) fn delete_all(&mut self) {
        self.overlay.clear();
        self.cleared_collections.clear();
        self.all_cleared = true;
        self.ops.push(WriteOp::DeleteAll);
        self.changeset.record_all_cleared();
    }

    /// Discards every buffered write and marks the transaction rolled back.
    /// Cache purging is the caller's responsibility and must happen first.
    pub(crate) fn rollback(&mut self) {
        self.ops.clear();
        self.overlay.clear();
        self.cleared_collections.clear();
        self.all_cleared = false;
        self.changeset.clear();
        self.rolled_back = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_miss_on_untouched_row() {
        let pending = PendingWrites::default();
        assert!(matches!(pending.lookup("c", "k"), OverlayLookup::Miss));
    }

    #[test]
    fn put_then_lookup() {
        let mut pending = PendingWrites::default();
        pending.put("c", "k", b"v".to_vec(), None);

        match pending.lookup("c", "k") {
            OverlayLookup::Row(row) => assert_eq!(row.data, b"v"),
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn delete_shadows_the_store() {
        let mut pending = PendingWrites::default();
        pending.delete("c", "k");
        assert!(matches!(pending.lookup("c", "k"), OverlayLookup::Deleted));
    }

    #[test]
    fn collection_clear_deletes_unwritten_keys() {
        let mut pending = PendingWrites::default();
        pending.put("c", "kept-elsewhere", b"v".to_vec(), None);
        pending.delete_collection("c");

        assert!(matches!(
            pending.lookup("c", "kept-elsewhere"),
            OverlayLookup::Deleted
        ));
        assert!(matches!(
            pending.lookup("c", "never-touched"),
            OverlayLookup::Deleted
        ));
        assert!(matches!(pending.lookup("other", "k"), OverlayLookup::Miss));
    }

    #[test]
    fn put_after_collection_clear_is_visible() {
        let mut pending = PendingWrites::default();
        pending.delete_collection("c");
        pending.put("c", "k", b"v".to_vec(), None);

        assert!(matches!(pending.lookup("c", "k"), OverlayLookup::Row(_)));
    }

    #[test]
    fn put_metadata_carries_data_forward() {
        let mut pending = PendingWrites::default();
        pending.put_metadata("c", "k", Some(b"m".to_vec()), RawRow::new(b"v".to_vec(), None));

        match pending.lookup("c", "k") {
            OverlayLookup::Row(row) => {
                assert_eq!(row.data, b"v");
                assert_eq!(row.metadata, Some(b"m".to_vec()));
            }
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn rollback_discards_everything() {
        let mut pending = PendingWrites::default();
        pending.put("c", "k", b"v".to_vec(), None);
        pending.delete_collection("d");
        pending.rollback();

        assert!(pending.rolled_back);
        assert!(!pending.has_writes());
        assert!(pending.changeset.is_empty());
        assert!(matches!(pending.lookup("c", "k"), OverlayLookup::Miss));
        assert!(matches!(pending.lookup("d", "k"), OverlayLookup::Miss));
    }
}
