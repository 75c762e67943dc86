//! Per-connection decode cache.
//!
//! Each connection caches decoded objects and metadata separately, keyed by
//! `(collection, key)`, so repeat reads skip deserialization. Entries are
//! valid only up to the connection's local snapshot; changeset application
//! drops whatever a committed write touched. Absence from the cache always
//! means "refetch", never "does not exist".

use crate::changeset::{Changeset, ChangesetBuilder};
use std::collections::{HashMap, VecDeque};

/// One bounded map of decoded values with insertion-order eviction.
#[derive(Debug)]
struct Slab<V> {
    values: HashMap<(String, String), V>,
    /// Insertion order. Kept in lockstep with `values`: exactly one entry
    /// per live key, so the queue never outgrows the map and a stale front
    /// entry can never evict a live key.
    order: VecDeque<(String, String)>,
    capacity: usize,
}

impl<V> Slab<V> {
    fn new(capacity: usize) -> Self {
        Self {
            values: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, collection: &str, key: &str) -> Option<&V> {
        self.values.get(&(collection.to_owned(), key.to_owned()))
    }

    fn insert(&mut self, collection: &str, key: &str, value: V) {
        let entry = (collection.to_owned(), key.to_owned());
        if self.values.insert(entry.clone(), value).is_none() {
            self.order.push_back(entry);
            self.evict();
        }
    }

    fn remove(&mut self, collection: &str, key: &str) {
        let entry = (collection.to_owned(), key.to_owned());
        if self.values.remove(&entry).is_some() {
            self.order.retain(|queued| queued != &entry);
        }
    }

    fn remove_collection(&mut self, collection: &str) {
        self.values.retain(|(c, _), _| c != collection);
        self.order.retain(|(c, _)| c != collection);
    }

    fn clear(&mut self) {
        self.values.clear();
        self.order.clear();
    }

    fn evict(&mut self) {
        if self.capacity == 0 {
            return;
        }
        while self.values.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.values.remove(&oldest);
        }
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

/// The decode cache owned by one connection.
///
/// Objects and metadata are cached independently so that a metadata-only
/// read never forces an object decode and vice versa. Cached metadata is
/// `Option<M>`: `Some(None)`-style entries record "row exists, metadata is
/// nil" and still save a store round trip.
#[derive(Debug)]
pub(crate) struct Cache<O, M> {
    objects: Slab<O>,
    metadata: Slab<Option<M>>,
}

impl<O, M> Cache<O, M> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            objects: Slab::new(capacity),
            metadata: Slab::new(capacity),
        }
    }

    pub(crate) fn object(&self, collection: &str, key: &str) -> Option<&O> {
        self.objects.get(collection, key)
    }

    pub(crate) fn metadata(&self, collection: &str, key: &str) -> Option<&Option<M>> {
        self.metadata.get(collection, key)
    }

    /// Whether either map holds an entry for the row. A hit implies the row
    /// exists at the connection's local snapshot.
    pub(crate) fn contains_row(&self, collection: &str, key: &str) -> bool {
        self.objects.get(collection, key).is_some() || self.metadata.get(collection, key).is_some()
    }

    pub(crate) fn insert_object(&mut self, collection: &str, key: &str, object: O) {
        self.objects.insert(collection, key, object);
    }

    pub(crate) fn insert_metadata(&mut self, collection: &str, key: &str, metadata: Option<M>) {
        self.metadata.insert(collection, key, metadata);
    }

    pub(crate) fn remove_row(&mut self, collection: &str, key: &str) {
        self.objects.remove(collection, key);
        self.metadata.remove(collection, key);
    }

    /// Drops only the metadata entry, leaving a cached object intact.
    pub(crate) fn remove_metadata(&mut self, collection: &str, key: &str) {
        self.metadata.remove(collection, key);
    }

    pub(crate) fn remove_collection(&mut self, collection: &str) {
        self.objects.remove_collection(collection);
        self.metadata.remove_collection(collection);
    }

    pub(crate) fn clear(&mut self) {
        self.objects.clear();
        self.metadata.clear();
    }

    /// Invalidates every entry a committed changeset touched.
    pub(crate) fn apply(&mut self, changeset: &Changeset) {
        if changeset.is_all_cleared() {
            self.clear();
            return;
        }
        for collection in changeset.cleared_collections() {
            self.remove_collection(collection);
        }
        for ((collection, key), _) in changeset.rows() {
            self.remove_row(collection, key);
        }
    }

    /// Invalidates every entry an uncommitted transaction touched; used to
    /// undo cache writes on rollback or commit failure.
    pub(crate) fn purge_pending(&mut self, pending: &ChangesetBuilder) {
        if pending.is_all_cleared() {
            self.clear();
            return;
        }
        for collection in pending.cleared() {
            self.remove_collection(collection);
        }
        for (collection, key) in pending.touched_rows() {
            self.remove_row(collection, key);
        }
    }

    #[cfg(test)]
    fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::ChangesetBuilder;
    use shelfdb_storage::Snapshot;

    fn cache() -> Cache<String, u32> {
        Cache::new(0)
    }

    #[test]
    fn miss_then_hit() {
        let mut cache = cache();
        assert!(cache.object("c", "k").is_none());

        cache.insert_object("c", "k", "v".to_owned());
        assert_eq!(cache.object("c", "k").unwrap(), "v");
    }

    #[test]
    fn metadata_known_nil_is_a_hit() {
        let mut cache = cache();
        cache.insert_metadata("c", "k", None);
        assert_eq!(cache.metadata("c", "k"), Some(&None));
        assert!(cache.contains_row("c", "k"));
    }

    #[test]
    fn remove_row_drops_both_maps() {
        let mut cache = cache();
        cache.insert_object("c", "k", "v".to_owned());
        cache.insert_metadata("c", "k", Some(1));

        cache.remove_row("c", "k");
        assert!(cache.object("c", "k").is_none());
        assert!(cache.metadata("c", "k").is_none());
    }

    #[test]
    fn remove_metadata_keeps_object() {
        let mut cache = cache();
        cache.insert_object("c", "k", "v".to_owned());
        cache.insert_metadata("c", "k", Some(1));

        cache.remove_metadata("c", "k");
        assert!(cache.object("c", "k").is_some());
        assert!(cache.metadata("c", "k").is_none());
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut cache: Cache<u32, u32> = Cache::new(2);
        cache.insert_object("c", "k1", 1);
        cache.insert_object("c", "k2", 2);
        cache.insert_object("c", "k3", 3);

        assert_eq!(cache.object_count(), 2);
        assert!(cache.object("c", "k1").is_none());
        assert!(cache.object("c", "k3").is_some());
    }

    #[test]
    fn reinsert_does_not_grow() {
        let mut cache: Cache<u32, u32> = Cache::new(2);
        cache.insert_object("c", "k1", 1);
        cache.insert_object("c", "k1", 10);
        cache.insert_object("c", "k2", 2);

        assert_eq!(cache.object_count(), 2);
        assert_eq!(cache.object("c", "k1").unwrap(), &10);
    }

    #[test]
    fn churn_does_not_grow_the_eviction_queue() {
        let mut cache: Cache<u32, u32> = Cache::new(8);
        for i in 0..10_000 {
            cache.insert_object("c", "k", i);
            cache.remove_row("c", "k");
        }
        assert_eq!(cache.objects.order.len(), 0);

        cache.insert_object("c", "k", 1);
        assert_eq!(cache.objects.order.len(), 1);
    }

    #[test]
    fn reinserted_key_is_not_evicted_by_its_old_queue_entry() {
        let mut cache: Cache<u32, u32> = Cache::new(2);
        cache.insert_object("c", "k1", 1);
        cache.insert_object("c", "k2", 2);
        cache.remove_row("c", "k1");
        cache.insert_object("c", "k1", 10);
        cache.insert_object("c", "k3", 3);

        // k2 is now the oldest live entry; the reinserted k1 must not be
        // evicted through its pre-removal queue position.
        assert_eq!(cache.object_count(), 2);
        assert!(cache.object("c", "k2").is_none());
        assert_eq!(cache.object("c", "k1").unwrap(), &10);
        assert_eq!(cache.object("c", "k3").unwrap(), &3);
    }

    #[test]
    fn collection_removal_prunes_the_queue() {
        let mut cache: Cache<u32, u32> = Cache::new(0);
        cache.insert_object("a", "k1", 1);
        cache.insert_object("a", "k2", 2);
        cache.insert_object("b", "k1", 3);

        cache.remove_collection("a");
        assert_eq!(cache.objects.order.len(), 1);
        assert!(cache.object("b", "k1").is_some());
    }

    #[test]
    fn changeset_application_invalidates_touched_rows() {
        let mut cache = cache();
        cache.insert_object("a", "k1", "1".to_owned());
        cache.insert_object("a", "k2", "2".to_owned());
        cache.insert_object("b", "k1", "3".to_owned());

        let mut builder = ChangesetBuilder::default();
        builder.record_update("a", "k1");
        cache.apply(&builder.seal(Snapshot::new(1)));

        assert!(cache.object("a", "k1").is_none());
        assert!(cache.object("a", "k2").is_some());
        assert!(cache.object("b", "k1").is_some());
    }

    #[test]
    fn cleared_collection_invalidates_whole_collection() {
        let mut cache = cache();
        cache.insert_object("a", "k1", "1".to_owned());
        cache.insert_metadata("a", "k2", Some(2));
        cache.insert_object("b", "k1", "3".to_owned());

        let mut builder = ChangesetBuilder::default();
        builder.record_collection_cleared("a");
        cache.apply(&builder.seal(Snapshot::new(1)));

        assert!(!cache.contains_row("a", "k1"));
        assert!(!cache.contains_row("a", "k2"));
        assert!(cache.contains_row("b", "k1"));
    }

    #[test]
    fn all_cleared_empties_the_cache() {
        let mut cache = cache();
        cache.insert_object("a", "k1", "1".to_owned());
        cache.insert_metadata("b", "k1", None);

        let mut builder = ChangesetBuilder::default();
        builder.record_all_cleared();
        cache.apply(&builder.seal(Snapshot::new(1)));

        assert!(!cache.contains_row("a", "k1"));
        assert!(!cache.contains_row("b", "k1"));
    }
}
