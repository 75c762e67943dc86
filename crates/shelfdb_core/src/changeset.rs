//! Changesets: the unit of propagation between connections.
//!
//! Every committed write transaction produces one [`Changeset`] describing
//! which `(collection, key)` pairs it touched, stamped with the snapshot it
//! produced. Connections replay changesets in snapshot order to invalidate
//! stale cache entries before their next transaction begins.

use shelfdb_storage::Snapshot;
use std::collections::{HashMap, HashSet};

/// How a committed write transaction touched one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChange {
    /// The row was written (created or overwritten, object or metadata).
    Updated,
    /// The row was removed.
    Removed,
}

/// An immutable record of one committed write transaction.
#[derive(Debug, Clone)]
pub struct Changeset {
    snapshot: Snapshot,
    all_cleared: bool,
    cleared_collections: HashSet<String>,
    rows: HashMap<(String, String), RowChange>,
}

impl Changeset {
    /// The snapshot this changeset produced.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    /// Whether the transaction removed every row in the database.
    #[must_use]
    pub fn is_all_cleared(&self) -> bool {
        self.all_cleared
    }

    /// Collections the transaction cleared in bulk.
    pub fn cleared_collections(&self) -> impl Iterator<Item = &str> {
        self.cleared_collections.iter().map(String::as_str)
    }

    /// Individually touched rows and how they changed.
    pub fn rows(&self) -> impl Iterator<Item = (&(String, String), RowChange)> {
        self.rows.iter().map(|(key, change)| (key, *change))
    }

    /// Whether this changeset invalidates the given row.
    #[must_use]
    pub fn touches(&self, collection: &str, key: &str) -> bool {
        self.all_cleared
            || self.cleared_collections.contains(collection)
            || self
                .rows
                .contains_key(&(collection.to_owned(), key.to_owned()))
    }
}

/// Accumulates row changes during a write transaction; sealed into a
/// [`Changeset`] at commit.
#[derive(Debug, Default)]
pub struct ChangesetBuilder {
    all_cleared: bool,
    cleared_collections: HashSet<String>,
    rows: HashMap<(String, String), RowChange>,
}

impl ChangesetBuilder {
    pub(crate) fn record_update(&mut self, collection: &str, key: &str) {
        self.rows
            .insert((collection.to_owned(), key.to_owned()), RowChange::Updated);
    }

    pub(crate) fn record_removal(&mut self, collection: &str, key: &str) {
        self.rows
            .insert((collection.to_owned(), key.to_owned()), RowChange::Removed);
    }

    /// Records a bulk collection clear. Row entries for that collection are
    /// subsumed by the clear and dropped.
    pub(crate) fn record_collection_cleared(&mut self, collection: &str) {
        self.rows.retain(|(c, _), _| c != collection);
        self.cleared_collections.insert(collection.to_owned());
    }

    /// Records the "all rows removed" sentinel, subsuming everything
    /// recorded so far.
    pub(crate) fn record_all_cleared(&mut self) {
        self.rows.clear();
        self.cleared_collections.clear();
        self.all_cleared = true;
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
        self.cleared_collections.clear();
        self.all_cleared = false;
    }

    /// Whether the transaction touched anything at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.all_cleared && self.cleared_collections.is_empty() && self.rows.is_empty()
    }

    pub(crate) fn is_all_cleared(&self) -> bool {
        self.all_cleared
    }

    pub(crate) fn cleared(&self) -> impl Iterator<Item = &str> {
        self.cleared_collections.iter().map(String::as_str)
    }

    pub(crate) fn touched_rows(&self) -> impl Iterator<Item = &(String, String)> {
        self.rows.keys()
    }

    #[cfg(test)]
    fn row_change(&self, collection: &str, key: &str) -> Option<RowChange> {
        self.rows
            .get(&(collection.to_owned(), key.to_owned()))
            .copied()
    }

    pub(crate) fn seal(self, snapshot: Snapshot) -> Changeset {
        Changeset {
            snapshot,
            all_cleared: self.all_cleared,
            cleared_collections: self.cleared_collections,
            rows: self.rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_builder_is_empty() {
        assert!(ChangesetBuilder::default().is_empty());
    }

    #[test]
    fn updates_and_removals_are_tracked() {
        let mut builder = ChangesetBuilder::default();
        builder.record_update("c", "k1");
        builder.record_removal("c", "k2");

        assert_eq!(builder.row_change("c", "k1"), Some(RowChange::Updated));
        assert_eq!(builder.row_change("c", "k2"), Some(RowChange::Removed));
        assert_eq!(builder.row_change("c", "k3"), None);
    }

    #[test]
    fn removal_after_update_wins() {
        let mut builder = ChangesetBuilder::default();
        builder.record_update("c", "k");
        builder.record_removal("c", "k");
        assert_eq!(builder.row_change("c", "k"), Some(RowChange::Removed));
    }

    #[test]
    fn collection_clear_subsumes_row_entries() {
        let mut builder = ChangesetBuilder::default();
        builder.record_update("a", "k1");
        builder.record_update("b", "k1");
        builder.record_collection_cleared("a");

        let sealed = builder.seal(Snapshot::new(1));
        assert!(sealed.touches("a", "k1"));
        assert!(sealed.touches("a", "anything"));
        assert!(sealed.touches("b", "k1"));
        assert!(!sealed.touches("b", "k2"));
    }

    #[test]
    fn all_cleared_touches_everything() {
        let mut builder = ChangesetBuilder::default();
        builder.record_update("a", "k");
        builder.record_all_cleared();

        let sealed = builder.seal(Snapshot::new(3));
        assert!(sealed.is_all_cleared());
        assert!(sealed.touches("zzz", "anything"));
        assert_eq!(sealed.rows().count(), 0);
    }

    #[test]
    fn update_after_collection_clear_is_kept() {
        let mut builder = ChangesetBuilder::default();
        builder.record_collection_cleared("a");
        builder.record_update("a", "fresh");

        let sealed = builder.seal(Snapshot::new(2));
        assert!(sealed.touches("a", "fresh"));
        assert_eq!(sealed.rows().count(), 1);
    }

    #[test]
    fn seal_stamps_the_snapshot() {
        let sealed = ChangesetBuilder::default().seal(Snapshot::new(9));
        assert_eq!(sealed.snapshot(), Snapshot::new(9));
    }
}
