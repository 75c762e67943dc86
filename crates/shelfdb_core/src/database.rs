//! Database: global ordering and write admission.

use crate::changeset::Changeset;
use crate::connection::Connection;
use crate::options::Options;
use parking_lot::{Mutex, MutexGuard};
use shelfdb_codec::Codec;
use shelfdb_storage::{BackingStore, InMemoryStore, Snapshot};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Process-wide coordinator for one backing store.
///
/// The database owns exactly three pieces of shared state:
/// - the monotonically increasing global snapshot counter,
/// - the single write-admission lock (at most one read-write transaction
///   is open database-wide at any instant),
/// - a bounded history of committed [`Changeset`]s that connections drain
///   to invalidate their caches.
///
/// Everything else, caches and transaction state, is private to individual
/// [`Connection`]s. `Database` is a cheap-clone handle; clones share state.
///
/// # Example
///
/// ```rust,ignore
/// use shelfdb_core::{CborCodec, Database};
///
/// let db = Database::in_memory(CborCodec::<String, u32>::new());
/// let connection = db.new_connection();
///
/// connection.read_write(|txn| {
///     txn.set_object("contacts", "1", Some("Alice".to_owned()), Some(3))
/// })?;
/// ```
pub struct Database<C: Codec> {
    shared: Arc<Shared<C>>,
}

impl<C: Codec> Clone for Database<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<C: Codec> {
    store: Arc<dyn BackingStore>,
    codec: C,
    options: Options,
    /// Current global snapshot. Advanced only under the write-admission
    /// lock, read freely.
    snapshot: AtomicU64,
    /// Write-admission lock: held for the full duration of every
    /// read-write transaction.
    write_lock: Mutex<()>,
    /// Committed changesets, oldest first, bounded by
    /// `options.changeset_history_limit`.
    history: Mutex<VecDeque<Changeset>>,
}

impl<C: Codec> Database<C> {
    /// Creates a database over the given backing store.
    pub fn new(store: Arc<dyn BackingStore>, codec: C) -> Self {
        Self::with_options(store, codec, Options::default())
    }

    /// Creates a database over the given backing store with custom options.
    pub fn with_options(store: Arc<dyn BackingStore>, codec: C, options: Options) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                codec,
                options,
                snapshot: AtomicU64::new(0),
                write_lock: Mutex::new(()),
                history: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Creates a fresh in-memory database, for testing and ephemeral use.
    pub fn in_memory(codec: C) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), codec)
    }

    /// Spawns a new connection bound to this database's backing store, with
    /// its local snapshot at the current global snapshot and an empty cache.
    #[must_use]
    pub fn new_connection(&self) -> Connection<C> {
        Connection::new(self.clone(), self.current_snapshot())
    }

    /// Returns the current global snapshot.
    #[must_use]
    pub fn current_snapshot(&self) -> Snapshot {
        Snapshot::new(self.shared.snapshot.load(Ordering::SeqCst))
    }

    pub(crate) fn store(&self) -> &Arc<dyn BackingStore> {
        &self.shared.store
    }

    pub(crate) fn codec(&self) -> &C {
        &self.shared.codec
    }

    pub(crate) fn options(&self) -> &Options {
        &self.shared.options
    }

    /// Acquires the write-admission lock, blocking until the current holder
    /// releases it.
    pub(crate) fn write_admission(&self) -> MutexGuard<'_, ()> {
        self.shared.write_lock.lock()
    }

    /// Publishes a committed changeset: advances the global snapshot
    /// counter to the changeset's snapshot and appends it to the history.
    ///
    /// Callable only while the write-admission lock is held, after the
    /// backing store has durably committed the batch stamped with the same
    /// snapshot. Publishing last means no connection can ever observe a
    /// snapshot whose rows are not yet readable.
    pub(crate) fn publish(&self, changeset: Changeset) {
        let snapshot = changeset.snapshot();
        debug_assert_eq!(snapshot, self.current_snapshot().next());

        let mut history = self.shared.history.lock();
        history.push_back(changeset);
        let limit = self.shared.options.changeset_history_limit;
        while limit > 0 && history.len() > limit {
            history.pop_front();
        }
        // Counter advances after the changeset is retrievable, so a
        // connection that sees the new snapshot always finds the changeset.
        self.shared.snapshot.store(snapshot.as_u64(), Ordering::SeqCst);
        debug!(snapshot = snapshot.as_u64(), "committed changeset published");
    }

    /// Returns the changesets a connection at `since` must apply to reach
    /// the current snapshot, in snapshot order. Returns `None` when the
    /// history no longer reaches back to `since`; the caller must treat
    /// its entire cache as stale.
    pub(crate) fn changesets_since(&self, since: Snapshot) -> Option<Vec<Changeset>> {
        let history = self.shared.history.lock();
        let newer: Vec<Changeset> = history
            .iter()
            .filter(|changeset| changeset.snapshot() > since)
            .cloned()
            .collect();

        // Snapshots are consecutive: a contiguous run must begin exactly
        // one past `since`.
        match newer.first() {
            Some(first) if first.snapshot() != since.next() => None,
            Some(_) => Some(newer),
            None if self.current_snapshot() > since => None,
            None => Some(newer),
        }
    }
}

impl<C: Codec> std::fmt::Debug for Database<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("snapshot", &self.current_snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::ChangesetBuilder;
    use shelfdb_codec::CborCodec;

    fn create_db() -> Database<CborCodec<String, u32>> {
        Database::in_memory(CborCodec::new())
    }

    fn publish_touch(db: &Database<CborCodec<String, u32>>, collection: &str, key: &str) {
        let _admission = db.write_admission();
        let mut builder = ChangesetBuilder::default();
        builder.record_update(collection, key);
        db.publish(builder.seal(db.current_snapshot().next()));
    }

    #[test]
    fn snapshot_starts_at_zero() {
        let db = create_db();
        assert_eq!(db.current_snapshot(), Snapshot::new(0));
    }

    #[test]
    fn publish_advances_snapshot() {
        let db = create_db();
        publish_touch(&db, "c", "k");
        assert_eq!(db.current_snapshot(), Snapshot::new(1));
        publish_touch(&db, "c", "k2");
        assert_eq!(db.current_snapshot(), Snapshot::new(2));
    }

    #[test]
    fn changesets_since_returns_contiguous_run() {
        let db = create_db();
        publish_touch(&db, "c", "k1");
        publish_touch(&db, "c", "k2");
        publish_touch(&db, "c", "k3");

        let sets = db.changesets_since(Snapshot::new(1)).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].snapshot(), Snapshot::new(2));
        assert_eq!(sets[1].snapshot(), Snapshot::new(3));
    }

    #[test]
    fn changesets_since_current_is_empty() {
        let db = create_db();
        publish_touch(&db, "c", "k");
        let sets = db.changesets_since(Snapshot::new(1)).unwrap();
        assert!(sets.is_empty());
    }

    #[test]
    fn history_gap_returns_none() {
        let db = Database::with_options(
            Arc::new(InMemoryStore::new()),
            CborCodec::<String, u32>::new(),
            Options::new().changeset_history_limit(2),
        );
        for i in 0..5 {
            publish_touch(&db, "c", &format!("k{i}"));
        }
        // Only snapshots 4 and 5 are retained; a connection at 1 has a gap.
        assert!(db.changesets_since(Snapshot::new(1)).is_none());
        assert!(db.changesets_since(Snapshot::new(3)).is_some());
    }
}
