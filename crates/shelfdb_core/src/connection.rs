//! Connections: the unit of cache ownership and transaction execution.

use crate::cache::Cache;
use crate::database::Database;
use crate::error::CoreResult;
use crate::transaction::{PendingWrites, ReadTransaction, ReadWriteTransaction, WriteOp};
use parking_lot::Mutex;
use shelfdb_codec::Codec;
use shelfdb_storage::Snapshot;
use std::cell::RefCell;
use tracing::{debug, trace};

/// A handle for running transactions against a [`Database`].
///
/// Each connection owns a private decode cache and a local snapshot, and
/// runs its transactions one at a time. Connections are `Send + Sync`;
/// calls from multiple threads serialize on the connection's internal
/// lock. For parallel reads, give each thread its own connection; reads
/// on distinct connections never block one another.
///
/// Before every transaction the connection catches up to the current
/// global snapshot by draining the changesets it missed, invalidating
/// exactly the cache entries other writers touched.
pub struct Connection<C: Codec> {
    db: Database<C>,
    state: Mutex<ConnectionState<C>>,
}

struct ConnectionState<C: Codec> {
    /// RefCell because transactions hold `&state` while both reading and
    /// populating the cache.
    cache: RefCell<Cache<C::Object, C::Metadata>>,
    local_snapshot: Snapshot,
}

impl<C: Codec> Connection<C> {
    pub(crate) fn new(db: Database<C>, snapshot: Snapshot) -> Self {
        let capacity = db.options().cache_capacity;
        Self {
            db,
            state: Mutex::new(ConnectionState {
                cache: RefCell::new(Cache::new(capacity)),
                local_snapshot: snapshot,
            }),
        }
    }

    /// The snapshot this connection last caught up to.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().local_snapshot
    }

    /// Runs a read-only transaction.
    ///
    /// The closure observes one immutable snapshot of the database for its
    /// whole duration, regardless of concurrent commits. Never blocks on
    /// writers or on other connections' readers.
    pub fn read<F, T>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&ReadTransaction<'_, C>) -> CoreResult<T>,
    {
        let mut state = self.state.lock();
        self.catch_up(&mut state);
        let txn = ReadTransaction::new(&self.db, state.local_snapshot, &state.cache, None);
        work(&txn)
    }

    /// Runs a read-write transaction.
    ///
    /// Blocks until no other read-write transaction is open anywhere on
    /// this database, then runs the closure against the latest snapshot.
    /// If the closure returns `Ok` and was not rolled back, the buffered
    /// writes are committed atomically and the global snapshot advances;
    /// on `Err` or [`rollback`](ReadWriteTransaction::rollback) nothing
    /// reaches the store.
    pub fn read_write<F, T>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&ReadWriteTransaction<'_, C>) -> CoreResult<T>,
    {
        let mut state = self.state.lock();
        let _admission = self.db.write_admission();
        // Under the admission lock the global snapshot cannot move, so the
        // catch-up below lands exactly on it.
        self.catch_up(&mut state);

        let pending = RefCell::new(PendingWrites::default());
        let result = {
            let txn =
                ReadWriteTransaction::new(&self.db, state.local_snapshot, &state.cache, &pending);
            work(&txn)
        };
        let pending = pending.into_inner();

        match result {
            Ok(value) => {
                if pending.rolled_back || pending.changeset.is_empty() {
                    // Nothing to commit; rollback already purged the cache.
                    return Ok(value);
                }
                self.commit(&mut state, pending)?;
                Ok(value)
            }
            Err(error) => {
                // Cache entries inserted for the abandoned writes are stale.
                state.cache.borrow_mut().purge_pending(&pending.changeset);
                Err(error)
            }
        }
    }

    /// Replays the buffered ops into one store batch, then publishes.
    ///
    /// Order is load-bearing: the store commit is stamped with the next
    /// snapshot BEFORE the global counter advances, so no reader can ever
    /// observe a snapshot whose rows are not yet readable.
    fn commit(&self, state: &mut ConnectionState<C>, pending: PendingWrites) -> CoreResult<()> {
        let store = self.db.store();
        let next = self.db.current_snapshot().next();

        let staged = (|| -> CoreResult<()> {
            store.begin()?;
            for op in &pending.ops {
                match op {
                    WriteOp::Put {
                        collection,
                        key,
                        data,
                        metadata,
                    } => store.put(collection, key, data.clone(), metadata.clone())?,
                    WriteOp::PutMetadata {
                        collection,
                        key,
                        metadata,
                    } => store.put_metadata(collection, key, metadata.clone())?,
                    WriteOp::Delete { collection, key } => store.delete(collection, key)?,
                    WriteOp::DeleteCollection { collection } => {
                        store.delete_collection(collection)?;
                    }
                    WriteOp::DeleteAll => store.delete_all()?,
                }
            }
            store.commit(next)?;
            Ok(())
        })();

        if let Err(error) = staged {
            let _ = store.rollback();
            // The counter never advanced and no changeset was published, so
            // other connections are untouched; only this cache holds stale
            // entries from the failed writes.
            state.cache.borrow_mut().purge_pending(&pending.changeset);
            return Err(error);
        }

        debug!(snapshot = next.as_u64(), ops = pending.ops.len(), "write committed");
        self.db.publish(pending.changeset.seal(next));
        state.local_snapshot = next;
        Ok(())
    }

    /// Brings the cache and local snapshot up to the current global
    /// snapshot by applying the changesets committed since the last
    /// transaction on this connection. A history gap means targeted
    /// invalidation is impossible; the whole cache is flushed instead,
    /// which is always safe because absence only ever means "refetch".
    fn catch_up(&self, state: &mut ConnectionState<C>) {
        let latest = self.db.current_snapshot();
        if latest <= state.local_snapshot {
            return;
        }
        match self.db.changesets_since(state.local_snapshot) {
            Some(changesets) => {
                let mut cache = state.cache.borrow_mut();
                for changeset in &changesets {
                    cache.apply(changeset);
                }
                trace!(
                    from = state.local_snapshot.as_u64(),
                    to = latest.as_u64(),
                    applied = changesets.len(),
                    "connection caught up"
                );
            }
            None => {
                state.cache.borrow_mut().clear();
                trace!(
                    from = state.local_snapshot.as_u64(),
                    to = latest.as_u64(),
                    "changeset history gap, cache flushed"
                );
            }
        }
        state.local_snapshot = latest;
    }
}

impl<C: Codec> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}
