//! Mutating access on top of a read view.

use super::pending::PendingWrites;
use super::read::ReadTransaction;
use crate::cache::Cache;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use shelfdb_codec::Codec;
use shelfdb_storage::Snapshot;
use std::cell::RefCell;
use std::ops::Deref;

/// A read-write view of the database.
///
/// Dereferences to [`ReadTransaction`], so every read operation is
/// available and observes this transaction's own uncommitted writes
/// (read-your-writes). Writes are buffered; nothing reaches the backing
/// store until the transaction closure returns successfully, at which
/// point the connection replays the buffer as one atomic batch.
///
/// At most one read-write transaction is open database-wide at a time;
/// [`Connection::read_write`](crate::Connection::read_write) blocks until
/// the current writer finishes.
pub struct ReadWriteTransaction<'a, C: Codec> {
    inner: ReadTransaction<'a, C>,
    pending: &'a RefCell<PendingWrites>,
}

impl<'a, C: Codec> Deref for ReadWriteTransaction<'a, C> {
    type Target = ReadTransaction<'a, C>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, C: Codec> ReadWriteTransaction<'a, C> {
    pub(crate) fn new(
        db: &'a Database<C>,
        snapshot: Snapshot,
        cache: &'a RefCell<Cache<C::Object, C::Metadata>>,
        pending: &'a RefCell<PendingWrites>,
    ) -> Self {
        Self {
            inner: ReadTransaction::new(db, snapshot, cache, Some(pending)),
            pending,
        }
    }

    /// Stores `object` under `(collection, key)`, replacing any existing
    /// row. The row's metadata becomes `metadata`; passing `None` clears
    /// it. Passing `None` for the object removes the row instead, exactly
    /// as [`remove_object_for_key`](Self::remove_object_for_key) would.
    pub fn set_object(
        &self,
        collection: &str,
        key: &str,
        object: Option<C::Object>,
        metadata: Option<C::Metadata>,
    ) -> CoreResult<()> {
        let Some(object) = object else {
            return self.remove_object_for_key(collection, key);
        };
        self.ensure_mutable()?;

        let data = self.encode_object(&object)?;
        let metadata_bytes = match &metadata {
            Some(metadata) => Some(self.encode_metadata(metadata)?),
            None => None,
        };

        self.pending
            .borrow_mut()
            .put(collection, key, data, metadata_bytes);
        // The decoded values are authoritative for this row now; cache them
        // so the transaction's own reads skip the decode.
        let mut cache = self.inner.cache.borrow_mut();
        cache.insert_object(collection, key, object);
        cache.insert_metadata(collection, key, metadata);
        Ok(())
    }

    /// Replaces only the metadata of an existing row. A no-op when no row
    /// exists under `(collection, key)`.
    pub fn set_metadata(
        &self,
        collection: &str,
        key: &str,
        metadata: Option<C::Metadata>,
    ) -> CoreResult<()> {
        self.ensure_mutable()?;
        let Some(current) = self.inner.raw_row(collection, key)? else {
            return Ok(());
        };

        let metadata_bytes = match &metadata {
            Some(metadata) => Some(self.encode_metadata(metadata)?),
            None => None,
        };

        self.pending
            .borrow_mut()
            .put_metadata(collection, key, metadata_bytes, current);
        self.inner
            .cache
            .borrow_mut()
            .insert_metadata(collection, key, metadata);
        Ok(())
    }

    /// Stores pre-serialized bytes under `(collection, key)`, bypassing the
    /// codec. Passing `None` for the data removes the row.
    ///
    /// The cache entries for the row are dropped rather than updated: the
    /// decoded form of foreign bytes is unknown until something reads them.
    pub fn set_primitive_data(
        &self,
        collection: &str,
        key: &str,
        data: Option<Vec<u8>>,
        metadata: Option<Vec<u8>>,
    ) -> CoreResult<()> {
        let Some(data) = data else {
            return self.remove_object_for_key(collection, key);
        };
        self.ensure_mutable()?;

        self.pending.borrow_mut().put(collection, key, data, metadata);
        self.inner.cache.borrow_mut().remove_row(collection, key);
        Ok(())
    }

    /// Replaces only the metadata of an existing row with pre-serialized
    /// bytes, bypassing the codec. A no-op when no row exists.
    pub fn set_primitive_metadata(
        &self,
        collection: &str,
        key: &str,
        metadata: Option<Vec<u8>>,
    ) -> CoreResult<()> {
        self.ensure_mutable()?;
        let Some(current) = self.inner.raw_row(collection, key)? else {
            return Ok(());
        };

        self.pending
            .borrow_mut()
            .put_metadata(collection, key, metadata, current);
        self.inner.cache.borrow_mut().remove_metadata(collection, key);
        Ok(())
    }

    /// Removes the row under `(collection, key)`. Removing a nonexistent
    /// row is not an error.
    pub fn remove_object_for_key(&self, collection: &str, key: &str) -> CoreResult<()> {
        self.ensure_mutable()?;
        self.pending.borrow_mut().delete(collection, key);
        self.inner.cache.borrow_mut().remove_row(collection, key);
        Ok(())
    }

    /// Removes every listed key from one collection.
    pub fn remove_objects_for_keys(&self, collection: &str, keys: &[&str]) -> CoreResult<()> {
        self.ensure_mutable()?;
        let mut pending = self.pending.borrow_mut();
        let mut cache = self.inner.cache.borrow_mut();
        for key in keys {
            pending.delete(collection, key);
            cache.remove_row(collection, key);
        }
        Ok(())
    }

    /// Removes every row in one collection.
    pub fn remove_all_objects_in_collection(&self, collection: &str) -> CoreResult<()> {
        self.ensure_mutable()?;
        self.pending.borrow_mut().delete_collection(collection);
        self.inner.cache.borrow_mut().remove_collection(collection);
        Ok(())
    }

    /// Removes every row in every collection.
    pub fn remove_all_objects_in_all_collections(&self) -> CoreResult<()> {
        self.ensure_mutable()?;
        self.pending.borrow_mut().delete_all();
        self.inner.cache.borrow_mut().clear();
        Ok(())
    }

    /// Discards every write buffered so far. The transaction stays open
    /// for reads, which once again observe the starting snapshot; further
    /// mutation attempts fail.
    pub fn rollback(&self) {
        let mut pending = self.pending.borrow_mut();
        // Cache entries inserted for buffered writes are lies once those
        // writes are discarded; drop them before the changeset is cleared.
        self.inner
            .cache
            .borrow_mut()
            .purge_pending(&pending.changeset);
        pending.rollback();
    }

    /// Whether [`rollback`](Self::rollback) has been called.
    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        self.pending.borrow().rolled_back
    }

    fn ensure_mutable(&self) -> CoreResult<()> {
        if self.inner.is_enumerating() {
            return Err(CoreError::ConcurrentMutation);
        }
        if self.pending.borrow().rolled_back {
            return Err(CoreError::invalid_operation(
                "transaction has been rolled back",
            ));
        }
        Ok(())
    }

    /// Encode failures poison the transaction: the buffer is discarded so a
    /// half-applied write can never commit.
    fn encode_object(&self, object: &C::Object) -> CoreResult<Vec<u8>> {
        match self.inner.db.codec().encode_object(object) {
            Ok(bytes) => Ok(bytes),
            Err(error) => {
                self.rollback();
                Err(error.into())
            }
        }
    }

    fn encode_metadata(&self, metadata: &C::Metadata) -> CoreResult<Vec<u8>> {
        match self.inner.db.codec().encode_metadata(metadata) {
            Ok(bytes) => Ok(bytes),
            Err(error) => {
                self.rollback();
                Err(error.into())
            }
        }
    }
}
