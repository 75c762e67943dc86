//! Backing store trait definition.

use crate::error::StoreResult;
use std::fmt;

/// A committed database state identifier.
///
/// Snapshots are monotonically increasing and assigned at each committed
/// write batch. Reads are addressed by snapshot: a read at snapshot `s`
/// observes exactly the rows committed at or before `s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Snapshot(pub u64);

impl Snapshot {
    /// Creates a new snapshot identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw snapshot value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next snapshot identifier.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snap:{}", self.0)
    }
}

/// The persisted form of one row: opaque data bytes plus optional
/// opaque metadata bytes, both produced by the external codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Serialized object bytes. Present for every existing row.
    pub data: Vec<u8>,
    /// Serialized metadata bytes, if the row carries metadata.
    pub metadata: Option<Vec<u8>>,
}

impl RawRow {
    /// Creates a raw row.
    #[must_use]
    pub fn new(data: Vec<u8>, metadata: Option<Vec<u8>>) -> Self {
        Self { data, metadata }
    }
}

/// A low-level backing store for ShelfDB, keyed by `(collection, key)`.
///
/// Backing stores are **opaque byte stores**. They know nothing about the
/// codec, caches, or changesets; the transaction engine owns all of that.
/// What they must provide:
///
/// - point reads addressed by snapshot;
/// - ordered scans of one collection (key order) and of the collection
///   namespace, stable for a fixed snapshot;
/// - an atomic commit/rollback boundary around a batch of writes, with the
///   commit stamping every write in the batch with one snapshot.
///
/// # Invariants
///
/// - A read at snapshot `s` never observes a write committed after `s`.
/// - Writes are only legal between `begin` and `commit`/`rollback`.
/// - Either every write in a batch lands (commit) or none do (rollback or
///   failed commit).
/// - Implementations must be `Send + Sync`; batch exclusivity is enforced
///   by the engine's write-admission lock, so at most one batch is open at
///   any instant.
pub trait BackingStore: Send + Sync {
    /// Reads the row for `(collection, key)` as of `snapshot`.
    fn get(&self, collection: &str, key: &str, snapshot: Snapshot) -> StoreResult<Option<RawRow>>;

    /// Returns whether a row exists for `(collection, key)` as of `snapshot`.
    fn contains(&self, collection: &str, key: &str, snapshot: Snapshot) -> StoreResult<bool>;

    /// Returns all collections with at least one row as of `snapshot`,
    /// in a stable order.
    fn collections(&self, snapshot: Snapshot) -> StoreResult<Vec<String>>;

    /// Returns all keys in `collection` as of `snapshot`, in the store's
    /// natural key order. Empty if the collection is absent.
    fn keys_in_collection(&self, collection: &str, snapshot: Snapshot)
        -> StoreResult<Vec<String>>;

    /// Returns every `(key, row)` in `collection` as of `snapshot`, in the
    /// store's natural key order.
    fn scan_collection(
        &self,
        collection: &str,
        snapshot: Snapshot,
    ) -> StoreResult<Vec<(String, RawRow)>>;

    /// Returns the number of rows in `collection` as of `snapshot`.
    /// Zero if the collection is absent.
    fn key_count(&self, collection: &str, snapshot: Snapshot) -> StoreResult<usize>;

    /// Returns the total number of rows across all collections as of
    /// `snapshot`.
    fn total_key_count(&self, snapshot: Snapshot) -> StoreResult<usize>;

    /// Opens a write batch.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::BatchAlreadyOpen`] if a batch is
    /// already pending.
    fn begin(&self) -> StoreResult<()>;

    /// Stages a full-row write into the open batch.
    fn put(
        &self,
        collection: &str,
        key: &str,
        data: Vec<u8>,
        metadata: Option<Vec<u8>>,
    ) -> StoreResult<()>;

    /// Stages a metadata-only rewrite into the open batch. The row's data
    /// bytes are untouched; if the row does not exist at commit time the
    /// operation is skipped.
    fn put_metadata(
        &self,
        collection: &str,
        key: &str,
        metadata: Option<Vec<u8>>,
    ) -> StoreResult<()>;

    /// Stages a single-row delete into the open batch.
    fn delete(&self, collection: &str, key: &str) -> StoreResult<()>;

    /// Stages a bulk delete of every row in `collection`.
    fn delete_collection(&self, collection: &str) -> StoreResult<()>;

    /// Stages a bulk delete of every row in the store.
    fn delete_all(&self) -> StoreResult<()>;

    /// Atomically applies the open batch, stamping every write with
    /// `snapshot`. After this returns, reads at `snapshot` or later observe
    /// the batch in full; reads below `snapshot` never observe any of it.
    fn commit(&self, snapshot: Snapshot) -> StoreResult<()>;

    /// Discards the open batch without applying anything.
    fn rollback(&self) -> StoreResult<()>;
}
