//! Read-only access to one snapshot of the database.

use super::pending::{OverlayLookup, PendingWrites};
use crate::cache::Cache;
use crate::database::Database;
use crate::error::CoreResult;
use shelfdb_codec::Codec;
use shelfdb_storage::{RawRow, Snapshot};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;

/// A read-only view of the database, frozen at one snapshot.
///
/// Every read through this transaction observes the same immutable state,
/// no matter what other connections commit in the meantime. Obtained via
/// [`Connection::read`](crate::Connection::read); a
/// [`ReadWriteTransaction`](crate::ReadWriteTransaction) dereferences to
/// this type, so all read operations are available there too (and observe
/// the transaction's own uncommitted writes).
///
/// Decoded objects and metadata are served from the connection's cache when
/// possible and inserted into it after a decode, so repeat reads of hot rows
/// skip deserialization entirely.
pub struct ReadTransaction<'a, C: Codec> {
    pub(super) db: &'a Database<C>,
    pub(super) snapshot: Snapshot,
    pub(super) cache: &'a RefCell<Cache<C::Object, C::Metadata>>,
    pub(super) pending: Option<&'a RefCell<PendingWrites>>,
    /// Depth of live enumerations. Mutation while this is nonzero is a
    /// [`CoreError::ConcurrentMutation`](crate::CoreError::ConcurrentMutation).
    pub(super) enumerating: Cell<u32>,
}

/// Decrements the enumeration depth when an enumeration unwinds.
pub(super) struct EnumerationGuard<'a>(&'a Cell<u32>);

impl Drop for EnumerationGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl<'a, C: Codec> ReadTransaction<'a, C> {
    pub(crate) fn new(
        db: &'a Database<C>,
        snapshot: Snapshot,
        cache: &'a RefCell<Cache<C::Object, C::Metadata>>,
        pending: Option<&'a RefCell<PendingWrites>>,
    ) -> Self {
        Self {
            db,
            snapshot,
            cache,
            pending,
            enumerating: Cell::new(0),
        }
    }

    /// The snapshot this transaction observes.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
    }

    // ----- counts ---------------------------------------------------------

    /// Number of collections holding at least one key.
    pub fn number_of_collections(&self) -> CoreResult<usize> {
        match self.pending {
            None => Ok(self.db.store().collections(self.snapshot)?.len()),
            Some(_) => Ok(self.visible_collections()?.len()),
        }
    }

    /// Number of keys in one collection. Zero for an unknown collection.
    pub fn number_of_keys_in_collection(&self, collection: &str) -> CoreResult<usize> {
        match self.pending {
            None => Ok(self.db.store().key_count(collection, self.snapshot)?),
            Some(_) => Ok(self.merged_keys(collection)?.len()),
        }
    }

    /// Total number of keys across every collection.
    pub fn number_of_keys_in_all_collections(&self) -> CoreResult<usize> {
        match self.pending {
            None => Ok(self.db.store().total_key_count(self.snapshot)?),
            Some(_) => {
                let mut total = 0;
                for collection in self.visible_collections()? {
                    total += self.merged_keys(&collection)?.len();
                }
                Ok(total)
            }
        }
    }

    // ----- listings -------------------------------------------------------

    /// All collections holding at least one key, in lexicographic order.
    pub fn all_collections(&self) -> CoreResult<Vec<String>> {
        self.visible_collections()
    }

    /// All keys in one collection, in lexicographic order.
    pub fn all_keys_in_collection(&self, collection: &str) -> CoreResult<Vec<String>> {
        self.merged_keys(collection)
    }

    // ----- point reads ----------------------------------------------------

    /// Whether a row exists. Never decodes.
    pub fn has_object_for_key(&self, collection: &str, key: &str) -> CoreResult<bool> {
        if self.cache.borrow().contains_row(collection, key) {
            return Ok(true);
        }
        if let Some(pending) = self.pending {
            return match pending.borrow().lookup(collection, key) {
                OverlayLookup::Row(_) => Ok(true),
                OverlayLookup::Deleted => Ok(false),
                OverlayLookup::Miss => {
                    Ok(self.db.store().contains(collection, key, self.snapshot)?)
                }
            };
        }
        Ok(self.db.store().contains(collection, key, self.snapshot)?)
    }

    /// The decoded object stored under `(collection, key)`, if any.
    pub fn object_for_key(&self, collection: &str, key: &str) -> CoreResult<Option<C::Object>> {
        let cached = self.cache.borrow().object(collection, key).cloned();
        if let Some(object) = cached {
            return Ok(Some(object));
        }
        match self.raw_row(collection, key)? {
            Some(row) => Ok(Some(self.decode_and_cache_object(collection, key, &row.data)?)),
            None => Ok(None),
        }
    }

    /// The decoded metadata stored under `(collection, key)`.
    ///
    /// Returns `None` both when the row does not exist and when it exists
    /// with nil metadata; use [`row_for_key`](Self::row_for_key) to tell
    /// them apart. A cached "metadata is nil" entry is a hit and skips the
    /// store entirely.
    pub fn metadata_for_key(&self, collection: &str, key: &str) -> CoreResult<Option<C::Metadata>> {
        let cached = self.cache.borrow().metadata(collection, key).cloned();
        if let Some(metadata) = cached {
            return Ok(metadata);
        }
        match self.raw_row(collection, key)? {
            Some(row) => self.decode_and_cache_metadata(collection, key, row.metadata.as_deref()),
            None => Ok(None),
        }
    }

    /// The decoded object and metadata together. `None` when the row does
    /// not exist; a present row with nil metadata yields `(object, None)`.
    pub fn row_for_key(
        &self,
        collection: &str,
        key: &str,
    ) -> CoreResult<Option<(C::Object, Option<C::Metadata>)>> {
        let Some(row) = self.raw_row_or_cached(collection, key)? else {
            return Ok(None);
        };
        let object = self.cached_or_decoded_object(collection, key, &row.data)?;
        let metadata =
            self.cached_or_decoded_metadata(collection, key, row.metadata.as_deref())?;
        Ok(Some((object, metadata)))
    }

    // ----- primitive reads ------------------------------------------------

    /// The raw serialized object bytes, bypassing the codec and the cache.
    pub fn primitive_data_for_key(
        &self,
        collection: &str,
        key: &str,
    ) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.raw_row(collection, key)?.map(|row| row.data))
    }

    /// The raw serialized metadata bytes, bypassing the codec and the cache.
    pub fn primitive_metadata_for_key(
        &self,
        collection: &str,
        key: &str,
    ) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.raw_row(collection, key)?.and_then(|row| row.metadata))
    }

    /// Raw object and metadata bytes together, bypassing codec and cache.
    pub fn primitive_row_for_key(
        &self,
        collection: &str,
        key: &str,
    ) -> CoreResult<Option<(Vec<u8>, Option<Vec<u8>>)>> {
        Ok(self
            .raw_row(collection, key)?
            .map(|row| (row.data, row.metadata)))
    }

    // ----- enumeration: keys ----------------------------------------------

    /// Visits every key in one collection, in lexicographic order.
    pub fn enumerate_keys_in_collection<B>(&self, collection: &str, mut block: B) -> CoreResult<()>
    where
        B: FnMut(&str) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        for key in self.merged_keys(collection)? {
            if block(&key).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Visits every key in every collection, grouped by collection.
    pub fn enumerate_keys_in_all_collections<B>(&self, mut block: B) -> CoreResult<()>
    where
        B: FnMut(&str, &str) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        'outer: for collection in self.visible_collections()? {
            for key in self.merged_keys(&collection)? {
                if block(&collection, &key).is_break() {
                    break 'outer;
                }
            }
        }
        Ok(())
    }

    // ----- enumeration: keys and metadata ----------------------------------

    /// Visits every key in one collection with its decoded metadata.
    /// Objects are never decoded.
    pub fn enumerate_keys_and_metadata_in_collection<B>(
        &self,
        collection: &str,
        block: B,
    ) -> CoreResult<()>
    where
        B: FnMut(&str, Option<&C::Metadata>) -> ControlFlow<()>,
    {
        self.enumerate_keys_and_metadata_in_collection_filtered(collection, |_| true, block)
    }

    /// Like [`enumerate_keys_and_metadata_in_collection`], but the filter
    /// runs before any decode; rejected keys cost nothing beyond the scan.
    ///
    /// [`enumerate_keys_and_metadata_in_collection`]:
    ///     Self::enumerate_keys_and_metadata_in_collection
    pub fn enumerate_keys_and_metadata_in_collection_filtered<F, B>(
        &self,
        collection: &str,
        mut filter: F,
        mut block: B,
    ) -> CoreResult<()>
    where
        F: FnMut(&str) -> bool,
        B: FnMut(&str, Option<&C::Metadata>) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        for (key, row) in self.merged_rows(collection)? {
            if !filter(&key) {
                continue;
            }
            let metadata =
                self.cached_or_decoded_metadata(collection, &key, row.metadata.as_deref())?;
            if block(&key, metadata.as_ref()).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Visits every key in every collection with its decoded metadata.
    pub fn enumerate_keys_and_metadata_in_all_collections<B>(&self, block: B) -> CoreResult<()>
    where
        B: FnMut(&str, &str, Option<&C::Metadata>) -> ControlFlow<()>,
    {
        self.enumerate_keys_and_metadata_in_all_collections_filtered(|_, _| true, block)
    }

    /// Filtered variant of
    /// [`enumerate_keys_and_metadata_in_all_collections`]; the filter runs
    /// before any decode.
    ///
    /// [`enumerate_keys_and_metadata_in_all_collections`]:
    ///     Self::enumerate_keys_and_metadata_in_all_collections
    pub fn enumerate_keys_and_metadata_in_all_collections_filtered<F, B>(
        &self,
        mut filter: F,
        mut block: B,
    ) -> CoreResult<()>
    where
        F: FnMut(&str, &str) -> bool,
        B: FnMut(&str, &str, Option<&C::Metadata>) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        'outer: for collection in self.visible_collections()? {
            for (key, row) in self.merged_rows(&collection)? {
                if !filter(&collection, &key) {
                    continue;
                }
                let metadata =
                    self.cached_or_decoded_metadata(&collection, &key, row.metadata.as_deref())?;
                if block(&collection, &key, metadata.as_ref()).is_break() {
                    break 'outer;
                }
            }
        }
        Ok(())
    }

    // ----- enumeration: keys and objects ------------------------------------

    /// Visits every key in one collection with its decoded object.
    /// Metadata is never decoded.
    pub fn enumerate_keys_and_objects_in_collection<B>(
        &self,
        collection: &str,
        block: B,
    ) -> CoreResult<()>
    where
        B: FnMut(&str, &C::Object) -> ControlFlow<()>,
    {
        self.enumerate_keys_and_objects_in_collection_filtered(collection, |_| true, block)
    }

    /// Like [`enumerate_keys_and_objects_in_collection`], but the filter
    /// runs before any decode.
    ///
    /// [`enumerate_keys_and_objects_in_collection`]:
    ///     Self::enumerate_keys_and_objects_in_collection
    pub fn enumerate_keys_and_objects_in_collection_filtered<F, B>(
        &self,
        collection: &str,
        mut filter: F,
        mut block: B,
    ) -> CoreResult<()>
    where
        F: FnMut(&str) -> bool,
        B: FnMut(&str, &C::Object) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        for (key, row) in self.merged_rows(collection)? {
            if !filter(&key) {
                continue;
            }
            let object = self.cached_or_decoded_object(collection, &key, &row.data)?;
            if block(&key, &object).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Visits every key in every collection with its decoded object.
    pub fn enumerate_keys_and_objects_in_all_collections<B>(&self, block: B) -> CoreResult<()>
    where
        B: FnMut(&str, &str, &C::Object) -> ControlFlow<()>,
    {
        self.enumerate_keys_and_objects_in_all_collections_filtered(|_, _| true, block)
    }

    /// Filtered variant of
    /// [`enumerate_keys_and_objects_in_all_collections`]; the filter runs
    /// before any decode.
    ///
    /// [`enumerate_keys_and_objects_in_all_collections`]:
    ///     Self::enumerate_keys_and_objects_in_all_collections
    pub fn enumerate_keys_and_objects_in_all_collections_filtered<F, B>(
        &self,
        mut filter: F,
        mut block: B,
    ) -> CoreResult<()>
    where
        F: FnMut(&str, &str) -> bool,
        B: FnMut(&str, &str, &C::Object) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        'outer: for collection in self.visible_collections()? {
            for (key, row) in self.merged_rows(&collection)? {
                if !filter(&collection, &key) {
                    continue;
                }
                let object = self.cached_or_decoded_object(&collection, &key, &row.data)?;
                if block(&collection, &key, &object).is_break() {
                    break 'outer;
                }
            }
        }
        Ok(())
    }

    // ----- enumeration: full rows -------------------------------------------

    /// Visits every row in one collection with decoded object and metadata.
    pub fn enumerate_rows_in_collection<B>(&self, collection: &str, block: B) -> CoreResult<()>
    where
        B: FnMut(&str, &C::Object, Option<&C::Metadata>) -> ControlFlow<()>,
    {
        self.enumerate_rows_in_collection_filtered(collection, |_| true, block)
    }

    /// Like [`enumerate_rows_in_collection`], but the filter runs before
    /// any decode.
    ///
    /// [`enumerate_rows_in_collection`]: Self::enumerate_rows_in_collection
    pub fn enumerate_rows_in_collection_filtered<F, B>(
        &self,
        collection: &str,
        mut filter: F,
        mut block: B,
    ) -> CoreResult<()>
    where
        F: FnMut(&str) -> bool,
        B: FnMut(&str, &C::Object, Option<&C::Metadata>) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        for (key, row) in self.merged_rows(collection)? {
            if !filter(&key) {
                continue;
            }
            let object = self.cached_or_decoded_object(collection, &key, &row.data)?;
            let metadata =
                self.cached_or_decoded_metadata(collection, &key, row.metadata.as_deref())?;
            if block(&key, &object, metadata.as_ref()).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Visits every row in every collection with decoded object and
    /// metadata, grouped by collection.
    pub fn enumerate_rows_in_all_collections<B>(&self, block: B) -> CoreResult<()>
    where
        B: FnMut(&str, &str, &C::Object, Option<&C::Metadata>) -> ControlFlow<()>,
    {
        self.enumerate_rows_in_all_collections_filtered(|_, _| true, block)
    }

    /// Filtered variant of [`enumerate_rows_in_all_collections`]; the
    /// filter runs before any decode.
    ///
    /// [`enumerate_rows_in_all_collections`]:
    ///     Self::enumerate_rows_in_all_collections
    pub fn enumerate_rows_in_all_collections_filtered<F, B>(
        &self,
        mut filter: F,
        mut block: B,
    ) -> CoreResult<()>
    where
        F: FnMut(&str, &str) -> bool,
        B: FnMut(&str, &str, &C::Object, Option<&C::Metadata>) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        'outer: for collection in self.visible_collections()? {
            for (key, row) in self.merged_rows(&collection)? {
                if !filter(&collection, &key) {
                    continue;
                }
                let object = self.cached_or_decoded_object(&collection, &key, &row.data)?;
                let metadata =
                    self.cached_or_decoded_metadata(&collection, &key, row.metadata.as_deref())?;
                if block(&collection, &key, &object, metadata.as_ref()).is_break() {
                    break 'outer;
                }
            }
        }
        Ok(())
    }

    // ----- enumeration: bulk lookup ------------------------------------------

    /// Visits the objects for an explicit key list, cached entries first.
    ///
    /// The block receives each key's index into `keys` and its object, or
    /// `None` for keys with no row. Visit order is unspecified: cache hits
    /// are delivered before misses so that hot keys never wait on the store.
    pub fn enumerate_objects_for_keys<B>(
        &self,
        collection: &str,
        keys: &[&str],
        mut block: B,
    ) -> CoreResult<()>
    where
        B: FnMut(usize, Option<&C::Object>) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        let mut misses = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let cached = self.cache.borrow().object(collection, key).cloned();
            match cached {
                Some(object) => {
                    if block(index, Some(&object)).is_break() {
                        return Ok(());
                    }
                }
                None => misses.push(index),
            }
        }
        for index in misses {
            let key = keys[index];
            let object = match self.raw_row(collection, key)? {
                Some(row) => Some(self.decode_and_cache_object(collection, key, &row.data)?),
                None => None,
            };
            if block(index, object.as_ref()).is_break() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Visits the metadata for an explicit key list, cached entries first.
    ///
    /// `None` is passed both for keys with no row and for rows whose
    /// metadata is nil. Visit order is unspecified, as with
    /// [`enumerate_objects_for_keys`](Self::enumerate_objects_for_keys).
    pub fn enumerate_metadata_for_keys<B>(
        &self,
        collection: &str,
        keys: &[&str],
        mut block: B,
    ) -> CoreResult<()>
    where
        B: FnMut(usize, Option<&C::Metadata>) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        let mut misses = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let cached = self.cache.borrow().metadata(collection, key).cloned();
            match cached {
                Some(metadata) => {
                    if block(index, metadata.as_ref()).is_break() {
                        return Ok(());
                    }
                }
                None => misses.push(index),
            }
        }
        for index in misses {
            let key = keys[index];
            let metadata = match self.raw_row(collection, key)? {
                Some(row) => {
                    self.decode_and_cache_metadata(collection, key, row.metadata.as_deref())?
                }
                None => None,
            };
            if block(index, metadata.as_ref()).is_break() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Visits object and metadata together for an explicit key list.
    ///
    /// The block receives `None` for keys with no row. Keys whose object
    /// and metadata are both cached are delivered first; visit order is
    /// otherwise unspecified.
    pub fn enumerate_rows_for_keys<B>(
        &self,
        collection: &str,
        keys: &[&str],
        mut block: B,
    ) -> CoreResult<()>
    where
        B: FnMut(usize, Option<(&C::Object, Option<&C::Metadata>)>) -> ControlFlow<()>,
    {
        let _guard = self.begin_enumeration();
        let mut misses = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let hit = {
                let cache = self.cache.borrow();
                match (cache.object(collection, key), cache.metadata(collection, key)) {
                    (Some(object), Some(metadata)) => Some((object.clone(), metadata.clone())),
                    _ => None,
                }
            };
            match hit {
                Some((object, metadata)) => {
                    if block(index, Some((&object, metadata.as_ref()))).is_break() {
                        return Ok(());
                    }
                }
                None => misses.push(index),
            }
        }
        for index in misses {
            let key = keys[index];
            match self.raw_row(collection, key)? {
                Some(row) => {
                    let object = self.cached_or_decoded_object(collection, key, &row.data)?;
                    let metadata =
                        self.cached_or_decoded_metadata(collection, key, row.metadata.as_deref())?;
                    if block(index, Some((&object, metadata.as_ref()))).is_break() {
                        return Ok(());
                    }
                }
                None => {
                    if block(index, None).is_break() {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    // ----- internals --------------------------------------------------------

    pub(super) fn is_enumerating(&self) -> bool {
        self.enumerating.get() > 0
    }

    fn begin_enumeration(&self) -> EnumerationGuard<'_> {
        self.enumerating.set(self.enumerating.get() + 1);
        EnumerationGuard(&self.enumerating)
    }

    /// The raw row as this transaction sees it: the write overlay shadows
    /// the store.
    pub(super) fn raw_row(&self, collection: &str, key: &str) -> CoreResult<Option<RawRow>> {
        if let Some(pending) = self.pending {
            match pending.borrow().lookup(collection, key) {
                OverlayLookup::Row(row) => return Ok(Some(row)),
                OverlayLookup::Deleted => return Ok(None),
                OverlayLookup::Miss => {}
            }
        }
        Ok(self.db.store().get(collection, key, self.snapshot)?)
    }

    /// Like [`raw_row`](Self::raw_row), but short-circuits the store probe
    /// when the cache already proves the row exists.
    fn raw_row_or_cached(&self, collection: &str, key: &str) -> CoreResult<Option<RawRow>> {
        let fully_cached = {
            let cache = self.cache.borrow();
            cache.object(collection, key).is_some() && cache.metadata(collection, key).is_some()
        };
        if fully_cached {
            // Data bytes are never inspected when both halves are cached.
            return Ok(Some(RawRow::new(Vec::new(), None)));
        }
        self.raw_row(collection, key)
    }

    /// Codec failures abort an enclosing write transaction outright, so a
    /// unit that observed a decode error can never go on to commit.
    fn poison_on_decode_failure(&self) {
        let Some(pending) = self.pending else {
            return;
        };
        let mut pending = pending.borrow_mut();
        self.cache.borrow_mut().purge_pending(&pending.changeset);
        pending.rollback();
    }

    fn decode_and_cache_object(
        &self,
        collection: &str,
        key: &str,
        data: &[u8],
    ) -> CoreResult<C::Object> {
        let object = match self.db.codec().decode_object(data) {
            Ok(object) => object,
            Err(error) => {
                self.poison_on_decode_failure();
                return Err(error.into());
            }
        };
        self.cache
            .borrow_mut()
            .insert_object(collection, key, object.clone());
        Ok(object)
    }

    fn decode_and_cache_metadata(
        &self,
        collection: &str,
        key: &str,
        bytes: Option<&[u8]>,
    ) -> CoreResult<Option<C::Metadata>> {
        let metadata = match bytes {
            Some(bytes) => match self.db.codec().decode_metadata(bytes) {
                Ok(metadata) => Some(metadata),
                Err(error) => {
                    self.poison_on_decode_failure();
                    return Err(error.into());
                }
            },
            None => None,
        };
        self.cache
            .borrow_mut()
            .insert_metadata(collection, key, metadata.clone());
        Ok(metadata)
    }

    fn cached_or_decoded_object(
        &self,
        collection: &str,
        key: &str,
        data: &[u8],
    ) -> CoreResult<C::Object> {
        let cached = self.cache.borrow().object(collection, key).cloned();
        match cached {
            Some(object) => Ok(object),
            None => self.decode_and_cache_object(collection, key, data),
        }
    }

    fn cached_or_decoded_metadata(
        &self,
        collection: &str,
        key: &str,
        bytes: Option<&[u8]>,
    ) -> CoreResult<Option<C::Metadata>> {
        let cached = self.cache.borrow().metadata(collection, key).cloned();
        match cached {
            Some(metadata) => Ok(metadata),
            None => self.decode_and_cache_metadata(collection, key, bytes),
        }
    }

    /// Keys of one collection with the write overlay folded in, sorted.
    fn merged_keys(&self, collection: &str) -> CoreResult<Vec<String>> {
        match self.pending {
            None => Ok(self.db.store().keys_in_collection(collection, self.snapshot)?),
            Some(pending) => {
                let pending = pending.borrow();
                let mut keys: BTreeSet<String> = if pending.is_collection_cleared(collection) {
                    BTreeSet::new()
                } else {
                    self.db
                        .store()
                        .keys_in_collection(collection, self.snapshot)?
                        .into_iter()
                        .collect()
                };
                for (key, row) in pending.overlay_for_collection(collection) {
                    if row.is_some() {
                        keys.insert(key.to_owned());
                    } else {
                        keys.remove(key);
                    }
                }
                Ok(keys.into_iter().collect())
            }
        }
    }

    /// Rows of one collection with the write overlay folded in, key-sorted.
    fn merged_rows(&self, collection: &str) -> CoreResult<Vec<(String, RawRow)>> {
        match self.pending {
            None => Ok(self.db.store().scan_collection(collection, self.snapshot)?),
            Some(pending) => {
                let pending = pending.borrow();
                let mut rows: BTreeMap<String, RawRow> = if pending.is_collection_cleared(collection)
                {
                    BTreeMap::new()
                } else {
                    self.db
                        .store()
                        .scan_collection(collection, self.snapshot)?
                        .into_iter()
                        .collect()
                };
                for (key, row) in pending.overlay_for_collection(collection) {
                    match row {
                        Some(row) => {
                            rows.insert(key.to_owned(), row.clone());
                        }
                        None => {
                            rows.remove(key);
                        }
                    }
                }
                Ok(rows.into_iter().collect())
            }
        }
    }

    /// Collections with at least one visible key, sorted.
    fn visible_collections(&self) -> CoreResult<Vec<String>> {
        let mut collections: BTreeSet<String> = self
            .db
            .store()
            .collections(self.snapshot)?
            .into_iter()
            .collect();
        let Some(pending) = self.pending else {
            return Ok(collections.into_iter().collect());
        };
        {
            let pending = pending.borrow();
            if !pending.has_writes() {
                return Ok(collections.into_iter().collect());
            }
            for collection in pending.overlay_collections() {
                collections.insert(collection.to_owned());
            }
        }
        let mut visible = Vec::with_capacity(collections.len());
        for collection in collections {
            if !self.merged_keys(&collection)?.is_empty() {
                visible.push(collection);
            }
        }
        Ok(visible)
    }
}
