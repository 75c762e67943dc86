//! # ShelfDB Core
//!
//! Connection and transaction engine for ShelfDB, an embedded
//! collection/key/value persistence layer with snapshot-isolated
//! transactions.
//!
//! Rows live in named collections and are addressed by string keys. Each
//! row carries a primary object and optional metadata, serialized
//! independently through a pluggable [`Codec`].
//!
//! Concurrency follows a single-writer, many-reader model: readers never
//! block, writers queue on one database-wide lock, and every transaction
//! observes one immutable snapshot for its whole duration. Committed
//! writes propagate to other connections as [`Changeset`]s, which each
//! connection drains before its next transaction to invalidate exactly
//! the cache entries that went stale.
//!
//! ```rust
//! use shelfdb_core::{CborCodec, Database};
//!
//! # fn main() -> shelfdb_core::CoreResult<()> {
//! let db = Database::in_memory(CborCodec::<String, u64>::new());
//! let connection = db.new_connection();
//!
//! connection.read_write(|txn| {
//!     txn.set_object("contacts", "alice", Some("Alice".to_owned()), Some(1))
//! })?;
//!
//! let name = connection.read(|txn| txn.object_for_key("contacts", "alice"))?;
//! assert_eq!(name.as_deref(), Some("Alice"));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod changeset;
mod connection;
mod database;
mod error;
mod options;
mod transaction;

pub use changeset::{Changeset, RowChange};
pub use connection::Connection;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use options::Options;
pub use transaction::{ReadTransaction, ReadWriteTransaction};

pub use shelfdb_codec::{CborCodec, Codec, CodecError};
pub use shelfdb_storage::{BackingStore, InMemoryStore, RawRow, Snapshot, StoreError};
