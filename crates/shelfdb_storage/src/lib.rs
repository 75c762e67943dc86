//! # ShelfDB Storage
//!
//! Backing store contract for ShelfDB.
//!
//! This crate defines the [`BackingStore`] trait, the point/scan/batch
//! primitive the transaction engine is built on, together with the raw
//! row and snapshot types it is keyed by, and an [`InMemoryStore`]
//! implementation used by tests and ephemeral databases.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use store::{BackingStore, RawRow, Snapshot};
