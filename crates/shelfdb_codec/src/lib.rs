//! # ShelfDB Codec
//!
//! Pluggable serialization boundary for ShelfDB.
//!
//! The transaction engine never touches application types directly: a
//! [`Codec`] maps objects and metadata to opaque byte strings and back.
//! Both mappings must be deterministic and invertible (decoding the bytes
//! just encoded yields a value equivalent to the original), because the
//! engine populates its decode cache on write without a round trip through
//! the store.
//!
//! [`CborCodec`] is the default implementation, built on serde + CBOR.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;

pub use cbor::CborCodec;
pub use error::{CodecError, CodecResult};

/// Maps objects and metadata to and from opaque byte strings.
///
/// An implementation is chosen per database; all connections and
/// transactions of that database share it.
pub trait Codec: Send + Sync {
    /// The decoded object type stored under each `(collection, key)`.
    type Object: Clone + Send;
    /// The decoded metadata type optionally stored alongside each object.
    type Metadata: Clone + Send;

    /// Encodes an object to bytes.
    fn encode_object(&self, object: &Self::Object) -> CodecResult<Vec<u8>>;

    /// Decodes an object from bytes.
    fn decode_object(&self, bytes: &[u8]) -> CodecResult<Self::Object>;

    /// Encodes metadata to bytes.
    fn encode_metadata(&self, metadata: &Self::Metadata) -> CodecResult<Vec<u8>>;

    /// Decodes metadata from bytes.
    fn decode_metadata(&self, bytes: &[u8]) -> CodecResult<Self::Metadata>;
}
