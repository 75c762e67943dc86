//! CBOR codec over serde types.

use crate::error::{CodecError, CodecResult};
use crate::Codec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// A [`Codec`] that encodes objects and metadata as CBOR via serde.
///
/// Any pair of serde types works:
///
/// ```rust,ignore
/// use shelfdb_codec::CborCodec;
///
/// #[derive(Clone, serde::Serialize, serde::Deserialize)]
/// struct Contact { name: String }
///
/// #[derive(Clone, serde::Serialize, serde::Deserialize)]
/// struct Badge { unread: u32 }
///
/// let codec = CborCodec::<Contact, Badge>::new();
/// ```
#[derive(Debug)]
pub struct CborCodec<O, M> {
    _marker: PhantomData<fn() -> (O, M)>,
}

impl<O, M> CborCodec<O, M> {
    /// Creates a CBOR codec.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<O, M> Default for CborCodec<O, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O, M> Clone for CborCodec<O, M> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

impl<O, M> Codec for CborCodec<O, M>
where
    O: Serialize + DeserializeOwned + Clone + Send,
    M: Serialize + DeserializeOwned + Clone + Send,
{
    type Object = O;
    type Metadata = M;

    fn encode_object(&self, object: &O) -> CodecResult<Vec<u8>> {
        encode(object)
    }

    fn decode_object(&self, bytes: &[u8]) -> CodecResult<O> {
        decode(bytes)
    }

    fn encode_metadata(&self, metadata: &M) -> CodecResult<Vec<u8>> {
        encode(metadata)
    }

    fn decode_metadata(&self, bytes: &[u8]) -> CodecResult<M> {
        decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Contact {
        name: String,
        age: u32,
    }

    fn codec() -> CborCodec<Contact, u32> {
        CborCodec::new()
    }

    #[test]
    fn object_round_trips() {
        let codec = codec();
        let contact = Contact {
            name: "Alice".to_owned(),
            age: 30,
        };

        let bytes = codec.encode_object(&contact).unwrap();
        let decoded = codec.decode_object(&bytes).unwrap();
        assert_eq!(decoded, contact);
    }

    #[test]
    fn metadata_round_trips() {
        let codec = codec();
        let bytes = codec.encode_metadata(&7).unwrap();
        assert_eq!(codec.decode_metadata(&bytes).unwrap(), 7);
    }

    #[test]
    fn encoding_is_deterministic() {
        let codec = codec();
        let contact = Contact {
            name: "Bob".to_owned(),
            age: 41,
        };
        assert_eq!(
            codec.encode_object(&contact).unwrap(),
            codec.encode_object(&contact).unwrap()
        );
    }

    #[test]
    fn garbage_fails_to_decode() {
        let codec = codec();
        let result = codec.decode_object(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }
}
