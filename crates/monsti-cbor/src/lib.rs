//! Canonical CBOR helpers and tagged payload envelopes for the Monsti signal
//! bus, plus the SHA-256 digest behind signed tokens.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_cbor::value::Value as CborValue;
use sha2::{Digest, Sha256};

/// Serialize a value into canonical, self-describing CBOR bytes.
pub fn to_canonical_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_cbor::Error> {
    let canonical_value: CborValue = serde_cbor::value::to_value(value)?;
    let mut buf = Vec::with_capacity(256);
    let mut serializer = serde_cbor::ser::Serializer::new(&mut buf);
    serializer.self_describe()?;
    canonical_value.serialize(&mut serializer)?;
    Ok(buf)
}

/// A payload that names its own type.
///
/// Signal arguments and return values cross process boundaries as opaque
/// blobs; the tag lets the receiving side check that the blob carries the
/// type it expects before decoding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged {
    pub tag: String,
    pub value: CborValue,
}

#[derive(Debug, thiserror::Error)]
pub enum TaggedError {
    #[error("CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("payload tagged '{found}', expected '{expected}'")]
    TagMismatch { expected: String, found: String },
}

/// Encode `value` as a tagged CBOR blob.
pub fn encode_tagged<T: Serialize>(tag: &str, value: &T) -> Result<Vec<u8>, TaggedError> {
    let envelope = Tagged {
        tag: tag.to_string(),
        value: serde_cbor::value::to_value(value)?,
    };
    Ok(to_canonical_cbor(&envelope)?)
}

/// Decode a tagged blob, rejecting payloads carrying another tag.
pub fn decode_tagged<T: DeserializeOwned>(expected: &str, bytes: &[u8]) -> Result<T, TaggedError> {
    let envelope: Tagged = serde_cbor::from_slice(bytes)?;
    if envelope.tag != expected {
        return Err(TaggedError::TagMismatch {
            expected: expected.to_string(),
            found: envelope.tag,
        });
    }
    Ok(serde_cbor::value::from_value(envelope.value)?)
}

/// SHA-256 digest of `#`-joined string parts, as used for signed tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn of_parts<S: AsRef<str>>(parts: &[S]) -> Self {
        let joined = parts.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("#");
        Hash(Sha256::digest(joined.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}
