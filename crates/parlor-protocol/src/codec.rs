//! Codec trait and implementations for serializing envelopes.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The protocol layer doesn't care HOW messages are serialized — it just
//! needs something that implements the [`Codec`] trait, and request
//! handlers pick the implementation. This is the "strategy pattern":
//! one interface, swappable implementations.
//!
//! We ship [`JsonCodec`] (human-readable, easy to inspect from browser
//! DevTools, and what the client SDK speaks today); a binary codec can
//! slot in later without changing any other code.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode values to bytes and decode bytes back.
///
/// The `Send + Sync + 'static` bounds let a codec live inside long-lived
/// async handlers and be shared across Tokio worker threads. The methods
/// are generic over any serde-capable `T`; `DeserializeOwned` (rather
/// than plain `Deserialize`) means the decoded value owns all its data,
/// so the input buffer can be dropped as soon as `decode` returns.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or
    /// don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// JSON is the right default here: rooms exchange a few messages per
/// second at most, so the size overhead of a text format never matters,
/// and being able to read the traffic raw pays for itself in debugging.
///
/// Behind the `json` feature (enabled by default), so embedders that
/// bring their own codec can drop the `serde_json` dependency.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Envelope, MessageId, RoomId};

    #[test]
    fn test_json_codec_round_trips_envelope() {
        let codec = JsonCodec;
        let env = Envelope {
            id: MessageId(1),
            room_id: RoomId(42),
            timestamp: 1000,
            game: serde_json::json!({"type": "OutOfTime"}),
        };
        let bytes = codec.encode(&env).unwrap();
        let back: Envelope = codec.decode(&bytes).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn test_json_codec_decode_rejects_garbage() {
        let codec = JsonCodec;
        let result: Result<Envelope, _> = codec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
