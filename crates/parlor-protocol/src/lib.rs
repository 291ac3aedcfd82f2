//! Wire-level types for Parlor.
//!
//! Everything a request-triggered handler needs to talk to the engine:
//! identity newtypes, the message envelope, the room-creation request,
//! and the codec seam used to move envelopes in and out of bytes.
//!
//! Game messages themselves are defined per engine (they are closed enums
//! in `parlor-engine`); the envelope carries them as an opaque JSON value
//! so this crate never has to know about individual games.

mod codec;
mod error;
mod types;

#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use codec::Codec;
pub use error::ProtocolError;
pub use types::{
    Envelope, MessageId, PlayerId, RoomCreationRequest, RoomId, TimerMode,
};
