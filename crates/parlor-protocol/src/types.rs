//! Core wire types: identities, the message envelope, creation requests.
//!
//! This module defines the structures that cross the boundary between the
//! HTTP glue (out of scope here) and the engine — the "language" clients
//! speak when they talk to a room. Every type here gets serialized to
//! JSON, sent over the network, and deserialized on the other side.
//!
//! The JSON shapes are part of the client contract: a field renamed here
//! is a client that silently stops parsing. That's why the serde
//! attributes below are pinned by tests rather than trusted.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player.
///
/// This is a "newtype wrapper" — we wrap the underlying `String` in a
/// named struct instead of passing strings around. Why bother?
///
/// 1. **Type safety**: you can't accidentally pass a player's handle (or
///    a shortcode, or a game id — this codebase is full of strings) where
///    a player id is expected.
/// 2. **Readability**: `fn quarantine(player: PlayerId)` says more than
///    `fn quarantine(player: String)`.
///
/// Player ids come from the identity provider and are opaque — we never
/// parse or interpret them, only compare and store them. That's also why
/// this is a `String` newtype and not a `u64` like [`RoomId`]: the
/// provider's format is not ours to assume.
///
/// `#[serde(transparent)]` tells serde to serialize this as just the
/// inner string, not as `{ "0": "alice" }`. So `PlayerId("alice")`
/// becomes plain `"alice"` in JSON, which is what the client sends.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A unique identifier for a room (one game session).
///
/// Same newtype pattern as [`PlayerId`], but over the store's `u64` row
/// id — rooms are ours, so we do get to pick the representation.
/// `Display` prints `R-3` so room ids are recognizable in log lines.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// A unique identifier for one inbound message.
///
/// Clients (or the HTTP layer on their behalf) assign this, and the
/// applier dedupes by it before reducing. That makes delivery at-least-
/// once safe: a retried request that reaches the server twice applies
/// once, so a vote or a score award can never land twice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Timer mode
// ---------------------------------------------------------------------------

/// Timer scale selected at room creation.
///
/// `Off` disables deadlines entirely (rooms advance on quorum only);
/// `Slow` doubles every per-state duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Off,
    #[default]
    Normal,
    Slow,
}

// ---------------------------------------------------------------------------
// Room creation
// ---------------------------------------------------------------------------

/// A request to create a new room.
///
/// `game_id` names an entry in the game-definition catalog. `is_player`
/// lets a host create a room purely as an observer (e.g. a shared screen).
/// `is_async` relaxes the room for play-by-post: timers default to off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreationRequest {
    pub game_id: String,
    pub creator_id: PlayerId,
    pub is_player: bool,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub timer_mode: TimerMode,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level wrapper for every inbound game message.
///
/// Think of it like a postal envelope: routing metadata on the outside,
/// the actual content inside. On the wire:
///
/// ```text
/// {
///   "id": 42,                                      ← dedupe key
///   "roomId": 7,                                   ← where to deliver
///   "timestamp": 1700000000000,                    ← client send time
///   "game": { "type": "Vote", "sender": "alice", ... }  ← the content
/// }
/// ```
///
/// The `game` field is the engine message itself, serialized with its
/// `#[serde(tag = "type")]` representation. It stays opaque at this
/// layer — each game defines its own message enum, and only the engine
/// matching the room's definition knows how to interpret the payload.
/// Keeping it as `serde_json::Value` here means this crate never has to
/// grow a dependency on any particular game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Caller-assigned id, unique per room. Used for dedupe.
    pub id: MessageId,

    /// The room this message targets.
    pub room_id: RoomId,

    /// Client send time, epoch milliseconds. Informational only — the
    /// engine trusts its own injected clock, never this field.
    pub timestamp: u64,

    /// The engine message, opaque JSON at this layer.
    pub game: serde_json::Value,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&PlayerId::new("alice")).unwrap();
        assert_eq!(json, "\"alice\"");
    }

    #[test]
    fn test_room_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&RoomId(99)).unwrap();
        assert_eq!(json, "99");
    }

    #[test]
    fn test_room_id_display() {
        assert_eq!(RoomId(3).to_string(), "R-3");
    }

    #[test]
    fn test_timer_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TimerMode::Normal).unwrap(),
            "\"normal\""
        );
        assert_eq!(serde_json::to_string(&TimerMode::Off).unwrap(), "\"off\"");
    }

    #[test]
    fn test_timer_mode_default_is_normal() {
        assert_eq!(TimerMode::default(), TimerMode::Normal);
    }

    #[test]
    fn test_creation_request_json_shape() {
        // camelCase field names are part of the client contract.
        let req = RoomCreationRequest {
            game_id: "prompt-portrait".into(),
            creator_id: PlayerId::new("alice"),
            is_player: true,
            is_async: false,
            timer_mode: TimerMode::Slow,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["gameId"], "prompt-portrait");
        assert_eq!(json["creatorId"], "alice");
        assert_eq!(json["isPlayer"], true);
        assert_eq!(json["timerMode"], "slow");
    }

    #[test]
    fn test_creation_request_defaults() {
        // isAsync and timerMode are optional on the wire.
        let req: RoomCreationRequest = serde_json::from_str(
            r#"{"gameId":"quip","creatorId":"bob","isPlayer":true}"#,
        )
        .unwrap();
        assert!(!req.is_async);
        assert_eq!(req.timer_mode, TimerMode::Normal);
    }

    #[test]
    fn test_envelope_round_trip() {
        let env = Envelope {
            id: MessageId(7),
            room_id: RoomId(1),
            timestamp: 1_700_000_000_000,
            game: serde_json::json!({"type": "NewPlayer", "sender": "carol"}),
        };
        let bytes = serde_json::to_vec(&env).unwrap();
        let back: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(env, back);
    }
}
