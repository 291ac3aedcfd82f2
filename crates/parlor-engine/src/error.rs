//! Error types for the engine layer.
//!
//! Reducers themselves never fail — invalid messages are ignored by
//! design — so the only fallible operations here are catalog lookups
//! and message decoding.

/// Errors that can occur around (not inside) a reduce call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No game definition with this id exists in the catalog.
    #[error("unknown game id: {0}")]
    UnknownGame(String),

    /// The message payload did not decode as a message of the room's
    /// engine kind.
    #[error("message does not decode for engine {kind}: {source}")]
    BadMessage {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
