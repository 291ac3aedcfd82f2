//! Game engines for Parlor.
//!
//! Each game is a pure state machine: `init` builds a fresh [`Room`] and
//! `reduce` maps `(room, message)` to the next room value. All randomness
//! and clock reads come through an injected [`EngineCtx`], which is what
//! makes `reduce` safe to re-execute inside the applier's
//! optimistic-concurrency retry loop.
//!
//! # Key types
//!
//! - [`GameDefinition`] — immutable per-game configuration
//! - [`Room`] — the mutable aggregate (one per game session)
//! - [`GameState`] / [`GameMessage`] — closed sum types over the five games
//! - [`Effect`] — deferred side effects (pending generations) returned to
//!   the caller, to be dispatched only after the room has committed

mod definition;
mod engine;
mod error;
mod machine;
mod room;

pub mod games;

pub use definition::{
    AccessTier, GameDefinition, GameKind, IntroMedia, MediaKind, ModelConfig,
    Template, catalog, find_definition,
};
pub use engine::{CreationParams, Effect, GameMessage, GameState, Reduced, init, reduce};
pub use error::EngineError;
pub use machine::{EngineCtx, Phase, active_count, quorum, ready_quorum};
pub use room::{
    ENGINE_KEY, GenerationRecord, PlayerRecord, Room, RoomCore, Score, Timer,
    UNBOUNDED,
};
