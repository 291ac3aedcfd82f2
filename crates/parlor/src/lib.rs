//! Parlor: a multiplayer room engine for AI party games.
//!
//! The workspace splits along the seams a deployment would:
//!
//! - [`parlor_protocol`] — wire types: ids, the envelope, creation
//!   requests
//! - [`parlor_engine`] — the five pure game state machines and the room
//!   aggregate
//! - [`parlor_gen`] — the model-runner seam and the generation
//!   dispatcher
//! - [`parlor_admission`] — join shortcodes and the creation pacing
//!   queue
//! - this crate — versioned room storage and the transaction applier
//!   that ties them together
//!
//! # The write path
//!
//! ```text
//! Envelope ─▶ Applier::apply ─▶ load ─▶ dedupe ─▶ reduce ─▶ commit
//!                                 ▲                            │ conflict
//!                                 └────────────────────────────┘
//!                                              │ committed
//!                                              ▼
//!                       effects ─▶ Dispatcher ─▶ GenerationResult ─▶ apply
//! ```
//!
//! Engines are pure over an injected clock and rng, which is what makes
//! the conflict-retry loop safe: a losing attempt is re-reduced against
//! the fresh room value and nothing external has observed it.

mod applier;
mod error;
mod store;

pub use applier::{Applied, Applier, CreatedRoom};
pub use error::ApplyError;
pub use store::{MemoryStore, RoomStore, StoreError, Versioned};

/// The usual imports for embedding Parlor.
pub mod prelude {
    pub use crate::{Applied, Applier, ApplyError, CreatedRoom, MemoryStore, RoomStore};
    pub use parlor_admission::{QueueController, ShortcodeStore};
    pub use parlor_engine::{
        Effect, EngineCtx, GameMessage, GameState, Room, catalog, find_definition,
    };
    pub use parlor_gen::{Dispatcher, ModelRunner};
    pub use parlor_protocol::{Envelope, MessageId, PlayerId, RoomCreationRequest, RoomId};
}
