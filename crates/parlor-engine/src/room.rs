//! The room aggregate: the single mutable record representing one session.
//!
//! A `Room` is owned exclusively by the transaction applier. Engines
//! receive the full current value, return the full next value, and never
//! retain references across calls.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use parlor_protocol::{MessageId, PlayerId};

use crate::definition::{GameDefinition, ModelConfig};
use crate::engine::GameState;

/// Sentinel duration for states with no deadline (lobby, terminal).
pub const UNBOUNDED: u64 = u64::MAX;

/// Key used for single-shot generations not owned by any player
/// (the AIJudge judgment, MITM replies, Quip judgments).
pub const ENGINE_KEY: &str = "engine";

// ---------------------------------------------------------------------------
// Player records & scores
// ---------------------------------------------------------------------------

/// Per-player integer tally. `previous` is snapshotted immediately before
/// each scoring pass so clients can animate the delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub current: i64,
    pub previous: i64,
}

/// Per-player record inside a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    /// Mirrors the engine state name. Written only by the transition
    /// function.
    pub state: String,
    /// Active player vs. observer. Observers never count toward quorum.
    pub is_player: bool,
    /// Quorum flag for scoring/review states. Reset on every transition.
    pub is_ready_to_continue: bool,
    pub handle: Option<String>,
    pub avatar: Option<String>,
}

impl PlayerRecord {
    pub fn new(state: &str, is_player: bool, handle: Option<String>) -> Self {
        Self {
            state: state.to_string(),
            is_player,
            is_ready_to_continue: false,
            handle,
            avatar: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Advisory deadline for the current state.
///
/// Nothing wakes up server-side when a timer lapses — clients send
/// `OutOfTime` pings, and the engine re-checks `now >= started + duration`
/// before honoring them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    /// Epoch ms at which the current state was entered.
    pub started: u64,
    /// Duration of the current state, ms. [`UNBOUNDED`] for states with
    /// no deadline.
    pub duration: u64,
    /// Full per-state duration table, state name → ms. Present for every
    /// state, including lobby/terminal (with the sentinel).
    pub state_durations: BTreeMap<String, u64>,
}

impl Timer {
    /// True once the current state's deadline has passed. States with the
    /// unbounded sentinel never expire.
    pub fn expired(&self, now: u64) -> bool {
        self.duration != UNBOUNDED && now >= self.started.saturating_add(self.duration)
    }

    /// Re-arms the timer for a newly entered state.
    pub fn rearm(&mut self, state: &str, now: u64) {
        self.started = now;
        self.duration = self
            .state_durations
            .get(state)
            .copied()
            .unwrap_or(UNBOUNDED);
    }
}

// ---------------------------------------------------------------------------
// Generation records
// ---------------------------------------------------------------------------

/// One request/response record for an external content-generation call.
///
/// Built inside `reduce` (pure — the prompt is fully resolved here, no
/// I/O), dispatched by the caller after commit, and completed by a
/// fulfillment message. `fulfilled` is set on every terminal update,
/// success or not, so waiting consumers always resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub player: PlayerId,
    pub model: ModelConfig,
    /// Template id used to build the prompt, for audit.
    pub template: Option<String>,
    /// The fully resolved prompt sent to the runner.
    pub prompt: String,
    /// Opaque until fulfilled: a URL for images, text or structured JSON
    /// for completions.
    pub generation: serde_json::Value,
    pub fulfilled: bool,
    pub error: Option<String>,
    /// Free-form audit data (random seed, letter maps, ...).
    pub context: Option<serde_json::Value>,
}

impl GenerationRecord {
    pub fn pending(
        player: PlayerId,
        model: ModelConfig,
        template: Option<String>,
        prompt: String,
    ) -> Self {
        Self {
            player,
            model,
            template,
            prompt,
            generation: serde_json::Value::Null,
            fulfilled: false,
            error: None,
            context: None,
        }
    }

    /// Fulfilled with no error and a non-null payload.
    pub fn is_ok(&self) -> bool {
        self.fulfilled && self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// Everything in a room except the engine-specific game state.
///
/// Split out so engines can borrow the shared fields and their own state
/// independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCore {
    /// Owned copy of the catalog entry this room was created from.
    pub definition: GameDefinition,
    /// Explicit next-state table for timer-driven auto-advance,
    /// state name → state name.
    pub state_transitions: BTreeMap<String, String>,
    pub players: BTreeMap<PlayerId, PlayerRecord>,
    /// Append-only log of completed rounds, keyed by epoch ms.
    pub history: BTreeMap<u64, serde_json::Value>,
    /// Quarantine log for irrecoverably failed generations.
    pub generation_errors: Option<Vec<GenerationRecord>>,
    /// Free-form shared draft text for UIs that preview input live.
    pub scratchpad: Option<String>,
    /// Absent when the room was created with timers off.
    pub timer: Option<Timer>,
    /// Ids of messages already applied; the applier's dedupe set.
    pub seen_messages: BTreeSet<MessageId>,
    /// Play-by-post room: timers are disabled and pacing is relaxed.
    pub is_async: bool,
}

impl RoomCore {
    /// Count of active (non-observer) players.
    pub fn active_players(&self) -> usize {
        self.players.values().filter(|p| p.is_player).count()
    }

    /// Moves failed generation records into the quarantine log.
    pub fn quarantine(&mut self, records: impl IntoIterator<Item = GenerationRecord>) {
        let log = self.generation_errors.get_or_insert_with(Vec::new);
        log.extend(records);
    }

    /// Appends a history entry. Bumps the key if two entries land on the
    /// same millisecond.
    pub fn push_history(&mut self, now: u64, entry: serde_json::Value) {
        let mut key = now;
        while self.history.contains_key(&key) {
            key += 1;
        }
        self.history.insert(key, entry);
    }
}

/// The mutable aggregate for one game session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    #[serde(flatten)]
    pub core: RoomCore,
    /// Engine-specific state, tagged by engine kind.
    pub game: GameState,
}

impl Room {
    /// True once the engine has reached its terminal state. Finished
    /// rooms stay readable but accept no gameplay messages.
    pub fn is_finished(&self) -> bool {
        self.game.is_finished()
    }
}
