//! The engine sum type: `init`/`reduce` dispatch over the five games.
//!
//! Each game owns its full state and message shapes; this module only
//! routes. A message for the wrong engine kind is a silent no-op, same
//! as any other type/state mismatch.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use parlor_protocol::{PlayerId, TimerMode};

use crate::definition::{GameDefinition, GameKind};
use crate::error::EngineError;
use crate::games::{ai_judge, group_think, mitm, prompt_guess, quip};
use crate::machine::EngineCtx;
use crate::room::{GenerationRecord, PlayerRecord, Room, RoomCore};

// ---------------------------------------------------------------------------
// Creation params
// ---------------------------------------------------------------------------

/// Parameters for `init`, distilled from the room-creation request.
#[derive(Debug, Clone)]
pub struct CreationParams {
    pub creator: PlayerId,
    pub creator_handle: Option<String>,
    /// Whether the creator plays or observes (e.g. a shared host screen).
    pub is_player: bool,
    pub is_async: bool,
    pub timer_mode: TimerMode,
}

impl CreationParams {
    /// Async rooms never run timers regardless of the requested mode.
    pub fn effective_timer_mode(&self) -> TimerMode {
        if self.is_async {
            TimerMode::Off
        } else {
            self.timer_mode
        }
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// A deferred side effect returned from `reduce`.
///
/// `reduce` itself performs no I/O; when a reduce places a pending
/// generation in the game state it also emits one of these, and the
/// caller dispatches it only after the transaction has durably
/// committed. Re-running the reduce under a write conflict re-emits the
/// same effect, but nothing external has happened yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// A new pending generation exists under `key` (a player id, or
    /// [`ENGINE_KEY`](crate::ENGINE_KEY) for single-shot generations).
    Generate {
        key: String,
        record: GenerationRecord,
    },
}

/// The result of a reduce call: the next room value plus any deferred
/// effects for the caller.
#[derive(Debug)]
pub struct Reduced {
    pub room: Room,
    pub effects: Vec<Effect>,
}

// ---------------------------------------------------------------------------
// Sum types
// ---------------------------------------------------------------------------

/// Engine-specific game state, one variant per game kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine")]
pub enum GameState {
    PromptGuess(prompt_guess::State),
    AiJudge(ai_judge::State),
    GroupThink(group_think::State),
    Mitm(mitm::State),
    Quip(quip::State),
}

impl GameState {
    /// The current state name, for player records and logs.
    pub fn state_name(&self) -> &'static str {
        use crate::machine::Phase as _;
        match self {
            Self::PromptGuess(s) => s.state.name(),
            Self::AiJudge(s) => s.state.name(),
            Self::GroupThink(s) => s.state.name(),
            Self::Mitm(s) => s.state.name(),
            Self::Quip(s) => s.state.name(),
        }
    }

    pub fn is_finished(&self) -> bool {
        match self {
            Self::PromptGuess(s) => s.state == prompt_guess::PgPhase::Finish,
            Self::AiJudge(s) => s.state == ai_judge::AjPhase::Finish,
            Self::GroupThink(s) => s.state == group_think::GtPhase::Finish,
            Self::Mitm(s) => s.state == mitm::MitmPhase::Finish,
            Self::Quip(s) => s.state == quip::QuipPhase::Finish,
        }
    }
}

/// An inbound game message, one variant per game kind. Closed enums per
/// engine replace the stringly-typed dispatch tables of older designs —
/// the compiler checks exhaustiveness instead of a runtime fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum GameMessage {
    PromptGuess(prompt_guess::Msg),
    AiJudge(ai_judge::Msg),
    GroupThink(group_think::Msg),
    Mitm(mitm::Msg),
    Quip(quip::Msg),
}

impl GameMessage {
    /// Decodes a wire payload as a message for the given engine kind.
    ///
    /// # Errors
    /// Returns [`EngineError::BadMessage`] if the payload doesn't match
    /// any message type of that engine.
    pub fn decode(kind: GameKind, payload: &serde_json::Value) -> Result<Self, EngineError> {
        let bad = |source| EngineError::BadMessage {
            kind: kind.name(),
            source,
        };
        match kind {
            GameKind::PromptGuess => serde_json::from_value(payload.clone())
                .map(Self::PromptGuess)
                .map_err(bad),
            GameKind::AiJudge => serde_json::from_value(payload.clone())
                .map(Self::AiJudge)
                .map_err(bad),
            GameKind::GroupThink => serde_json::from_value(payload.clone())
                .map(Self::GroupThink)
                .map_err(bad),
            GameKind::Mitm => serde_json::from_value(payload.clone())
                .map(Self::Mitm)
                .map_err(bad),
            GameKind::Quip => serde_json::from_value(payload.clone())
                .map(Self::Quip)
                .map_err(bad),
        }
    }
}

// ---------------------------------------------------------------------------
// init / reduce
// ---------------------------------------------------------------------------

/// Creates a fresh room from a definition.
///
/// Pure given `ctx`: the creator becomes the first player, the state is
/// the engine's lobby, and the full per-state timer table is built when
/// timers are enabled.
pub fn init(params: &CreationParams, definition: &GameDefinition, ctx: &mut EngineCtx) -> Room {
    let (game, state_transitions, timer) = match definition.kind {
        GameKind::PromptGuess => {
            let (s, t, timer) = prompt_guess::init(params, definition, ctx);
            (GameState::PromptGuess(s), t, timer)
        }
        GameKind::AiJudge => {
            let (s, t, timer) = ai_judge::init(params, definition, ctx);
            (GameState::AiJudge(s), t, timer)
        }
        GameKind::GroupThink => {
            let (s, t, timer) = group_think::init(params, definition, ctx);
            (GameState::GroupThink(s), t, timer)
        }
        GameKind::Mitm => {
            let (s, t, timer) = mitm::init(params, definition, ctx);
            (GameState::Mitm(s), t, timer)
        }
        GameKind::Quip => {
            let (s, t, timer) = quip::init(params, definition, ctx);
            (GameState::Quip(s), t, timer)
        }
    };

    let lobby = game.state_name();
    let mut players = BTreeMap::new();
    players.insert(
        params.creator.clone(),
        PlayerRecord::new(lobby, params.is_player, params.creator_handle.clone()),
    );

    tracing::info!(
        game = definition.game_id,
        creator = %params.creator,
        "room initialized"
    );

    Room {
        core: RoomCore {
            definition: definition.clone(),
            state_transitions,
            players,
            history: BTreeMap::new(),
            generation_errors: None,
            scratchpad: None,
            timer,
            seen_messages: BTreeSet::new(),
            is_async: params.is_async,
        },
        game,
    }
}

/// Applies one message to a room, producing the next room value.
///
/// Pure given `ctx`. Messages that don't match the room's engine kind,
/// its current state, or its validation rules are silently ignored — the
/// room comes back unchanged with no effects.
pub fn reduce(mut room: Room, msg: &GameMessage, ctx: &mut EngineCtx) -> Reduced {
    let mut effects = Vec::new();
    match (&mut room.game, msg) {
        (GameState::PromptGuess(state), GameMessage::PromptGuess(m)) => {
            prompt_guess::reduce(&mut room.core, state, m, ctx, &mut effects);
        }
        (GameState::AiJudge(state), GameMessage::AiJudge(m)) => {
            ai_judge::reduce(&mut room.core, state, m, ctx, &mut effects);
        }
        (GameState::GroupThink(state), GameMessage::GroupThink(m)) => {
            group_think::reduce(&mut room.core, state, m, ctx, &mut effects);
        }
        (GameState::Mitm(state), GameMessage::Mitm(m)) => {
            mitm::reduce(&mut room.core, state, m, ctx, &mut effects);
        }
        (GameState::Quip(state), GameMessage::Quip(m)) => {
            quip::reduce(&mut room.core, state, m, ctx, &mut effects);
        }
        _ => {
            tracing::debug!(
                engine = room.game.state_name(),
                "message for wrong engine kind, ignoring"
            );
        }
    }
    Reduced { room, effects }
}
