//! Shared state-machine machinery: the transition function, quorum
//! counting, timer validation, and the injected randomness/clock context.
//!
//! Every engine drives its phases through [`enter`] — it is the only code
//! path that writes a state name into player records or re-arms the
//! timer. Keeping that in one place is what makes the "exactly one
//! transition per trigger" guarantee auditable.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;

use parlor_protocol::{PlayerId, TimerMode};

use crate::room::{PlayerRecord, RoomCore, Score, Timer, UNBOUNDED};

// ---------------------------------------------------------------------------
// EngineCtx
// ---------------------------------------------------------------------------

/// The injected context for `init` and `reduce` calls.
///
/// Engines never read the ambient clock or global randomness: both enter
/// through this struct, so replaying the same `(room, message, ctx)`
/// under an optimistic-concurrency retry produces identical output.
pub struct EngineCtx {
    /// Wall clock, epoch ms, captured once by the caller before the
    /// retry loop starts.
    pub now_ms: u64,
    rng: StdRng,
}

impl EngineCtx {
    pub fn new(now_ms: u64, seed: u64) -> Self {
        Self {
            now_ms,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One engine's closed state enumeration.
///
/// Implemented by each game's phase enum; gives the shared machinery the
/// state names, the full duration table, and the scoring-state flag the
/// out-of-time path needs.
pub trait Phase: Copy + Eq + Sized + 'static {
    /// Stable state name, used in player records, the transition table,
    /// and the timer duration table.
    fn name(&self) -> &'static str;

    /// Every state of this engine, in declaration order.
    fn all() -> &'static [Self];

    /// Base duration in ms under [`TimerMode::Normal`]. [`UNBOUNDED`]
    /// for lobby/terminal states.
    fn base_duration(&self) -> u64;

    /// States whose timer expiry takes the continue-after-scoring path
    /// instead of the transition table.
    fn is_scoring(&self) -> bool {
        false
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|p| p.name() == name)
    }
}

/// Builds the full per-state timer table for an engine, scaled by mode.
/// Returns `None` when timers are off.
pub fn build_timer<P: Phase>(mode: TimerMode, initial: P, now: u64) -> Option<Timer> {
    let scale = match mode {
        TimerMode::Off => return None,
        TimerMode::Normal => 1,
        TimerMode::Slow => 2,
    };
    let state_durations: BTreeMap<String, u64> = P::all()
        .iter()
        .map(|p| {
            let base = p.base_duration();
            let scaled = if base == UNBOUNDED { base } else { base * scale };
            (p.name().to_string(), scaled)
        })
        .collect();
    let mut timer = Timer {
        started: now,
        duration: UNBOUNDED,
        state_durations,
    };
    timer.rearm(initial.name(), now);
    Some(timer)
}

// ---------------------------------------------------------------------------
// The transition function
// ---------------------------------------------------------------------------

/// Transitions a room into `next`. The single code path that writes the
/// state name anywhere:
///
/// - sets the typed phase slot,
/// - mirrors the state name into every player record,
/// - clears every `is_ready_to_continue` flag,
/// - re-arms the timer from the per-state table.
pub fn enter<P: Phase>(state: &mut P, core: &mut RoomCore, next: P, now: u64) {
    tracing::debug!(from = state.name(), to = next.name(), "state transition");
    *state = next;
    for player in core.players.values_mut() {
        player.state = next.name().to_string();
        player.is_ready_to_continue = false;
    }
    if let Some(timer) = core.timer.as_mut() {
        timer.rearm(next.name(), now);
    }
}

/// Looks up the configured auto-advance target for the current state.
pub fn auto_advance_target<P: Phase>(core: &RoomCore, state: P) -> Option<P> {
    core.state_transitions
        .get(state.name())
        .and_then(|name| P::from_name(name))
}

/// True when the room's timer exists and the current deadline has passed.
/// Rooms with timers off never honor out-of-time pings.
pub fn timer_expired(core: &RoomCore, now: u64) -> bool {
    core.timer.as_ref().is_some_and(|t| t.expired(now))
}

// ---------------------------------------------------------------------------
// Quorum
// ---------------------------------------------------------------------------

/// Count of active (non-observer) players.
pub fn active_count(players: &BTreeMap<PlayerId, PlayerRecord>) -> usize {
    players.values().filter(|p| p.is_player).count()
}

/// The quorum law: a phase is complete when the distinct active-player
/// submissions equal the live active-player count.
///
/// Submitters that are observers (or unknown) are filtered out, so an
/// observer's stray submission can never tip the count. `exclude` drops
/// one expected participant — e.g. the truth author during a Lie phase.
pub fn quorum<'a>(
    submitters: impl IntoIterator<Item = &'a PlayerId>,
    players: &BTreeMap<PlayerId, PlayerRecord>,
    exclude: Option<&PlayerId>,
) -> bool {
    let counted = submitters
        .into_iter()
        .filter(|id| Some(*id) != exclude)
        .filter(|id| players.get(id).is_some_and(|p| p.is_player))
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    let mut expected = active_count(players);
    if let Some(ex) = exclude {
        if players.get(ex).is_some_and(|p| p.is_player) {
            expected -= 1;
        }
    }
    expected > 0 && counted == expected
}

/// True when every active player has flagged ready-to-continue.
pub fn ready_quorum(players: &BTreeMap<PlayerId, PlayerRecord>) -> bool {
    let active: Vec<_> = players.values().filter(|p| p.is_player).collect();
    !active.is_empty() && active.iter().all(|p| p.is_ready_to_continue)
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// Snapshots `previous = current` for every score, immediately before a
/// scoring pass, so clients can animate deltas.
pub fn snapshot_previous(scores: &mut BTreeMap<PlayerId, Score>) {
    for score in scores.values_mut() {
        score.previous = score.current;
    }
}

/// Adds points to a player's tally, creating the entry if needed.
pub fn award(scores: &mut BTreeMap<PlayerId, Score>, player: &PlayerId, points: i64) {
    scores.entry(player.clone()).or_default().current += points;
}
