//! PromptGuess: players prompt a model, write lies about each other's
//! results, and vote for the truth.
//!
//! One engine serves three catalog entries (image portraits, generated
//! lists, emoji riddles) — they differ only in model config and template
//! set. Round structure: Prompt → Lie → Vote → Score, one true
//! submission revealed per cycle, for `max_round` rounds.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use parlor_protocol::PlayerId;

use crate::definition::GameDefinition;
use crate::engine::{CreationParams, Effect};
use crate::games::default_true;
use crate::machine::{
    self, EngineCtx, Phase, award, quorum, ready_quorum, snapshot_previous,
    timer_expired,
};
use crate::room::{GenerationRecord, PlayerRecord, RoomCore, Score, Timer, UNBOUNDED};

/// Awarded to the truth's author and to each voter who found it.
pub const TRUTH_POINTS: i64 = 1000;
/// Awarded to a lie's author per vote it draws, and to the truth's
/// author per vote on a lie that matches the truth.
pub const LIE_POINTS: i64 = 500;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PgPhase {
    Lobby,
    Intro,
    Prompt,
    Lie,
    Vote,
    Score,
    Finish,
}

impl Phase for PgPhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Lobby => "Lobby",
            Self::Intro => "Intro",
            Self::Prompt => "Prompt",
            Self::Lie => "Lie",
            Self::Vote => "Vote",
            Self::Score => "Score",
            Self::Finish => "Finish",
        }
    }

    fn all() -> &'static [Self] {
        &[
            Self::Lobby,
            Self::Intro,
            Self::Prompt,
            Self::Lie,
            Self::Vote,
            Self::Score,
            Self::Finish,
        ]
    }

    fn base_duration(&self) -> u64 {
        match self {
            Self::Lobby | Self::Finish => UNBOUNDED,
            Self::Intro => 25_000,
            Self::Prompt => 45_000,
            Self::Lie => 35_000,
            Self::Vote => 30_000,
            Self::Score => 25_000,
        }
    }

    fn is_scoring(&self) -> bool {
        matches!(self, Self::Score)
    }
}

// ---------------------------------------------------------------------------
// State & messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub state: PgPhase,
    pub round: u32,
    /// Pending/fulfilled generations for the current round, keyed by
    /// their author. Revealed one at a time; consumed on scoring.
    pub generations: BTreeMap<PlayerId, GenerationRecord>,
    /// Author of the generation currently on display.
    pub current_generation: Option<PlayerId>,
    pub lies: BTreeMap<PlayerId, String>,
    /// Voter → author of the chosen option (the truth author, or a liar).
    pub votes: BTreeMap<PlayerId, PlayerId>,
    pub scores: BTreeMap<PlayerId, Score>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Msg {
    NewPlayer {
        sender: PlayerId,
        #[serde(default)]
        handle: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
        #[serde(default = "default_true")]
        is_player: bool,
    },
    Start {
        sender: PlayerId,
    },
    Prompt {
        sender: PlayerId,
        value: String,
        #[serde(default)]
        template: Option<String>,
    },
    Lie {
        sender: PlayerId,
        value: String,
    },
    Vote {
        sender: PlayerId,
        value: PlayerId,
    },
    /// Fulfillment from the generation dispatcher.
    GenerationResult {
        key: String,
        generation: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    /// A client stuck viewing an errored item forces a repick.
    GenerationError {
        sender: PlayerId,
        key: PlayerId,
    },
    OutOfTime {
        sender: PlayerId,
    },
    ReadyToContinue {
        sender: PlayerId,
    },
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

pub(crate) fn init(
    params: &CreationParams,
    def: &GameDefinition,
    ctx: &mut EngineCtx,
) -> (State, BTreeMap<String, String>, Option<Timer>) {
    let state = State {
        state: PgPhase::Lobby,
        round: 1,
        generations: BTreeMap::new(),
        current_generation: None,
        lies: BTreeMap::new(),
        votes: BTreeMap::new(),
        scores: BTreeMap::new(),
    };
    let transitions = BTreeMap::from([
        ("Intro".to_string(), "Prompt".to_string()),
        ("Prompt".to_string(), "Lie".to_string()),
        ("Lie".to_string(), "Vote".to_string()),
        ("Vote".to_string(), "Score".to_string()),
        ("Score".to_string(), "Lie".to_string()),
    ]);
    let timer = machine::build_timer(params.effective_timer_mode(), PgPhase::Lobby, ctx.now_ms);
    let _ = def;
    (state, transitions, timer)
}

// ---------------------------------------------------------------------------
// reduce
// ---------------------------------------------------------------------------

pub(crate) fn reduce(
    core: &mut RoomCore,
    st: &mut State,
    msg: &Msg,
    ctx: &mut EngineCtx,
    effects: &mut Vec<Effect>,
) {
    match msg {
        Msg::NewPlayer {
            sender,
            handle,
            avatar,
            is_player,
        } => {
            if st.state != PgPhase::Lobby || core.players.contains_key(sender) {
                return;
            }
            let mut rec = PlayerRecord::new(st.state.name(), *is_player, handle.clone());
            rec.avatar = avatar.clone();
            core.players.insert(sender.clone(), rec);
        }

        Msg::Start { sender } => {
            if st.state != PgPhase::Lobby || !is_active(core, sender) {
                return;
            }
            for (id, p) in &core.players {
                if p.is_player {
                    st.scores.insert(id.clone(), Score::default());
                }
            }
            if core.definition.intro.is_some() {
                machine::enter(&mut st.state, core, PgPhase::Intro, ctx.now_ms);
            } else {
                start_round(core, st, ctx);
            }
        }

        Msg::Prompt {
            sender,
            value,
            template,
        } => {
            if st.state != PgPhase::Prompt
                || !is_active(core, sender)
                || st.generations.contains_key(sender)
            {
                return;
            }
            let (template_id, prompt) = resolve_template(core, template.as_deref(), value);
            let mut record = GenerationRecord::pending(
                sender.clone(),
                core.definition.model.clone(),
                template_id,
                prompt,
            );
            record.context = Some(serde_json::json!({
                "answer": value,
                "seed": ctx.rng().random::<u64>(),
            }));
            effects.push(Effect::Generate {
                key: sender.to_string(),
                record: record.clone(),
            });
            st.generations.insert(sender.clone(), record);

            if quorum(st.generations.keys(), &core.players, None) {
                reveal_next(core, st, ctx);
            }
        }

        Msg::Lie { sender, value } => {
            let author = match (&st.state, &st.current_generation) {
                (PgPhase::Lie, Some(a)) => a.clone(),
                _ => return,
            };
            if *sender == author || !is_active(core, sender) || st.lies.contains_key(sender) {
                return;
            }
            st.lies.insert(sender.clone(), value.clone());
            if quorum(st.lies.keys(), &core.players, Some(&author)) {
                machine::enter(&mut st.state, core, PgPhase::Vote, ctx.now_ms);
            }
        }

        Msg::Vote { sender, value } => {
            let author = match (&st.state, &st.current_generation) {
                (PgPhase::Vote, Some(a)) => a.clone(),
                _ => return,
            };
            if !is_active(core, sender) || st.votes.contains_key(sender) {
                return;
            }
            // A vote names the chosen option's author: the truth author
            // or a liar. Nobody may pick their own entry.
            let valid = (*value == author || st.lies.contains_key(value)) && value != sender;
            if !valid {
                return;
            }
            st.votes.insert(sender.clone(), value.clone());
            if quorum(st.votes.keys(), &core.players, None) {
                score_and_reveal(core, st, ctx);
            }
        }

        Msg::GenerationResult {
            key,
            generation,
            error,
        } => {
            let key = PlayerId::new(key.clone());
            let Some(record) = st.generations.get_mut(&key) else {
                return;
            };
            if record.fulfilled {
                return;
            }
            record.generation = generation.clone();
            record.fulfilled = true;
            record.error = error.clone();
            if let Some(err) = error {
                tracing::debug!(player = %key, error = err, "generation errored");
            }
        }

        Msg::GenerationError { sender, key } => {
            if !matches!(st.state, PgPhase::Lie | PgPhase::Vote) || !is_active(core, sender) {
                return;
            }
            if st.current_generation.as_ref() != Some(key) {
                return;
            }
            let errored = st
                .generations
                .get(key)
                .is_some_and(|r| r.error.is_some());
            if !errored {
                return;
            }
            let record = st.generations.remove(key).expect("checked above");
            core.quarantine([record]);
            reveal_next(core, st, ctx);
        }

        Msg::OutOfTime { sender } => {
            if !is_active(core, sender) || !timer_expired(core, ctx.now_ms) {
                return;
            }
            force_advance(core, st, ctx);
        }

        Msg::ReadyToContinue { sender } => {
            if !matches!(st.state, PgPhase::Intro | PgPhase::Score) {
                return;
            }
            let Some(p) = core.players.get_mut(sender) else {
                return;
            };
            if !p.is_player {
                return;
            }
            p.is_ready_to_continue = true;
            if ready_quorum(&core.players) {
                match st.state {
                    PgPhase::Intro => start_round(core, st, ctx),
                    PgPhase::Score => continue_from_score(core, st, ctx),
                    _ => unreachable!(),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn is_active(core: &RoomCore, id: &PlayerId) -> bool {
    core.players.get(id).is_some_and(|p| p.is_player)
}

/// Resolves the template to use: the requested id, or the first template
/// in the set, or no template at all (raw input as prompt).
fn resolve_template(
    core: &RoomCore,
    requested: Option<&str>,
    value: &str,
) -> (Option<String>, String) {
    let t = match requested {
        Some(id) => core.definition.template(id),
        None => core
            .definition
            .templates
            .as_ref()
            .and_then(|m| m.values().next()),
    };
    match t {
        Some(t) => (Some(t.id.clone()), t.apply(value)),
        None => (None, value.to_string()),
    }
}

/// Clears per-cycle and per-round collections and enters Prompt.
fn start_round(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    st.generations.clear();
    st.current_generation = None;
    st.lies.clear();
    st.votes.clear();
    machine::enter(&mut st.state, core, PgPhase::Prompt, ctx.now_ms);
}

/// Picks the next generation to expose and enters the Lie phase, or
/// advances the round / finishes when nothing is revealable.
fn reveal_next(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    st.lies.clear();
    st.votes.clear();
    match choose_generation(core, st, ctx) {
        Some(key) => {
            st.current_generation = Some(key);
            machine::enter(&mut st.state, core, PgPhase::Lie, ctx.now_ms);
        }
        None => advance_round_or_finish(core, st, ctx),
    }
}

/// Three-tier selection: fulfilled & clean beats pending & clean; if
/// everything outstanding has errored, the whole batch is quarantined
/// and there is nothing to reveal.
fn choose_generation(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) -> Option<PlayerId> {
    let clean_fulfilled: Vec<PlayerId> = st
        .generations
        .iter()
        .filter(|(_, r)| r.is_ok())
        .map(|(k, _)| k.clone())
        .collect();
    if let Some(pick) = clean_fulfilled.choose(ctx.rng()) {
        return Some(pick.clone());
    }

    let clean_pending: Vec<PlayerId> = st
        .generations
        .iter()
        .filter(|(_, r)| !r.fulfilled && r.error.is_none())
        .map(|(k, _)| k.clone())
        .collect();
    if let Some(pick) = clean_pending.choose(ctx.rng()) {
        // Clients show a waiting state until the fulfillment lands.
        return Some(pick.clone());
    }

    if !st.generations.is_empty() {
        tracing::warn!(
            count = st.generations.len(),
            "all outstanding generations errored, quarantining"
        );
        let failed = std::mem::take(&mut st.generations);
        core.quarantine(failed.into_values());
    }
    None
}

fn advance_round_or_finish(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    if st.round < core.definition.max_round {
        st.round += 1;
        start_round(core, st, ctx);
    } else {
        machine::enter(&mut st.state, core, PgPhase::Finish, ctx.now_ms);
    }
}

/// The scoring pass for one revealed generation.
fn score_and_reveal(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    let Some(author) = st.current_generation.clone() else {
        // Reveal phase with no candidate: defined fallback, not a crash.
        advance_round_or_finish(core, st, ctx);
        return;
    };
    let record = st.generations.remove(&author);
    let truth = record
        .as_ref()
        .and_then(|r| r.context.as_ref())
        .and_then(|c| c.get("answer"))
        .and_then(|v| v.as_str())
        .map(normalize);

    snapshot_previous(&mut st.scores);

    let correct: Vec<&PlayerId> = st
        .votes
        .iter()
        .filter(|(_, choice)| **choice == author)
        .map(|(voter, _)| voter)
        .collect();
    for voter in &correct {
        award(&mut st.scores, voter, TRUTH_POINTS);
    }
    if !correct.is_empty() {
        award(&mut st.scores, &author, TRUTH_POINTS);
    }

    for (_, choice) in st.votes.iter().filter(|(_, c)| **c != author) {
        award(&mut st.scores, choice, LIE_POINTS);
        // A lie that happens to match the truth still credits the
        // truth's author for every vote it drew.
        let matches_truth = st
            .lies
            .get(choice)
            .zip(truth.as_ref())
            .is_some_and(|(lie, t)| normalize(lie) == *t);
        if matches_truth {
            award(&mut st.scores, &author, LIE_POINTS);
        }
    }

    core.push_history(
        ctx.now_ms,
        serde_json::json!({
            "round": st.round,
            "author": author,
            "generation": record,
            "lies": st.lies,
            "votes": st.votes,
            "scores": st.scores,
        }),
    );

    machine::enter(&mut st.state, core, PgPhase::Score, ctx.now_ms);
}

fn continue_from_score(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    reveal_next(core, st, ctx);
}

/// Timer-driven auto-advance: scoring states take the continue path,
/// everything else follows the transition table with the entry work for
/// the target state.
fn force_advance(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    if st.state.is_scoring() {
        continue_from_score(core, st, ctx);
        return;
    }
    let Some(target) = machine::auto_advance_target(core, st.state) else {
        return;
    };
    match target {
        PgPhase::Prompt => start_round(core, st, ctx),
        PgPhase::Lie => reveal_next(core, st, ctx),
        PgPhase::Vote => machine::enter(&mut st.state, core, PgPhase::Vote, ctx.now_ms),
        PgPhase::Score => score_and_reveal(core, st, ctx),
        PgPhase::Lobby | PgPhase::Intro | PgPhase::Finish => {}
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

// =========================================================================
// Tests
// =========================================================================
