//! Quip: two players take turns answering an absurd prompt, and a
//! language model judges each answer on a 0–10 scale with a one-liner of
//! commentary. Points are the judged score ×100.

use std::collections::BTreeMap;

use rand::seq::IndexedRandom;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use parlor_protocol::PlayerId;

use crate::definition::GameDefinition;
use crate::engine::{CreationParams, Effect};
use crate::games::default_true;
use crate::machine::{
    self, EngineCtx, Phase, award, ready_quorum, snapshot_previous, timer_expired,
};
use crate::room::{
    ENGINE_KEY, GenerationRecord, PlayerRecord, RoomCore, Score, Timer, UNBOUNDED,
};

/// Multiplier from the judge's 0–10 score to awarded points.
const POINTS_PER_SCORE: f64 = 100.0;

/// The writing prompts, drawn uniformly per turn.
const PROMPT_POOL: &[&str] = &[
    "The worst possible name for a luxury perfume",
    "A rejected slogan for the moon",
    "What your houseplants say about you behind your back",
    "The first rule of the world's most boring club",
    "A terrible opening line for a wedding toast",
    "The secret ingredient in grandma's famous casserole",
    "What the last dinosaur was thinking",
    "A tagline for a gym that has given up",
    "The real reason the office printer is always broken",
    "An unhelpful fortune cookie fortune",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuipPhase {
    Lobby,
    Write,
    Judge,
    Score,
    Finish,
}

impl Phase for QuipPhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Lobby => "Lobby",
            Self::Write => "Write",
            Self::Judge => "Judge",
            Self::Score => "Score",
            Self::Finish => "Finish",
        }
    }

    fn all() -> &'static [Self] {
        &[Self::Lobby, Self::Write, Self::Judge, Self::Score, Self::Finish]
    }

    fn base_duration(&self) -> u64 {
        match self {
            Self::Lobby | Self::Finish => UNBOUNDED,
            Self::Write => 60_000,
            Self::Judge => 30_000,
            Self::Score => 25_000,
        }
    }

    fn is_scoring(&self) -> bool {
        matches!(self, Self::Score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub state: QuipPhase,
    pub round: u32,
    /// Turn order, shuffled once at Start.
    pub rotation: Vec<PlayerId>,
    /// Index into `rotation` for the current writer.
    pub turn: usize,
    pub current_prompt: Option<String>,
    /// The in-flight or completed judgment for the current turn.
    pub judgment: Option<GenerationRecord>,
    pub scores: BTreeMap<PlayerId, Score>,
}

impl State {
    pub fn current_writer(&self) -> Option<&PlayerId> {
        self.rotation.get(self.turn)
    }
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
    Write {
        sender: PlayerId,
        value: String,
    },
    GenerationResult {
        key: String,
        generation: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    OutOfTime {
        sender: PlayerId,
    },
    ReadyToContinue {
        sender: PlayerId,
    },
}

pub(crate) fn init(
    params: &CreationParams,
    _def: &GameDefinition,
    ctx: &mut EngineCtx,
) -> (State, BTreeMap<String, String>, Option<Timer>) {
    let state = State {
        state: QuipPhase::Lobby,
        round: 1,
        rotation: Vec::new(),
        turn: 0,
        current_prompt: None,
        judgment: None,
        scores: BTreeMap::new(),
    };
    let transitions = BTreeMap::from([
        ("Write".to_string(), "Judge".to_string()),
        ("Judge".to_string(), "Score".to_string()),
        ("Score".to_string(), "Write".to_string()),
    ]);
    let timer = machine::build_timer(params.effective_timer_mode(), QuipPhase::Lobby, ctx.now_ms);
    (state, transitions, timer)
}

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
            if st.state != QuipPhase::Lobby || core.players.contains_key(sender) {
                return;
            }
            // Head-to-head format: two seats, everyone else watches.
            let seat_open = core.active_players() < 2;
            let mut rec =
                PlayerRecord::new(st.state.name(), *is_player && seat_open, handle.clone());
            rec.avatar = avatar.clone();
            core.players.insert(sender.clone(), rec);
        }

        Msg::Start { sender } => {
            if st.state != QuipPhase::Lobby
                || !is_active(core, sender)
                || core.active_players() < 2
            {
                return;
            }
            let mut rotation: Vec<PlayerId> = core
                .players
                .iter()
                .filter(|(_, p)| p.is_player)
                .map(|(id, _)| id.clone())
                .collect();
            rotation.shuffle(ctx.rng());
            for id in &rotation {
                st.scores.insert(id.clone(), Score::default());
            }
            st.rotation = rotation;
            start_turn(core, st, ctx);
        }

        Msg::Write { sender, value } => {
            if st.state != QuipPhase::Write || st.current_writer() != Some(sender) {
                return;
            }
            let Some(prompt_text) = st.current_prompt.clone() else {
                return;
            };
            let prompt = format!(
                "You are the judge of a comedy writing game. \
                 The prompt was: \"{prompt_text}\"\n\
                 The contestant answered: \"{value}\"\n\
                 Rate the answer from 0 to 10 and add one short line of commentary.",
            );
            let mut record = GenerationRecord::pending(
                sender.clone(),
                core.definition.model.clone(),
                None,
                prompt,
            );
            record.context = Some(serde_json::json!({
                "prompt": prompt_text,
                "answer": value,
            }));
            st.judgment = Some(record.clone());
            effects.push(Effect::Generate {
                key: ENGINE_KEY.to_string(),
                record,
            });
            machine::enter(&mut st.state, core, QuipPhase::Judge, ctx.now_ms);
        }

        Msg::GenerationResult {
            key,
            generation,
            error,
        } => {
            if key != ENGINE_KEY || st.state != QuipPhase::Judge {
                return;
            }
            let Some(record) = st.judgment.as_mut() else {
                return;
            };
            if record.fulfilled {
                return;
            }
            record.generation = generation.clone();
            record.fulfilled = true;
            record.error = error.clone();
            settle_turn(core, st, ctx);
        }

        Msg::OutOfTime { sender } => {
            if !is_active(core, sender) || !timer_expired(core, ctx.now_ms) {
                return;
            }
            match st.state {
                // Writer never answered: the turn is forfeit.
                QuipPhase::Write => advance_turn(core, st, ctx),
                // Judge never came back: quarantine and move on scoreless.
                QuipPhase::Judge => {
                    if let Some(mut record) = st.judgment.take() {
                        record.error
                            .get_or_insert_with(|| "judgment timed out".to_string());
                        core.quarantine([record]);
                    }
                    snapshot_previous(&mut st.scores);
                    machine::enter(&mut st.state, core, QuipPhase::Score, ctx.now_ms);
                }
                QuipPhase::Score => advance_turn(core, st, ctx),
                QuipPhase::Lobby | QuipPhase::Finish => {}
            }
        }

        Msg::ReadyToContinue { sender } => {
            if st.state != QuipPhase::Score {
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
                advance_turn(core, st, ctx);
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

fn start_turn(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    st.current_prompt = PROMPT_POOL.choose(ctx.rng()).map(|p| p.to_string());
    st.judgment = None;
    machine::enter(&mut st.state, core, QuipPhase::Write, ctx.now_ms);
}

/// Scores the fulfilled judgment and enters Score. A judgment that
/// errored or doesn't parse awards nothing and lands in quarantine.
fn settle_turn(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    snapshot_previous(&mut st.scores);

    let Some(record) = st.judgment.as_mut() else {
        return;
    };
    let verdict = if record.error.is_some() {
        None
    } else {
        parse_judgment(&record.generation)
    };
    match verdict {
        Some((score, _comment)) => {
            let points = (score * POINTS_PER_SCORE).round() as i64;
            let writer = record.player.clone();
            award(&mut st.scores, &writer, points);
        }
        None => {
            record
                .error
                .get_or_insert_with(|| "judgment did not match schema".to_string());
            core.quarantine([record.clone()]);
        }
    }

    core.push_history(
        ctx.now_ms,
        serde_json::json!({
            "round": st.round,
            "writer": st.current_writer(),
            "prompt": st.current_prompt,
            "judgment": st.judgment,
            "scores": st.scores,
        }),
    );

    machine::enter(&mut st.state, core, QuipPhase::Score, ctx.now_ms);
}

/// Next writer, next round, or the end of the game.
fn advance_turn(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    if st.turn + 1 < st.rotation.len() {
        st.turn += 1;
        start_turn(core, st, ctx);
    } else if st.round < core.definition.max_round {
        st.round += 1;
        st.turn = 0;
        start_turn(core, st, ctx);
    } else {
        machine::enter(&mut st.state, core, QuipPhase::Finish, ctx.now_ms);
    }
}

/// Expects the structured shape `{"score": <number>, "comment": <string>}`.
fn parse_judgment(generation: &serde_json::Value) -> Option<(f64, String)> {
    let obj = generation.as_object()?;
    let score = obj.get("score")?.as_f64()?;
    let comment = obj.get("comment")?.as_str()?.to_string();
    if !(0.0..=10.0).contains(&score) {
        return None;
    }
    Some((score, comment))
}

// =========================================================================
// Tests
// =========================================================================
