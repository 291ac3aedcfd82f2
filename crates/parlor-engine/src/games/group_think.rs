//! GroupThink: a rotating author sets a target prompt, everyone else
//! tries to generate the best match, and the room votes.
//!
//! The scoring twist: an item that wins the vote *outright* was "too
//! obvious" and scores zero, while every other item scores its raw vote
//! count. A tied maximum penalizes nobody.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GtPhase {
    Lobby,
    Prompt,
    Create,
    Vote,
    Score,
    Finish,
}

impl Phase for GtPhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Lobby => "Lobby",
            Self::Prompt => "Prompt",
            Self::Create => "Create",
            Self::Vote => "Vote",
            Self::Score => "Score",
            Self::Finish => "Finish",
        }
    }

    fn all() -> &'static [Self] {
        &[
            Self::Lobby,
            Self::Prompt,
            Self::Create,
            Self::Vote,
            Self::Score,
            Self::Finish,
        ]
    }

    fn base_duration(&self) -> u64 {
        match self {
            Self::Lobby | Self::Finish => UNBOUNDED,
            Self::Prompt => 40_000,
            Self::Create => 60_000,
            Self::Vote => 30_000,
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
    pub state: GtPhase,
    pub round: u32,
    /// Stable shuffled rotation, computed once at Start and indexed by
    /// round number.
    pub author_rotation: Vec<PlayerId>,
    pub current_prompt: Option<String>,
    /// One item per non-author creator.
    pub generations: BTreeMap<PlayerId, GenerationRecord>,
    /// Voter → creator of the chosen item.
    pub votes: BTreeMap<PlayerId, PlayerId>,
    pub scores: BTreeMap<PlayerId, Score>,
}

impl State {
    /// The prompt author for the current round.
    pub fn current_author(&self) -> Option<&PlayerId> {
        if self.author_rotation.is_empty() {
            return None;
        }
        let idx = (self.round as usize - 1) % self.author_rotation.len();
        self.author_rotation.get(idx)
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
    Prompt {
        sender: PlayerId,
        value: String,
    },
    Create {
        sender: PlayerId,
        value: String,
    },
    Vote {
        sender: PlayerId,
        value: PlayerId,
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
        state: GtPhase::Lobby,
        round: 1,
        author_rotation: Vec::new(),
        current_prompt: None,
        generations: BTreeMap::new(),
        votes: BTreeMap::new(),
        scores: BTreeMap::new(),
    };
    let transitions = BTreeMap::from([
        ("Prompt".to_string(), "Create".to_string()),
        ("Create".to_string(), "Vote".to_string()),
        ("Vote".to_string(), "Score".to_string()),
        ("Score".to_string(), "Prompt".to_string()),
    ]);
    let timer = machine::build_timer(params.effective_timer_mode(), GtPhase::Lobby, ctx.now_ms);
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
            if st.state != GtPhase::Lobby || core.players.contains_key(sender) {
                return;
            }
            let mut rec = PlayerRecord::new(st.state.name(), *is_player, handle.clone());
            rec.avatar = avatar.clone();
            core.players.insert(sender.clone(), rec);
        }

        Msg::Start { sender } => {
            if st.state != GtPhase::Lobby || !is_active(core, sender) {
                return;
            }
            let mut rotation: Vec<PlayerId> = core
                .players
                .iter()
                .filter(|(_, p)| p.is_player)
                .map(|(id, _)| id.clone())
                .collect();
            rotation.shuffle(ctx.rng());
            st.author_rotation = rotation;
            for id in &st.author_rotation {
                st.scores.insert(id.clone(), Score::default());
            }
            start_round(core, st, ctx);
        }

        Msg::Prompt { sender, value } => {
            if st.state != GtPhase::Prompt || st.current_author() != Some(sender) {
                return;
            }
            st.current_prompt = Some(value.clone());
            machine::enter(&mut st.state, core, GtPhase::Create, ctx.now_ms);
        }

        Msg::Create { sender, value } => {
            let author = match (&st.state, st.current_author()) {
                (GtPhase::Create, Some(a)) => a.clone(),
                _ => return,
            };
            if *sender == author || !is_active(core, sender) || st.generations.contains_key(sender)
            {
                return;
            }
            let mut record = GenerationRecord::pending(
                sender.clone(),
                core.definition.model.clone(),
                None,
                value.clone(),
            );
            record.context = Some(serde_json::json!({
                "target": st.current_prompt,
            }));
            effects.push(Effect::Generate {
                key: sender.to_string(),
                record: record.clone(),
            });
            st.generations.insert(sender.clone(), record);

            if quorum(st.generations.keys(), &core.players, Some(&author)) {
                machine::enter(&mut st.state, core, GtPhase::Vote, ctx.now_ms);
            }
        }

        Msg::Vote { sender, value } => {
            if st.state != GtPhase::Vote
                || !is_active(core, sender)
                || st.votes.contains_key(sender)
                || !st.generations.contains_key(value)
                || value == sender
            {
                return;
            }
            st.votes.insert(sender.clone(), value.clone());
            if quorum(st.votes.keys(), &core.players, None) {
                score(core, st, ctx);
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
        }

        Msg::OutOfTime { sender } => {
            if !is_active(core, sender) || !timer_expired(core, ctx.now_ms) {
                return;
            }
            force_advance(core, st, ctx);
        }

        Msg::ReadyToContinue { sender } => {
            if st.state != GtPhase::Score {
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
                advance_round_or_finish(core, st, ctx);
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

fn start_round(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    st.current_prompt = None;
    st.generations.clear();
    st.votes.clear();
    machine::enter(&mut st.state, core, GtPhase::Prompt, ctx.now_ms);
}

/// The majority-vote pass with the "too obvious" tie-break.
fn score(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    snapshot_previous(&mut st.scores);

    let mut tally: BTreeMap<PlayerId, i64> = BTreeMap::new();
    for creator in st.generations.keys() {
        tally.insert(creator.clone(), 0);
    }
    for choice in st.votes.values() {
        *tally.entry(choice.clone()).or_insert(0) += 1;
    }

    let max = tally.values().copied().max().unwrap_or(0);
    let top: Vec<PlayerId> = tally
        .iter()
        .filter(|(_, count)| **count == max && max > 0)
        .map(|(id, _)| id.clone())
        .collect();

    for (creator, count) in &tally {
        let zeroed = top.len() == 1 && top[0] == *creator;
        if !zeroed {
            award(&mut st.scores, creator, *count);
        }
    }

    core.push_history(
        ctx.now_ms,
        serde_json::json!({
            "round": st.round,
            "author": st.current_author(),
            "prompt": st.current_prompt,
            "generations": st.generations,
            "votes": st.votes,
            "tally": tally,
            "scores": st.scores,
        }),
    );

    machine::enter(&mut st.state, core, GtPhase::Score, ctx.now_ms);
}

fn advance_round_or_finish(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    if st.round < core.definition.max_round {
        st.round += 1;
        start_round(core, st, ctx);
    } else {
        machine::enter(&mut st.state, core, GtPhase::Finish, ctx.now_ms);
    }
}

fn force_advance(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    if st.state.is_scoring() {
        advance_round_or_finish(core, st, ctx);
        return;
    }
    let Some(target) = machine::auto_advance_target(core, st.state) else {
        return;
    };
    match target {
        // Author never set a prompt: skip the round.
        GtPhase::Create => advance_round_or_finish(core, st, ctx),
        GtPhase::Vote => {
            if st.generations.is_empty() {
                advance_round_or_finish(core, st, ctx);
            } else {
                machine::enter(&mut st.state, core, GtPhase::Vote, ctx.now_ms);
            }
        }
        GtPhase::Score => score(core, st, ctx),
        GtPhase::Prompt => start_round(core, st, ctx),
        GtPhase::Lobby | GtPhase::Finish => {}
    }
}

// =========================================================================
// Tests
// =========================================================================
