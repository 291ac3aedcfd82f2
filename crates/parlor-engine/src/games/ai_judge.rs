//! AIJudge: players write answers to a chosen question and a model picks
//! the winner by letter.
//!
//! The judgment is a single synthetic generation keyed by
//! [`ENGINE_KEY`]: on entering the Vote phase the collected answers are
//! shuffled (removing positional bias), lettered, and sent to the model,
//! which is expected to echo back exactly one letter.

use std::collections::BTreeMap;

use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};

use parlor_protocol::PlayerId;

use crate::definition::GameDefinition;
use crate::engine::{CreationParams, Effect};
use crate::games::default_true;
use crate::machine::{
    self, EngineCtx, Phase, award, quorum, ready_quorum, snapshot_previous,
    timer_expired,
};
use crate::room::{ENGINE_KEY, GenerationRecord, PlayerRecord, RoomCore, Score, Timer, UNBOUNDED};

/// Awarded to the author of the judged answer.
pub const ANSWER_POINTS: i64 = 1000;
/// Awarded to each voter who agreed with the judge.
pub const AGREE_POINTS: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AjPhase {
    Lobby,
    Intro,
    Question,
    Answer,
    Vote,
    Score,
    Finish,
}

impl Phase for AjPhase {
    fn name(&self) -> &'static str {
        match self {
            Self::Lobby => "Lobby",
            Self::Intro => "Intro",
            Self::Question => "Question",
            Self::Answer => "Answer",
            Self::Vote => "Vote",
            Self::Score => "Score",
            Self::Finish => "Finish",
        }
    }

    fn all() -> &'static [Self] {
        &[
            Self::Lobby,
            Self::Intro,
            Self::Question,
            Self::Answer,
            Self::Vote,
            Self::Score,
            Self::Finish,
        ]
    }

    fn base_duration(&self) -> u64 {
        match self {
            Self::Lobby | Self::Finish => UNBOUNDED,
            Self::Intro => 25_000,
            Self::Question => 40_000,
            Self::Answer => 45_000,
            Self::Vote => 35_000,
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
    pub state: AjPhase,
    pub round: u32,
    /// Candidate questions, keyed by their author.
    pub questions: BTreeMap<PlayerId, String>,
    /// Author of the question chosen for this round.
    pub current_question: Option<PlayerId>,
    pub answers: BTreeMap<PlayerId, String>,
    /// Letter label → answer author, assigned on entering Vote.
    pub letters: BTreeMap<String, PlayerId>,
    /// The synthetic judgment generation ([`ENGINE_KEY`]).
    pub judgment: Option<GenerationRecord>,
    /// Voter → letter.
    pub votes: BTreeMap<PlayerId, String>,
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
    Question {
        sender: PlayerId,
        value: String,
    },
    Answer {
        sender: PlayerId,
        value: String,
    },
    Vote {
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
        state: AjPhase::Lobby,
        round: 1,
        questions: BTreeMap::new(),
        current_question: None,
        answers: BTreeMap::new(),
        letters: BTreeMap::new(),
        judgment: None,
        votes: BTreeMap::new(),
        scores: BTreeMap::new(),
    };
    let transitions = BTreeMap::from([
        ("Intro".to_string(), "Question".to_string()),
        ("Question".to_string(), "Answer".to_string()),
        ("Answer".to_string(), "Vote".to_string()),
        ("Vote".to_string(), "Score".to_string()),
        ("Score".to_string(), "Question".to_string()),
    ]);
    let timer = machine::build_timer(params.effective_timer_mode(), AjPhase::Lobby, ctx.now_ms);
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
            if st.state != AjPhase::Lobby || core.players.contains_key(sender) {
                return;
            }
            let mut rec = PlayerRecord::new(st.state.name(), *is_player, handle.clone());
            rec.avatar = avatar.clone();
            core.players.insert(sender.clone(), rec);
        }

        Msg::Start { sender } => {
            if st.state != AjPhase::Lobby || !is_active(core, sender) {
                return;
            }
            for (id, p) in &core.players {
                if p.is_player {
                    st.scores.insert(id.clone(), Score::default());
                }
            }
            if core.definition.intro.is_some() {
                machine::enter(&mut st.state, core, AjPhase::Intro, ctx.now_ms);
            } else {
                start_round(core, st, ctx);
            }
        }

        Msg::Question { sender, value } => {
            if st.state != AjPhase::Question
                || !is_active(core, sender)
                || st.questions.contains_key(sender)
            {
                return;
            }
            st.questions.insert(sender.clone(), value.clone());
            if quorum(st.questions.keys(), &core.players, None) {
                pick_question(core, st, ctx);
            }
        }

        Msg::Answer { sender, value } => {
            if st.state != AjPhase::Answer
                || !is_active(core, sender)
                || st.answers.contains_key(sender)
            {
                return;
            }
            st.answers.insert(sender.clone(), value.clone());
            if quorum(st.answers.keys(), &core.players, None) {
                enter_vote(core, st, ctx, effects);
            }
        }

        Msg::Vote { sender, value } => {
            if st.state != AjPhase::Vote
                || !is_active(core, sender)
                || st.votes.contains_key(sender)
                || !st.letters.contains_key(value)
            {
                return;
            }
            st.votes.insert(sender.clone(), value.clone());
            try_score(core, st, ctx);
        }

        Msg::GenerationResult {
            key,
            generation,
            error,
        } => {
            if key != ENGINE_KEY {
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
            try_score(core, st, ctx);
        }

        Msg::OutOfTime { sender } => {
            if !is_active(core, sender) || !timer_expired(core, ctx.now_ms) {
                return;
            }
            force_advance(core, st, ctx, effects);
        }

        Msg::ReadyToContinue { sender } => {
            if !matches!(st.state, AjPhase::Intro | AjPhase::Score) {
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
                    AjPhase::Intro => start_round(core, st, ctx),
                    AjPhase::Score => advance_round_or_finish(core, st, ctx),
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

fn start_round(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    st.questions.clear();
    st.current_question = None;
    st.answers.clear();
    st.letters.clear();
    st.judgment = None;
    st.votes.clear();
    machine::enter(&mut st.state, core, AjPhase::Question, ctx.now_ms);
}

/// Chooses this round's question uniformly among the candidates.
fn pick_question(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    let authors: Vec<PlayerId> = st.questions.keys().cloned().collect();
    match authors.choose(ctx.rng()) {
        Some(author) => {
            st.current_question = Some(author.clone());
            machine::enter(&mut st.state, core, AjPhase::Answer, ctx.now_ms);
        }
        None => advance_round_or_finish(core, st, ctx),
    }
}

/// Shuffles the answers, assigns letters, and files the judgment request.
fn enter_vote(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx, effects: &mut Vec<Effect>) {
    if st.answers.is_empty() {
        advance_round_or_finish(core, st, ctx);
        return;
    }

    let mut authors: Vec<PlayerId> = st.answers.keys().cloned().collect();
    authors.shuffle(ctx.rng());

    st.letters.clear();
    for (i, author) in authors.iter().enumerate() {
        let letter = char::from(b'A' + i as u8).to_string();
        st.letters.insert(letter, author.clone());
    }

    let question = st
        .current_question
        .as_ref()
        .and_then(|q| st.questions.get(q))
        .cloned()
        .unwrap_or_default();
    let mut prompt = format!(
        "You are the judge of a party game. Question: {question}\nCandidate answers:\n"
    );
    for (letter, author) in &st.letters {
        prompt.push_str(&format!("{letter}) {}\n", st.answers[author]));
    }
    prompt.push_str("Reply with only the single letter of the best answer.");

    let mut record = GenerationRecord::pending(
        PlayerId::new(ENGINE_KEY),
        core.definition.model.clone(),
        None,
        prompt,
    );
    record.context = Some(serde_json::json!({ "letters": st.letters }));
    effects.push(Effect::Generate {
        key: ENGINE_KEY.to_string(),
        record: record.clone(),
    });
    st.judgment = Some(record);

    machine::enter(&mut st.state, core, AjPhase::Vote, ctx.now_ms);
}

/// Scores once both the vote quorum and the judgment fulfillment are in.
/// Whichever lands second triggers the pass.
fn try_score(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    if st.state != AjPhase::Vote {
        return;
    }
    let fulfilled = st.judgment.as_ref().is_some_and(|j| j.fulfilled);
    if !fulfilled || !quorum(st.votes.keys(), &core.players, None) {
        return;
    }
    score(core, st, ctx);
}

/// The scoring pass. An unparseable judgment skips scoring entirely and
/// quarantines the record; the round still advances.
fn score(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    snapshot_previous(&mut st.scores);

    let judgment = st.judgment.take();
    let judged = judgment.as_ref().and_then(|j| parse_letter(j, &st.letters));

    match &judged {
        Some(letter) => {
            let author = st.letters[letter].clone();
            award(&mut st.scores, &author, ANSWER_POINTS);
            for (voter, vote) in &st.votes {
                if vote == letter {
                    award(&mut st.scores, voter, AGREE_POINTS);
                }
            }
        }
        None => {
            tracing::warn!("judgment unparseable, skipping scoring pass");
            if let Some(j) = judgment.clone() {
                core.quarantine([j]);
            }
        }
    }

    core.push_history(
        ctx.now_ms,
        serde_json::json!({
            "round": st.round,
            "question": st.current_question,
            "answers": st.answers,
            "letters": st.letters,
            "judged": judged,
            "votes": st.votes,
            "scores": st.scores,
        }),
    );

    machine::enter(&mut st.state, core, AjPhase::Score, ctx.now_ms);
}

/// Extracts the judged letter: the first character of the reply that
/// matches an assigned label, case-insensitively.
fn parse_letter(judgment: &GenerationRecord, letters: &BTreeMap<String, PlayerId>) -> Option<String> {
    if judgment.error.is_some() {
        return None;
    }
    let text = judgment.generation.as_str()?;
    text.chars()
        .map(|c| c.to_ascii_uppercase().to_string())
        .find(|c| letters.contains_key(c))
}

fn advance_round_or_finish(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx) {
    if st.round < core.definition.max_round {
        st.round += 1;
        start_round(core, st, ctx);
    } else {
        machine::enter(&mut st.state, core, AjPhase::Finish, ctx.now_ms);
    }
}

fn force_advance(core: &mut RoomCore, st: &mut State, ctx: &mut EngineCtx, effects: &mut Vec<Effect>) {
    if st.state.is_scoring() {
        advance_round_or_finish(core, st, ctx);
        return;
    }
    let Some(target) = machine::auto_advance_target(core, st.state) else {
        return;
    };
    match target {
        AjPhase::Question => start_round(core, st, ctx),
        AjPhase::Answer => pick_question(core, st, ctx),
        AjPhase::Vote => enter_vote(core, st, ctx, effects),
        AjPhase::Score => {
            // Timer ran out mid-vote. Score with whatever came in; a
            // still-pending judgment is abandoned to quarantine.
            let pending = st
                .judgment
                .as_ref()
                .is_some_and(|j| !j.fulfilled);
            if pending {
                if let Some(j) = st.judgment.take() {
                    core.quarantine([j]);
                }
            }
            score(core, st, ctx);
        }
        AjPhase::Lobby | AjPhase::Intro | AjPhase::Finish => {}
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::find_definition;
    use crate::engine::{GameMessage, GameState, init as engine_init, reduce as engine_reduce};
    use crate::room::Room;
    use parlor_protocol::TimerMode;

    fn pid(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    fn apply(room: Room, m: Msg, now: u64, seed: u64) -> (Room, Vec<Effect>) {
        let out = engine_reduce(room, &GameMessage::AiJudge(m), &mut EngineCtx::new(now, seed));
        (out.room, out.effects)
    }

    fn state(room: &Room) -> &State {
        match &room.game {
            GameState::AiJudge(s) => s,
            _ => panic!("wrong engine"),
        }
    }

    /// Three players through Lobby/Intro into the Question phase.
    fn room_in_question() -> Room {
        let def = find_definition("judge").unwrap();
        let params = CreationParams {
            creator: pid("a"),
            creator_handle: None,
            is_player: true,
            is_async: false,
            timer_mode: TimerMode::Normal,
        };
        let mut room = engine_init(&params, &def, &mut EngineCtx::new(0, 1));
        for p in ["b", "c"] {
            room = apply(
                room,
                Msg::NewPlayer {
                    sender: pid(p),
                    handle: None,
                    avatar: None,
                    is_player: true,
                },
                0,
                1,
            )
            .0;
        }
        room = apply(room, Msg::Start { sender: pid("a") }, 5, 1).0;
        assert_eq!(state(&room).state, AjPhase::Intro);
        for p in ["a", "b", "c"] {
            room = apply(room, Msg::ReadyToContinue { sender: pid(p) }, 10, 1).0;
        }
        assert_eq!(state(&room).state, AjPhase::Question);
        room
    }

    fn room_in_vote() -> (Room, Vec<Effect>) {
        let mut room = room_in_question();
        for p in ["a", "b", "c"] {
            room = apply(
                room,
                Msg::Question {
                    sender: pid(p),
                    value: format!("question from {p}"),
                },
                20,
                2,
            )
            .0;
        }
        assert_eq!(state(&room).state, AjPhase::Answer);
        let mut effects = Vec::new();
        for p in ["a", "b", "c"] {
            let (r, fx) = apply(
                room,
                Msg::Answer {
                    sender: pid(p),
                    value: format!("answer from {p}"),
                },
                30,
                3,
            );
            room = r;
            effects.extend(fx);
        }
        assert_eq!(state(&room).state, AjPhase::Vote);
        (room, effects)
    }

    #[test]
    fn test_vote_entry_letters_and_judgment_request() {
        let (room, effects) = room_in_vote();
        let st = state(&room);
        assert_eq!(st.letters.len(), 3);
        assert!(st.letters.contains_key("A"));
        assert!(st.letters.contains_key("C"));
        // One synthetic generation, keyed "engine".
        assert_eq!(effects.len(), 1);
        let Effect::Generate { key, record } = &effects[0];
        assert_eq!(key, ENGINE_KEY);
        assert!(record.prompt.contains("Candidate answers"));
        assert!(!record.fulfilled);
    }

    #[test]
    fn test_scoring_rewards_judged_author_and_agreeing_voters() {
        let (room, _) = room_in_vote();
        let judged_author = state(&room).letters["B"].clone();

        let mut room = room;
        for (p, letter) in [("a", "B"), ("b", "B"), ("c", "A")] {
            room = apply(
                room,
                Msg::Vote {
                    sender: pid(p),
                    value: letter.into(),
                },
                40,
                4,
            )
            .0;
        }
        // Votes are in but the judgment isn't: still waiting in Vote.
        assert_eq!(state(&room).state, AjPhase::Vote);

        let (room, _) = apply(
            room,
            Msg::GenerationResult {
                key: ENGINE_KEY.into(),
                generation: serde_json::json!("B"),
                error: None,
            },
            50,
            5,
        );
        let st = state(&room);
        assert_eq!(st.state, AjPhase::Score);
        // Author of B gets ANSWER_POINTS, plus AGREE_POINTS if they also
        // voted B themselves.
        let mut expected = ANSWER_POINTS;
        if ["a", "b"].iter().any(|p| pid(p) == judged_author) {
            expected += AGREE_POINTS;
        }
        assert_eq!(st.scores[&judged_author].current, expected);
    }

    #[test]
    fn test_unparseable_judgment_skips_scoring_and_quarantines() {
        let (room, _) = room_in_vote();
        let mut room = room;
        for (p, letter) in [("a", "A"), ("b", "B"), ("c", "C")] {
            room = apply(
                room,
                Msg::Vote {
                    sender: pid(p),
                    value: letter.into(),
                },
                40,
                4,
            )
            .0;
        }
        let (room, _) = apply(
            room,
            Msg::GenerationResult {
                key: ENGINE_KEY.into(),
                // No character matches an assigned label.
                generation: serde_json::json!("??? 42 ???"),
                error: None,
            },
            50,
            5,
        );
        let st = state(&room);
        assert_eq!(st.state, AjPhase::Score);
        // Scoring was skipped and the judgment quarantined.
        assert!(st.scores.values().all(|s| s.current == 0));
        assert_eq!(room.core.generation_errors.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_errored_judgment_is_quarantined() {
        let (room, _) = room_in_vote();
        let mut room = room;
        for (p, letter) in [("a", "A"), ("b", "B"), ("c", "C")] {
            room = apply(
                room,
                Msg::Vote {
                    sender: pid(p),
                    value: letter.into(),
                },
                40,
                4,
            )
            .0;
        }
        let (room, _) = apply(
            room,
            Msg::GenerationResult {
                key: ENGINE_KEY.into(),
                generation: serde_json::Value::Null,
                error: Some("model unavailable".into()),
            },
            50,
            5,
        );
        let st = state(&room);
        assert_eq!(st.state, AjPhase::Score);
        // Nobody scored.
        assert!(st.scores.values().all(|s| s.current == 0));
        assert_eq!(room.core.generation_errors.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_letter_vote_ignored() {
        let (room, _) = room_in_vote();
        let before = room.clone();
        let (room, _) = apply(
            room,
            Msg::Vote {
                sender: pid("a"),
                value: "Z".into(),
            },
            40,
            4,
        );
        assert_eq!(room, before);
    }
}
