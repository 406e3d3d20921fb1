use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::codec::{CanonicalText, Options};

/// Identifier the authority assigns to each question.
pub type QuestionId = u64;

/// Identifier of a participating team (taken from the team's credential).
pub type TeamId = u32;

/// Opaque game identifier handed out by the game service on join.
pub type GameId = String;

/// The kind of a question, as tagged by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionKind {
    Standard,
    SpeedBonus,
    TeamBonus,
    MultiPart,
    FinalWager,
    Intermission,
}

impl QuestionKind {
    pub const ALL: [QuestionKind; 6] = [
        QuestionKind::Standard,
        QuestionKind::SpeedBonus,
        QuestionKind::TeamBonus,
        QuestionKind::MultiPart,
        QuestionKind::FinalWager,
        QuestionKind::Intermission,
    ];

    /// Wire tag, e.g. `"speed-bonus"`.
    pub fn tag(self) -> &'static str {
        match self {
            QuestionKind::Standard => "standard",
            QuestionKind::SpeedBonus => "speed-bonus",
            QuestionKind::TeamBonus => "team-bonus",
            QuestionKind::MultiPart => "multi-part",
            QuestionKind::FinalWager => "final-wager",
            QuestionKind::Intermission => "intermission",
        }
    }

    /// Human-readable label for UI display.
    pub fn label(self) -> &'static str {
        match self {
            QuestionKind::Standard => "Question",
            QuestionKind::SpeedBonus => "Speed Bonus",
            QuestionKind::TeamBonus => "Team Bonus",
            QuestionKind::MultiPart => "Fill-in-the-Blank",
            QuestionKind::FinalWager => "Final Wager",
            QuestionKind::Intermission => "Intermission",
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Returned when a kind tag does not name one of the known variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl FromStr for QuestionKind {
    type Err = UnknownKind;

    /// Accepts the kebab-case tag as well as snake_case and camelCase
    /// spellings of it; nothing else.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        QuestionKind::ALL
            .into_iter()
            .find(|kind| kind.tag().replace('-', "") == folded)
            .ok_or_else(|| UnknownKind(s.trim().to_string()))
    }
}

/// A question exactly as the authority sent it.
///
/// Text and options are loosely typed on the wire (plain strings, arrays,
/// brace lists, JSON-encoded strings); [`crate::codec::decode_question`]
/// turns this into a [`Question`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawQuestion {
    #[serde(deserialize_with = "loose_id_opt")]
    pub id: Option<QuestionId>,
    pub round: Option<u32>,
    #[serde(alias = "questionNumber")]
    pub question_number: Option<u32>,
    #[serde(alias = "type")]
    pub kind: Option<String>,
    pub text: Value,
    pub options: Value,
    #[serde(alias = "timeLimit")]
    pub time_limit_secs: Option<u32>,
}

/// A decoded question. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub round: u32,
    pub question_number: u32,
    pub kind: QuestionKind,
    pub text: CanonicalText,
    pub options: Options,
    pub time_limit_secs: Option<u32>,
}

/// A team's answer, in the shape its question kind expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    /// A single choice or a free-text answer.
    Text(String),
    /// An ordered list of free-text answers.
    List(Vec<String>),
    /// Sub-question id → answer.
    Parts(BTreeMap<String, String>),
}

/// Coarse game status reported by the authority on resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameStatus {
    Waiting,
    Question,
    Reveal,
    Intermission,
    Ended,
    #[serde(other)]
    Unknown,
}

/// Machine-readable reason attached to a [`ServerEvent::ChannelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AlreadyJoined,
    AlreadyAnswered,
    Unauthorized,
    #[serde(other)]
    Other,
}

/// Events pushed from the authority to a team client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The game has started.
    GameStarted,

    /// A team joined the game.
    TeamJoined { team_id: TeamId },

    /// A new question is open for answers.
    Question { question: RawQuestion },

    /// Scoring outcome for one team's submission.
    AnswerResult {
        team_id: TeamId,
        #[serde(default, deserialize_with = "loose_id_opt")]
        question_id: Option<QuestionId>,
        is_correct: bool,
        #[serde(default)]
        points: i32,
    },

    /// The correct answer for a question. Terminal for that question.
    Reveal {
        #[serde(deserialize_with = "loose_id")]
        question_id: QuestionId,
        #[serde(default)]
        correct_answer: Value,
    },

    /// Authoritative snapshot, sent in response to a resync request.
    GameState {
        status: GameStatus,
        #[serde(default)]
        question: Option<RawQuestion>,
        #[serde(default)]
        time_left_secs: Option<u32>,
        #[serde(default)]
        answered_question_ids: Vec<QuestionId>,
        #[serde(default)]
        correct_answer: Option<Value>,
    },

    /// The game is over.
    GameEnded,

    /// The authority closed the intermission.
    IntermissionExpired,

    /// A team signalled it is ready to continue.
    TeamReady { team_id: TeamId },

    /// The authority rejected something this client did.
    ChannelError {
        message: String,
        #[serde(default)]
        code: Option<ErrorCode>,
    },
}

impl ServerEvent {
    /// Wire tag of this event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::GameStarted => "GameStarted",
            ServerEvent::TeamJoined { .. } => "TeamJoined",
            ServerEvent::Question { .. } => "Question",
            ServerEvent::AnswerResult { .. } => "AnswerResult",
            ServerEvent::Reveal { .. } => "Reveal",
            ServerEvent::GameState { .. } => "GameState",
            ServerEvent::GameEnded => "GameEnded",
            ServerEvent::IntermissionExpired => "IntermissionExpired",
            ServerEvent::TeamReady { .. } => "TeamReady",
            ServerEvent::ChannelError { .. } => "ChannelError",
        }
    }
}

/// Invocations sent from a team client to the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    /// Join (or re-join) the game's event group.
    Join { game_id: GameId, team_id: TeamId },

    /// Commit a wager without an answer (used when time runs out).
    SubmitWager {
        game_id: GameId,
        team_id: TeamId,
        wager: u32,
        question_id: QuestionId,
    },

    /// Submit this team's answer.
    SubmitAnswer {
        game_id: GameId,
        team_id: TeamId,
        question_id: QuestionId,
        answer: Answer,
        wager: Option<u32>,
    },

    /// Ready for the next question.
    SignalReady { game_id: GameId, team_id: TeamId },

    /// Ask for a [`ServerEvent::GameState`] snapshot.
    RequestResync { game_id: GameId, team_id: TeamId },

    /// The local countdown for a question or intermission reached zero.
    NotifyTimerExpired {
        game_id: GameId,
        question_id: QuestionId,
    },
}

// ---------------------------------------------------------------------------
// Loose id decoding
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseId {
    Number(u64),
    Text(String),
}

impl LooseId {
    fn into_id<E: serde::de::Error>(self) -> Result<QuestionId, E> {
        match self {
            LooseId::Number(n) => Ok(n),
            LooseId::Text(s) => s
                .trim()
                .trim_matches('"')
                .parse()
                .map_err(|_| E::custom(format!("invalid question id {s:?}"))),
        }
    }
}

/// Ids arrive as numbers or as numeric strings.
fn loose_id<'de, D: Deserializer<'de>>(de: D) -> Result<QuestionId, D::Error> {
    LooseId::deserialize(de)?.into_id()
}

fn loose_id_opt<'de, D: Deserializer<'de>>(de: D) -> Result<Option<QuestionId>, D::Error> {
    match Option::<LooseId>::deserialize(de)? {
        Some(id) => id.into_id().map(Some),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Game ID validation
// ---------------------------------------------------------------------------

/// Validate a game ID.
///
/// Game IDs must be non-empty, fewer than 40 characters, and made of ASCII
/// letters, digits and dashes.
pub fn validate_game_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("Game ID cannot be empty".to_string());
    }
    if id.len() >= 40 {
        return Err("Game ID must be fewer than 40 characters".to_string());
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("Game ID may only contain letters, digits and dashes".to_string());
    }
    Ok(())
}
