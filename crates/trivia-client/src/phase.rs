//! The session's phase state machine.
//!
//! [`transition`] is the table of legal phase changes for live events and
//! user actions. Only a resync snapshot from the authority may move the phase
//! outside it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the session currently is in the game flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Not in a game.
    #[default]
    Idle,
    /// Joined, no question open yet.
    Waiting,
    /// A question is open for input.
    Question,
    /// Our input is in (or time ran out); waiting for the reveal.
    AwaitingOthers,
    /// The correct answer is shown.
    Reveal,
    /// Timed break between rounds.
    Intermission,
    /// The game is over.
    Ended,
}

impl Phase {
    /// Phases in which `Session::question` must be set.
    pub fn is_question_bearing(self) -> bool {
        matches!(self, Phase::Question | Phase::AwaitingOthers | Phase::Reveal)
    }

    /// Phases with a running countdown.
    pub fn is_time_boxed(self) -> bool {
        matches!(self, Phase::Question | Phase::Intermission)
    }

    /// Whether `action` is accepted in this phase.
    pub fn allows(self, action: ActionKind) -> bool {
        match action {
            ActionKind::Join => matches!(self, Phase::Idle | Phase::Ended),
            ActionKind::Input | ActionKind::Submit => self == Phase::Question,
            ActionKind::SignalReady => matches!(self, Phase::Reveal | Phase::Intermission),
            ActionKind::ReturnToLobby => self == Phase::Ended,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Waiting => "waiting",
            Phase::Question => "question",
            Phase::AwaitingOthers => "awaiting-others",
            Phase::Reveal => "reveal",
            Phase::Intermission => "intermission",
            Phase::Ended => "ended",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// User action classes, for phase gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Join,
    /// Selecting a wager or editing an answer.
    Input,
    Submit,
    SignalReady,
    ReturnToLobby,
}

impl ActionKind {
    pub fn verb(self) -> &'static str {
        match self {
            ActionKind::Join => "join a game",
            ActionKind::Input => "change the answer",
            ActionKind::Submit => "submit",
            ActionKind::SignalReady => "signal ready",
            ActionKind::ReturnToLobby => "return to the lobby",
        }
    }
}

/// Something that may move the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Join,
    GameStarted,
    /// A new question id arrived; `intermission` when its kind is intermission.
    NewQuestion { intermission: bool },
    TimerExpired,
    Submitted,
    AnswerResult,
    /// A reveal for the current, not yet revealed question.
    Reveal,
    SignalReady,
    IntermissionExpired,
    GameEnded,
    ReturnToLobby,
}

/// The phase after `trigger` fires in `from`, or `None` if the trigger does
/// not apply there.
///
/// `GameStarted` never leaves `waiting` on its own: a question phase needs a
/// question, which only a `Question` event provides.
pub fn transition(from: Phase, trigger: Trigger) -> Option<Phase> {
    use Phase::*;
    match (from, trigger) {
        (Idle | Ended, Trigger::Join) => Some(Waiting),
        (Idle | Waiting, Trigger::GameStarted) => Some(Waiting),

        (
            Waiting | Question | AwaitingOthers | Reveal | Intermission,
            Trigger::NewQuestion { intermission },
        ) => Some(if intermission { Intermission } else { Question }),

        (Question, Trigger::TimerExpired) => Some(AwaitingOthers),
        (Question, Trigger::Submitted) => Some(AwaitingOthers),
        (AwaitingOthers, Trigger::AnswerResult) => Some(AwaitingOthers),
        (Question | AwaitingOthers, Trigger::Reveal) => Some(Reveal),

        (Reveal, Trigger::SignalReady) => Some(Reveal),
        (Intermission, Trigger::SignalReady) => Some(Intermission),
        (Intermission, Trigger::TimerExpired | Trigger::IntermissionExpired) => Some(Intermission),

        (Idle, Trigger::GameEnded) => None,
        (_, Trigger::GameEnded) => Some(Ended),
        (Ended, Trigger::ReturnToLobby) => Some(Idle),

        _ => None,
    }
}
