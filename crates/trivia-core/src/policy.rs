//! Per-kind question rules: wagers, answer shape, timing and reveal text.
//!
//! Every rule that depends on the question kind lives in [`Policy`], and
//! [`QuestionKind::policy`] is the only place a kind is mapped to its rules.
//! Adding a kind means adding a variant and one match arm there.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::codec::CanonicalText;
use crate::protocol::{Answer, Question, QuestionKind};

/// Wagers available on standard questions.
pub const STANDARD_WAGERS: &[u32] = &[1, 3, 5];

/// Upper bound of the final-question wager.
pub const FINAL_WAGER_MAX: u32 = 15;

/// Number of answer slots in the team bonus round.
pub const TEAM_BONUS_SLOTS: usize = 8;

/// How a question kind takes wagers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WagerRule {
    /// No wager is placed.
    None,
    /// One of a fixed set, optionally usable only once per round.
    Choices {
        values: &'static [u32],
        once_per_round: bool,
    },
    /// Any value in an inclusive range.
    Range { min: u32, max: u32, default: u32 },
}

/// The shape a valid answer takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerShape {
    /// Exactly one of the question's choices.
    SingleChoice,
    /// One free-text answer.
    FreeText,
    /// Up to `max` free-text answers; empty slots are dropped.
    FreeTextList { max: usize },
    /// One answer per sub-question; empty parts are dropped.
    PartsMap,
    /// The question takes no answer.
    NoAnswer,
}

/// Rules for one question kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub kind: QuestionKind,
    pub wager: WagerRule,
    pub answer: AnswerShape,
    /// Countdown length when the question carries no explicit limit.
    pub default_time_secs: u32,
    /// How points are awarded, for display.
    pub scoring: &'static str,
}

/// Local validation failure for a wager or answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("select a wager before submitting")]
    MissingWager,
    #[error("a wager of {0} is not allowed for this question")]
    InvalidWager(u32),
    #[error("the {0}-point wager was already used this round")]
    WagerUsed(u32),
    #[error("this question does not take a wager")]
    NoWagerExpected,
    #[error("select an answer before submitting")]
    MissingAnswer,
    #[error("{0:?} is not one of the choices")]
    UnknownChoice(String),
    #[error("enter at least one answer")]
    EmptyAnswer,
    #[error("at most {0} answers can be submitted")]
    TooManyAnswers(usize),
    #[error("there is no part {0:?} in this question")]
    UnknownPart(String),
    #[error("this answer does not fit a {0} question")]
    WrongShape(QuestionKind),
    #[error("this question does not take an answer")]
    NoAnswerExpected,
}

impl QuestionKind {
    /// The rules for this kind.
    pub const fn policy(self) -> Policy {
        match self {
            QuestionKind::Standard => Policy {
                kind: self,
                wager: WagerRule::Choices {
                    values: STANDARD_WAGERS,
                    once_per_round: true,
                },
                answer: AnswerShape::SingleChoice,
                default_time_secs: 150,
                scoring: "Win or lose your wager",
            },
            QuestionKind::SpeedBonus => Policy {
                kind: self,
                wager: WagerRule::None,
                answer: AnswerShape::SingleChoice,
                default_time_secs: 30,
                scoring: "First correct team +5, second +3, every other correct team +1; no penalty",
            },
            QuestionKind::TeamBonus => Policy {
                kind: self,
                wager: WagerRule::None,
                answer: AnswerShape::FreeTextList {
                    max: TEAM_BONUS_SLOTS,
                },
                default_time_secs: 300,
                scoring: "+1 per correct answer, +1 bonus for all 8",
            },
            QuestionKind::MultiPart => Policy {
                kind: self,
                wager: WagerRule::None,
                answer: AnswerShape::PartsMap,
                default_time_secs: 300,
                scoring: "+1 per correct part",
            },
            QuestionKind::FinalWager => Policy {
                kind: self,
                wager: WagerRule::Range {
                    min: 1,
                    max: FINAL_WAGER_MAX,
                    default: FINAL_WAGER_MAX,
                },
                answer: AnswerShape::FreeText,
                default_time_secs: 150,
                scoring: "Win or lose your wager (up to 15)",
            },
            QuestionKind::Intermission => Policy {
                kind: self,
                wager: WagerRule::None,
                answer: AnswerShape::NoAnswer,
                default_time_secs: 600,
                scoring: "",
            },
        }
    }
}

impl Policy {
    pub fn requires_wager(&self) -> bool {
        !matches!(self.wager, WagerRule::None)
    }

    pub fn takes_answer(&self) -> bool {
        !matches!(self.answer, AnswerShape::NoAnswer)
    }

    /// Countdown for `question`: its own limit if given, else the kind default.
    pub fn time_limit(&self, question: &Question) -> u32 {
        question
            .time_limit_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(self.default_time_secs)
    }

    /// Wagers still available given those already spent this round.
    pub fn available_wagers(&self, used: &BTreeSet<u32>) -> Vec<u32> {
        match self.wager {
            WagerRule::None => Vec::new(),
            WagerRule::Choices {
                values,
                once_per_round,
            } => values
                .iter()
                .copied()
                .filter(|w| !once_per_round || !used.contains(w))
                .collect(),
            WagerRule::Range { min, max, .. } => (min..=max).collect(),
        }
    }

    /// Wager placed automatically when time runs out without one.
    ///
    /// Standard questions fall back to the smallest wager still available
    /// (1 at the start of a round).
    pub fn default_wager(&self, used: &BTreeSet<u32>) -> Option<u32> {
        match self.wager {
            WagerRule::None => None,
            WagerRule::Choices { values, .. } => self
                .available_wagers(used)
                .into_iter()
                .min()
                .or_else(|| values.iter().copied().min()),
            WagerRule::Range { default, .. } => Some(default),
        }
    }

    /// Check a wager before it is selected or submitted.
    pub fn check_wager(&self, wager: u32, used: &BTreeSet<u32>) -> Result<u32, InputError> {
        match self.wager {
            WagerRule::None => Err(InputError::NoWagerExpected),
            WagerRule::Choices {
                values,
                once_per_round,
            } => {
                if !values.contains(&wager) {
                    Err(InputError::InvalidWager(wager))
                } else if once_per_round && used.contains(&wager) {
                    Err(InputError::WagerUsed(wager))
                } else {
                    Ok(wager)
                }
            }
            WagerRule::Range { min, max, .. } => {
                if (min..=max).contains(&wager) {
                    Ok(wager)
                } else {
                    Err(InputError::InvalidWager(wager))
                }
            }
        }
    }

    /// The wager to send with a submission.
    pub fn submission_wager(
        &self,
        selected: Option<u32>,
        used: &BTreeSet<u32>,
    ) -> Result<Option<u32>, InputError> {
        match (self.requires_wager(), selected) {
            (false, _) => Ok(None),
            (true, None) => Err(InputError::MissingWager),
            (true, Some(w)) => self.check_wager(w, used).map(Some),
        }
    }

    /// Validate a draft answer and reduce it to what is actually sent:
    /// trimmed, with empty slots and parts removed.
    pub fn prepare_answer(
        &self,
        question: &Question,
        draft: Option<&Answer>,
    ) -> Result<Answer, InputError> {
        if !self.takes_answer() {
            return Err(InputError::NoAnswerExpected);
        }
        let draft = draft.ok_or(InputError::MissingAnswer)?;

        match (self.answer, draft) {
            (AnswerShape::SingleChoice, Answer::Text(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(InputError::MissingAnswer);
                }
                let choices = question.options.choices();
                if !choices.is_empty() && !choices.iter().any(|c| c == text) {
                    return Err(InputError::UnknownChoice(text.to_string()));
                }
                Ok(Answer::Text(text.to_string()))
            }
            (AnswerShape::FreeText, Answer::Text(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    Err(InputError::MissingAnswer)
                } else {
                    Ok(Answer::Text(text.to_string()))
                }
            }
            (AnswerShape::FreeTextList { max }, Answer::List(items)) => {
                let items: Vec<String> = items
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if items.is_empty() {
                    Err(InputError::EmptyAnswer)
                } else if items.len() > max {
                    Err(InputError::TooManyAnswers(max))
                } else {
                    Ok(Answer::List(items))
                }
            }
            (AnswerShape::FreeTextList { .. }, Answer::Text(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    Err(InputError::EmptyAnswer)
                } else {
                    Ok(Answer::List(vec![text.to_string()]))
                }
            }
            (AnswerShape::PartsMap, Answer::Parts(parts)) => {
                let known = question.options.parts();
                let mut cleaned = BTreeMap::new();
                for (id, text) in parts {
                    if !known.is_empty() && !known.iter().any(|p| &p.id == id) {
                        return Err(InputError::UnknownPart(id.clone()));
                    }
                    let text = text.trim();
                    if !text.is_empty() {
                        cleaned.insert(id.clone(), text.to_string());
                    }
                }
                if cleaned.is_empty() {
                    Err(InputError::EmptyAnswer)
                } else {
                    Ok(Answer::Parts(cleaned))
                }
            }
            _ => Err(InputError::WrongShape(self.kind)),
        }
    }

    /// Message shown when the answer to `question` is revealed.
    pub fn reveal_message(&self, question: &Question, answer: &CanonicalText) -> String {
        match self.answer {
            AnswerShape::SingleChoice | AnswerShape::FreeText => format!(
                "The correct answer for round {} question {} is: {}",
                question.round, question.question_number, answer
            ),
            AnswerShape::FreeTextList { .. } => {
                format!("Accepted answers: {}", answer.items().join(", "))
            }
            AnswerShape::PartsMap => {
                let parts = question.options.parts();
                answer
                    .items()
                    .iter()
                    .enumerate()
                    .map(|(i, a)| match parts.get(i) {
                        Some(part) => format!("{}. {}: {}", i + 1, part.prompt, a),
                        None => format!("{}. {}", i + 1, a),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            AnswerShape::NoAnswer => "Intermission is over".to_string(),
        }
    }
}

/// Guess a kind from numbering, for authorities that do not tag kinds yet.
///
/// Only used when legacy inference is enabled in configuration: question 25
/// is the final wager, round 5 is the fill-in-the-blank round, everything
/// else is standard.
pub fn infer_legacy_kind(round: u32, question_number: u32) -> QuestionKind {
    match (round, question_number) {
        (_, 25) => QuestionKind::FinalWager,
        (5, _) => QuestionKind::MultiPart,
        _ => QuestionKind::Standard,
    }
}
