//! Payload normalization.
//!
//! The authority is loose about how it encodes question text, choice lists
//! and revealed answers: the same field may arrive as a plain string, a JSON
//! array, a JSON-encoded string (sometimes encoded twice), or a brace list
//! such as `{Paris,"Rome, Italy"}`. Everything inbound passes through this
//! module once, at the boundary, so the rest of the client only ever sees
//! [`CanonicalText`] and [`Options`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::policy::infer_legacy_kind;
use crate::protocol::{Question, QuestionKind, RawQuestion};

/// Nesting limit for JSON-inside-a-string decoding.
const MAX_DEPTH: u8 = 4;

/// Canonical form of a loosely-typed text payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalText {
    Single(String),
    List(Vec<String>),
}

impl CanonicalText {
    pub fn is_empty(&self) -> bool {
        match self {
            CanonicalText::Single(s) => s.is_empty(),
            CanonicalText::List(items) => items.iter().all(String::is_empty),
        }
    }

    /// All values in order; a single value yields a one-element list.
    pub fn items(&self) -> Vec<&str> {
        match self {
            CanonicalText::Single(s) => vec![s.as_str()],
            CanonicalText::List(items) => items.iter().map(String::as_str).collect(),
        }
    }

    fn into_items(self) -> Vec<String> {
        match self {
            CanonicalText::Single(s) if s.is_empty() => Vec::new(),
            CanonicalText::Single(s) => vec![s],
            CanonicalText::List(items) => items,
        }
    }
}

impl Default for CanonicalText {
    fn default() -> Self {
        CanonicalText::Single(String::new())
    }
}

impl fmt::Display for CanonicalText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalText::Single(s) => f.write_str(s),
            CanonicalText::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// One prompt of a multi-part question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: String,
    pub prompt: String,
}

/// Canonical form of a question's options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Options {
    #[default]
    None,
    /// A flat list of choices.
    Choices(Vec<String>),
    /// Sub-question prompts keyed by id, in id order.
    Parts(Vec<SubQuestion>),
}

impl Options {
    pub fn choices(&self) -> &[String] {
        match self {
            Options::Choices(choices) => choices,
            _ => &[],
        }
    }

    pub fn parts(&self) -> &[SubQuestion] {
        match self {
            Options::Parts(parts) => parts,
            _ => &[],
        }
    }
}

/// Why a raw question could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("question has no id")]
    MissingId,
    #[error("question {0} has no kind tag")]
    MissingKind(u64),
    #[error("question {id} has unknown kind {kind:?}")]
    UnknownKind { id: u64, kind: String },
}

/// Normalize any JSON payload into canonical text. Never fails.
pub fn normalize(raw: &Value) -> CanonicalText {
    normalize_value(raw, 0)
}

/// Normalize a raw string payload into canonical text. Never fails.
pub fn normalize_str(raw: &str) -> CanonicalText {
    normalize_text(raw, 0)
}

/// Normalize a question's options into a choice list or a sub-question map.
pub fn normalize_options(raw: &Value) -> Options {
    match raw {
        Value::Null => Options::None,
        Value::Object(map) => parts_from_map(map),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('{')
                && let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed)
            {
                return parts_from_map(&map);
            }
            choices_from(normalize_text(s, 0))
        }
        other => choices_from(normalize_value(other, 0)),
    }
}

/// Decode a raw question into its canonical form.
///
/// A missing kind tag is an error unless `legacy_kind_inference` is set, in
/// which case the kind is guessed from the round and question number.
pub fn decode_question(
    raw: &RawQuestion,
    legacy_kind_inference: bool,
) -> Result<Question, DecodeError> {
    let id = raw.id.ok_or(DecodeError::MissingId)?;
    let round = raw.round.unwrap_or(0);
    let question_number = raw.question_number.unwrap_or(0);

    let kind = match raw.kind.as_deref().map(str::trim) {
        Some(tag) if !tag.is_empty() => {
            tag.parse::<QuestionKind>()
                .map_err(|unknown| DecodeError::UnknownKind {
                    id,
                    kind: unknown.0,
                })?
        }
        _ if legacy_kind_inference => infer_legacy_kind(round, question_number),
        _ => return Err(DecodeError::MissingKind(id)),
    };

    Ok(Question {
        id,
        round,
        question_number,
        kind,
        text: normalize(&raw.text),
        options: normalize_options(&raw.options),
        time_limit_secs: raw.time_limit_secs,
    })
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn normalize_value(raw: &Value, depth: u8) -> CanonicalText {
    match raw {
        Value::Null => CanonicalText::default(),
        Value::Bool(b) => CanonicalText::Single(b.to_string()),
        Value::Number(n) => CanonicalText::Single(n.to_string()),
        Value::String(s) => normalize_text(s, depth),
        Value::Array(items) => CanonicalText::List(
            items
                .iter()
                .flat_map(|item| normalize_value(item, depth).into_items())
                .collect(),
        ),
        Value::Object(map) => match map.get("text") {
            Some(text) => normalize_value(text, depth),
            None => CanonicalText::List(
                ordered_entries(map)
                    .into_iter()
                    .flat_map(|(_, v)| normalize_value(v, depth).into_items())
                    .collect(),
            ),
        },
    }
}

fn normalize_text(raw: &str, depth: u8) -> CanonicalText {
    let trimmed = raw.trim();

    if depth < MAX_DEPTH
        && (trimmed.starts_with('[') || trimmed.starts_with('"') || trimmed.starts_with('{'))
        && let Ok(value) = serde_json::from_str::<Value>(trimmed)
    {
        return normalize_value(&value, depth + 1);
    }

    if let Some(inner) = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
    {
        return CanonicalText::List(split_brace_list(inner));
    }

    CanonicalText::Single(strip_quotes(trimmed).to_string())
}

/// Split the body of a `{a,"b, c",d}` list, honouring double quotes and
/// backslash escapes inside them. Empty items are dropped.
fn split_brace_list(body: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if quoted => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => quoted = !quoted,
            ',' if !quoted => {
                push_item(&mut items, &current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    push_item(&mut items, &current);
    items
}

fn push_item(items: &mut Vec<String>, raw: &str) {
    let item = strip_quotes(raw.trim());
    if !item.is_empty() {
        items.push(item.to_string());
    }
}

fn strip_quotes(mut s: &str) -> &str {
    loop {
        let stripped = ['"', '\'']
            .iter()
            .find_map(|q| s.strip_prefix(*q).and_then(|rest| rest.strip_suffix(*q)));
        match stripped {
            Some(inner) if s.len() >= 2 => s = inner.trim(),
            _ => return s,
        }
    }
}

/// Object entries with numeric keys sorted numerically, then the rest.
fn ordered_entries(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|(a, _), (b, _)| {
        let key = |k: &str| (k.trim().parse::<u64>().map_or(1, |_| 0), k.trim().parse::<u64>().ok());
        key(a).cmp(&key(b)).then_with(|| a.cmp(b))
    });
    entries
}

fn parts_from_map(map: &Map<String, Value>) -> Options {
    if map.is_empty() {
        return Options::None;
    }
    Options::Parts(
        ordered_entries(map)
            .into_iter()
            .map(|(id, prompt)| SubQuestion {
                id: id.trim().to_string(),
                prompt: normalize(prompt).to_string(),
            })
            .collect(),
    )
}

fn choices_from(text: CanonicalText) -> Options {
    let items = text.into_items();
    if items.is_empty() {
        Options::None
    } else {
        Options::Choices(items)
    }
}
