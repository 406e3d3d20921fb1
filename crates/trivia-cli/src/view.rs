//! Line-oriented view: command parsing and the text printed for each
//! session change.

use trivia_client::session::{ConnectionState, Session};
use trivia_core::policy::{AnswerShape, WagerRule};
use trivia_core::protocol::{Answer, Question};

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Wager(u32),
    Answer(String),
    Part { id: String, text: String },
    /// Zero-based slot of a list answer.
    Item { index: usize, text: String },
    Submit,
    Ready,
    Scores,
    Games,
    Start,
    Toggle,
    Lobby,
    Quit,
    Help,
}

pub const HELP: &str = "\
commands:
  wager N          select a wager
  answer TEXT      select an answer (a choice letter works too; commas split list answers)
  part ID TEXT     fill one part of a multi-part question
  item N TEXT      fill slot N (1-based) of a list answer
  submit           send the selected wager and answer
  ready            signal ready during intermission
  scores           fetch the scoreboard
  games            list active games
  start            start the game
  toggle           switch the scoreboard view
  lobby            leave a finished game and forget it
  quit             exit, keeping the session for later";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_lowercase().as_str() {
        "wager" | "w" => Command::Wager(
            rest.parse()
                .map_err(|_| format!("usage: wager N (got {rest:?})"))?,
        ),
        "answer" | "a" => {
            if rest.is_empty() {
                return Err("usage: answer TEXT".to_string());
            }
            Command::Answer(rest.to_string())
        }
        "part" | "p" => match rest.split_once(char::is_whitespace) {
            Some((id, text)) => Command::Part {
                id: id.to_string(),
                text: text.trim().to_string(),
            },
            None => return Err("usage: part ID TEXT".to_string()),
        },
        "item" | "i" => {
            let (n, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            match n.parse::<usize>() {
                Ok(n) if n >= 1 => Command::Item {
                    index: n - 1,
                    text: text.trim().to_string(),
                },
                _ => return Err("usage: item N TEXT (N starts at 1)".to_string()),
            }
        }
        "submit" | "s" => Command::Submit,
        "ready" => Command::Ready,
        "scores" => Command::Scores,
        "games" => Command::Games,
        "start" => Command::Start,
        "toggle" => Command::Toggle,
        "lobby" => Command::Lobby,
        "quit" | "q" | "exit" => Command::Quit,
        "help" | "?" => Command::Help,
        other => return Err(format!("unknown command {other:?}; type help")),
    };
    Ok(Some(command))
}

/// Turn `answer TEXT` into the shape the current question expects.
///
/// A single letter picks that choice by position; list questions split on
/// commas.
pub fn answer_for(question: Option<&Question>, text: &str) -> Answer {
    let Some(question) = question else {
        return Answer::Text(text.to_string());
    };
    match question.kind.policy().answer {
        AnswerShape::FreeTextList { .. } => Answer::List(
            text.split(',')
                .map(|item| item.trim().to_string())
                .collect(),
        ),
        AnswerShape::SingleChoice => {
            let choices = question.options.choices();
            if choices.iter().any(|c| c == text) {
                return Answer::Text(text.to_string());
            }
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(letter), None) if letter.is_ascii_alphabetic() => {
                    let index = (letter.to_ascii_uppercase() as u8 - b'A') as usize;
                    match choices.get(index) {
                        Some(choice) => Answer::Text(choice.clone()),
                        None => Answer::Text(text.to_string()),
                    }
                }
                _ => Answer::Text(text.to_string()),
            }
        }
        _ => Answer::Text(text.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// One-line summary of the session.
pub fn status_line(session: &Session, show_scores: bool) -> String {
    let mut parts = vec![format!("[{}]", session.phase)];
    if let Some(game) = &session.game_id {
        parts.push(format!("game {game}"));
    }
    if session.phase.is_question_bearing()
        && let Some(q) = &session.question
    {
        parts.push(format!("R{} Q{} {}", q.round, q.question_number, q.kind.label()));
    }
    if session.phase.is_time_boxed() {
        parts.push(format!("{}s", session.time_left_secs));
    }
    if let Some(wager) = session.selected_wager {
        parts.push(format!("wager {wager}"));
    }
    if let Some(answer) = &session.selected_answer {
        parts.push(format!("answer {}", describe_answer(answer)));
    }
    parts.push(format!("score {}", session.score()));
    if show_scores {
        parts.push(format!(
            "{} teams, {} ready",
            session.teams.len(),
            session.ready_teams.len()
        ));
    }
    match session.connection {
        ConnectionState::Connected => {}
        ConnectionState::Reconnecting => parts.push("reconnecting".to_string()),
        ConnectionState::Disconnected => parts.push("offline".to_string()),
    }
    parts.join(" | ")
}

/// The question as first shown: prompt, options and what can be wagered.
pub fn question_block(session: &Session) -> Vec<String> {
    let Some(q) = &session.question else {
        return Vec::new();
    };
    let policy = q.kind.policy();
    let mut lines = vec![
        format!("== Round {} question {}: {} ==", q.round, q.question_number, q.kind.label()),
        q.text.to_string(),
    ];
    for (i, choice) in q.options.choices().iter().enumerate() {
        let letter = char::from(b'A' + (i % 26) as u8);
        lines.push(format!("  {letter}) {choice}"));
    }
    for part in q.options.parts() {
        lines.push(format!("  [{}] {}", part.id, part.prompt));
    }
    if let AnswerShape::FreeTextList { max } = policy.answer {
        lines.push(format!("Up to {max} answers (item N TEXT, or answer a, b, c)"));
    }
    match policy.wager {
        WagerRule::None => {}
        WagerRule::Choices { .. } => {
            let wagers = policy
                .available_wagers(&session.current_used_wagers())
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>();
            lines.push(format!("Wagers: {}", wagers.join(" ")));
        }
        WagerRule::Range { min, max, default } => {
            lines.push(format!("Wager {min}-{max} (default {default})"));
        }
    }
    if !policy.scoring.is_empty() {
        lines.push(format!("Scoring: {}", policy.scoring));
    }
    lines
}

/// The reveal text for the current question, if its answer is known.
pub fn reveal_text(session: &Session) -> Option<String> {
    let question = session.question.as_ref()?;
    let answer = session.revealed_answer.as_ref()?;
    let mut text = question.kind.policy().reveal_message(question, answer);
    if let Some(outcome) = session.results.get(&question.id) {
        let verdict = if outcome.is_correct { "correct" } else { "wrong" };
        text.push_str(&format!("\nYour answer was {verdict} ({:+} points)", outcome.points));
    }
    Some(text)
}

fn describe_answer(answer: &Answer) -> String {
    match answer {
        Answer::Text(text) => format!("{text:?}"),
        Answer::List(items) => format!("{} items", items.iter().filter(|i| !i.is_empty()).count()),
        Answer::Parts(parts) => format!("{} parts", parts.len()),
    }
}
