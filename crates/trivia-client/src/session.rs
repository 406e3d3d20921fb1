//! Session state and its persistence.
//!
//! [`Session`] is the single record of everything the client knows about its
//! game. It is serialized whole into a [`Snapshot`] after every change so a
//! restarted client can pick up where it left off.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;
use trivia_core::codec::CanonicalText;
use trivia_core::protocol::{Answer, ClientCommand, GameId, Question, QuestionId, TeamId};

use crate::error::StoreError;
use crate::phase::Phase;

/// Link state of the push channel. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    #[default]
    Disconnected,
}

/// Scoring outcome the authority reported for our submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub points: i32,
}

/// A submission sent but not yet acknowledged, kept for re-send after a
/// reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub question_id: QuestionId,
    pub command: ClientCommand,
}

/// One team's membership in one game.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub game_id: Option<GameId>,
    pub team_id: TeamId,
    pub phase: Phase,
    pub question: Option<Question>,
    pub selected_wager: Option<u32>,
    pub selected_answer: Option<Answer>,
    pub revealed_answer: Option<CanonicalText>,
    pub time_left_secs: u32,
    /// Questions resolved for input; never presented for input again.
    pub answered_question_ids: BTreeSet<QuestionId>,
    pub revealed_question_ids: BTreeSet<QuestionId>,
    pub pending_submission: Option<PendingSubmission>,
    pub results: BTreeMap<QuestionId, AnswerOutcome>,
    /// Round number → wagers spent in it.
    pub used_wagers: BTreeMap<u32, BTreeSet<u32>>,
    pub self_ready: bool,
    pub ready_teams: BTreeSet<TeamId>,
    pub teams: BTreeSet<TeamId>,
    pub game_started: bool,
    #[serde(skip)]
    pub connection: ConnectionState,
    pub last_notice: Option<String>,
    /// Operator-facing errors, such as questions of an unknown kind.
    pub alerts: Vec<String>,
}

impl Session {
    pub fn new(team_id: TeamId) -> Self {
        Self {
            team_id,
            ..Self::default()
        }
    }

    /// Wagers already spent in `round`.
    pub fn wagers_used_in(&self, round: u32) -> BTreeSet<u32> {
        self.used_wagers.get(&round).cloned().unwrap_or_default()
    }

    /// Wagers spent in the current question's round.
    pub fn current_used_wagers(&self) -> BTreeSet<u32> {
        self.question
            .as_ref()
            .map(|q| self.wagers_used_in(q.round))
            .unwrap_or_default()
    }

    pub fn current_question_id(&self) -> Option<QuestionId> {
        self.question.as_ref().map(|q| q.id)
    }

    /// Total points from recorded results.
    pub fn score(&self) -> i32 {
        self.results.values().map(|r| r.points).sum()
    }

    /// Forget the game but keep the team.
    pub fn reset(&mut self) {
        *self = Session::new(self.team_id);
    }
}

/// Which parts of the session an input changed.
///
/// Front ends use these to decide what to redraw. All flags default to
/// `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateChanged {
    pub phase: bool,
    /// A different question is current.
    pub question: bool,
    /// Selected wager or answer changed.
    pub input: bool,
    pub timer: bool,
    pub reveal: bool,
    pub connection: bool,
    /// Teams joined or signalled ready.
    pub roster: bool,
    pub results: bool,
    /// `last_notice` or `alerts` changed.
    pub notice: bool,
}

impl StateChanged {
    /// Returns `true` if any flag is set.
    pub fn any(self) -> bool {
        self.phase
            || self.question
            || self.input
            || self.timer
            || self.reveal
            || self.connection
            || self.roster
            || self.results
            || self.notice
    }

    /// Union of two change sets.
    pub fn merge(self, other: StateChanged) -> StateChanged {
        StateChanged {
            phase: self.phase || other.phase,
            question: self.question || other.question,
            input: self.input || other.input,
            timer: self.timer || other.timer,
            reveal: self.reveal || other.reveal,
            connection: self.connection || other.connection,
            roster: self.roster || other.roster,
            results: self.results || other.results,
            notice: self.notice || other.notice,
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// What is written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session: Session,
    /// Unix seconds at save time.
    pub saved_at: u64,
    /// Scoreboard view toggle.
    #[serde(default)]
    pub show_scores: bool,
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Abstraction over snapshot storage so the controller stays
/// platform-agnostic.
pub trait SessionStore {
    /// Persist the snapshot, replacing any previous one.
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
    /// Load the saved snapshot, if any.
    fn load(&self) -> Result<Option<Snapshot>, StoreError>;
    /// Remove the saved snapshot.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Stores the snapshot as a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec(snapshot)?;
        let tmp = self.temp_path();
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "session saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw JSON last saved, if any.
    pub fn raw(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(json);
        }
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        match self.raw() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}
