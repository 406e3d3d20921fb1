//! The single mutation gateway for a [`Session`].
//!
//! Server events, timer ticks, user actions and channel transitions all enter
//! through [`Synchronizer::apply`]. Each input is checked against the facts
//! already recorded (answered, revealed and scored question ids) before it
//! may change anything, so duplicated, late or reordered deliveries are
//! harmless. The result says what changed, which commands to send and what
//! the countdown should do next; performing those effects is the caller's
//! job.

use tracing::{debug, error, info, warn};
use trivia_core::codec::{self, DecodeError};
use trivia_core::policy::{AnswerShape, InputError, WagerRule};
use trivia_core::protocol::{
    Answer, ClientCommand, ErrorCode, GameId, GameStatus, Question, QuestionId, QuestionKind,
    RawQuestion, ServerEvent, TeamId, validate_game_id,
};

use crate::error::SubmitError;
use crate::phase::{ActionKind, Phase, Trigger, transition};
use crate::session::{AnswerOutcome, ConnectionState, PendingSubmission, Session, StateChanged};

/// Anything that can change the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Server(ServerEvent),
    /// One second of countdown elapsed.
    Tick,
    User(UserAction),
    /// The push channel is up. `resumed` is set after a reconnect.
    ChannelOpened { resumed: bool },
    /// The push channel dropped and a retry is scheduled.
    ChannelReconnecting,
    /// The push channel is down with no retry pending.
    ChannelDown,
}

/// Something the participant did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Join { game_id: GameId },
    SelectWager(u32),
    SelectAnswer(Answer),
    /// Fill one sub-question of a multi-part question.
    SetPart { id: String, text: String },
    /// Fill one slot (zero-based) of a list answer.
    SetItem { index: usize, text: String },
    Submit,
    SignalReady,
    ReturnToLobby,
}

impl UserAction {
    fn kind(&self) -> ActionKind {
        match self {
            UserAction::Join { .. } => ActionKind::Join,
            UserAction::SelectWager(_)
            | UserAction::SelectAnswer(_)
            | UserAction::SetPart { .. }
            | UserAction::SetItem { .. } => ActionKind::Input,
            UserAction::Submit => ActionKind::Submit,
            UserAction::SignalReady => ActionKind::SignalReady,
            UserAction::ReturnToLobby => ActionKind::ReturnToLobby,
        }
    }
}

/// What the countdown should do after an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerDirective {
    #[default]
    Keep,
    /// (Re)start ticking from the session's `time_left_secs`.
    Start,
    Stop,
}

/// Why the session is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The participant went back to the lobby.
    Left,
    /// The authority no longer accepts our credentials.
    Expired,
}

/// Effects of one [`Synchronizer::apply`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub changed: StateChanged,
    /// Commands to send, in order.
    pub commands: Vec<ClientCommand>,
    pub timer: TimerDirective,
    pub end: Option<SessionEnd>,
    /// Set when a user action was refused; nothing was sent.
    pub rejected: Option<SubmitError>,
}

/// Owns a [`Session`] and applies inputs to it.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    session: Session,
    legacy_kind_inference: bool,
    /// Rehydrated from a snapshot and not yet resynced.
    restored: bool,
}

impl Synchronizer {
    pub fn new(team_id: TeamId, legacy_kind_inference: bool) -> Self {
        Self {
            session: Session::new(team_id),
            legacy_kind_inference,
            restored: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Adopt a rehydrated session. The next channel open asks for a resync.
    pub fn restore(&mut self, mut session: Session) {
        session.connection = ConnectionState::Disconnected;
        session.team_id = self.session.team_id;
        self.restored = session.game_id.is_some();
        self.session = session;
    }

    /// Forget the game, keeping the team.
    pub fn reset(&mut self) {
        self.session.reset();
        self.restored = false;
    }

    /// Account for `elapsed_secs` that passed while the session was saved.
    ///
    /// Runs the expiry action if the countdown ran out in the meantime.
    pub fn resume(&mut self, elapsed_secs: u64) -> Applied {
        let mut out = Applied::default();
        if !self.session.phase.is_time_boxed() || self.session.time_left_secs == 0 {
            return out;
        }
        let elapsed = u32::try_from(elapsed_secs).unwrap_or(u32::MAX);
        self.session.time_left_secs = self.session.time_left_secs.saturating_sub(elapsed);
        out.changed.timer = elapsed > 0;
        if self.session.time_left_secs == 0 {
            out.timer = TimerDirective::Stop;
            self.expire(&mut out);
        } else {
            out.timer = TimerDirective::Start;
        }
        out
    }

    /// Apply one input. Inbound events never fail; refused user actions are
    /// reported in [`Applied::rejected`].
    pub fn apply(&mut self, input: Input) -> Applied {
        let mut out = Applied::default();
        match input {
            Input::Server(event) => self.on_event(event, &mut out),
            Input::Tick => self.on_tick(&mut out),
            Input::User(action) => {
                if let Err(e) = self.on_action(action, &mut out) {
                    debug!(error = %e, phase = %self.session.phase, "action refused");
                    self.session.last_notice = Some(e.to_string());
                    out.changed.notice = true;
                    out.commands.clear();
                    out.rejected = Some(e);
                }
            }
            Input::ChannelOpened { resumed } => self.on_open(resumed, &mut out),
            Input::ChannelReconnecting => self.set_connection(ConnectionState::Reconnecting, &mut out),
            Input::ChannelDown => self.set_connection(ConnectionState::Disconnected, &mut out),
        }
        out
    }

    // ------------------------------------------------------------------
    // Server events
    // ------------------------------------------------------------------

    fn on_event(&mut self, event: ServerEvent, out: &mut Applied) {
        if self.session.game_id.is_none() {
            debug!(event = event.name(), "not in a game, ignoring");
            return;
        }
        match event {
            ServerEvent::GameStarted => {
                if !self.session.game_started {
                    self.session.game_started = true;
                    out.changed.phase = true;
                }
                if let Some(next) = transition(self.session.phase, Trigger::GameStarted) {
                    self.set_phase(next, out);
                }
            }
            ServerEvent::TeamJoined { team_id } => {
                if self.session.teams.insert(team_id) {
                    out.changed.roster = true;
                }
            }
            ServerEvent::Question { question } => {
                if let Some(q) = self.decode(&question, out) {
                    self.present(q, None, out);
                }
            }
            ServerEvent::AnswerResult {
                team_id,
                question_id,
                is_correct,
                points,
            } => self.on_answer_result(team_id, question_id, AnswerOutcome { is_correct, points }, out),
            ServerEvent::Reveal {
                question_id,
                correct_answer,
            } => self.on_reveal(question_id, &correct_answer, out),
            ServerEvent::GameState {
                status,
                question,
                time_left_secs,
                answered_question_ids,
                correct_answer,
            } => self.on_game_state(
                status,
                question.as_ref(),
                time_left_secs,
                &answered_question_ids,
                correct_answer.as_ref(),
                out,
            ),
            ServerEvent::GameEnded => self.on_game_ended(out),
            ServerEvent::IntermissionExpired => {
                if transition(self.session.phase, Trigger::IntermissionExpired).is_some()
                    && self.session.time_left_secs > 0
                {
                    self.session.time_left_secs = 0;
                    out.changed.timer = true;
                    out.timer = TimerDirective::Stop;
                }
            }
            ServerEvent::TeamReady { team_id } => {
                if self.session.ready_teams.insert(team_id) {
                    out.changed.roster = true;
                }
                if team_id == self.session.team_id && !self.session.self_ready {
                    self.session.self_ready = true;
                    out.changed.roster = true;
                }
            }
            ServerEvent::ChannelError { message, code } => self.on_channel_error(&message, code, out),
        }
    }

    /// Decode a raw question; unknown kinds become operator alerts.
    fn decode(&mut self, raw: &RawQuestion, out: &mut Applied) -> Option<Question> {
        match codec::decode_question(raw, self.legacy_kind_inference) {
            Ok(q) => Some(q),
            Err(e @ DecodeError::UnknownKind { .. }) => {
                error!(error = %e, "question of unknown kind dropped");
                self.session.alerts.push(e.to_string());
                out.changed.notice = true;
                None
            }
            Err(e) => {
                warn!(error = %e, "malformed question dropped");
                None
            }
        }
    }

    /// Make `q` the current question, unless it was already seen.
    ///
    /// `time_left` overrides the policy countdown (resync snapshots).
    fn present(&mut self, q: Question, time_left: Option<u32>, out: &mut Applied) {
        if self.session.current_question_id() == Some(q.id) {
            debug!(question_id = q.id, "duplicate question ignored");
            return;
        }
        if self.session.answered_question_ids.contains(&q.id) {
            debug!(question_id = q.id, "question already answered, ignored");
            return;
        }
        let trigger = Trigger::NewQuestion {
            intermission: q.kind == QuestionKind::Intermission,
        };
        let Some(next) = transition(self.session.phase, trigger) else {
            debug!(question_id = q.id, phase = %self.session.phase, "question not expected here");
            return;
        };

        if let Some(prev) = self.session.current_question_id() {
            self.session.answered_question_ids.insert(prev);
        }
        if self
            .session
            .pending_submission
            .as_ref()
            .is_some_and(|p| p.question_id != q.id)
        {
            self.session.pending_submission = None;
        }

        let policy = q.kind.policy();
        self.session.time_left_secs = time_left.unwrap_or_else(|| policy.time_limit(&q));
        self.session.selected_wager = None;
        self.session.selected_answer = None;
        self.session.revealed_answer = None;
        self.session.self_ready = false;
        self.session.ready_teams.clear();
        self.session.last_notice = None;
        self.session.game_started = true;
        info!(
            question_id = q.id,
            kind = %q.kind,
            round = q.round,
            time_left = self.session.time_left_secs,
            "question presented"
        );
        self.session.question = Some(q);
        self.set_phase(next, out);

        out.changed.question = true;
        out.changed.input = true;
        out.changed.reveal = true;
        out.changed.timer = true;
        out.timer = if self.session.time_left_secs > 0 {
            TimerDirective::Start
        } else {
            TimerDirective::Stop
        };
    }

    fn on_answer_result(
        &mut self,
        team_id: TeamId,
        question_id: Option<QuestionId>,
        outcome: AnswerOutcome,
        out: &mut Applied,
    ) {
        if team_id != self.session.team_id {
            return;
        }
        // Without an id the result belongs to our outstanding submission, or
        // to the current question if it is already closed for input.
        let qid = question_id.or_else(|| {
            self.session
                .pending_submission
                .as_ref()
                .map(|p| p.question_id)
                .or_else(|| {
                    self.session
                        .current_question_id()
                        .filter(|id| self.session.answered_question_ids.contains(id))
                })
        });
        let Some(qid) = qid else {
            debug!(
                current = ?self.session.current_question_id(),
                "answer result with no submission to match, ignored"
            );
            return;
        };
        if self.session.results.contains_key(&qid) {
            debug!(question_id = qid, "duplicate answer result ignored");
            return;
        }
        self.session.results.insert(qid, outcome);
        self.session.answered_question_ids.insert(qid);
        if self
            .session
            .pending_submission
            .as_ref()
            .is_some_and(|p| p.question_id == qid)
        {
            self.session.pending_submission = None;
        }
        out.changed.results = true;

        if self.session.current_question_id() == Some(qid) {
            // The authority already holds an answer for the open question.
            let trigger = if self.session.phase == Phase::Question {
                Trigger::Submitted
            } else {
                Trigger::AnswerResult
            };
            if let Some(next) = transition(self.session.phase, trigger) {
                self.set_phase(next, out);
            }
        }
    }

    fn on_reveal(&mut self, qid: QuestionId, correct: &serde_json::Value, out: &mut Applied) {
        if self.session.revealed_question_ids.contains(&qid) {
            debug!(question_id = qid, "duplicate reveal ignored");
            return;
        }
        if self.session.current_question_id() == Some(qid) {
            match transition(self.session.phase, Trigger::Reveal) {
                Some(next) => self.reveal_current(codec::normalize(correct), next, out),
                None => {
                    self.session.revealed_question_ids.insert(qid);
                    debug!(question_id = qid, phase = %self.session.phase, "reveal ignored");
                }
            }
        } else if self.session.answered_question_ids.contains(&qid) {
            self.session.revealed_question_ids.insert(qid);
            debug!(question_id = qid, "stale reveal ignored");
        } else {
            warn!(question_id = qid, "reveal for an unknown question, requesting resync");
            if let Some(cmd) = self.resync_command() {
                out.commands.push(cmd);
            }
        }
    }

    fn reveal_current(&mut self, answer: codec::CanonicalText, next: Phase, out: &mut Applied) {
        let Some(qid) = self.session.current_question_id() else {
            return;
        };
        self.session.answered_question_ids.insert(qid);
        self.session.revealed_question_ids.insert(qid);
        if self
            .session
            .pending_submission
            .as_ref()
            .is_some_and(|p| p.question_id == qid)
        {
            self.session.pending_submission = None;
        }
        self.session.self_ready = false;
        self.session.ready_teams.clear();
        self.set_phase(next, out);
        self.session.revealed_answer = Some(answer);
        out.changed.reveal = true;
        info!(question_id = qid, "answer revealed");
    }

    fn on_game_state(
        &mut self,
        status: GameStatus,
        question: Option<&RawQuestion>,
        time_left: Option<u32>,
        answered: &[QuestionId],
        correct: Option<&serde_json::Value>,
        out: &mut Applied,
    ) {
        if self.session.phase == Phase::Ended && status != GameStatus::Ended {
            debug!(status = ?status, "resync snapshot after game end ignored");
            return;
        }
        for id in answered {
            if self.session.answered_question_ids.insert(*id) {
                out.changed.results = true;
            }
        }
        let q = question.and_then(|raw| self.decode(raw, out));
        info!(status = ?status, question_id = ?q.as_ref().map(|q| q.id), "resync snapshot");

        match status {
            GameStatus::Ended => self.on_game_ended(out),
            GameStatus::Waiting => {
                if self.session.phase == Phase::Idle {
                    self.set_phase(Phase::Waiting, out);
                }
            }
            GameStatus::Question | GameStatus::Intermission => {
                let Some(q) = q else { return };
                if self.session.current_question_id() == Some(q.id) {
                    self.reconcile_current(time_left, out);
                } else if self.session.answered_question_ids.contains(&q.id) {
                    self.present_answered(q, out);
                } else {
                    self.present(q, time_left, out);
                }
            }
            GameStatus::Reveal => {
                let Some(q) = q else { return };
                if self.session.revealed_question_ids.contains(&q.id) {
                    return;
                }
                if self.session.current_question_id() != Some(q.id) {
                    self.adopt(q);
                    out.changed.question = true;
                    out.changed.input = true;
                }
                let answer = correct.map(codec::normalize).unwrap_or_default();
                self.reveal_current(answer, Phase::Reveal, out);
            }
            GameStatus::Unknown => warn!("resync with unknown status ignored"),
        }
    }

    /// The snapshot names our current question: time may only go down, and
    /// an answer the authority already holds closes input.
    fn reconcile_current(&mut self, time_left: Option<u32>, out: &mut Applied) {
        if let Some(t) = time_left
            && t < self.session.time_left_secs
            && self.session.phase.is_time_boxed()
        {
            self.session.time_left_secs = t;
            out.changed.timer = true;
            if t == 0 {
                out.timer = TimerDirective::Stop;
                self.expire(out);
                return;
            }
        }
        if let Some(qid) = self.session.current_question_id()
            && self.session.answered_question_ids.contains(&qid)
            && let Some(next) = transition(self.session.phase, Trigger::Submitted)
        {
            self.set_phase(next, out);
        }
    }

    /// The snapshot's question was missed while away but is already
    /// answered: show it without opening input.
    fn present_answered(&mut self, q: Question, out: &mut Applied) {
        let intermission = q.kind == QuestionKind::Intermission;
        self.adopt(q);
        out.changed.question = true;
        out.changed.input = true;
        let next = if intermission {
            Phase::Intermission
        } else {
            Phase::AwaitingOthers
        };
        self.set_phase(next, out);
        self.session.time_left_secs = 0;
        out.timer = TimerDirective::Stop;
    }

    /// Replace the current question without presenting it for input.
    fn adopt(&mut self, q: Question) {
        if let Some(prev) = self.session.current_question_id() {
            self.session.answered_question_ids.insert(prev);
        }
        self.session.answered_question_ids.insert(q.id);
        self.session.selected_wager = None;
        self.session.selected_answer = None;
        self.session.game_started = true;
        self.session.question = Some(q);
    }

    fn on_game_ended(&mut self, out: &mut Applied) {
        if let Some(next) = transition(self.session.phase, Trigger::GameEnded)
            && next != self.session.phase
        {
            if let Some(qid) = self.session.current_question_id() {
                self.session.answered_question_ids.insert(qid);
            }
            self.session.pending_submission = None;
            self.set_phase(next, out);
            info!(game_id = ?self.session.game_id, score = self.session.score(), "game ended");
        }
    }

    fn on_channel_error(&mut self, message: &str, code: Option<ErrorCode>, out: &mut Applied) {
        match code {
            Some(ErrorCode::AlreadyJoined) => debug!("already joined, treated as ack"),
            Some(ErrorCode::AlreadyAnswered) => {
                debug!("already answered, treated as ack");
                self.session.pending_submission = None;
                if let Some(qid) = self.session.current_question_id() {
                    self.session.answered_question_ids.insert(qid);
                    if let Some(next) = transition(self.session.phase, Trigger::Submitted) {
                        self.set_phase(next, out);
                    }
                }
            }
            Some(ErrorCode::Unauthorized) => {
                error!(message, "credentials rejected, ending session");
                self.session.last_notice = Some(message.to_string());
                out.changed.notice = true;
                self.set_connection(ConnectionState::Disconnected, out);
                out.timer = TimerDirective::Stop;
                out.end = Some(SessionEnd::Expired);
            }
            Some(ErrorCode::Other) | None => {
                warn!(message, "authority reported an error");
                self.session.last_notice = Some(message.to_string());
                out.changed.notice = true;
            }
        }
    }

    // ------------------------------------------------------------------
    // Countdown
    // ------------------------------------------------------------------

    fn on_tick(&mut self, out: &mut Applied) {
        if !self.session.phase.is_time_boxed() || self.session.time_left_secs == 0 {
            out.timer = TimerDirective::Stop;
            return;
        }
        self.session.time_left_secs -= 1;
        out.changed.timer = true;
        if self.session.time_left_secs == 0 {
            out.timer = TimerDirective::Stop;
            self.expire(out);
        }
    }

    /// The countdown reached zero: run the phase's one expiry action.
    fn expire(&mut self, out: &mut Applied) {
        let Some(game_id) = self.session.game_id.clone() else {
            return;
        };
        match self.session.phase {
            Phase::Question => {
                let Some(q) = self.session.question.clone() else {
                    return;
                };
                let policy = q.kind.policy();
                let used = self.session.wagers_used_in(q.round);
                let wager = self
                    .session
                    .selected_wager
                    .and_then(|w| policy.check_wager(w, &used).ok())
                    .or_else(|| policy.default_wager(&used));
                let answer = policy
                    .prepare_answer(&q, self.session.selected_answer.as_ref())
                    .ok();

                let command = match (answer, wager) {
                    (Some(answer), wager) => Some(ClientCommand::SubmitAnswer {
                        game_id: game_id.clone(),
                        team_id: self.session.team_id,
                        question_id: q.id,
                        answer,
                        wager,
                    }),
                    (None, Some(wager)) => Some(ClientCommand::SubmitWager {
                        game_id: game_id.clone(),
                        team_id: self.session.team_id,
                        wager,
                        question_id: q.id,
                    }),
                    (None, None) => None,
                };
                info!(question_id = q.id, wager = ?wager, "time expired");
                if let Some(command) = command {
                    self.record_submission(&q, wager, command, out);
                } else {
                    self.session.answered_question_ids.insert(q.id);
                }
                if let Some(next) = transition(Phase::Question, Trigger::TimerExpired) {
                    self.set_phase(next, out);
                }
            }
            Phase::Intermission => match self.session.current_question_id() {
                Some(question_id) => {
                    info!(question_id, "intermission timer expired");
                    out.commands.push(ClientCommand::NotifyTimerExpired {
                        game_id,
                        question_id,
                    });
                }
                None => debug!("intermission timer expired with no question, nothing to report"),
            },
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------

    fn on_action(&mut self, action: UserAction, out: &mut Applied) -> Result<(), SubmitError> {
        if let UserAction::Join { game_id } = action {
            return self.join(game_id, out);
        }
        if self.session.game_id.is_none() {
            return Err(SubmitError::NotInGame);
        }
        // A second submit for an answered question is a no-op.
        if action == UserAction::Submit
            && self
                .session
                .current_question_id()
                .is_some_and(|id| self.session.answered_question_ids.contains(&id))
        {
            debug!("duplicate submit ignored");
            return Ok(());
        }
        let kind = action.kind();
        if !self.session.phase.allows(kind) {
            return Err(SubmitError::WrongPhase {
                action: kind.verb(),
                phase: self.session.phase,
            });
        }

        match action {
            UserAction::Join { .. } => Ok(()),
            UserAction::SelectWager(wager) => {
                let q = self.session.question.as_ref().ok_or(SubmitError::NoQuestion)?;
                let used = self.session.wagers_used_in(q.round);
                q.kind.policy().check_wager(wager, &used)?;
                self.session.selected_wager = Some(wager);
                self.session.last_notice = None;
                out.changed.input = true;
                Ok(())
            }
            UserAction::SelectAnswer(answer) => {
                let q = self.session.question.as_ref().ok_or(SubmitError::NoQuestion)?;
                let policy = q.kind.policy();
                if policy.answer == AnswerShape::SingleChoice {
                    policy.prepare_answer(q, Some(&answer))?;
                }
                self.session.selected_answer = Some(answer);
                self.session.last_notice = None;
                out.changed.input = true;
                Ok(())
            }
            UserAction::SetPart { id, text } => {
                let q = self.session.question.as_ref().ok_or(SubmitError::NoQuestion)?;
                if q.kind.policy().answer != AnswerShape::PartsMap {
                    return Err(InputError::WrongShape(q.kind).into());
                }
                let known = q.options.parts();
                if !known.is_empty() && !known.iter().any(|p| p.id == id) {
                    return Err(InputError::UnknownPart(id).into());
                }
                let mut parts = match self.session.selected_answer.take() {
                    Some(Answer::Parts(parts)) => parts,
                    _ => Default::default(),
                };
                parts.insert(id, text);
                self.session.selected_answer = Some(Answer::Parts(parts));
                out.changed.input = true;
                Ok(())
            }
            UserAction::SetItem { index, text } => {
                let q = self.session.question.as_ref().ok_or(SubmitError::NoQuestion)?;
                let AnswerShape::FreeTextList { max } = q.kind.policy().answer else {
                    return Err(InputError::WrongShape(q.kind).into());
                };
                if index >= max {
                    return Err(InputError::TooManyAnswers(max).into());
                }
                let mut items = match self.session.selected_answer.take() {
                    Some(Answer::List(items)) => items,
                    Some(Answer::Text(text)) => vec![text],
                    _ => Vec::new(),
                };
                if items.len() <= index {
                    items.resize(index + 1, String::new());
                }
                items[index] = text;
                self.session.selected_answer = Some(Answer::List(items));
                out.changed.input = true;
                Ok(())
            }
            UserAction::Submit => self.submit(out),
            UserAction::SignalReady => {
                if self.session.self_ready {
                    return Ok(());
                }
                let game_id = self.session.game_id.clone().ok_or(SubmitError::NotInGame)?;
                self.session.self_ready = true;
                self.session.ready_teams.insert(self.session.team_id);
                out.changed.roster = true;
                out.commands.push(ClientCommand::SignalReady {
                    game_id,
                    team_id: self.session.team_id,
                });
                Ok(())
            }
            UserAction::ReturnToLobby => {
                if let Some(next) = transition(self.session.phase, Trigger::ReturnToLobby) {
                    info!(game_id = ?self.session.game_id, "returning to lobby");
                    self.session.reset();
                    self.session.phase = next;
                    out.changed = StateChanged {
                        phase: true,
                        question: true,
                        input: true,
                        timer: true,
                        reveal: true,
                        roster: true,
                        results: true,
                        notice: true,
                        connection: false,
                    };
                    out.timer = TimerDirective::Stop;
                    out.end = Some(SessionEnd::Left);
                }
                Ok(())
            }
        }
    }

    fn join(&mut self, game_id: GameId, out: &mut Applied) -> Result<(), SubmitError> {
        if !self.session.phase.allows(ActionKind::Join) {
            return Err(SubmitError::WrongPhase {
                action: ActionKind::Join.verb(),
                phase: self.session.phase,
            });
        }
        validate_game_id(&game_id).map_err(SubmitError::InvalidGameId)?;
        let Some(next) = transition(self.session.phase, Trigger::Join) else {
            return Ok(());
        };
        let connection = self.session.connection;
        self.session.reset();
        self.session.connection = connection;
        self.session.game_id = Some(game_id.clone());
        self.restored = false;
        self.set_phase(next, out);
        info!(game_id = %game_id, team_id = self.session.team_id, "joined game");
        out.commands.push(ClientCommand::Join {
            game_id,
            team_id: self.session.team_id,
        });
        Ok(())
    }

    fn submit(&mut self, out: &mut Applied) -> Result<(), SubmitError> {
        let game_id = self.session.game_id.clone().ok_or(SubmitError::NotInGame)?;
        let q = self.session.question.clone().ok_or(SubmitError::NoQuestion)?;
        let policy = q.kind.policy();
        let used = self.session.wagers_used_in(q.round);
        let wager = policy.submission_wager(self.session.selected_wager, &used)?;
        let answer = policy.prepare_answer(&q, self.session.selected_answer.as_ref())?;

        let command = ClientCommand::SubmitAnswer {
            game_id,
            team_id: self.session.team_id,
            question_id: q.id,
            answer,
            wager,
        };
        info!(question_id = q.id, wager = ?wager, "answer submitted");
        self.record_submission(&q, wager, command, out);
        self.session.last_notice = None;
        if let Some(next) = transition(self.session.phase, Trigger::Submitted) {
            self.set_phase(next, out);
        }
        Ok(())
    }

    /// Mark `q` answered, spend the wager and queue `command` as in flight.
    fn record_submission(
        &mut self,
        q: &Question,
        wager: Option<u32>,
        command: ClientCommand,
        out: &mut Applied,
    ) {
        self.session.answered_question_ids.insert(q.id);
        if let (Some(w), WagerRule::Choices { .. }) = (wager, q.kind.policy().wager) {
            self.session.used_wagers.entry(q.round).or_default().insert(w);
        }
        self.session.pending_submission = Some(PendingSubmission {
            question_id: q.id,
            command: command.clone(),
        });
        out.commands.push(command);
        out.changed.input = true;
    }

    // ------------------------------------------------------------------
    // Channel
    // ------------------------------------------------------------------

    fn on_open(&mut self, resumed: bool, out: &mut Applied) {
        self.set_connection(ConnectionState::Connected, out);
        let Some(game_id) = self.session.game_id.clone() else {
            return;
        };
        out.commands.push(ClientCommand::Join {
            game_id,
            team_id: self.session.team_id,
        });
        if resumed || self.restored {
            self.restored = false;
            if let Some(cmd) = self.resync_command() {
                out.commands.push(cmd);
            }
            if let Some(pending) = &self.session.pending_submission {
                debug!(question_id = pending.question_id, "re-sending in-flight submission");
                out.commands.push(pending.command.clone());
            }
        }
    }

    fn set_connection(&mut self, state: ConnectionState, out: &mut Applied) {
        if self.session.connection != state {
            info!(from = ?self.session.connection, to = ?state, "connection state");
            self.session.connection = state;
            out.changed.connection = true;
        }
    }

    fn resync_command(&self) -> Option<ClientCommand> {
        self.session
            .game_id
            .clone()
            .map(|game_id| ClientCommand::RequestResync {
                game_id,
                team_id: self.session.team_id,
            })
    }

    /// Move to `next`, keeping the time and reveal invariants.
    fn set_phase(&mut self, next: Phase, out: &mut Applied) {
        if next != Phase::Reveal && self.session.revealed_answer.take().is_some() {
            out.changed.reveal = true;
        }
        if !next.is_time_boxed() && self.session.time_left_secs > 0 {
            self.session.time_left_secs = 0;
            out.changed.timer = true;
            out.timer = TimerDirective::Stop;
        }
        if self.session.phase != next {
            info!(from = %self.session.phase, to = %next, "phase");
            self.session.phase = next;
            out.changed.phase = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use serde_json::{Value, json};
    use trivia_core::codec::CanonicalText;

    use super::*;

    const TEAM: TeamId = 7;

    fn raw(id: u64, kind: &str, round: u32, number: u32, options: Value) -> RawQuestion {
        RawQuestion {
            id: Some(id),
            round: Some(round),
            question_number: Some(number),
            kind: Some(kind.to_string()),
            text: json!(format!("Question {id}")),
            options,
            time_limit_secs: None,
        }
    }

    fn standard(id: u64) -> RawQuestion {
        raw(id, "standard", 1, id as u32, json!(["A", "B", "C"]))
    }

    fn question(q: RawQuestion) -> Input {
        Input::Server(ServerEvent::Question { question: q })
    }

    fn reveal(id: u64, answer: &str) -> Input {
        Input::Server(ServerEvent::Reveal {
            question_id: id,
            correct_answer: json!(answer),
        })
    }

    fn result(id: u64, team_id: TeamId) -> Input {
        Input::Server(ServerEvent::AnswerResult {
            team_id,
            question_id: Some(id),
            is_correct: true,
            points: 3,
        })
    }

    fn user(action: UserAction) -> Input {
        Input::User(action)
    }

    fn joined() -> Synchronizer {
        let mut sync = Synchronizer::new(TEAM, false);
        let applied = sync.apply(user(UserAction::Join {
            game_id: "g1".into(),
        }));
        assert_eq!(
            applied.commands,
            vec![ClientCommand::Join {
                game_id: "g1".into(),
                team_id: TEAM
            }]
        );
        sync.apply(Input::ChannelOpened { resumed: false });
        sync
    }

    fn tick(sync: &mut Synchronizer, n: u32) -> Vec<Applied> {
        (0..n).map(|_| sync.apply(Input::Tick)).collect()
    }

    #[test]
    fn game_started_without_question_stays_waiting() {
        let mut sync = joined();
        let applied = sync.apply(Input::Server(ServerEvent::GameStarted));
        assert_eq!(sync.session().phase, Phase::Waiting);
        assert!(sync.session().game_started);
        assert!(applied.changed.any());
        assert!(sync.session().question.is_none());
    }

    #[test]
    fn events_before_join_are_ignored() {
        let mut sync = Synchronizer::new(TEAM, false);
        let applied = sync.apply(question(standard(1)));
        assert!(!applied.changed.any());
        assert_eq!(sync.session().phase, Phase::Idle);
    }

    #[test]
    fn duplicate_question_mutates_once() {
        let mut sync = joined();
        let first = sync.apply(question(standard(1)));
        assert!(first.changed.question);
        assert_eq!(first.timer, TimerDirective::Start);

        sync.apply(user(UserAction::SelectWager(3)));
        tick(&mut sync, 5);
        let before = sync.session().clone();

        let again = sync.apply(question(standard(1)));
        assert!(!again.changed.any());
        assert_eq!(again.timer, TimerDirective::Keep);
        assert_eq!(sync.session(), &before);
        assert_eq!(sync.session().selected_wager, Some(3));
    }

    #[test]
    fn answered_question_is_never_re_presented() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(question(standard(2)));
        assert!(sync.session().answered_question_ids.contains(&1));
        let applied = sync.apply(question(standard(1)));
        assert!(!applied.changed.any());
        assert_eq!(sync.session().current_question_id(), Some(2));
    }

    #[test]
    fn reveal_and_result_interleavings_end_in_reveal_once() {
        let orders: [[Input; 3]; 3] = [
            [result(1, TEAM), reveal(1, "B"), reveal(1, "B")],
            [reveal(1, "B"), result(1, TEAM), reveal(1, "B")],
            [reveal(1, "B"), reveal(1, "B"), result(1, TEAM)],
        ];
        for order in orders {
            let mut sync = joined();
            sync.apply(question(standard(1)));
            let mut reveals = 0;
            for input in order {
                let applied = sync.apply(input);
                if applied.changed.phase && sync.session().phase == Phase::Reveal {
                    reveals += 1;
                }
            }
            assert_eq!(reveals, 1);
            let session = sync.session();
            assert_eq!(session.phase, Phase::Reveal);
            assert_eq!(
                session.revealed_answer,
                Some(CanonicalText::Single("B".into()))
            );
            assert_eq!(session.results.len(), 1);
            assert_eq!(session.time_left_secs, 0);
        }
    }

    #[test]
    fn other_teams_results_are_ignored() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        let applied = sync.apply(result(1, TEAM + 1));
        assert!(!applied.changed.any());
        assert_eq!(sync.session().phase, Phase::Question);
    }

    #[test]
    fn reveal_for_unknown_question_requests_resync() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        let applied = sync.apply(reveal(9, "C"));
        assert_eq!(sync.session().phase, Phase::Question);
        assert_eq!(
            applied.commands,
            vec![ClientCommand::RequestResync {
                game_id: "g1".into(),
                team_id: TEAM
            }]
        );
    }

    #[test]
    fn stale_reveal_is_ignored() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(question(standard(2)));
        let applied = sync.apply(reveal(1, "A"));
        assert!(applied.commands.is_empty());
        assert_eq!(sync.session().phase, Phase::Question);
        assert!(sync.session().revealed_answer.is_none());
    }

    #[test]
    fn timer_only_decreases_until_new_question() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        assert_eq!(sync.session().time_left_secs, 150);

        let mut last = sync.session().time_left_secs;
        for _ in 0..10 {
            sync.apply(Input::Tick);
            assert!(sync.session().time_left_secs < last);
            last = sync.session().time_left_secs;
        }
        // A resync may lower the time but never raise it.
        sync.apply(Input::Server(ServerEvent::GameState {
            status: GameStatus::Question,
            question: Some(standard(1)),
            time_left_secs: Some(149),
            answered_question_ids: vec![],
            correct_answer: None,
        }));
        assert_eq!(sync.session().time_left_secs, 140);
        sync.apply(Input::Server(ServerEvent::GameState {
            status: GameStatus::Question,
            question: Some(standard(1)),
            time_left_secs: Some(100),
            answered_question_ids: vec![],
            correct_answer: None,
        }));
        assert_eq!(sync.session().time_left_secs, 100);

        sync.apply(question(standard(2)));
        assert_eq!(sync.session().time_left_secs, 150);
    }

    #[test]
    fn expiry_submits_default_wager_once() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        let applied = tick(&mut sync, 150);
        let commands: Vec<_> = applied.iter().flat_map(|a| a.commands.clone()).collect();
        assert_eq!(
            commands,
            vec![ClientCommand::SubmitWager {
                game_id: "g1".into(),
                team_id: TEAM,
                wager: 1,
                question_id: 1,
            }]
        );
        assert_eq!(applied.last().map(|a| a.timer), Some(TimerDirective::Stop));
        assert_eq!(sync.session().phase, Phase::AwaitingOthers);
        assert_eq!(sync.session().time_left_secs, 0);
        assert!(sync.session().answered_question_ids.contains(&1));

        let extra = sync.apply(Input::Tick);
        assert!(extra.commands.is_empty());
        assert_eq!(extra.timer, TimerDirective::Stop);
    }

    #[test]
    fn expiry_sends_a_valid_draft_answer() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(user(UserAction::SelectAnswer(Answer::Text("C".into()))));
        let commands: Vec<_> = tick(&mut sync, 150)
            .into_iter()
            .flat_map(|a| a.commands)
            .collect();
        assert_eq!(
            commands,
            vec![ClientCommand::SubmitAnswer {
                game_id: "g1".into(),
                team_id: TEAM,
                question_id: 1,
                answer: Answer::Text("C".into()),
                wager: Some(1),
            }]
        );
    }

    #[test]
    fn standard_round_scenario() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(user(UserAction::SelectWager(3)));
        sync.apply(user(UserAction::SelectAnswer(Answer::Text("B".into()))));
        let applied = sync.apply(user(UserAction::Submit));
        assert_eq!(
            applied.commands,
            vec![ClientCommand::SubmitAnswer {
                game_id: "g1".into(),
                team_id: TEAM,
                question_id: 1,
                answer: Answer::Text("B".into()),
                wager: Some(3),
            }]
        );
        assert_eq!(applied.timer, TimerDirective::Stop);
        assert_eq!(sync.session().phase, Phase::AwaitingOthers);

        // Duplicate submit is a no-op.
        let again = sync.apply(user(UserAction::Submit));
        assert!(again.commands.is_empty());
        assert!(again.rejected.is_none());

        sync.apply(reveal(1, "B"));
        sync.apply(question(standard(2)));
        let refused = sync.apply(user(UserAction::SelectWager(3)));
        assert_eq!(
            refused.rejected,
            Some(SubmitError::Input(InputError::WagerUsed(3)))
        );
        assert!(sync.session().last_notice.is_some());
        assert_eq!(sync.session().wagers_used_in(1), BTreeSet::from([3]));

        let choice = sync.apply(user(UserAction::SelectAnswer(Answer::Text("D".into()))));
        assert!(matches!(
            choice.rejected,
            Some(SubmitError::Input(InputError::UnknownChoice(_)))
        ));
    }

    #[test]
    fn submit_without_wager_is_refused_before_sending() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(user(UserAction::SelectAnswer(Answer::Text("A".into()))));
        let applied = sync.apply(user(UserAction::Submit));
        assert!(applied.commands.is_empty());
        assert_eq!(
            applied.rejected,
            Some(SubmitError::Input(InputError::MissingWager))
        );
        assert_eq!(sync.session().phase, Phase::Question);
    }

    #[test]
    fn input_is_refused_outside_question_phase() {
        let mut sync = joined();
        let applied = sync.apply(user(UserAction::Submit));
        assert!(matches!(
            applied.rejected,
            Some(SubmitError::WrongPhase {
                phase: Phase::Waiting,
                ..
            })
        ));
    }

    #[test]
    fn multi_part_sends_filled_parts_only() {
        let mut sync = joined();
        let parts: serde_json::Map<String, Value> = (1..=8)
            .map(|i| (i.to_string(), json!(format!("Prompt {i}"))))
            .collect();
        sync.apply(question(raw(40, "multi-part", 5, 1, Value::Object(parts))));
        for (id, text) in [("2", "Paris"), ("5", " Rome "), ("8", "Oslo"), ("3", "  ")] {
            sync.apply(user(UserAction::SetPart {
                id: id.into(),
                text: text.into(),
            }));
        }
        let applied = sync.apply(user(UserAction::Submit));
        let expected = BTreeMap::from([
            ("2".to_string(), "Paris".to_string()),
            ("5".to_string(), "Rome".to_string()),
            ("8".to_string(), "Oslo".to_string()),
        ]);
        assert_eq!(
            applied.commands,
            vec![ClientCommand::SubmitAnswer {
                game_id: "g1".into(),
                team_id: TEAM,
                question_id: 40,
                answer: Answer::Parts(expected),
                wager: None,
            }]
        );
    }

    #[test]
    fn team_bonus_slots() {
        let mut sync = joined();
        sync.apply(question(raw(30, "team-bonus", 3, 1, Value::Null)));
        sync.apply(user(UserAction::SetItem {
            index: 2,
            text: "blue".into(),
        }));
        let refused = sync.apply(user(UserAction::SetItem {
            index: 8,
            text: "x".into(),
        }));
        assert_eq!(
            refused.rejected,
            Some(SubmitError::Input(InputError::TooManyAnswers(8)))
        );
        let applied = sync.apply(user(UserAction::Submit));
        assert!(matches!(
            &applied.commands[..],
            [ClientCommand::SubmitAnswer { answer: Answer::List(items), .. }] if items == &["blue".to_string()]
        ));
    }

    #[test]
    fn final_wager_defaults_to_fifteen_on_expiry() {
        let mut sync = joined();
        let mut q = raw(25, "final-wager", 9, 25, Value::Null);
        q.time_limit_secs = Some(3);
        sync.apply(question(q));
        let commands: Vec<_> = tick(&mut sync, 3).into_iter().flat_map(|a| a.commands).collect();
        assert!(matches!(
            &commands[..],
            [ClientCommand::SubmitWager { wager: 15, question_id: 25, .. }]
        ));
    }

    #[test]
    fn intermission_expiry_notifies_and_holds() {
        let mut sync = joined();
        let mut q = raw(12, "intermission", 2, 0, Value::Null);
        q.time_limit_secs = Some(2);
        sync.apply(question(q));
        assert_eq!(sync.session().phase, Phase::Intermission);

        let applied = tick(&mut sync, 2);
        let commands: Vec<_> = applied.into_iter().flat_map(|a| a.commands).collect();
        assert_eq!(
            commands,
            vec![ClientCommand::NotifyTimerExpired {
                game_id: "g1".into(),
                question_id: 12
            }]
        );
        assert_eq!(sync.session().phase, Phase::Intermission);
        assert_eq!(sync.session().time_left_secs, 0);

        let ready = sync.apply(user(UserAction::SignalReady));
        assert_eq!(ready.commands.len(), 1);
        assert!(sync.apply(user(UserAction::SignalReady)).commands.is_empty());

        sync.apply(question(standard(13)));
        assert_eq!(sync.session().phase, Phase::Question);
        assert!(!sync.session().self_ready);
    }

    #[test]
    fn intermission_without_question_reports_nothing_on_expiry() {
        let mut sync = Synchronizer::new(TEAM, false);
        let mut saved = Session::new(TEAM);
        saved.game_id = Some("g1".into());
        saved.phase = Phase::Intermission;
        saved.time_left_secs = 3;
        sync.restore(saved);

        let applied = sync.resume(10);
        assert_eq!(applied.timer, TimerDirective::Stop);
        assert!(applied.commands.is_empty());
        assert_eq!(sync.session().time_left_secs, 0);
    }

    #[test]
    fn late_result_without_id_leaves_next_question_open() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(user(UserAction::SelectWager(3)));
        sync.apply(user(UserAction::SelectAnswer(Answer::Text("B".into()))));
        sync.apply(user(UserAction::Submit));
        assert_eq!(sync.session().phase, Phase::AwaitingOthers);
        sync.apply(question(standard(2)));

        let applied = sync.apply(Input::Server(ServerEvent::AnswerResult {
            team_id: TEAM,
            question_id: None,
            is_correct: true,
            points: 3,
        }));
        assert!(!applied.changed.any());
        let session = sync.session();
        assert_eq!(session.phase, Phase::Question);
        assert!(!session.answered_question_ids.contains(&2));
        assert!(!session.results.contains_key(&2));

        let select = sync.apply(user(UserAction::SelectAnswer(Answer::Text("A".into()))));
        assert_eq!(select.rejected, None);
        sync.apply(user(UserAction::SelectWager(1)));
        let submit = sync.apply(user(UserAction::Submit));
        assert!(matches!(
            &submit.commands[..],
            [ClientCommand::SubmitAnswer { question_id: 2, .. }]
        ));
    }

    #[test]
    fn result_without_id_credits_outstanding_submission() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(user(UserAction::SelectWager(5)));
        sync.apply(user(UserAction::SelectAnswer(Answer::Text("C".into()))));
        sync.apply(user(UserAction::Submit));

        let applied = sync.apply(Input::Server(ServerEvent::AnswerResult {
            team_id: TEAM,
            question_id: None,
            is_correct: false,
            points: -5,
        }));
        assert!(applied.changed.results);
        let session = sync.session();
        assert_eq!(session.phase, Phase::AwaitingOthers);
        assert_eq!(session.results.get(&1).map(|r| r.points), Some(-5));
        assert!(session.pending_submission.is_none());
    }

    #[test]
    fn stale_snapshot_does_not_reopen_ended_game() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(Input::Server(ServerEvent::GameEnded));
        assert_eq!(sync.session().phase, Phase::Ended);

        let revealed = sync.apply(Input::Server(ServerEvent::GameState {
            status: GameStatus::Reveal,
            question: Some(standard(2)),
            time_left_secs: None,
            answered_question_ids: vec![],
            correct_answer: Some(json!("A")),
        }));
        assert!(!revealed.changed.any());
        assert_eq!(sync.session().phase, Phase::Ended);
        assert!(sync.session().revealed_answer.is_none());

        let asking = sync.apply(Input::Server(ServerEvent::GameState {
            status: GameStatus::Question,
            question: Some(standard(2)),
            time_left_secs: Some(60),
            answered_question_ids: vec![2],
            correct_answer: None,
        }));
        assert!(!asking.changed.any());
        assert_eq!(sync.session().phase, Phase::Ended);
        assert_eq!(sync.session().current_question_id(), Some(1));
    }

    #[test]
    fn unknown_kind_raises_an_alert() {
        let mut sync = joined();
        let applied = sync.apply(question(raw(5, "lightning", 1, 5, Value::Null)));
        assert!(applied.changed.notice);
        assert_eq!(sync.session().alerts.len(), 1);
        assert_eq!(sync.session().phase, Phase::Waiting);
    }

    #[test]
    fn missing_kind_uses_numbering_only_when_enabled() {
        let mut untagged = standard(25);
        untagged.kind = None;
        untagged.round = Some(9);
        untagged.question_number = Some(25);

        let mut strict = joined();
        strict.apply(question(untagged.clone()));
        assert!(strict.session().question.is_none());

        let mut legacy = Synchronizer::new(TEAM, true);
        legacy.apply(user(UserAction::Join {
            game_id: "g1".into(),
        }));
        legacy.apply(question(untagged));
        assert_eq!(
            legacy.session().question.as_ref().map(|q| q.kind),
            Some(QuestionKind::FinalWager)
        );
    }

    #[test]
    fn resync_after_missed_question_reconciles() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(Input::ChannelReconnecting);
        assert_eq!(sync.session().connection, ConnectionState::Reconnecting);

        // Missed: question 2 was presented and answered elsewhere.
        let opened = sync.apply(Input::ChannelOpened { resumed: true });
        assert_eq!(
            opened.commands,
            vec![
                ClientCommand::Join {
                    game_id: "g1".into(),
                    team_id: TEAM
                },
                ClientCommand::RequestResync {
                    game_id: "g1".into(),
                    team_id: TEAM
                },
            ]
        );
        sync.apply(Input::Server(ServerEvent::GameState {
            status: GameStatus::Question,
            question: Some(standard(3)),
            time_left_secs: Some(42),
            answered_question_ids: vec![1, 2],
            correct_answer: None,
        }));
        let session = sync.session();
        assert_eq!(session.phase, Phase::Question);
        assert_eq!(session.current_question_id(), Some(3));
        assert_eq!(session.time_left_secs, 42);
        assert!(session.answered_question_ids.is_superset(&BTreeSet::from([1, 2])));
    }

    #[test]
    fn resync_into_reveal() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(Input::Server(ServerEvent::GameState {
            status: GameStatus::Reveal,
            question: Some(standard(2)),
            time_left_secs: None,
            answered_question_ids: vec![],
            correct_answer: Some(json!("{\"A\",\"C\"}")),
        }));
        let session = sync.session();
        assert_eq!(session.phase, Phase::Reveal);
        assert_eq!(session.current_question_id(), Some(2));
        assert_eq!(
            session.revealed_answer,
            Some(CanonicalText::List(vec!["A".into(), "C".into()]))
        );
        assert!(session.answered_question_ids.contains(&1));
    }

    #[test]
    fn pending_submission_is_resent_after_reconnect() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(user(UserAction::SelectWager(5)));
        sync.apply(user(UserAction::SelectAnswer(Answer::Text("A".into()))));
        let submitted = sync.apply(user(UserAction::Submit));
        sync.apply(Input::ChannelReconnecting);

        let opened = sync.apply(Input::ChannelOpened { resumed: true });
        assert_eq!(opened.commands.len(), 3);
        assert_eq!(opened.commands[2], submitted.commands[0]);

        // The authority already has it.
        sync.apply(Input::Server(ServerEvent::ChannelError {
            message: "Already answered".into(),
            code: Some(ErrorCode::AlreadyAnswered),
        }));
        assert!(sync.session().pending_submission.is_none());
        let again = sync.apply(Input::ChannelOpened { resumed: true });
        assert_eq!(again.commands.len(), 2);
    }

    #[test]
    fn already_joined_is_an_ack() {
        let mut sync = joined();
        let applied = sync.apply(Input::Server(ServerEvent::ChannelError {
            message: "Team already joined".into(),
            code: Some(ErrorCode::AlreadyJoined),
        }));
        assert!(!applied.changed.any());
        assert!(sync.session().last_notice.is_none());
    }

    #[test]
    fn unauthorized_ends_the_session() {
        let mut sync = joined();
        let applied = sync.apply(Input::Server(ServerEvent::ChannelError {
            message: "token expired".into(),
            code: Some(ErrorCode::Unauthorized),
        }));
        assert_eq!(applied.end, Some(SessionEnd::Expired));
        assert_eq!(sync.session().connection, ConnectionState::Disconnected);
    }

    #[test]
    fn game_end_and_return_to_lobby() {
        let mut sync = joined();
        sync.apply(question(standard(1)));
        sync.apply(reveal(1, "A"));
        sync.apply(Input::Server(ServerEvent::GameEnded));
        assert_eq!(sync.session().phase, Phase::Ended);
        assert!(sync.session().revealed_answer.is_none());

        let applied = sync.apply(user(UserAction::ReturnToLobby));
        assert_eq!(applied.end, Some(SessionEnd::Left));
        assert_eq!(sync.session().phase, Phase::Idle);
        assert!(sync.session().game_id.is_none());
        assert_eq!(sync.session().team_id, TEAM);
    }

    #[test]
    fn restore_and_resume() {
        let mut live = joined();
        live.apply(question(standard(1)));
        let saved = live.session().clone();

        let mut sync = Synchronizer::new(TEAM, false);
        sync.restore(saved.clone());
        let resumed = sync.resume(100);
        assert_eq!(resumed.timer, TimerDirective::Start);
        assert_eq!(sync.session().time_left_secs, 50);

        let opened = sync.apply(Input::ChannelOpened { resumed: false });
        assert!(opened
            .commands
            .iter()
            .any(|c| matches!(c, ClientCommand::RequestResync { .. })));

        let mut late = Synchronizer::new(TEAM, false);
        late.restore(saved);
        let expired = late.resume(1_000);
        assert_eq!(expired.timer, TimerDirective::Stop);
        assert_eq!(late.session().phase, Phase::AwaitingOthers);
        assert!(matches!(
            &expired.commands[..],
            [ClientCommand::SubmitWager { wager: 1, .. }]
        ));
    }

    #[test]
    fn invalid_game_id_is_refused() {
        let mut sync = Synchronizer::new(TEAM, false);
        let applied = sync.apply(user(UserAction::Join {
            game_id: "bad id".into(),
        }));
        assert!(matches!(applied.rejected, Some(SubmitError::InvalidGameId(_))));
        assert!(applied.commands.is_empty());
        assert_eq!(sync.session().phase, Phase::Idle);
    }
}
