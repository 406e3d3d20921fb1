//! Framework-agnostic session controller.
//!
//! Owns the [`Synchronizer`], the live [`NetClient`], the countdown, the
//! connection supervisor and the session store, and performs the effects
//! each applied input asks for:
//!
//! - Sending outbound commands (or holding them until the channel is back).
//! - Starting and stopping the countdown.
//! - Persisting the session after every change (countdown ticks are
//!   saved every few seconds).
//!
//! Front ends only need to:
//! 1. Build a controller and call [`ClientController::restore`] and
//!    [`ClientController::start`].
//! 2. Await [`ClientController::next`] in their event loop.
//! 3. Call [`ClientController::act`] for participant input.

use std::time::Duration;

use tracing::{info, warn};
use trivia_core::protocol::{ClientCommand, ServerEvent};

use crate::config::ClientConfig;
use crate::dispatcher::{Applied, Input, SessionEnd, Synchronizer, UserAction};
use crate::error::{ClientError, StoreError};
use crate::net_client::NetClient;
use crate::session::{Session, SessionStore, Snapshot, StateChanged, unix_now};
use crate::supervisor::{Backoff, ConnectionSupervisor, Connector, LinkEvent};
use crate::timer::TimerController;

/// A running countdown is saved when its remaining seconds are a multiple
/// of this.
const TICK_SAVE_INTERVAL_SECS: u32 = 5;

/// Outcome of one [`ClientController::next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// An input was applied; the flags describe what changed.
    Updated(StateChanged),
    /// A connect attempt failed; another follows after `retry_in`.
    Reconnecting { attempt: u32, retry_in: Duration },
    /// The connect budget is spent.
    Unreachable { attempts: u32 },
    /// The session is over and its snapshot removed.
    Ended(SessionEnd),
}

pub struct ClientController<C: Connector, S: SessionStore> {
    sync: Synchronizer,
    link: Option<NetClient>,
    timer: TimerController,
    supervisor: ConnectionSupervisor<C>,
    store: S,
    show_scores: bool,
    /// Commands held while the channel is down.
    outbox: Vec<ClientCommand>,
}

impl<C: Connector, S: SessionStore> ClientController<C, S> {
    pub fn new(config: &ClientConfig, connector: C, store: S) -> Self {
        Self::with_backoff(config, connector, store, config.backoff())
    }

    pub fn with_backoff(config: &ClientConfig, connector: C, store: S, backoff: Backoff) -> Self {
        Self {
            sync: Synchronizer::new(config.team_id, config.legacy_kind_inference),
            link: None,
            timer: TimerController::new(),
            supervisor: ConnectionSupervisor::new(connector, backoff),
            store,
            show_scores: false,
            outbox: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        self.sync.session()
    }

    /// Scoreboard view toggle.
    pub fn show_scores(&self) -> bool {
        self.show_scores
    }

    /// Rehydrate from the store. Returns whether a game was restored.
    ///
    /// A snapshot of another team, or one that cannot be read, is
    /// discarded.
    pub fn restore(&mut self) -> Result<bool, ClientError> {
        let snapshot = match self.store.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(error = %e, "discarding unreadable session snapshot");
                self.store.clear()?;
                return Ok(false);
            }
        };
        if snapshot.session.team_id != self.sync.session().team_id
            || snapshot.session.game_id.is_none()
        {
            info!(team_id = snapshot.session.team_id, "discarding snapshot of another session");
            self.store.clear()?;
            return Ok(false);
        }

        let elapsed = unix_now().saturating_sub(snapshot.saved_at);
        info!(
            game_id = ?snapshot.session.game_id,
            phase = %snapshot.session.phase,
            elapsed,
            "restoring session"
        );
        self.show_scores = snapshot.show_scores;
        self.sync.restore(snapshot.session);
        let applied = self.sync.resume(elapsed);
        self.commit(applied)?;
        Ok(true)
    }

    /// Begin connecting to the push channel.
    pub fn start(&mut self) {
        self.supervisor.connect();
    }

    /// Apply a participant action.
    ///
    /// A refused action returns [`ClientError::Submit`] and sends nothing;
    /// its message is also kept as the session's `last_notice`.
    pub fn act(&mut self, action: UserAction) -> Result<StateChanged, ClientError> {
        let joining = matches!(action, UserAction::Join { .. });
        let applied = self.sync.apply(Input::User(action));
        let rejected = applied.rejected.clone();
        let changed = self.commit(applied)?;
        if let Some(e) = rejected {
            return Err(e.into());
        }
        if joining && self.link.is_none() {
            self.supervisor.connect();
        }
        Ok(changed)
    }

    /// Flip the scoreboard view and persist it.
    pub fn toggle_view(&mut self) -> Result<bool, ClientError> {
        self.show_scores = !self.show_scores;
        self.persist()?;
        Ok(self.show_scores)
    }

    /// Leave for good: stop everything and forget the session.
    pub fn logout(&mut self) -> Result<(), ClientError> {
        info!(game_id = ?self.sync.session().game_id, "logging out");
        self.teardown()?;
        self.sync.reset();
        Ok(())
    }

    /// Await the next channel event, countdown tick or connection outcome
    /// and apply it.
    pub async fn next(&mut self) -> Result<PollResult, ClientError> {
        tokio::select! {
            event = recv_event(&mut self.link) => match event {
                Some(event) => {
                    let applied = self.sync.apply(Input::Server(event));
                    self.finish(applied)
                }
                None => {
                    warn!("channel lost");
                    self.link = None;
                    self.supervisor.on_lost();
                    let applied = self.sync.apply(Input::ChannelReconnecting);
                    self.finish(applied)
                }
            },
            () = self.timer.tick() => {
                let applied = self.sync.apply(Input::Tick);
                self.finish(applied)
            }
            event = self.supervisor.next_event() => match event {
                LinkEvent::Established { client, resumed, .. } => {
                    self.link = Some(client);
                    let applied = self.sync.apply(Input::ChannelOpened { resumed });
                    let result = self.finish(applied);
                    self.flush_outbox();
                    result
                }
                LinkEvent::AttemptFailed { attempt, retry_in, .. } => {
                    let applied = self.sync.apply(Input::ChannelReconnecting);
                    self.commit(applied)?;
                    Ok(PollResult::Reconnecting { attempt, retry_in })
                }
                LinkEvent::Exhausted { attempts } => {
                    let applied = self.sync.apply(Input::ChannelDown);
                    self.commit(applied)?;
                    Ok(PollResult::Unreachable { attempts })
                }
            },
        }
    }

    // -- private -----------------------------------------------------------

    fn finish(&mut self, applied: Applied) -> Result<PollResult, ClientError> {
        let end = applied.end;
        let changed = self.commit(applied)?;
        Ok(match end {
            Some(end) => PollResult::Ended(end),
            None => PollResult::Updated(changed),
        })
    }

    /// Perform an [`Applied`]'s effects.
    fn commit(&mut self, applied: Applied) -> Result<StateChanged, StoreError> {
        self.timer.apply(applied.timer);
        for command in applied.commands {
            self.dispatch(command);
        }
        if applied.end.is_some() {
            self.teardown()?;
        } else if applied.changed.any() && self.worth_saving(applied.changed) {
            self.persist()?;
        }
        Ok(applied.changed)
    }

    /// Countdown-only changes are saved every few seconds; anything else
    /// is saved at once.
    fn worth_saving(&self, changed: StateChanged) -> bool {
        let timer_only = changed
            == StateChanged {
                timer: true,
                ..StateChanged::default()
            };
        !timer_only || self.sync.session().time_left_secs % TICK_SAVE_INTERVAL_SECS == 0
    }

    fn dispatch(&mut self, command: ClientCommand) {
        if let Some(link) = &self.link
            && link.send(command.clone()).is_ok()
        {
            return;
        }
        // Join, resync and submissions are re-issued when the channel opens.
        if matches!(
            command,
            ClientCommand::SignalReady { .. } | ClientCommand::NotifyTimerExpired { .. }
        ) {
            self.outbox.push(command);
        }
    }

    fn flush_outbox(&mut self) {
        for command in std::mem::take(&mut self.outbox) {
            self.dispatch(command);
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        let session = self.sync.session();
        if session.game_id.is_none() {
            return self.store.clear();
        }
        let snapshot = Snapshot {
            session: session.clone(),
            saved_at: unix_now(),
            show_scores: self.show_scores,
        };
        self.store.save(&snapshot).inspect_err(|e| {
            warn!(error = %e, "failed to persist session");
        })
    }

    fn teardown(&mut self) -> Result<(), StoreError> {
        self.timer.cancel();
        self.supervisor.shutdown();
        self.link = None;
        self.outbox.clear();
        self.sync.apply(Input::ChannelDown);
        self.store.clear()
    }
}

async fn recv_event(link: &mut Option<NetClient>) -> Option<ServerEvent> {
    match link {
        Some(client) => client.incoming.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;
    use trivia_core::protocol::{Answer, ErrorCode, RawQuestion};

    use super::*;
    use crate::phase::Phase;
    use crate::session::{ConnectionState, MemorySessionStore};
    use crate::supervisor::MemoryConnector;
    use crate::transport::MemoryPeer;

    type Controller = ClientController<MemoryConnector, MemorySessionStore>;

    const TEAM: u32 = 7;

    fn config() -> ClientConfig {
        ClientConfig {
            team_id: TEAM,
            ..ClientConfig::default()
        }
    }

    fn standard(id: u64, time_limit_secs: Option<u32>) -> ServerEvent {
        ServerEvent::Question {
            question: RawQuestion {
                id: Some(id),
                round: Some(1),
                question_number: Some(id as u32),
                kind: Some("standard".into()),
                text: json!("Which one?"),
                options: json!(["A", "B", "C"]),
                time_limit_secs,
            },
        }
    }

    fn join_cmd() -> ClientCommand {
        ClientCommand::Join {
            game_id: "g1".into(),
            team_id: TEAM,
        }
    }

    fn resync_cmd() -> ClientCommand {
        ClientCommand::RequestResync {
            game_id: "g1".into(),
            team_id: TEAM,
        }
    }

    async fn updated(ctrl: &mut Controller) -> StateChanged {
        match ctrl.next().await.unwrap() {
            PollResult::Updated(changed) => changed,
            other => panic!("expected an update, got {other:?}"),
        }
    }

    /// A controller that joined `g1` and is connected.
    async fn connected() -> (
        Controller,
        MemoryPeer,
        mpsc::UnboundedReceiver<MemoryPeer>,
        MemorySessionStore,
    ) {
        let (connector, mut peers) = MemoryConnector::new();
        let store = MemorySessionStore::new();
        let mut ctrl = Controller::new(&config(), connector, store.clone());
        ctrl.act(UserAction::Join {
            game_id: "g1".into(),
        })
        .unwrap();
        let changed = updated(&mut ctrl).await;
        assert!(changed.connection);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.next_command().await, Some(join_cmd()));
        (ctrl, peer, peers, store)
    }

    #[tokio::test(start_paused = true)]
    async fn answer_flow_is_sent_and_persisted() {
        let (mut ctrl, mut peer, _peers, store) = connected().await;
        assert_eq!(ctrl.session().connection, ConnectionState::Connected);

        peer.push(&standard(1, None)).unwrap();
        assert!(updated(&mut ctrl).await.question);
        assert_eq!(ctrl.session().phase, Phase::Question);

        ctrl.act(UserAction::SelectWager(3)).unwrap();
        ctrl.act(UserAction::SelectAnswer(Answer::Text("B".into())))
            .unwrap();
        ctrl.act(UserAction::Submit).unwrap();
        assert_eq!(
            peer.next_command().await,
            Some(ClientCommand::SubmitAnswer {
                game_id: "g1".into(),
                team_id: TEAM,
                question_id: 1,
                answer: Answer::Text("B".into()),
                wager: Some(3),
            })
        );

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.session.phase, Phase::AwaitingOthers);
        assert!(saved.session.answered_question_ids.contains(&1));
        assert!(saved.session.pending_submission.is_some());

        // Second submit: no error, nothing sent.
        ctrl.act(UserAction::Submit).unwrap();
        assert!(peer.drain_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refused_action_sends_nothing() {
        let (mut ctrl, mut peer, _peers, _store) = connected().await;
        peer.push(&standard(1, None)).unwrap();
        updated(&mut ctrl).await;

        let err = ctrl.act(UserAction::Submit).unwrap_err();
        assert!(matches!(err, ClientError::Submit(_)));
        assert!(ctrl.session().last_notice.is_some());
        assert!(peer.drain_commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expiry_submits_default_wager() {
        let (mut ctrl, mut peer, _peers, _store) = connected().await;
        peer.push(&standard(1, Some(2))).unwrap();
        updated(&mut ctrl).await;

        assert!(updated(&mut ctrl).await.timer);
        assert_eq!(ctrl.session().time_left_secs, 1);
        updated(&mut ctrl).await;
        assert_eq!(ctrl.session().phase, Phase::AwaitingOthers);
        assert_eq!(
            peer.next_command().await,
            Some(ClientCommand::SubmitWager {
                game_id: "g1".into(),
                team_id: TEAM,
                wager: 1,
                question_id: 1,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rejoins_resyncs_and_resends() {
        let (mut ctrl, mut peer, mut peers, _store) = connected().await;
        peer.push(&standard(1, None)).unwrap();
        updated(&mut ctrl).await;
        ctrl.act(UserAction::SelectWager(5)).unwrap();
        ctrl.act(UserAction::SelectAnswer(Answer::Text("A".into())))
            .unwrap();
        ctrl.act(UserAction::Submit).unwrap();
        let submitted = peer.next_command().await.unwrap();

        drop(peer);
        assert!(updated(&mut ctrl).await.connection);
        assert_eq!(ctrl.session().connection, ConnectionState::Reconnecting);

        updated(&mut ctrl).await;
        assert_eq!(ctrl.session().connection, ConnectionState::Connected);
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.next_command().await, Some(join_cmd()));
        assert_eq!(peer.next_command().await, Some(resync_cmd()));
        assert_eq!(peer.next_command().await, Some(submitted));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_signal_waits_for_the_channel() {
        let (mut ctrl, mut peer, mut peers, _store) = connected().await;
        peer.push(&standard(1, None)).unwrap();
        peer.push(&ServerEvent::Reveal {
            question_id: 1,
            correct_answer: json!("C"),
        })
        .unwrap();
        updated(&mut ctrl).await;
        updated(&mut ctrl).await;
        assert_eq!(ctrl.session().phase, Phase::Reveal);

        drop(peer);
        updated(&mut ctrl).await;
        ctrl.act(UserAction::SignalReady).unwrap();
        updated(&mut ctrl).await;

        let mut peer = peers.recv().await.unwrap();
        let sent = [
            peer.next_command().await,
            peer.next_command().await,
            peer.next_command().await,
        ];
        assert_eq!(
            sent,
            [
                Some(join_cmd()),
                Some(resync_cmd()),
                Some(ClientCommand::SignalReady {
                    game_id: "g1".into(),
                    team_id: TEAM
                }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_is_saved_every_few_seconds() {
        let (mut ctrl, mut peer, _peers, store) = connected().await;
        peer.push(&standard(1, Some(12))).unwrap();
        updated(&mut ctrl).await;
        let saved_secs =
            |store: &MemorySessionStore| store.load().unwrap().unwrap().session.time_left_secs;
        assert_eq!(saved_secs(&store), 12);

        assert!(updated(&mut ctrl).await.timer);
        assert_eq!(ctrl.session().time_left_secs, 11);
        assert_eq!(saved_secs(&store), 12);

        updated(&mut ctrl).await;
        assert_eq!(saved_secs(&store), 12);
        updated(&mut ctrl).await;
        assert_eq!(ctrl.session().time_left_secs, 9);
        assert_eq!(saved_secs(&store), 10);

        // Input changes are saved straight away.
        ctrl.act(UserAction::SelectWager(1)).unwrap();
        assert_eq!(store.load().unwrap().unwrap().session.selected_wager, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_resumes_countdown_and_resyncs() {
        let (connector, mut peers) = MemoryConnector::new();
        let store = MemorySessionStore::new();

        // Build a snapshot from a live session ten seconds old.
        let mut seed = Synchronizer::new(TEAM, false);
        seed.apply(Input::User(UserAction::Join {
            game_id: "g1".into(),
        }));
        seed.apply(Input::Server(standard(4, Some(100))));
        store
            .save(&Snapshot {
                session: seed.session().clone(),
                saved_at: unix_now() - 10,
                show_scores: true,
            })
            .unwrap();

        let mut ctrl = Controller::new(&config(), connector, store.clone());
        assert!(ctrl.restore().unwrap());
        assert!(ctrl.show_scores());
        assert!((89..=90).contains(&ctrl.session().time_left_secs));
        assert_eq!(ctrl.session().connection, ConnectionState::Disconnected);

        ctrl.start();
        updated(&mut ctrl).await;
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.next_command().await, Some(join_cmd()));
        assert_eq!(peer.next_command().await, Some(resync_cmd()));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_of_another_team_is_discarded() {
        let (connector, _peers) = MemoryConnector::new();
        let store = MemorySessionStore::new();
        let mut other = Session::new(TEAM + 1);
        other.game_id = Some("g1".into());
        store
            .save(&Snapshot {
                session: other,
                saved_at: unix_now(),
                show_scores: false,
            })
            .unwrap();

        let mut ctrl = Controller::new(&config(), connector, store.clone());
        assert!(!ctrl.restore().unwrap());
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_ends_and_clears() {
        let (mut ctrl, peer, _peers, store) = connected().await;
        peer.push(&ServerEvent::ChannelError {
            message: "token expired".into(),
            code: Some(ErrorCode::Unauthorized),
        })
        .unwrap();
        assert_eq!(
            ctrl.next().await.unwrap(),
            PollResult::Ended(SessionEnd::Expired)
        );
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_budget() {
        let (connector, _peers) = MemoryConnector::new();
        connector.fail_next(10);
        let mut ctrl = Controller::with_backoff(
            &config(),
            connector,
            MemorySessionStore::new(),
            Backoff::new(&[0, 1_000], Some(2)),
        );
        ctrl.act(UserAction::Join {
            game_id: "g1".into(),
        })
        .unwrap();

        assert_eq!(
            ctrl.next().await.unwrap(),
            PollResult::Reconnecting {
                attempt: 1,
                retry_in: Duration::from_secs(1)
            }
        );
        assert_eq!(
            ctrl.next().await.unwrap(),
            PollResult::Unreachable { attempts: 2 }
        );
        assert_eq!(ctrl.session().connection, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_forgets_everything() {
        let (mut ctrl, _peer, _peers, store) = connected().await;
        assert!(ctrl.toggle_view().unwrap());
        assert!(store.load().unwrap().unwrap().show_scores);
        ctrl.logout().unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(ctrl.session().game_id.is_none());
        assert_eq!(ctrl.session().phase, Phase::Idle);
    }
}
