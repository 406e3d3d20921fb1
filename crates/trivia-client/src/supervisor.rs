//! Connection supervision with bounded backoff.
//!
//! The initial connect and every reconnect run in one spawned task that
//! walks the [`Backoff`] schedule until a [`Connector`] succeeds or the
//! attempt budget is spent. Outcomes arrive as [`LinkEvent`]s through
//! [`ConnectionSupervisor::next_event`], which keeps the supervisor's view of
//! the link state current.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::net_client::NetClient;
use crate::session::ConnectionState;
use crate::transport::{MemoryPeer, TransportError, memory_pair};

/// Default wait before each attempt, in milliseconds. The last entry repeats.
pub const DEFAULT_RECONNECT_DELAYS_MS: &[u64] = &[0, 2_000, 5_000, 10_000, 30_000];

/// Retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    delays: Vec<Duration>,
    max_attempts: Option<u32>,
}

impl Backoff {
    /// An empty schedule falls back to [`DEFAULT_RECONNECT_DELAYS_MS`].
    pub fn new(delays_ms: &[u64], max_attempts: Option<u32>) -> Self {
        let delays_ms = if delays_ms.is_empty() {
            DEFAULT_RECONNECT_DELAYS_MS
        } else {
            delays_ms
        };
        Self {
            delays: delays_ms.iter().copied().map(Duration::from_millis).collect(),
            max_attempts: max_attempts.filter(|n| *n > 0),
        }
    }

    /// Wait before the 1-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) as usize - 1).min(self.delays.len() - 1);
        self.delays[index]
    }

    /// Whether no attempt may follow `attempt`.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAYS_MS, None)
    }
}

/// Opens a fresh channel to the authority.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<NetClient, TransportError>> + Send;
}

/// Outcome of a connect cycle.
pub enum LinkEvent {
    /// The channel is up. `resumed` when a previous link existed.
    Established {
        client: NetClient,
        attempt: u32,
        resumed: bool,
    },
    /// An attempt failed; another follows after `retry_in`.
    AttemptFailed {
        attempt: u32,
        error: TransportError,
        retry_in: Duration,
    },
    /// The attempt budget is spent; nothing further will be tried.
    Exhausted { attempts: u32 },
}

pub struct ConnectionSupervisor<C> {
    connector: Arc<C>,
    backoff: Backoff,
    state: ConnectionState,
    established: u32,
    task: Option<JoinHandle<()>>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    event_rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(connector: C, backoff: Backoff) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            connector: Arc::new(connector),
            backoff,
            state: ConnectionState::Disconnected,
            established: 0,
            task: None,
            event_tx,
            event_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a connect cycle is in progress.
    pub fn is_connecting(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start a connect cycle unless one is already running.
    pub fn connect(&mut self) {
        if self.is_connecting() {
            return;
        }
        let connector = Arc::clone(&self.connector);
        let backoff = self.backoff.clone();
        let tx = self.event_tx.clone();
        let resumed = self.established > 0;

        self.task = Some(tokio::spawn(async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                tokio::time::sleep(backoff.delay(attempt)).await;
                match connector.connect().await {
                    Ok(client) => {
                        info!(attempt, resumed, "channel established");
                        let _ = tx.send(LinkEvent::Established {
                            client,
                            attempt,
                            resumed,
                        });
                        break;
                    }
                    Err(error) if backoff.exhausted(attempt) => {
                        warn!(attempt, %error, "giving up on the channel");
                        let _ = tx.send(LinkEvent::Exhausted { attempts: attempt });
                        break;
                    }
                    Err(error) => {
                        let retry_in = backoff.delay(attempt + 1);
                        warn!(attempt, %error, ?retry_in, "connect attempt failed");
                        if tx
                            .send(LinkEvent::AttemptFailed {
                                attempt,
                                error,
                                retry_in,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// The live channel dropped: mark reconnecting and start a new cycle.
    pub fn on_lost(&mut self) {
        if self.state == ConnectionState::Connected {
            info!("channel lost, reconnecting");
        }
        self.state = ConnectionState::Reconnecting;
        self.connect();
    }

    /// Wait for the next connect outcome. Pending forever while idle.
    pub async fn next_event(&mut self) -> LinkEvent {
        let event = match self.event_rx.recv().await {
            Some(event) => event,
            // Unreachable while we hold a sender.
            None => std::future::pending().await,
        };
        match &event {
            LinkEvent::Established { .. } => {
                self.state = ConnectionState::Connected;
                self.established += 1;
                self.task = None;
            }
            LinkEvent::AttemptFailed { .. } => self.state = ConnectionState::Reconnecting,
            LinkEvent::Exhausted { .. } => {
                self.state = ConnectionState::Disconnected;
                self.task = None;
            }
        }
        event
    }

    /// Abort any connect cycle; no retry outlives this call.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl<C> Drop for ConnectionSupervisor<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// Connects over WebSocket.
#[cfg(feature = "native")]
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    access_token: Option<String>,
}

#[cfg(feature = "native")]
impl WsConnector {
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            access_token,
        }
    }
}

#[cfg(feature = "native")]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<NetClient, TransportError> {
        NetClient::connect_ws(&self.url, self.access_token.as_deref()).await
    }
}

/// Connects over [`memory_pair`]s, handing each authority end out through a
/// channel. Can be told to refuse a number of attempts first.
#[derive(Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    failures: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            failures: Arc::new(AtomicU32::new(0)),
            attempts: Arc::new(AtomicU32::new(0)),
        };
        (connector, peer_rx)
    }

    /// Refuse the next `n` attempts.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<NetClient, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Io("connection refused".to_string()));
        }
        let (transport, peer) = memory_pair();
        self.peers
            .send(peer)
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(NetClient::from_transport(transport))
    }
}
