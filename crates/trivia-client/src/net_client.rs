//! Channel-based client for the authority's push channel.
//!
//! Spawns background reader/writer tasks and exposes channels so that the
//! controller can send and receive typed messages without owning the socket
//! directly.
//!
//! Use [`NetClient::from_transport`] to construct a client over any
//! [`Transport`] implementation, or the convenience method
//! [`connect_ws`](NetClient::connect_ws) (WebSocket).

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::{Transport, TransportError, TransportReader, TransportWriter};
use trivia_core::protocol::{ClientCommand, ServerEvent};

// ---------------------------------------------------------------------------
// Wire-level parsing
// ---------------------------------------------------------------------------

/// Try to deserialize a raw text frame as a [`ServerEvent`].
///
/// Returns `None` for empty/whitespace-only input or unrecognised JSON.
pub fn parse_server_frame(frame: &str) -> Option<ServerEvent> {
    let trimmed = frame.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<ServerEvent>(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, frame = trimmed, "dropping malformed frame");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// NetClient
// ---------------------------------------------------------------------------

/// A live connection to the push channel.
///
/// - [`incoming`](NetClient::incoming) yields parsed [`ServerEvent`]s; the
///   channel closing signals disconnection.
/// - [`send`](NetClient::send) enqueues a [`ClientCommand`] without blocking.
///
/// Dropping the client aborts both background tasks.
pub struct NetClient {
    /// Receive parsed server events. Channel close = disconnected.
    pub incoming: mpsc::UnboundedReceiver<ServerEvent>,
    outgoing: mpsc::UnboundedSender<ClientCommand>,
    tasks: [JoinHandle<()>; 2],
}

impl NetClient {
    /// Create a `NetClient` over any [`Transport`] implementation.
    ///
    /// No handshake is sent; the caller issues `Join` afterwards.
    pub fn from_transport<T: Transport>(transport: T) -> Self {
        let (reader, writer) = transport.split();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientCommand>();

        let reader_task = Self::spawn_reader_task(reader, event_tx);
        let writer_task = Self::spawn_writer_task(writer, cmd_rx);

        Self {
            incoming: event_rx,
            outgoing: cmd_tx,
            tasks: [reader_task, writer_task],
        }
    }

    /// Connect to a WebSocket channel and spawn background I/O tasks.
    #[cfg(feature = "native")]
    pub async fn connect_ws(url: &str, access_token: Option<&str>) -> Result<Self, TransportError> {
        let transport = crate::ws_transport::WsTransport::connect(url, access_token).await?;
        Ok(Self::from_transport(transport))
    }

    /// Enqueue a [`ClientCommand`] for transmission.
    pub fn send(&self, cmd: ClientCommand) -> Result<(), TransportError> {
        self.outgoing
            .send(cmd)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Whether the writer side is still accepting commands.
    pub fn is_open(&self) -> bool {
        !self.outgoing.is_closed()
    }

    fn spawn_reader_task<R: TransportReader>(
        mut reader: R,
        event_tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(Some(frame)) => {
                        if let Some(event) = parse_server_frame(&frame)
                            && event_tx.send(event).is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("channel closed by peer");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "channel read failed");
                        break;
                    }
                }
            }
            // Dropping event_tx signals disconnect to the owner.
        })
    }

    fn spawn_writer_task<W: TransportWriter>(
        mut writer: W,
        mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let json = match serde_json::to_string(&cmd) {
                    Ok(j) => j,
                    Err(_) => continue,
                };
                if let Err(e) = writer.send(&json).await {
                    warn!(error = %e, "channel write failed");
                    break;
                }
            }
        })
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
