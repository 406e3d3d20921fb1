//! Transport abstraction for the push channel.
//!
//! Decouples the channel client from any specific transport.
//! [`NetClient`](crate::net_client::NetClient) uses the [`Transport`] trait to
//! run its reader and writer tasks without caring whether frames travel over a
//! WebSocket or an in-process [`MemoryTransport`].

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;
use trivia_core::protocol::{ClientCommand, ServerEvent};

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O or protocol-level error.
    #[error("{0}")]
    Io(String),
}

/// Read half of a transport connection.
///
/// Implementations receive text frames (JSON) from the authority.
pub trait TransportReader: Send + 'static {
    /// Receive the next text frame.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&mut self) -> impl Future<Output = Result<Option<String>, TransportError>> + Send;
}

/// Write half of a transport connection.
pub trait TransportWriter: Send + 'static {
    /// Send a text frame to the authority.
    fn send(&mut self, text: &str) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A bidirectional transport that can be split into independent read and write
/// halves, so each can move into its own task.
pub trait Transport: Send + 'static {
    /// The read half produced by [`split`](Transport::split).
    type Reader: TransportReader;
    /// The write half produced by [`split`](Transport::split).
    type Writer: TransportWriter;

    /// Split the transport into independent read and write halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

// ---------------------------------------------------------------------------
// In-process transport
// ---------------------------------------------------------------------------

/// Channel-backed transport whose other end is a [`MemoryPeer`].
///
/// Used to drive a client without a network, e.g. against a scripted
/// authority in tests.
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

/// The authority's end of a [`MemoryTransport`].
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

/// Create a connected transport/peer pair.
pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    (
        MemoryTransport { inbound, outbound },
        MemoryPeer {
            to_client,
            from_client,
        },
    )
}

impl MemoryPeer {
    /// Push an event to the client.
    pub fn push(&self, event: &ServerEvent) -> Result<(), TransportError> {
        let text = serde_json::to_string(event).map_err(|e| TransportError::Io(e.to_string()))?;
        self.push_raw(text)
    }

    /// Push a raw text frame, well-formed or not.
    pub fn push_raw(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(text.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next command the client sent. `None` once the client is gone.
    pub async fn next_command(&mut self) -> Option<ClientCommand> {
        while let Some(text) = self.from_client.recv().await {
            if let Ok(cmd) = serde_json::from_str(&text) {
                return Some(cmd);
            }
        }
        None
    }

    /// Drain every command already sent, without waiting.
    pub fn drain_commands(&mut self) -> Vec<ClientCommand> {
        let mut out = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            if let Ok(cmd) = serde_json::from_str(&text) {
                out.push(cmd);
            }
        }
        out
    }
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader {
                inbound: self.inbound,
            },
            MemoryWriter {
                outbound: self.outbound,
            },
        )
    }
}

/// Read half of a [`MemoryTransport`].
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<String>,
}

impl TransportReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.inbound.recv().await)
    }
}

/// Write half of a [`MemoryTransport`].
pub struct MemoryWriter {
    outbound: mpsc::UnboundedSender<String>,
}

impl TransportWriter for MemoryWriter {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.outbound
            .send(text.to_string())
            .map_err(|_| TransportError::ConnectionClosed)
    }
}
