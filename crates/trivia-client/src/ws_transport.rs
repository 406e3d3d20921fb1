//! WebSocket transport implementation for native targets.
//!
//! Uses `tokio-tungstenite` to provide a [`Transport`] over the authority's
//! push channel.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::transport::{Transport, TransportError, TransportReader, TransportWriter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport for native (non-WASM) targets.
pub struct WsTransport {
    stream: WsStream,
}

impl WsTransport {
    /// Connect to the channel at `url`, presenting `access_token` if given.
    ///
    /// The token travels as an `access_token` query parameter, the way
    /// browsers authenticate WebSocket upgrades. Supports `ws://` and `wss://`.
    pub async fn connect(url: &str, access_token: Option<&str>) -> Result<Self, TransportError> {
        let url = with_access_token(url, access_token);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self { stream })
    }
}

fn with_access_token(url: &str, access_token: Option<&str>) -> String {
    match access_token.filter(|t| !t.is_empty()) {
        Some(token) => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}access_token={token}")
        }
        None => url.to_string(),
    }
}

impl Transport for WsTransport {
    type Reader = WsReader;
    type Writer = WsWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.stream.split();
        (WsReader { stream }, WsWriter { sink })
    }
}

/// Read half of a WebSocket transport.
pub struct WsReader {
    stream: SplitStream<WsStream>,
}

impl TransportReader for WsReader {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Skip binary, ping, pong frames.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }
}

/// Write half of a WebSocket transport.
pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

impl TransportWriter for WsWriter {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        self.sink
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_is_appended_as_query() {
        assert_eq!(
            with_access_token("ws://host/hub", Some("abc")),
            "ws://host/hub?access_token=abc"
        );
        assert_eq!(
            with_access_token("ws://host/hub?v=2", Some("abc")),
            "ws://host/hub?v=2&access_token=abc"
        );
        assert_eq!(with_access_token("ws://host/hub", None), "ws://host/hub");
        assert_eq!(with_access_token("ws://host/hub", Some("")), "ws://host/hub");
    }
}
