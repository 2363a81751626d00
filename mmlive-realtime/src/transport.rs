//! Duplex text-frame transport.
//!
//! The session driver only sees a [`Transport`]: a sink of outbound text
//! frames and a stream of inbound [`TransportEvent`]s. [`WsConnector`] backs
//! it with a WebSocket; tests plug in their own [`Connector`].

use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use url::Url;

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = RealtimeError> + Send>>;

/// Inbound half of a transport. The stream ending means the socket is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<TransportEvent>> + Send>>;

/// Something received on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Frame(String),
    /// The peer closed the socket.
    Closed {
        /// Close code and reason, if the peer sent any.
        reason: String,
    },
}

/// An open socket split into its two halves.
pub struct Transport {
    /// Outbound frames.
    pub sink: FrameSink,
    /// Inbound events.
    pub stream: FrameStream,
}

impl Transport {
    /// Build a transport from its halves.
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`, completing once the handshake succeeded.
    async fn connect(&self, url: Url) -> Result<Transport>;
}

/// WebSocket connector over `tokio-tungstenite` with rustls.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: Url) -> Result<Transport> {
        // Install the ring crypto provider for rustls; a second install is a no-op error.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let request = url.as_str().into_client_request().map_err(|e| {
            RealtimeError::connection(format!("Failed to create client request: {}", e))
        })?;
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| RealtimeError::connection(format!("WebSocket connect error: {}", e)))?;

        let (sink, source) = ws.split();

        let sink = sink
            .sink_map_err(|e| RealtimeError::connection(format!("Send error: {}", e)))
            .with(|text: String| future::ready(Ok::<_, RealtimeError>(Message::Text(text.into()))));

        let stream = source.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(TransportEvent::Frame(text.to_string()))),
                Ok(Message::Binary(bytes)) => Some(match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Ok(TransportEvent::Frame(text)),
                    Err(e) => {
                        Err(RealtimeError::protocol(format!("Invalid UTF-8 in binary message: {}", e)))
                    }
                }),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "closed by peer".to_string());
                    Some(Ok(TransportEvent::Closed { reason }))
                }
                Ok(_) => None,
                Err(e) => Some(Err(RealtimeError::connection(format!("Receive error: {}", e)))),
            })
        });

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}
