//! Error types for the realtime module.

use thiserror::Error;

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors that can occur during realtime operations.
///
/// Only [`RealtimeError::NotConnected`], [`RealtimeError::MediaCaptureError`]
/// and connect failures are surfaced to callers; the session recovers from the
/// rest on its own.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Socket open/handshake/send failure. Triggers a backoff reconnect.
    #[error("WebSocket connection error: {0}")]
    ConnectionError(String),

    /// Send attempted after reconnection retries were exhausted.
    #[error("Session not connected")]
    NotConnected,

    /// The session driver has shut down.
    #[error("Session already closed")]
    SessionClosed,

    /// Inbound frame did not match any known message shape.
    #[error("Protocol decode error: {0}")]
    ProtocolDecodeError(String),

    /// Capture device or frame source unavailable.
    #[error("Media capture error: {0}")]
    MediaCaptureError(String),

    /// Decoding or playing an audio entry failed.
    #[error("Playback error: {0}")]
    PlaybackError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Audio format error.
    #[error("Audio format error: {0}")]
    AudioFormatError(String),

    /// Tool execution error.
    #[error("Tool execution error: {0}")]
    ToolError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RealtimeError {
    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new protocol decode error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolDecodeError(msg.into())
    }

    /// Create a new media capture error.
    pub fn capture<S: Into<String>>(msg: S) -> Self {
        Self::MediaCaptureError(msg.into())
    }

    /// Create a new playback error.
    pub fn playback<S: Into<String>>(msg: S) -> Self {
        Self::PlaybackError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new audio format error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::AudioFormatError(msg.into())
    }

    /// Create a new tool error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::ToolError(msg.into())
    }

    /// Whether the session should answer this error with a backoff reconnect.
    pub fn triggers_reconnect(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::IoError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_keep_context() {
        assert!(RealtimeError::connection("refused").to_string().contains("refused"));
        assert!(RealtimeError::capture("no camera").to_string().contains("no camera"));
        assert!(RealtimeError::playback("bad wav").to_string().contains("bad wav"));
    }

    #[test]
    fn test_only_transport_errors_reconnect() {
        assert!(RealtimeError::connection("x").triggers_reconnect());
        assert!(!RealtimeError::NotConnected.triggers_reconnect());
        assert!(!RealtimeError::protocol("x").triggers_reconnect());
    }
}
