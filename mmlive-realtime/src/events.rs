//! Signals emitted by a live session.
//!
//! Every inbound frame and lifecycle transition is surfaced as one
//! [`LiveEvent`] on the session's broadcast channel.

use crate::protocol::{Content, ToolCall, ToolCallCancellation};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Raw PCM audio received from the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    /// Decoded PCM bytes (16-bit little-endian).
    pub data: Bytes,
    /// Mime type as sent by the service, e.g. `audio/pcm;rate=24000`.
    pub mime_type: String,
}

/// Entry of the user-visible session log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingLog {
    /// When the entry was recorded.
    pub date: DateTime<Utc>,
    /// Category, e.g. `client.send` or `server.content`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human readable message.
    pub message: String,
}

impl StreamingLog {
    /// Create a log entry stamped with the current time.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { date: Utc::now(), kind: kind.into(), message: message.into() }
    }
}

/// Signals emitted by a [`LiveSession`](crate::LiveSession).
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// The socket opened. The setup frame follows immediately.
    Open,
    /// Setup sent and the outbound queue flushed.
    Connected,
    /// The current socket closed.
    Close {
        /// Close reason as reported by the transport, or why the client closed.
        reason: String,
    },
    /// A reconnect attempt was scheduled.
    Reconnecting {
        /// One-based attempt number.
        attempt: u32,
        /// Delay before the attempt starts.
        delay: Duration,
    },
    /// The service accepted the setup frame.
    SetupComplete,
    /// The user barged in. Pending model audio is discarded.
    Interrupted,
    /// The model finished its turn.
    TurnComplete,
    /// Non-audio parts of a model turn.
    Content(Content),
    /// One audio part of a model turn.
    Audio(AudioPayload),
    /// Functions the client should run.
    ToolCall(ToolCall),
    /// Calls that no longer need a response.
    ToolCallCancellation(ToolCallCancellation),
    /// Session log entry.
    Log(StreamingLog),
}

impl LiveEvent {
    /// Signal name, matching the lowercase names used by UI collaborators.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Connected => "connected",
            Self::Close { .. } => "close",
            Self::Reconnecting { .. } => "reconnecting",
            Self::SetupComplete => "setupcomplete",
            Self::Interrupted => "interrupted",
            Self::TurnComplete => "turncomplete",
            Self::Content(_) => "content",
            Self::Audio(_) => "audio",
            Self::ToolCall(_) => "toolcall",
            Self::ToolCallCancellation(_) => "toolcallcancellation",
            Self::Log(_) => "log",
        }
    }

    pub(crate) fn log(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Log(StreamingLog::new(kind, message))
    }

    /// Whether this is a log entry.
    pub fn is_log(&self) -> bool {
        matches!(self, Self::Log(_))
    }
}
