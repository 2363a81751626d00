//! # mmlive-realtime
//!
//! Resilient bidirectional streaming sessions for multimodal live services.
//!
//! A [`LiveSession`] keeps one WebSocket to the service alive across network
//! failures, sends a setup frame on every (re)connect, preserves the order of
//! everything sent while the socket was down, and turns inbound frames into
//! typed [`LiveEvent`]s. The audio pipelines feed and drain it: captured
//! microphone buffers are resampled to 16 kHz PCM16 chunks, and model audio is
//! queued for gapless sequential playback that stops on barge-in.
//!
//! ```text
//!  microphone ─► PcmEncoder ─┐                         ┌─► LiveEvent (broadcast)
//!  camera ─► FrameExtractor ─┼─► LiveSession ─► socket ─┤
//!                            │   (driver task)          └─► PlaybackHandle ─► AudioOutput
//!  ToolDispatcher ◄──────────┘
//! ```
//!
//! ## Features
//!
//! - **State machine**: explicit `Idle → Connecting → Open → Closing → Closed`
//!   lifecycle with exponential-backoff reconnection
//! - **Outbound queue**: sends while disconnected are flushed in order on open
//! - **Strict decoding**: unknown inbound shapes are logged, never fatal
//! - **Tool calling**: registered handlers answer `toolCall` frames
//! - **Desktop audio**: microphone and speaker through `cpal` (feature `desktop-audio`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use mmlive_realtime::{LiveConfig, LiveEvent, LiveSession, SessionOptions};
//!
//! let session = LiveSession::new(SessionOptions::from_env()?);
//! let mut events = session.subscribe();
//!
//! session.connect(LiveConfig::default().with_text_only().with_instruction("Be brief.")).await?;
//! session.send_text("Hello!", true).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         LiveEvent::Content(content) => println!("{:?}", content),
//!         LiveEvent::TurnComplete => break,
//!         _ => {}
//!     }
//! }
//! session.disconnect().await?;
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod machine;
pub mod media;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod tools;
pub mod transport;

// Re-exports
pub use audio::AudioFormat;
pub use audio::encoder::PcmEncoder;
pub use audio::playback::{AudioOutput, PlaybackEvent, PlaybackHandle, SampleFeed, SilentOutput};
pub use config::{LiveConfig, LiveConfigBuilder, Modality, SessionOptions, ToolDefinition};
pub use error::{RealtimeError, Result};
pub use events::{AudioPayload, LiveEvent, StreamingLog};
pub use machine::{ConnectionState, PendingRetry};
pub use media::{ExtractorConfig, FrameExtractor, FrameFeed, FrameSource};
pub use protocol::{Content, FunctionCall, FunctionResponse, MediaChunk, OutboundMessage, Part};
pub use session::LiveSession;
pub use tools::{FnToolHandler, ToolDispatcher, ToolHandler, ToolRegistry};
pub use transport::{Connector, Transport, TransportEvent, WsConnector};

#[cfg(feature = "desktop-audio")]
pub use audio::device::{CaptureEvent, CpalOutput, MicrophoneRecorder};
