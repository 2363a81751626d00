//! # mmlive Telemetry
//!
//! Structured logging and tracing spans for live streaming sessions.
//!
//! ## Features
//! - Structured logging with `tracing`
//! - `RUST_LOG`-style filtering through `EnvFilter`
//! - Human-readable or JSON output
//! - Span helpers for connection attempts, inbound frames and tool calls
//!
//! ## Usage
//!
//! ```rust
//! use mmlive_telemetry::{init_telemetry, info, session_connect_span};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_telemetry("mmlive")?;
//!
//!     let span = session_connect_span("models/gemini-live-2.5-flash-native-audio");
//!     let _enter = span.enter();
//!     info!("Connecting");
//!     Ok(())
//! }
//! ```

pub mod init;
pub mod spans;

// Re-export tracing macros for convenience
pub use tracing::{Instrument, Span, debug, error, info, instrument, trace, warn};

// Re-export span helpers
pub use spans::*;

// Re-export init functions
pub use init::{init_json_telemetry, init_telemetry, init_with_filter};
