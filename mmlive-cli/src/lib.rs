//! # mmlive-cli
//!
//! Interactive terminal client for multimodal live sessions.
//!
//! ## Overview
//!
//! - [`cli::Cli`] - command-line flags
//! - [`config::Config`] - flags layered over a TOML file and the environment
//! - [`console::run_console`] - line-based chat over a [`LiveSession`](mmlive_realtime::LiveSession)
//! - [`audio::DesktopAudio`] - microphone and speaker (feature `desktop-audio`)
//!
//! ## Usage
//!
//! ```bash
//! GEMINI_API_KEY=... mmlive --instruction "Answer in one sentence."
//! mmlive --config live.toml --speaker --mic --voice Kore
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod console;
pub mod tools;
