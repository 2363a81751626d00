use clap::Parser;
use std::path::PathBuf;

/// Talk to a multimodal live model from the terminal.
#[derive(Parser, Debug, Default)]
#[command(name = "mmlive", version)]
#[command(about = "Interactive console for multimodal live sessions", long_about = None)]
pub struct Cli {
    /// Model resource name
    #[arg(long)]
    pub model: Option<String>,

    /// Prebuilt voice for audio replies (e.g. Puck, Kore)
    #[arg(long)]
    pub voice: Option<String>,

    /// System instruction
    #[arg(short, long)]
    pub instruction: Option<String>,

    /// TOML file with session settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// WebSocket endpoint (overrides MMLIVE_ENDPOINT)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Reconnect attempts before giving up
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Stream the default microphone
    #[arg(long)]
    pub mic: bool,

    /// Play audio replies on the default speaker
    #[arg(long)]
    pub speaker: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}
