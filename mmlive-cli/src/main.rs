use anyhow::{Result, anyhow};
use clap::Parser;
use mmlive_cli::audio::DesktopAudio;
use mmlive_cli::cli::Cli;
use mmlive_cli::config::Config;
use mmlive_cli::console::run_console;
use mmlive_cli::tools::builtin_tools;
use mmlive_realtime::{LiveSession, ToolDispatcher};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = if cli.json_logs {
        mmlive_telemetry::init_json_telemetry("mmlive")
    } else {
        mmlive_telemetry::init_with_filter("mmlive", "warn")
    };
    telemetry.map_err(|e| anyhow!("failed to initialize telemetry: {e}"))?;

    let config = Config::load(&cli)?;
    let tools = builtin_tools();
    let live = tools.apply_to(config.live.clone());

    let session = LiveSession::new(config.options.clone());
    let _dispatcher = ToolDispatcher::spawn(session.clone(), tools);
    let _audio = DesktopAudio::start(&session, config.mic, config.speaker)?;

    if let Err(e) = session.connect(live).await {
        // The session keeps retrying in the background.
        eprintln!("Connect failed: {}", e);
    }

    run_console(session).await
}
