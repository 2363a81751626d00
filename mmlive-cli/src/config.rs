//! Console configuration: flags over the `--config` file over the environment.

use crate::cli::Cli;
use anyhow::{Context, Result};
use mmlive_realtime::{LiveConfig, SessionOptions};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Contents of a `--config` TOML file.
///
/// ```toml
/// endpoint = "wss://generativelanguage.googleapis.com/ws/..."
/// max_retries = 8
/// base_delay_ms = 500
/// max_delay_ms = 30000
///
/// [live]
/// model = "models/gemini-live-2.5-flash-native-audio"
///
/// [live.generationConfig]
/// responseModalities = ["AUDIO"]
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub endpoint: Option<String>,
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    /// Setup frame, in its wire shape.
    pub live: Option<LiveConfig>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }
}

/// Everything the console needs to start a session.
#[derive(Debug)]
pub struct Config {
    pub options: SessionOptions,
    pub live: LiveConfig,
    pub mic: bool,
    pub speaker: bool,
}

impl Config {
    /// Load `.env`, the config file and the environment, then apply flags.
    pub fn load(cli: &Cli) -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env");
        }
        let file = cli.config.as_deref().map(FileConfig::read).transpose()?.unwrap_or_default();
        let options = SessionOptions::from_env()
            .context("set GOOGLE_API_KEY or GEMINI_API_KEY, in the environment or a .env file")?;
        Self::resolve(cli, file, options)
    }

    pub fn resolve(cli: &Cli, file: FileConfig, mut options: SessionOptions) -> Result<Self> {
        if let Some(endpoint) = cli.endpoint.clone().or(file.endpoint) {
            options = options.with_endpoint(endpoint);
        }
        if let Some(max_retries) = cli.max_retries.or(file.max_retries) {
            options = options.with_max_retries(max_retries);
        }
        if let Some(ms) = file.base_delay_ms {
            options = options.with_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = file.max_delay_ms {
            options = options.with_max_delay(Duration::from_millis(ms));
        }
        options.url()?;

        let mut live = file.live.unwrap_or_default();
        if let Some(model) = &cli.model {
            live.model = model.clone();
        }
        if let Some(instruction) = &cli.instruction {
            live = live.with_instruction(instruction.clone());
        }
        if let Some(voice) = &cli.voice {
            live = live.with_voice(voice.clone());
        }
        let has_modalities =
            live.generation_config.as_ref().is_some_and(|g| g.response_modalities.is_some());
        if !has_modalities {
            live = if cli.speaker { live.with_audio_only() } else { live.with_text_only() };
        }
        live.validate()?;

        Ok(Self { options, live, mic: cli.mic, speaker: cli.speaker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmlive_realtime::config::Modality;

    const FILE: &str = r#"
endpoint = "ws://localhost:9000/live"
max_retries = 3
base_delay_ms = 250

[live]
model = "models/from-file"

[live.generationConfig]
responseModalities = ["AUDIO"]
temperature = 0.4
"#;

    fn file() -> FileConfig {
        toml::from_str(FILE).unwrap()
    }

    #[test]
    fn test_file_settings_apply() {
        let config = Config::resolve(&Cli::default(), file(), SessionOptions::new("k")).unwrap();
        assert_eq!(config.options.endpoint, "ws://localhost:9000/live");
        assert_eq!(config.options.max_retries, 3);
        assert_eq!(config.options.base_delay, Duration::from_millis(250));
        assert_eq!(config.options.max_delay, None);
        assert_eq!(config.live.model, "models/from-file");
        let generation = config.live.generation_config.unwrap();
        assert_eq!(generation.response_modalities, Some(vec![Modality::Audio]));
        assert_eq!(generation.temperature, Some(0.4));
    }

    #[test]
    fn test_flags_override_file() {
        let cli = Cli {
            model: Some("models/from-flag".into()),
            max_retries: Some(9),
            endpoint: Some("wss://other.test/live".into()),
            voice: Some("Kore".into()),
            ..Default::default()
        };
        let config = Config::resolve(&cli, file(), SessionOptions::new("k")).unwrap();
        assert_eq!(config.options.endpoint, "wss://other.test/live");
        assert_eq!(config.options.max_retries, 9);
        assert_eq!(config.live.model, "models/from-flag");
        let generation = config.live.generation_config.unwrap();
        assert_eq!(generation.response_modalities, Some(vec![Modality::Audio]));
        assert!(generation.speech_config.is_some());
    }

    #[test]
    fn test_modalities_follow_speaker_flag() {
        let text = Config::resolve(&Cli::default(), FileConfig::default(), SessionOptions::new("k")).unwrap();
        let modalities = text.live.generation_config.and_then(|g| g.response_modalities);
        assert_eq!(modalities, Some(vec![Modality::Text]));

        let cli = Cli { speaker: true, ..Default::default() };
        let audio = Config::resolve(&cli, FileConfig::default(), SessionOptions::new("k")).unwrap();
        let modalities = audio.live.generation_config.and_then(|g| g.response_modalities);
        assert_eq!(modalities, Some(vec![Modality::Audio]));
    }

    #[test]
    fn test_rejects_bad_settings() {
        let cli = Cli { endpoint: Some("http://plain.test".into()), ..Default::default() };
        assert!(Config::resolve(&cli, FileConfig::default(), SessionOptions::new("k")).is_err());

        assert!(toml::from_str::<FileConfig>("unknown_key = 1").is_err());
    }
}
