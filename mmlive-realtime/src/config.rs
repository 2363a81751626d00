//! Configuration types for live sessions.
//!
//! [`LiveConfig`] is the body of the `setup` frame and is serialized as-is.
//! [`SessionOptions`] holds everything about *how* to reach the service:
//! endpoint, credential and reconnection policy.

use crate::error::{RealtimeError, Result};
use crate::protocol::Content;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Live API WebSocket endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Default model for live sessions.
pub const DEFAULT_MODEL: &str = "models/gemini-live-2.5-flash-native-audio";

/// Available prebuilt voices (varies by model).
pub const VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Output modality requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    /// Text output.
    Text,
    /// Audio output.
    Audio,
    /// Image output.
    Image,
}

/// Prebuilt voice selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    /// Voice name, see [`VOICES`].
    pub voice_name: String,
}

/// Voice configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Prebuilt voice.
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

/// Speech synthesis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    /// Voice selection.
    pub voice_config: VoiceConfig,
}

impl SpeechConfig {
    /// Speech config selecting a prebuilt voice.
    pub fn voice(name: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: name.into() },
            },
        }
    }
}

/// Generation parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Requested output modalities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<Modality>>,
    /// Voice used for audio output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Top-k sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Maximum output tokens per turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Function declaration exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the tool description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// One entry of the `tools` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Client-executed functions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_declarations: Vec<ToolDefinition>,
    /// Server-side search grounding (`{}` to enable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_search: Option<Value>,
    /// Server-side code execution (`{}` to enable).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_execution: Option<Value>,
}

/// Setup configuration sent as the first frame of every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    /// Model resource name.
    pub model: String,
    /// Generation parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    /// System instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    /// Declared tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl LiveConfig {
    /// Create a configuration for the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), generation_config: None, system_instruction: None, tools: Vec::new() }
    }

    /// Create a builder.
    pub fn builder() -> LiveConfigBuilder {
        LiveConfigBuilder::new()
    }

    fn generation_mut(&mut self) -> &mut GenerationConfig {
        self.generation_config.get_or_insert_with(GenerationConfig::default)
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(Content::from_text(instruction));
        self
    }

    /// Set the prebuilt voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.generation_mut().speech_config = Some(SpeechConfig::voice(voice));
        self
    }

    /// Set output modalities.
    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.generation_mut().response_modalities = Some(modalities);
        self
    }

    /// Request audio-only output.
    pub fn with_audio_only(self) -> Self {
        self.with_modalities(vec![Modality::Audio])
    }

    /// Request text-only output.
    pub fn with_text_only(self) -> Self {
        self.with_modalities(vec![Modality::Text])
    }

    /// Set temperature.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.generation_mut().temperature = Some(temp);
        self
    }

    /// Declare a function tool.
    ///
    /// Function declarations are grouped into a single `tools` entry.
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        match self.tools.iter_mut().find(|t| !t.function_declarations.is_empty()) {
            Some(entry) => entry.function_declarations.push(tool),
            None => self.tools.push(Tool { function_declarations: vec![tool], ..Default::default() }),
        }
        self
    }

    /// Enable server-side search grounding.
    pub fn with_google_search(mut self) -> Self {
        self.tools.push(Tool { google_search: Some(serde_json::json!({})), ..Default::default() });
        self
    }

    /// All declared function tools.
    pub fn function_declarations(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter().flat_map(|t| t.function_declarations.iter())
    }

    /// Check the configuration before connecting.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(RealtimeError::config("model must not be empty"));
        }
        if let Some(temp) = self.generation_config.as_ref().and_then(|g| g.temperature) {
            if !(0.0..=2.0).contains(&temp) {
                return Err(RealtimeError::config(format!("temperature {temp} outside 0.0..=2.0")));
            }
        }
        Ok(())
    }
}

/// Builder for [`LiveConfig`].
#[derive(Debug, Clone, Default)]
pub struct LiveConfigBuilder {
    config: LiveConfig,
}

impl LiveConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the system instruction.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config = self.config.with_instruction(instruction);
        self
    }

    /// Set the voice.
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config = self.config.with_voice(voice);
        self
    }

    /// Set output modalities.
    pub fn modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.config = self.config.with_modalities(modalities);
        self
    }

    /// Add a tool.
    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.config = self.config.with_tool(tool);
        self
    }

    /// Set temperature.
    pub fn temperature(mut self, temp: f32) -> Self {
        self.config = self.config.with_temperature(temp);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<LiveConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Connection settings and reconnection policy for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// WebSocket endpoint without the credential.
    pub endpoint: String,
    /// API key appended as the `key` query parameter.
    pub api_key: SecretString,
    /// Reconnect attempts allowed after an unintentional close.
    pub max_retries: u32,
    /// Delay before the first reconnect; doubled on every further attempt.
    pub base_delay: Duration,
    /// Optional ceiling for the reconnect delay. `None` keeps the backoff uncapped.
    pub max_delay: Option<Duration>,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl SessionOptions {
    /// Options for the default endpoint with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: SecretString::from(api_key.into()),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: None,
            event_capacity: 256,
        }
    }

    /// Read the key from `GOOGLE_API_KEY` or `GEMINI_API_KEY`, and an
    /// endpoint override from `MMLIVE_ENDPOINT`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                RealtimeError::config("GOOGLE_API_KEY or GEMINI_API_KEY environment variable not set")
            })?;
        let mut options = Self::new(api_key);
        if let Ok(endpoint) = std::env::var("MMLIVE_ENDPOINT") {
            options.endpoint = endpoint;
        }
        Ok(options)
    }

    /// Set the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the number of reconnect attempts.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base reconnect delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Cap the reconnect delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Full connection URL with the credential appended.
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| RealtimeError::config(format!("invalid endpoint `{}`: {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RealtimeError::config(format!(
                "endpoint scheme must be ws or wss, got `{}`",
                url.scheme()
            )));
        }
        url.query_pairs_mut().append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }

    /// Delay before reconnect attempt number `attempt` (zero-based):
    /// `base_delay * 2^attempt`, capped by `max_delay` when set.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_serialization() {
        let config = LiveConfig::new("models/test")
            .with_audio_only()
            .with_voice("Kore")
            .with_instruction("Be brief.")
            .with_tool(ToolDefinition::new("get_weather").with_description("Weather lookup"))
            .with_google_search();

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "models/test",
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": { "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Kore" } } }
                },
                "systemInstruction": { "parts": [{ "text": "Be brief." }] },
                "tools": [
                    { "functionDeclarations": [{ "name": "get_weather", "description": "Weather lookup" }] },
                    { "googleSearch": {} }
                ]
            })
        );
    }

    #[test]
    fn test_tools_grouped_into_one_entry() {
        let config = LiveConfig::default()
            .with_tool(ToolDefinition::new("a"))
            .with_tool(ToolDefinition::new("b"));
        assert_eq!(config.tools.len(), 1);
        let names: Vec<_> = config.function_declarations().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_builder_validates() {
        assert!(LiveConfig::builder().model("").build().is_err());
        assert!(LiveConfig::builder().temperature(5.0).build().is_err());
        let config = LiveConfig::builder().voice("Puck").temperature(0.7).build().unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_url_appends_key() {
        let options = SessionOptions::new("secret-key").with_endpoint("wss://example.com/ws/live");
        let url = options.url().unwrap();
        assert_eq!(url.as_str(), "wss://example.com/ws/live?key=secret-key");
    }

    #[test]
    fn test_url_rejects_http() {
        let options = SessionOptions::new("k").with_endpoint("https://example.com");
        assert!(matches!(options.url(), Err(RealtimeError::ConfigError(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let options = SessionOptions::new("super-secret");
        assert!(!format!("{options:?}").contains("super-secret"));
    }

    #[test]
    fn test_backoff_doubles_uncapped() {
        let options = SessionOptions::new("k");
        assert_eq!(options.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(options.backoff_delay(3), Duration::from_millis(8000));
        assert_eq!(options.backoff_delay(10), Duration::from_millis(1_024_000));
    }

    #[test]
    fn test_backoff_cap() {
        let options = SessionOptions::new("k").with_max_delay(Duration::from_secs(5));
        assert_eq!(options.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(options.backoff_delay(3), Duration::from_secs(5));
        assert_eq!(options.backoff_delay(40), Duration::from_secs(5));
    }
}
