//! Layered settings
//!
//! Settings come from an optional `config/default.toml`, an optional
//! environment-specific file, and `VOICECHAT__`-prefixed environment
//! variables, later sources overriding earlier ones. Every field has a
//! serde default except the model API key, which must be present.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Bot identity and prompting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    /// Seeded as the first user turn so the bot opens the conversation
    #[serde(default = "default_greeting_instruction")]
    pub greeting_instruction: String,
}

fn default_bot_name() -> String {
    "voicechat-bot".to_string()
}

fn default_system_instruction() -> String {
    "You are a friendly voice assistant. Keep responses short and \
     conversational; your output will be spoken aloud."
        .to_string()
}

fn default_greeting_instruction() -> String {
    "Start by briefly introducing yourself.".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            system_instruction: default_system_instruction(),
            greeting_instruction: default_greeting_instruction(),
        }
    }
}

/// Speech model backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Backend API key; required at startup
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_true")]
    pub transcribe_user_audio: bool,
    #[serde(default = "default_true")]
    pub transcribe_bot_audio: bool,
}

fn default_voice_id() -> String {
    "Puck".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: default_voice_id(),
            transcribe_user_audio: default_true(),
            transcribe_bot_audio: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Audio formats at the transport boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_in_rate")]
    pub in_sample_rate: u32,
    #[serde(default = "default_out_rate")]
    pub out_sample_rate: u32,
}

fn default_in_rate() -> u32 {
    16_000
}

fn default_out_rate() -> u32 {
    24_000
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            in_sample_rate: default_in_rate(),
            out_sample_rate: default_out_rate(),
        }
    }
}

/// Pipeline runtime switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_true")]
    pub allow_interruptions: bool,
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
    #[serde(default = "default_true")]
    pub enable_usage_metrics: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            enable_metrics: true,
            enable_usage_metrics: true,
        }
    }
}

/// Root settings tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.api_key.trim().is_empty() {
            return Err(ConfigError::MissingField("model.api_key".to_string()));
        }
        const VALID_RATES: [u32; 5] = [8_000, 16_000, 24_000, 44_100, 48_000];
        for (field, rate) in [
            ("audio.in_sample_rate", self.audio.in_sample_rate),
            ("audio.out_sample_rate", self.audio.out_sample_rate),
        ] {
            if !VALID_RATES.contains(&rate) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("unsupported sample rate {rate}"),
                });
            }
        }
        Ok(())
    }
}

/// Load settings from files and environment
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder =
        Config::builder().add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICECHAT")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    tracing::debug!(environment = env.unwrap_or("default"), "settings loaded");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Settings {
        Settings {
            model: ModelConfig {
                api_key: "test-key".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_fill_in() {
        let settings = valid();
        assert_eq!(settings.audio.in_sample_rate, 16_000);
        assert!(settings.pipeline.allow_interruptions);
        assert_eq!(settings.model.voice_id, "Puck");
        settings.validate().unwrap();
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let settings = Settings::default();
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "model.api_key"));
    }

    #[test]
    fn test_bad_sample_rate_rejected() {
        let mut settings = valid();
        settings.audio.in_sample_rate = 11_025;
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
