use serde::{Deserialize, Serialize};
use std::fmt;

/// Persona used when a room is started without a directive.
pub const DEFAULT_DIRECTIVE: &str = "Be a helpful teammate named Mandy.";

fn default_bot_name() -> String {
    "Mandy".to_string()
}

fn default_directive() -> String {
    DEFAULT_DIRECTIVE.to_string()
}

fn default_llm_model() -> String {
    "gpt-4".to_string()
}

fn default_voice_id() -> String {
    "71a7ad14-091c-4e8e-a314-022ece01c121".to_string()
}

/// Settings the controller uses to build transports and pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name the agent joins rooms with.
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    /// System prompt when the room's directive is empty.
    #[serde(default = "default_directive")]
    pub default_directive: String,
    /// Inserts a frame-logging stage after transport input.
    #[serde(default)]
    pub debug_frames: bool,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            default_directive: default_directive(),
            debug_frames: false,
            stt: SttConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Returns the system prompt for a room directive.
    pub fn system_prompt<'a>(&'a self, directive: &'a str) -> &'a str {
        if directive.is_empty() {
            &self.default_directive
        } else {
            directive
        }
    }
}

/// Speech-to-text service credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
}

impl fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttConfig")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Language model service settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_llm_model(),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

/// Text-to-speech service settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: default_voice_id(),
        }
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .finish()
    }
}
