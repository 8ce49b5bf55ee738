//! Server configuration loading from file and environment variables.

use mandy_voice::AgentConfig;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Agent persona, pipeline services and their credentials.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Room joined at boot, if any.
    #[serde(default)]
    pub autostart: AutostartConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "mandy_voice=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Room the server starts an agent in at boot.
#[derive(Clone, Default, Deserialize)]
pub struct AutostartConfig {
    #[serde(default)]
    pub room_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub directive: Option<String>,
}

impl fmt::Debug for AutostartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutostartConfig")
            .field("room_url", &self.room_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("directive", &self.directive)
            .finish()
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `MANDY_HOST` overrides `server.host`
/// - `MANDY_PORT` overrides `server.port`
/// - `MANDY_LOG_LEVEL` overrides `logging.level`
/// - `MANDY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `MANDY_DEBUG_FRAMES` overrides `agent.debug_frames`
/// - `DEEPGRAM_API_KEY`, `OPENAI_API_KEY`, `CARTESIA_API_KEY` set the
///   speech-to-text, language model and text-to-speech keys
/// - `MANDY_ROOM_URL` / `MANDY_ROOM_TOKEN` set the autostart room
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Applies overrides looked up by variable name.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("MANDY_HOST") {
        match host.parse() {
            Ok(parsed) => config.server.host = parsed,
            Err(_) => tracing::warn!(value = %host, "ignoring invalid MANDY_HOST"),
        }
    }
    if let Some(port) = lookup("MANDY_PORT") {
        match port.parse() {
            Ok(parsed) => config.server.port = parsed,
            Err(_) => tracing::warn!(value = %port, "ignoring invalid MANDY_PORT"),
        }
    }
    if let Some(level) = lookup("MANDY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("MANDY_LOG_JSON") {
        config.logging.json = is_truthy(&json);
    }
    if let Some(debug) = lookup("MANDY_DEBUG_FRAMES") {
        config.agent.debug_frames = is_truthy(&debug);
    }
    if let Some(key) = lookup("DEEPGRAM_API_KEY") {
        config.agent.stt.api_key = key;
    }
    if let Some(key) = lookup("OPENAI_API_KEY") {
        config.agent.llm.api_key = key;
    }
    if let Some(key) = lookup("CARTESIA_API_KEY") {
        config.agent.tts.api_key = key;
    }
    if let Some(url) = lookup("MANDY_ROOM_URL").filter(|v| !v.trim().is_empty()) {
        config.autostart.room_url = Some(url);
    }
    if let Some(token) = lookup("MANDY_ROOM_TOKEN").filter(|v| !v.trim().is_empty()) {
        config.autostart.token = Some(token);
    }
}

fn is_truthy(value: &str) -> bool {
    value == "true" || value == "1"
}
