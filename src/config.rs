use std::path::Path;

use serde::Deserialize;

use crate::types::SamplingOptions;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub sampling: SamplingOptions,
    #[serde(default)]
    pub state: StateConfig,
}

/// Inference server connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Default model when the caller does not pick one.
    #[serde(default)]
    pub model: String,
    /// Fail fast if the endpoint never answers the connection attempt.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Overall deadline for one generation, stalls included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Interval for the background connection-liveness poll.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    /// Key under which the conversation snapshot is stored.
    #[serde(default = "default_conversation_key")]
    pub conversation_key: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            conversation_key: default_conversation_key(),
        }
    }
}

fn default_conversation_key() -> String {
    "chat-messages".to_string()
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
