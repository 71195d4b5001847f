use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api: ApiConfig,
    pub chat: ChatConfig,
    pub title: TitleConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub default_model: String,
    pub default_temperature: f32,
    pub default_system_prompt: String,
}

/// Model and token cap used for conversation titles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleConfig {
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Filesystem,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let config = Config::builder()
            .set_default("api.base_url", "https://api.openai.com/v1")?
            .set_default("api.request_timeout_secs", 120)?
            .set_default("chat.default_model", "gpt-4o")?
            .set_default("chat.default_temperature", 0.7)?
            .set_default("chat.default_system_prompt", "")?
            .set_default("title.model", "gpt-4o-mini")?
            .set_default("title.max_tokens", 20)?
            .set_default("storage.backend", "sqlite")?
            .set_default("storage.path", "./parley-data")?
            .set_default("logging.level", "info")?
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Credential from the environment, used to seed an empty preference store
    pub fn api_key() -> Option<String> {
        env::var("OPENAI_API_KEY").ok().filter(|key| !key.trim().is_empty())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                request_timeout_secs: 120,
            },
            chat: ChatConfig {
                default_model: "gpt-4o".to_string(),
                default_temperature: 0.7,
                default_system_prompt: String::new(),
            },
            title: TitleConfig {
                model: "gpt-4o-mini".to_string(),
                max_tokens: 20,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                path: "./parley-data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}
