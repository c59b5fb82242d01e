use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "RESEARCH_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "research.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: "ResearchAssistant/1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            request_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/research.db"),
            export_dir: PathBuf::from("data/exports"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
        }
    }
}

/// Collection defaults and ceilings applied to every research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollectionLimits {
    pub default_max_threads: u32,
    pub max_threads_limit: u32,
    pub default_max_comments_per_thread: u32,
    pub max_comments_per_thread_limit: u32,
    pub total_comments_cap: usize,
    pub llm_batch_size: usize,
}

impl Default for CollectionLimits {
    fn default() -> Self {
        Self {
            default_max_threads: 15,
            max_threads_limit: 25,
            default_max_comments_per_thread: 100,
            max_comments_per_thread_limit: 200,
            total_comments_cap: 750,
            llm_batch_size: 20,
        }
    }
}

impl CollectionLimits {
    pub fn clamp_threads(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_max_threads)
            .clamp(1, self.max_threads_limit)
    }

    pub fn clamp_comments_per_thread(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_max_comments_per_thread)
            .clamp(1, self.max_comments_per_thread_limit)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads_limit == 0
            || self.max_comments_per_thread_limit == 0
            || self.total_comments_cap == 0
            || self.llm_batch_size == 0
        {
            return Err(ConfigError::ValidationFailed {
                reason: "collection limits must be greater than zero".to_string(),
            });
        }
        if self.default_max_threads > self.max_threads_limit {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "default_max_threads ({}) exceeds max_threads_limit ({})",
                    self.default_max_threads, self.max_threads_limit
                ),
            });
        }
        if self.default_max_comments_per_thread > self.max_comments_per_thread_limit {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "default_max_comments_per_thread ({}) exceeds max_comments_per_thread_limit ({})",
                    self.default_max_comments_per_thread, self.max_comments_per_thread_limit
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub reddit: RedditConfig,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub limits: CollectionLimits,
}

impl AppConfig {
    /// Reads the TOML file named by `RESEARCH_CONFIG` (or `research.toml`),
    /// then applies environment overrides. A missing file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            Self::from_file(&path)?
        } else {
            debug!("No configuration file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileUnreadable {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get("REDDIT_CLIENT_ID") {
            self.reddit.client_id = value;
        }
        if let Some(value) = get("REDDIT_CLIENT_SECRET") {
            self.reddit.client_secret = value;
        }
        if let Some(value) = get("REDDIT_USER_AGENT") {
            self.reddit.user_agent = value;
        }
        if let Some(value) = get("OPENAI_API_KEY") {
            self.llm.api_key = value;
        }
        if let Some(value) = get("OPENAI_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = get("LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = get("DB_PATH") {
            self.storage.db_path = PathBuf::from(value);
        }
        if let Some(value) = get("EXPORT_DIR") {
            self.storage.export_dir = PathBuf::from(value);
        }
        if let Some(value) = get("BIND_ADDR") {
            self.server.bind_addr = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        if self.reddit.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "reddit.user_agent".to_string(),
                value: self.reddit.user_agent.clone(),
            });
        }
        Ok(())
    }

    /// Credentials are only needed once the process talks to Reddit and the LLM.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        let missing = [
            ("REDDIT_CLIENT_ID", &self.reddit.client_id),
            ("REDDIT_CLIENT_SECRET", &self.reddit.client_secret),
            ("OPENAI_API_KEY", &self.llm.api_key),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        match missing {
            Some((field, _)) => Err(ConfigError::MissingField {
                field: field.to_string(),
            }),
            None => Ok(()),
        }
    }
}
