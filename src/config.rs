use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChatError;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_MAX_TOKENS: u32 = 20000;
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub const MODEL_ENV: &str = "RASSIST_MODEL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model_id: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            model_id: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stream: default_stream(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_stream() -> bool {
    true
}

impl ApiConfig {
    /// Overlay environment variables (and a `.env` file, if present)
    pub fn apply_env_overrides(&mut self) {
        let _ = dotenvy::dotenv();
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`; empty values are ignored
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(API_KEY_ENV) {
            debug!("api key taken from {}", API_KEY_ENV);
            self.api_key = key.trim().to_string();
        }
        if let Some(url) = non_empty(BASE_URL_ENV) {
            self.base_url = url.trim().to_string();
        }
        if let Some(model) = non_empty(MODEL_ENV) {
            self.model_id = model.trim().to_string();
        }
    }

    /// Check everything a request needs before any network call is made
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.api_key.trim().is_empty() {
            return Err(ChatError::Configuration(format!(
                "no API key configured (set {} or run `rassist config set-key`)",
                API_KEY_ENV
            )));
        }
        if self.model_id.trim().is_empty() {
            return Err(ChatError::Configuration(
                "model identifier is empty".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ChatError::Configuration(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ChatError::Configuration(format!(
                "temperature {} is outside [0, 1]",
                self.temperature
            )));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ChatError::Configuration(format!(
                "base url {:?} is not an http(s) url",
                self.base_url
            )));
        }
        Ok(())
    }

    /// API key with everything but the last four characters hidden
    pub fn redacted_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.is_empty() {
            return "(not set)".to_string();
        }
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(8), tail)
    }
}

pub fn default_api_config_path() -> PathBuf {
    let Some(dirs) = ProjectDirs::from("com", "rassist", "rassist") else {
        return Path::new("rassist-config.json").to_path_buf();
    };
    dirs.config_dir().join("config.json")
}

/// Load the config file; a missing file yields the defaults
pub fn load_api_config(path: &Path) -> Result<ApiConfig, ChatError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(ApiConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice::<ApiConfig>(&bytes).map_err(|e| {
        ChatError::Configuration(format!("invalid config file {}: {}", path.display(), e))
    })
}

pub fn save_api_config(path: &Path, cfg: &ApiConfig) -> Result<(), ChatError> {
    let json = serde_json::to_vec_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json)?;
    Ok(())
}
