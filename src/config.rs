use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://api.cohere.ai/v1";
pub const DEFAULT_MODEL: &str = "command-r-plus";
pub const DEFAULT_TEMPERATURE: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Inbound model name → Cohere model name.
    #[serde(default)]
    pub models: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Header checked for the caller's key when no `Authorization: Bearer` is sent.
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            defaults: DefaultsConfig::default(),
            auth: AuthConfig::default(),
            models: HashMap::new(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file, falling back to built-in defaults.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        let base_url = self.upstream.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ProxyError::config(format!(
                "upstream.base_url must be an http(s) URL, got '{}'",
                self.upstream.base_url
            )));
        }
        if self.defaults.model.trim().is_empty() {
            return Err(ProxyError::config("defaults.model must not be empty"));
        }
        if self.auth.api_key_header.trim().is_empty() {
            return Err(ProxyError::config("auth.api_key_header must not be empty"));
        }
        Ok(())
    }

    /// Full URL of the upstream chat endpoint.
    pub fn chat_url(&self) -> String {
        format!("{}/chat", self.upstream.base_url.trim_end_matches('/'))
    }

    /// Resolve the Cohere model for an inbound model name.
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        match requested {
            Some(name) => self
                .models
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string()),
            None => self.defaults.model.clone(),
        }
    }
}

/// Candidate config locations, in lookup order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("cohere-adapter.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("cohere-adapter").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("cohere-adapter").join("config.toml"));
        paths.push(home.join(".cohere-adapter.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
