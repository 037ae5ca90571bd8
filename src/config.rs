//! TOML configuration parsing and validation.
//!
//! ```toml
//! [cache]
//! path = "./data/jobsight.sqlite"
//! persist = true
//!
//! [remote]
//! url = "https://abc123.supabase.co"
//! api_key_env = "SUPABASE_KEY"
//! table = "jobs"
//! timeout_secs = 10
//!
//! [classifier]
//! extra_inclusion = ['\bfoil\s+stamp\b']
//! extra_exclusion = []
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! Every section is optional. Without `[remote]` the service runs with a
//! local cache only and every update reports `synced_remotely: false`.

use anyhow::{bail, Context, Result};
use jobsight_core::classifier::Classifier;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Keep the cache in SQLite across restarts.
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            persist: default_persist(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/jobsight.sqlite")
}
fn default_persist() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// Project URL, e.g. `https://abc123.supabase.co`.
    pub url: String,
    /// Inline API key. Prefer `api_key_env` outside of tests.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "SUPABASE_KEY".to_string()
}
fn default_table() -> String {
    "jobs".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}

impl RemoteConfig {
    /// The API key, from `api_key` or the environment variable it names.
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env).with_context(|| {
            format!(
                "remote.api_key is not set and environment variable {} is missing",
                self.api_key_env
            )
        })
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub extra_inclusion: Vec<String>,
    #[serde(default)]
    pub extra_exclusion: Vec<String>,
}

impl ClassifierConfig {
    pub fn build(&self) -> Result<Classifier> {
        Classifier::with_extra(&self.extra_inclusion, &self.extra_exclusion)
            .context("Invalid classifier pattern")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// In-memory cache, no remote, default patterns.
    pub fn minimal() -> Self {
        Self {
            cache: CacheConfig {
                persist: false,
                ..CacheConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.persist && self.cache.path.as_os_str().is_empty() {
            bail!("cache.path must be set when cache.persist = true");
        }

        if let Some(remote) = &self.remote {
            if !(remote.url.starts_with("http://") || remote.url.starts_with("https://")) {
                bail!("remote.url must start with http:// or https://");
            }
            if remote.table.trim().is_empty() {
                bail!("remote.table must not be empty");
            }
            if remote.timeout_secs == 0 {
                bail!("remote.timeout_secs must be > 0");
            }
        }

        self.classifier.build()?;

        if self.server.bind.trim().is_empty() {
            bail!("server.bind must not be empty");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
