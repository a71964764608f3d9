//! runtime configuration
//!
//! resolved once at startup (toml file, then environment overrides) and
//! shared read-only afterwards.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_METADATA_URL: &str = "https://metadata.tor.us";
pub const DEFAULT_NAMESPACE: &str = "tkey";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const ENV_METADATA_URL: &str = "TKEY_METADATA_URL";
pub const ENV_NAMESPACE: &str = "TKEY_NAMESPACE";
pub const ENV_TIMEOUT_SECS: &str = "TKEY_REQUEST_TIMEOUT_SECS";
pub const ENV_RESPLIT_POLICY: &str = "TKEY_RESPLIT_POLICY";

/// what `split_key` does when the remote share belongs to another key
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResplitPolicy {
    /// overwrite the remote share with a fresh split of the supplied secret.
    /// the previous key becomes unrecoverable through this identity.
    #[default]
    Force,
    /// fail and leave the remote share untouched
    Refuse,
}

impl FromStr for ResplitPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "force" => Ok(Self::Force),
            "refuse" => Ok(Self::Refuse),
            other => Err(Error::Config(format!("unknown resplit policy: {}", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// metadata service base url
    pub metadata_url: String,
    /// namespace for provider share records
    pub namespace: String,
    /// per-request timeout for the metadata service
    pub request_timeout_secs: u64,
    pub resplit_policy: ResplitPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_url: DEFAULT_METADATA_URL.into(),
            namespace: DEFAULT_NAMESPACE.into(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            resplit_policy: ResplitPolicy::default(),
        }
    }
}

impl Config {
    /// defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// toml file with environment overrides applied
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)?.with_env_overrides()
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup(ENV_METADATA_URL) {
            self.metadata_url = url;
        }
        if let Some(ns) = lookup(ENV_NAMESPACE) {
            self.namespace = ns;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            self.request_timeout_secs = secs
                .parse()
                .map_err(|_| Error::Config(format!("{} must be an integer", ENV_TIMEOUT_SECS)))?;
        }
        if let Some(policy) = lookup(ENV_RESPLIT_POLICY) {
            self.resplit_policy = policy.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.metadata_url.starts_with("http://") || self.metadata_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "metadata_url must be http(s): {}",
                self.metadata_url
            )));
        }
        if self.namespace.is_empty() {
            return Err(Error::Config("namespace must not be empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// base url without a trailing slash
    pub fn base_url(&self) -> &str {
        self.metadata_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
