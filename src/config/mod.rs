//! Configuration management for scenecache

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::policy::{DomainPolicy, PolicyTable};
use crate::error::{ConfigError, Result};

/// Default pre-allocation for transfer buffers
pub const DEFAULT_RESERVE_SIZE: usize = 64 * 1024; // 64KB

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cache root directory (defaults to the platform cache dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Transfer buffer size hint used when a request does not give one
    #[serde(default = "default_reserve_size")]
    pub reserve_size: usize,

    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Policy applied to domains without an entry in `domains`
    #[serde(default)]
    pub default_policy: PolicyConfig,

    /// Per-domain policies keyed by host name
    #[serde(default)]
    pub domains: BTreeMap<String, PolicyConfig>,
}

/// HTTP transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every fetch
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Cool-down and refresh settings for one domain, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Wait imposed after a failed fetch before retrying
    pub cooldown_secs: u64,

    /// Maximum age of a cached file before it is re-fetched
    pub refresh_secs: u64,
}

fn default_reserve_size() -> usize {
    DEFAULT_RESERVE_SIZE
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("scenecache/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for PolicyConfig {
    // Unconfigured hosts get a long cool-down and a short refresh window
    fn default() -> Self {
        Self {
            cooldown_secs: 15 * 60,
            refresh_secs: 60 * 60,
        }
    }
}

impl From<PolicyConfig> for DomainPolicy {
    fn from(cfg: PolicyConfig) -> Self {
        DomainPolicy::new(
            Duration::from_secs(cfg.cooldown_secs),
            Duration::from_secs(cfg.refresh_secs),
        )
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".scenecache").join("config.yaml"))
    }

    /// Resolve the config path from an optional override
    pub fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Self::default_path(),
        }
    }

    /// Load configuration from an optional path, falling back to defaults
    /// when the file does not exist.
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        let path = Self::resolve_path(path)?;
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the cache cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Invalid("http.timeout_secs must be positive".to_string()).into());
        }
        if let Some(domain) = self.domains.keys().find(|d| d.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("empty domain name {:?}", domain)).into());
        }
        Ok(())
    }

    /// Build the read-only policy table for the cache manager
    pub fn policy_table(&self) -> PolicyTable {
        let mut table = PolicyTable::new(self.default_policy.into());
        for (domain, policy) in &self.domains {
            table.insert(domain, (*policy).into());
        }
        table
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            reserve_size: default_reserve_size(),
            http: HttpConfig::default(),
            default_policy: PolicyConfig::default(),
            domains: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.cache_dir.is_none());
        assert!(config.domains.is_empty());
        assert_eq!(config.reserve_size, DEFAULT_RESERVE_SIZE);
        assert_eq!(config.http.timeout_secs, 60);
        assert!(config.default_policy.cooldown_secs > 0);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.yaml");
        let config = Config::load_at(Some(path.to_str().unwrap())).unwrap();
        assert!(config.domains.is_empty());
    }

    #[test]
    fn test_load_domains() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "default_policy:\n  cooldown_secs: 900\n  refresh_secs: 600\ndomains:\n  tiles.example.com:\n    cooldown_secs: 60\n    refresh_secs: 3600\n",
        )
        .unwrap();

        let config = Config::load_from(path).unwrap();
        assert_eq!(config.default_policy.cooldown_secs, 900);
        assert_eq!(
            config.domains.get("tiles.example.com"),
            Some(&PolicyConfig {
                cooldown_secs: 60,
                refresh_secs: 3600
            })
        );

        let table = config.policy_table();
        assert_eq!(
            table.lookup("tiles.example.com").cooldown_duration(),
            Duration::from_secs(60)
        );
        assert_eq!(
            table.lookup("other.example.org").cooldown_duration(),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.http.timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
