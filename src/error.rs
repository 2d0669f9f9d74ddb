//! Error types for scenecache

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for scenecache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the application
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Resource {key} is cooling down, retry in {seconds_left}s")]
    PolicyBlocked { key: String, seconds_left: u64 },

    #[error("Operation failed: {0}")]
    Other(String),
}

/// Local storage errors (disk store and object index)
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Could not determine a cache directory")]
    NoHome,

    #[error("Cache I/O error: {0}")]
    Io(String),

    #[error("Cache index error: {0}")]
    Index(String),

    #[error("Invalid resource URL: {0}")]
    InvalidUrl(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Index(err.to_string())
    }
}

/// Network transfer errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Transfer task failed: {0}")]
    Task(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Network("Failed to connect to host".to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Classification of the most recent failure recorded on a cache object.
///
/// Transport and filesystem failures both start the domain cool-down, and so
/// does an explicit cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or HTTP-level failure
    Transport,
    /// Writing or inspecting the cached file failed
    Filesystem,
    /// Transfer closed by the caller before it finished
    Canceled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Transport => "transport",
            FailureKind::Filesystem => "filesystem",
            FailureKind::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_status_message() {
        let err = TransportError::Status {
            status: 404,
            url: "https://tiles.example.com/a.png".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("tiles.example.com"));
    }

    #[test]
    fn test_transport_error_timeout() {
        assert!(TransportError::Timeout.to_string().contains("timed out"));
    }

    #[test]
    fn test_cache_error_invalid_url() {
        let err = CacheError::InvalidUrl("not a url".to_string());
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn test_policy_blocked_message() {
        let err = Error::PolicyBlocked {
            key: "abc".to_string(),
            seconds_left: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("abc"));
        assert!(msg.contains("42s"));
    }

    #[test]
    fn test_config_error_invalid() {
        let err = ConfigError::Invalid("bad format".to_string());
        assert!(err.to_string().contains("bad format"));
    }

    #[test]
    fn test_error_from_cache_error() {
        let err: Error = CacheError::NoHome.into();
        match err {
            Error::Cache(CacheError::NoHome) => (),
            _ => panic!("Expected Error::Cache(CacheError::NoHome)"),
        }
    }

    #[test]
    fn test_error_from_transport_error() {
        let err: Error = TransportError::Timeout.into();
        match err {
            Error::Transport(TransportError::Timeout) => (),
            _ => panic!("Expected Error::Transport(TransportError::Timeout)"),
        }
    }

    #[test]
    fn test_config_error_from_yaml_error() {
        let yaml_str = "invalid: [yaml: content";
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let config_err: ConfigError = yaml_err.into();

        match config_err {
            ConfigError::ParseError(_) => (),
            _ => panic!("Expected ConfigError::ParseError"),
        }
    }

    #[test]
    fn test_failure_kind_display_and_serde() {
        assert_eq!(FailureKind::Canceled.to_string(), "canceled");
        let json = serde_json::to_string(&FailureKind::Filesystem).unwrap();
        assert_eq!(json, "\"filesystem\"");
    }
}
