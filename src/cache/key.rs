//! Resource keys identifying cache objects

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identifier correlating a requested resource to its cache object.
///
/// Either a logical resource path supplied by the caller, or derived from the
/// resource URL with [`ResourceKey::from_url`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Use a logical resource path as the key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive a key from a URL (hex SHA-256 of the trimmed URL)
    pub fn from_url(url: &str) -> Self {
        Self(hash_hex(url.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File-system safe digest of the key, used to name the cached file
    pub fn digest(&self) -> String {
        hash_hex(&self.0)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

fn hash_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}
