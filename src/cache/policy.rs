//! Per-domain cool-down and refresh policy
//!
//! Pure lookup and arithmetic: nothing here mutates after the table is built.
//! Times are whole seconds on the manager's clock.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Url;

use crate::error::CacheError;

/// Cool-down and refresh settings for one content domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainPolicy {
    cooldown: Duration,
    refresh: Duration,
}

impl DomainPolicy {
    pub const fn new(cooldown: Duration, refresh: Duration) -> Self {
        Self { cooldown, refresh }
    }

    /// Wait imposed after a failure before the resource may be retried
    pub fn cooldown_duration(&self) -> Duration {
        self.cooldown
    }

    /// Maximum age of a successful download before it must be re-fetched
    pub fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    /// `max(0, cooldown - (now - cool_down_timestamp))`, never above the
    /// cool-down even when the clock stepped backwards
    pub fn seconds_remaining_in_cooldown(&self, cool_down_timestamp: i64, now: i64) -> u64 {
        let elapsed = now.saturating_sub(cool_down_timestamp).max(0);
        let cooldown = i64::try_from(self.cooldown.as_secs()).unwrap_or(i64::MAX);
        cooldown.saturating_sub(elapsed).max(0) as u64
    }

    /// `now - last_time_modified > refresh_interval`
    pub fn is_stale(&self, last_time_modified: i64, now: i64) -> bool {
        let age = now.saturating_sub(last_time_modified);
        let refresh = i64::try_from(self.refresh.as_secs()).unwrap_or(i64::MAX);
        age > refresh
    }
}

/// Read-only domain → policy table with a fallback entry.
///
/// Lookup tries the exact host, then each parent domain, then the default.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    default: DomainPolicy,
    domains: HashMap<String, DomainPolicy>,
}

impl PolicyTable {
    /// Create a table holding only the fallback policy
    pub fn new(default: DomainPolicy) -> Self {
        Self {
            default,
            domains: HashMap::new(),
        }
    }

    /// Register a policy for a domain (case-insensitive)
    pub fn insert(&mut self, domain: &str, policy: DomainPolicy) {
        self.domains.insert(domain.to_ascii_lowercase(), policy);
    }

    /// Builder-style variant of [`PolicyTable::insert`]
    pub fn with_domain(mut self, domain: &str, policy: DomainPolicy) -> Self {
        self.insert(domain, policy);
        self
    }

    /// Fallback policy for unconfigured domains
    pub fn default_policy(&self) -> DomainPolicy {
        self.default
    }

    /// Resolve the policy that governs `domain`
    pub fn lookup(&self, domain: &str) -> DomainPolicy {
        self.matching_entry(domain)
            .map(|(_, policy)| policy)
            .unwrap_or(self.default)
    }

    /// The configured domain name that matched, if any
    pub fn matching_entry(&self, domain: &str) -> Option<(&str, DomainPolicy)> {
        let domain = domain.to_ascii_lowercase();
        let mut candidate = domain.as_str();
        loop {
            if let Some((name, policy)) = self.domains.get_key_value(candidate) {
                return Some((name.as_str(), *policy));
            }
            match candidate.split_once('.') {
                Some((_, parent)) if !parent.is_empty() => candidate = parent,
                _ => return None,
            }
        }
    }

    pub fn cooldown_duration(&self, domain: &str) -> Duration {
        self.lookup(domain).cooldown_duration()
    }

    pub fn refresh_interval(&self, domain: &str) -> Duration {
        self.lookup(domain).refresh_interval()
    }

    pub fn seconds_remaining_in_cooldown(
        &self,
        cool_down_timestamp: i64,
        now: i64,
        domain: &str,
    ) -> u64 {
        self.lookup(domain)
            .seconds_remaining_in_cooldown(cool_down_timestamp, now)
    }

    pub fn is_stale(&self, last_time_modified: i64, now: i64, domain: &str) -> bool {
        self.lookup(domain).is_stale(last_time_modified, now)
    }
}

/// Extract the policy domain (lowercased host) from a resource URL
pub fn domain_of(url: &str) -> Result<String, CacheError> {
    let parsed = Url::parse(url).map_err(|e| CacheError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CacheError::InvalidUrl(format!(
                "{}: unsupported scheme {}",
                url, other
            )));
        }
    }
    parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| CacheError::InvalidUrl(format!("{}: missing host", url)))
}
