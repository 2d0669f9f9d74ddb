//! Display rows for table/JSON output

use serde::Serialize;
use tabled::Tabled;

use crate::cache::storage::IndexRecord;
use crate::cache::{PolicyTable, Response, ResponseKind};
use crate::output::{format_seconds, format_size, format_timestamp};

/// One request outcome
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct ResponseRow {
    #[tabled(rename = "STATUS")]
    pub status: String,

    #[tabled(rename = "URL")]
    pub url: String,

    /// Cached path, retry delay, or failure class
    #[tabled(rename = "DETAIL")]
    pub detail: String,
}

impl From<&Response> for ResponseRow {
    fn from(response: &Response) -> Self {
        let (status, detail) = match &response.kind {
            ResponseKind::CacheHit { path } => ("cached", path.display().to_string()),
            ResponseKind::DownloadStarted => ("started", "--".to_string()),
            ResponseKind::DownloadInProgress => ("in progress", "--".to_string()),
            ResponseKind::CoolingDown { seconds_left } => (
                "cooling down",
                format!("retry in {}", format_seconds(*seconds_left)),
            ),
            ResponseKind::Error { classification } => {
                ("failed", format!("{} error", classification))
            }
        };
        Self {
            status: status.to_string(),
            url: response.url.clone(),
            detail,
        }
    }
}

/// Policy resolved for one URL or configured domain
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct PolicyRow {
    #[tabled(rename = "TARGET")]
    pub target: String,

    /// Configured domain that matched, or "default"
    #[tabled(rename = "DOMAIN")]
    pub matched: String,

    #[tabled(rename = "COOL-DOWN")]
    pub cooldown: String,

    #[tabled(rename = "REFRESH")]
    pub refresh: String,
}

impl PolicyRow {
    /// Resolve the row for a host name
    pub fn resolve(target: &str, domain: &str, table: &PolicyTable) -> Self {
        let (matched, policy) = match table.matching_entry(domain) {
            Some((name, policy)) => (name.to_string(), policy),
            None => ("default".to_string(), table.default_policy()),
        };
        Self {
            target: target.to_string(),
            matched,
            cooldown: format_seconds(policy.cooldown_duration().as_secs()),
            refresh: format_seconds(policy.refresh_interval().as_secs()),
        }
    }
}

/// One persisted cache entry
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct IndexRow {
    #[tabled(rename = "KEY")]
    pub key: String,

    #[tabled(rename = "DOMAIN")]
    pub domain: String,

    #[tabled(rename = "SIZE")]
    pub size: String,

    #[tabled(rename = "FETCHED")]
    pub fetched: String,

    #[tabled(rename = "STALE")]
    pub stale: bool,

    #[tabled(rename = "PATH")]
    pub path: String,
}

impl IndexRow {
    pub fn new(record: &IndexRecord, table: &PolicyTable, now: i64) -> Self {
        Self {
            key: record.key.to_string(),
            domain: record.domain.clone(),
            size: format_size(record.size_bytes),
            fetched: format_timestamp(record.last_time_modified),
            stale: table.is_stale(record.last_time_modified, now, &record.domain),
            path: record.disk_location.display().to_string(),
        }
    }
}
