//! Per-resource cache state
//!
//! A [`CacheObject`] carries everything the manager knows about one resource:
//! where the cached file lives, what went wrong last time, when its cool-down
//! started, and the transfer handle while a fetch is in flight. It holds no
//! policy of its own; callers pass the governing [`DomainPolicy`] and `now`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::cache::key::ResourceKey;
use crate::cache::policy::DomainPolicy;
use crate::cache::storage::IndexRecord;
use crate::error::{FailureKind, TransportError};
use crate::transfer::{FetchMeta, TransferHandle, TransferOutcome, Transport};

/// Logical lifecycle state of a cache object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    /// No transfer and no active cool-down
    Idle,
    /// A transfer handle is owned
    Downloading,
    /// Recent failure, retries blocked
    CoolingDown,
    /// Recent explicit abort, retries blocked
    Canceled,
}

/// Outcome the manager decided on, fed to [`CacheObject::derive_response`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    CacheHit,
    DownloadStarted,
    DownloadInProgress,
    CoolingDown,
    DownloadFailed,
}

/// Value returned to collaborators for a request or completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub key: ResourceKey,
    pub url: String,
    #[serde(flatten)]
    pub kind: ResponseKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseKind {
    CacheHit { path: PathBuf },
    DownloadStarted,
    DownloadInProgress,
    CoolingDown { seconds_left: u64 },
    Error { classification: FailureKind },
}

/// Diagnostic view of a cache object
#[derive(Debug, Clone, Serialize)]
pub struct ObjectSnapshot {
    pub key: ResourceKey,
    pub domain: String,
    pub state: ObjectState,
    pub disk_location: Option<PathBuf>,
    pub last_url: String,
    pub last_error: Option<FailureKind>,
    pub last_time_modified: Option<i64>,
    pub cool_down_seconds_left: u64,
    pub received_bytes: Option<usize>,
}

/// State record for one cached resource.
///
/// Dropping the object drops its transfer handle, which closes the transfer.
#[derive(Debug)]
pub struct CacheObject {
    key: ResourceKey,
    domain: String,
    disk_location: Option<PathBuf>,
    last_url: String,
    last_error: Option<FailureKind>,
    last_time_modified: Option<i64>,
    remote_last_modified: Option<i64>,
    size_bytes: u64,
    cool_down_timestamp: Option<i64>,
    transfer: Option<TransferHandle>,
}

impl CacheObject {
    /// Fresh object with nothing cached
    pub fn new(key: ResourceKey, domain: impl Into<String>) -> Self {
        Self {
            key,
            domain: domain.into(),
            disk_location: None,
            last_url: String::new(),
            last_error: None,
            last_time_modified: None,
            remote_last_modified: None,
            size_bytes: 0,
            cool_down_timestamp: None,
            transfer: None,
        }
    }

    /// Rebuild an object from its persisted index entry.
    ///
    /// Cool-down, last error and transfer state are never persisted.
    pub fn from_record(record: IndexRecord) -> Self {
        Self {
            key: record.key,
            domain: record.domain,
            disk_location: Some(record.disk_location),
            last_url: record.last_url,
            last_error: None,
            last_time_modified: Some(record.last_time_modified),
            remote_last_modified: record.remote_last_modified,
            size_bytes: record.size_bytes,
            cool_down_timestamp: None,
            transfer: None,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn disk_location(&self) -> Option<&Path> {
        self.disk_location.as_deref()
    }

    pub fn last_url(&self) -> &str {
        &self.last_url
    }

    pub fn last_error(&self) -> Option<FailureKind> {
        self.last_error
    }

    pub fn last_time_modified(&self) -> Option<i64> {
        self.last_time_modified
    }

    pub fn cool_down_timestamp(&self) -> Option<i64> {
        self.cool_down_timestamp
    }

    pub fn is_cached(&self) -> bool {
        self.disk_location.is_some()
    }

    pub fn has_transfer(&self) -> bool {
        self.transfer.is_some()
    }

    pub fn transfer_mut(&mut self) -> Option<&mut TransferHandle> {
        self.transfer.as_mut()
    }

    pub fn state(&self, policy: &DomainPolicy, now: i64) -> ObjectState {
        if self.transfer.is_some() {
            ObjectState::Downloading
        } else if self.cool_down_seconds_left(policy, now) > 0 {
            match self.last_error {
                Some(FailureKind::Canceled) => ObjectState::Canceled,
                _ => ObjectState::CoolingDown,
            }
        } else {
            ObjectState::Idle
        }
    }

    /// Explicit reset of the per-session fields
    pub fn reset(&mut self) {
        self.cool_down_timestamp = None;
        self.last_url.clear();
        self.last_error = None;
    }

    /// Clear the cool-down clock ahead of a new attempt
    pub fn reset_cool_down_time(&mut self) {
        self.cool_down_timestamp = None;
    }

    pub fn trigger_cool_down(&mut self, now: i64) {
        self.cool_down_timestamp = Some(now);
    }

    /// Seconds until a new attempt is allowed; 0 means eligible
    pub fn cool_down_seconds_left(&self, policy: &DomainPolicy, now: i64) -> u64 {
        self.cool_down_timestamp
            .map(|ts| policy.seconds_remaining_in_cooldown(ts, now))
            .unwrap_or(0)
    }

    /// Never-downloaded objects always need a fetch
    pub fn needs_refresh(&self, policy: &DomainPolicy, now: i64) -> bool {
        match (self.disk_location.as_ref(), self.last_time_modified) {
            (Some(_), Some(modified)) => policy.is_stale(modified, now),
            _ => true,
        }
    }

    /// Forget a cached file that disappeared out-of-band
    pub fn invalidate(&mut self) {
        self.disk_location = None;
        self.last_time_modified = None;
        self.remote_last_modified = None;
        self.size_bytes = 0;
    }

    pub fn record_attempt(&mut self, url: &str) {
        self.last_url = url.to_string();
    }

    /// Start the owned transfer. Fails if one is already in flight.
    pub fn create_transfer(
        &mut self,
        transport: Arc<dyn Transport>,
        url: &str,
        reserve_size: usize,
    ) -> Result<(), TransportError> {
        if self.transfer.is_some() {
            return Err(TransportError::Task(format!(
                "transfer already active for {}",
                self.key
            )));
        }
        self.transfer = Some(TransferHandle::start(transport, url, reserve_size)?);
        Ok(())
    }

    /// Close and drop the owned transfer, if any. No-op without one.
    pub fn close_transfer(&mut self) -> Option<TransferOutcome> {
        self.transfer.take().map(|mut handle| handle.close())
    }

    /// Apply a committed download
    pub fn record_success(&mut self, path: PathBuf, size_bytes: u64, meta: &FetchMeta, now: i64) {
        self.disk_location = Some(path);
        self.size_bytes = size_bytes;
        self.last_time_modified = Some(now);
        self.remote_last_modified = meta.last_modified.map(|dt| dt.timestamp());
        self.last_error = None;
    }

    /// Apply a failed attempt and start the cool-down
    pub fn record_failure(&mut self, kind: FailureKind, now: i64) {
        self.last_error = Some(kind);
        self.trigger_cool_down(now);
    }

    /// Index entry for a cached object
    pub fn to_record(&self) -> Option<IndexRecord> {
        let disk_location = self.disk_location.clone()?;
        Some(IndexRecord {
            key: self.key.clone(),
            domain: self.domain.clone(),
            disk_location,
            last_url: self.last_url.clone(),
            last_time_modified: self.last_time_modified?,
            remote_last_modified: self.remote_last_modified,
            size_bytes: self.size_bytes,
        })
    }

    /// Map persisted fields plus the caller's decision to a response.
    ///
    /// Pure: state transitions are applied by the caller beforehand.
    pub fn derive_response(
        &self,
        status: RequestStatus,
        policy: &DomainPolicy,
        now: i64,
    ) -> Response {
        let kind = match status {
            RequestStatus::CacheHit => match &self.disk_location {
                Some(path) => ResponseKind::CacheHit { path: path.clone() },
                None => ResponseKind::Error {
                    classification: FailureKind::Filesystem,
                },
            },
            RequestStatus::DownloadStarted => ResponseKind::DownloadStarted,
            RequestStatus::DownloadInProgress => ResponseKind::DownloadInProgress,
            RequestStatus::CoolingDown => ResponseKind::CoolingDown {
                seconds_left: self.cool_down_seconds_left(policy, now),
            },
            RequestStatus::DownloadFailed => ResponseKind::Error {
                classification: self.last_error.unwrap_or(FailureKind::Transport),
            },
        };

        Response {
            key: self.key.clone(),
            url: self.last_url.clone(),
            kind,
        }
    }

    pub fn snapshot(&self, policy: &DomainPolicy, now: i64) -> ObjectSnapshot {
        ObjectSnapshot {
            key: self.key.clone(),
            domain: self.domain.clone(),
            state: self.state(policy, now),
            disk_location: self.disk_location.clone(),
            last_url: self.last_url.clone(),
            last_error: self.last_error,
            last_time_modified: self.last_time_modified,
            cool_down_seconds_left: self.cool_down_seconds_left(policy, now),
            received_bytes: self.transfer.as_ref().map(|t| t.buffer().len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::MockTransport;
    use std::time::Duration;

    fn policy() -> DomainPolicy {
        DomainPolicy::new(Duration::from_secs(60), Duration::from_secs(3600))
    }

    fn object() -> CacheObject {
        CacheObject::new(ResourceKey::new("tex/a"), "tiles.example.com")
    }

    #[test]
    fn test_new_object_needs_fetch_and_is_idle() {
        let obj = object();
        assert!(!obj.is_cached());
        assert!(obj.needs_refresh(&policy(), 0));
        assert_eq!(obj.cool_down_seconds_left(&policy(), 0), 0);
        assert_eq!(obj.state(&policy(), 0), ObjectState::Idle);
    }

    #[test]
    fn test_failure_triggers_cool_down() {
        let mut obj = object();
        obj.record_failure(FailureKind::Transport, 1000);

        assert_eq!(obj.last_error(), Some(FailureKind::Transport));
        assert_eq!(obj.cool_down_seconds_left(&policy(), 1000), 60);
        assert_eq!(obj.state(&policy(), 1030), ObjectState::CoolingDown);
        assert_eq!(obj.state(&policy(), 1060), ObjectState::Idle);
    }

    #[test]
    fn test_canceled_state_is_distinct() {
        let mut obj = object();
        obj.record_failure(FailureKind::Canceled, 0);
        assert_eq!(obj.state(&policy(), 1), ObjectState::Canceled);
    }

    #[test]
    fn test_success_sets_location_and_freshness() {
        let mut obj = object();
        obj.record_failure(FailureKind::Transport, 0);
        obj.record_success(PathBuf::from("/cache/a.png"), 3, &FetchMeta::default(), 100);

        assert!(obj.is_cached());
        assert_eq!(obj.last_error(), None);
        assert!(!obj.needs_refresh(&policy(), 100 + 3600));
        assert!(obj.needs_refresh(&policy(), 100 + 3601));
        // Success does not clear a cool-down on its own
        assert_eq!(obj.cool_down_timestamp(), Some(0));
    }

    #[test]
    fn test_reset_clears_session_fields_only() {
        let mut obj = object();
        obj.record_attempt("https://tiles.example.com/a.png");
        obj.record_success(PathBuf::from("/cache/a.png"), 3, &FetchMeta::default(), 5);
        obj.record_failure(FailureKind::Filesystem, 10);

        obj.reset();
        assert_eq!(obj.cool_down_timestamp(), None);
        assert_eq!(obj.last_error(), None);
        assert_eq!(obj.last_url(), "");
        assert_eq!(obj.disk_location(), Some(Path::new("/cache/a.png")));
    }

    #[test]
    fn test_invalidate_forgets_file() {
        let mut obj = object();
        obj.record_success(PathBuf::from("/cache/a.png"), 3, &FetchMeta::default(), 5);
        obj.invalidate();
        assert!(!obj.is_cached());
        assert!(obj.needs_refresh(&policy(), 5));
        assert!(obj.to_record().is_none());
    }

    #[test]
    fn test_derive_response_does_not_mutate() {
        let mut obj = object();
        obj.record_attempt("https://tiles.example.com/a.png");
        obj.record_failure(FailureKind::Transport, 0);

        let cooling = obj.derive_response(RequestStatus::CoolingDown, &policy(), 20);
        assert_eq!(cooling.kind, ResponseKind::CoolingDown { seconds_left: 40 });
        assert_eq!(cooling.url, "https://tiles.example.com/a.png");

        let failed = obj.derive_response(RequestStatus::DownloadFailed, &policy(), 20);
        assert_eq!(
            failed.kind,
            ResponseKind::Error {
                classification: FailureKind::Transport
            }
        );
        assert_eq!(obj.cool_down_timestamp(), Some(0));
    }

    #[test]
    fn test_response_serializes_with_status_tag() {
        let mut obj = object();
        obj.record_success(PathBuf::from("/cache/a.png"), 3, &FetchMeta::default(), 5);
        let response = obj.derive_response(RequestStatus::CacheHit, &policy(), 5);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "cache_hit");
        assert_eq!(json["path"], "/cache/a.png");
        assert_eq!(json["key"], "tex/a");
    }

    #[test]
    fn test_close_transfer_without_handle_is_noop() {
        let mut obj = object();
        assert!(obj.close_transfer().is_none());
        assert!(obj.close_transfer().is_none());
    }

    #[tokio::test]
    async fn test_only_one_transfer_at_a_time() {
        let transport: Arc<dyn Transport> =
            Arc::new(MockTransport::new().with_hang("https://tiles.example.com/a.png"));
        let mut obj = object();

        obj.create_transfer(transport.clone(), "https://tiles.example.com/a.png", 16)
            .unwrap();
        assert!(obj.has_transfer());
        assert_eq!(obj.state(&policy(), 0), ObjectState::Downloading);
        assert!(
            obj.create_transfer(transport, "https://tiles.example.com/a.png", 16)
                .is_err()
        );

        assert_eq!(obj.close_transfer(), Some(TransferOutcome::Canceled));
        assert!(!obj.has_transfer());
        assert!(obj.close_transfer().is_none());
    }
}
