//! Cache manager
//!
//! Single owner of the key → object map. Every state change of a
//! [`CacheObject`] goes through here: requests, transfer completion,
//! cancellation, reset and eviction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::key::ResourceKey;
use crate::cache::object::{CacheObject, ObjectSnapshot, RequestStatus, Response};
use crate::cache::policy::{PolicyTable, domain_of};
use crate::cache::storage::{CacheStats, CacheStorage, ClearStats, DiskStore, IndexRecord};
use crate::config::Config;
use crate::error::{CacheError, FailureKind, Result};
use crate::transfer::{self, FetchMeta, HttpTransport, TransferOutcome, TransferStatus, Transport};

/// Pause between completion checks once a transport has signalled it is done
const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

type SharedObject = Arc<Mutex<CacheObject>>;

/// Owns all cache objects and applies domain policy to requests.
///
/// The map lock is only held to find or insert an object; each object has its
/// own lock, so requests for different keys never wait on each other.
pub struct CacheManager {
    objects: RwLock<HashMap<ResourceKey, SharedObject>>,
    policies: PolicyTable,
    storage: Mutex<CacheStorage>,
    disk: DiskStore,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    default_reserve: usize,
}

impl CacheManager {
    pub fn new(
        policies: PolicyTable,
        storage: CacheStorage,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        default_reserve: usize,
    ) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            policies,
            disk: storage.disk().clone(),
            storage: Mutex::new(storage),
            transport,
            clock,
            default_reserve,
        }
    }

    /// Build a manager with the HTTP transport and system clock.
    ///
    /// `cache_dir` overrides the configured cache directory.
    pub fn from_config(config: &Config, cache_dir: Option<&Path>) -> Result<Self> {
        let root = match (cache_dir, config.cache_dir.as_deref()) {
            (Some(dir), _) | (None, Some(dir)) => dir.to_path_buf(),
            (None, None) => CacheStorage::default_dir()?,
        };
        let storage = CacheStorage::open_at(&root)?;
        let transport = HttpTransport::new(&config.http)?;

        Ok(Self::new(
            config.policy_table(),
            storage,
            Arc::new(transport),
            Arc::new(SystemClock),
            config.reserve_size,
        ))
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn cache_root(&self) -> PathBuf {
        self.storage.lock().root().to_path_buf()
    }

    /// Decide what to do for `key` and act on it.
    ///
    /// Returns `DownloadInProgress` while a transfer is owned, `CoolingDown`
    /// during a cool-down, `CacheHit` for a fresh file, otherwise starts a
    /// transfer and returns `DownloadStarted`. Only an unusable URL is an
    /// error.
    pub fn request(
        &self,
        key: &ResourceKey,
        url: &str,
        size_hint: Option<usize>,
    ) -> std::result::Result<Response, CacheError> {
        let domain = domain_of(url)?;
        loop {
            let object = self.object_for(key, &domain);
            let mut obj = object.lock();
            // Evicted between lookup and lock; start over with a fresh object
            if !self.is_current(key, &object) {
                continue;
            }
            return Ok(self.decide(&mut obj, &domain, url, size_hint));
        }
    }

    fn decide(
        &self,
        obj: &mut CacheObject,
        domain: &str,
        url: &str,
        size_hint: Option<usize>,
    ) -> Response {
        let key = obj.key().clone();
        let now = self.clock.now();
        let policy = self.policies.lookup(obj.domain());

        if obj.domain() != domain {
            debug!(
                "{}: requested via {} but governed by {}",
                key,
                domain,
                obj.domain()
            );
        }

        // Collect a transfer that finished since the last look
        self.settle(obj, now);

        if obj.has_transfer() {
            return obj.derive_response(RequestStatus::DownloadInProgress, &policy, now);
        }

        if obj.cool_down_seconds_left(&policy, now) > 0 {
            debug!("{}: cooling down", key);
            return obj.derive_response(RequestStatus::CoolingDown, &policy, now);
        }

        self.verify_on_disk(obj);

        if obj.is_cached() && !obj.needs_refresh(&policy, now) {
            debug!("Cache hit: {}", key);
            return obj.derive_response(RequestStatus::CacheHit, &policy, now);
        }

        obj.record_attempt(url);
        obj.reset_cool_down_time();
        let reserve = size_hint.unwrap_or(self.default_reserve);
        match obj.create_transfer(self.transport.clone(), url, reserve) {
            Ok(()) => {
                debug!("{}: download started from {}", key, url);
                obj.derive_response(RequestStatus::DownloadStarted, &policy, now)
            }
            Err(e) => {
                warn!("{}: could not start transfer: {}", key, e);
                obj.record_failure(FailureKind::Transport, now);
                obj.derive_response(RequestStatus::DownloadFailed, &policy, now)
            }
        }
    }

    /// Check one key's transfer without blocking.
    ///
    /// `None` when nothing is in flight and nothing just finished.
    #[allow(dead_code)]
    pub fn poll(&self, key: &ResourceKey) -> Option<Response> {
        let object = self.lookup(key)?;
        let mut obj = object.lock();
        let now = self.clock.now();
        if let Some(response) = self.settle(&mut obj, now) {
            return Some(response);
        }
        if obj.has_transfer() {
            let policy = self.policies.lookup(obj.domain());
            return Some(obj.derive_response(RequestStatus::DownloadInProgress, &policy, now));
        }
        None
    }

    /// Collect every transfer that has finished
    #[allow(dead_code)]
    pub fn poll_all(&self) -> Vec<Response> {
        let now = self.clock.now();
        self.all_objects()
            .iter()
            .filter_map(|object| self.settle(&mut object.lock(), now))
            .collect()
    }

    /// Wait for the key's in-flight transfer to finish and apply its outcome.
    ///
    /// When another caller already applied the outcome, the object's latest
    /// result is reported instead. `None` if the key is unknown or has no
    /// outcome to report.
    pub async fn wait(&self, key: &ResourceKey) -> Option<Response> {
        let object = self.lookup(key)?;
        loop {
            let completion = {
                let mut obj = object.lock();
                let now = self.clock.now();
                if let Some(response) = self.settle(&mut obj, now) {
                    return Some(response);
                }
                if !obj.has_transfer() {
                    return self.latest_outcome(&obj, now);
                }
                obj.transfer_mut()?.completion()
            };
            transfer::completed(completion).await;
            tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
        }
    }

    /// Abort the key's transfer. Counts as a failure for cool-down purposes.
    #[allow(dead_code)]
    pub fn cancel(&self, key: &ResourceKey) -> Option<Response> {
        let object = self.lookup(key)?;
        let mut obj = object.lock();
        let now = self.clock.now();
        if let Some(response) = self.settle(&mut obj, now) {
            return Some(response);
        }
        self.abort(&mut obj, now)
    }

    /// Clear cool-down, last URL and last error of one object
    #[allow(dead_code)]
    pub fn reset(&self, key: &ResourceKey) -> bool {
        match self.lookup(key) {
            Some(object) => {
                object.lock().reset();
                true
            }
            None => false,
        }
    }

    /// Forget a key entirely: close its transfer, delete its file and index
    /// entry.
    pub fn evict(&self, key: &ResourceKey) -> std::result::Result<bool, CacheError> {
        let object = self.lookup(key);
        // Held until the index row is gone so no settle can re-commit
        let mut guard = object.as_ref().map(|o| o.lock());

        let mut path = None;
        let mut removed = false;
        if let (Some(object), Some(obj)) = (&object, guard.as_mut()) {
            obj.close_transfer();
            path = obj.disk_location().map(Path::to_path_buf);
            obj.invalidate();
            let mut objects = self.objects.write();
            if objects.get(key).is_some_and(|o| Arc::ptr_eq(o, object)) {
                objects.remove(key);
                removed = true;
            }
        }

        let storage = self.storage.lock();
        let record = storage.load(key)?;
        if path.is_none() {
            path = record.as_ref().map(|r| r.disk_location.clone());
        }

        if let Some(path) = &path {
            self.disk.remove_file(path)?;
        }
        let deleted = storage.delete(key)?;
        Ok(removed || deleted)
    }

    /// Close every owned transfer. No transfer outlives the manager.
    pub fn shutdown(&self) -> usize {
        let now = self.clock.now();
        let mut closed = 0;
        for object in self.all_objects() {
            let mut obj = object.lock();
            if self.settle(&mut obj, now).is_none() && self.abort(&mut obj, now).is_some() {
                closed += 1;
            }
        }
        if closed > 0 {
            info!("Closed {} in-flight transfers on shutdown", closed);
        }
        closed
    }

    /// Diagnostic view of every object in memory, sorted by key
    #[allow(dead_code)]
    pub fn snapshot(&self) -> Vec<ObjectSnapshot> {
        let now = self.clock.now();
        let mut snapshots: Vec<ObjectSnapshot> = self
            .all_objects()
            .iter()
            .map(|object| {
                let obj = object.lock();
                let policy = self.policies.lookup(obj.domain());
                obj.snapshot(&policy, now)
            })
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    pub fn stats(&self) -> std::result::Result<CacheStats, CacheError> {
        self.storage.lock().stats()
    }

    /// Persisted entries from the object index
    pub fn list_index(&self) -> std::result::Result<Vec<IndexRecord>, CacheError> {
        self.storage.lock().list()
    }

    /// Drop every object and cached file
    pub fn clear(&self) -> std::result::Result<ClearStats, CacheError> {
        let drained: Vec<SharedObject> = self.objects.write().drain().map(|(_, o)| o).collect();
        for object in drained {
            object.lock().close_transfer();
        }
        self.storage.lock().clear_all()
    }

    fn lookup(&self, key: &ResourceKey) -> Option<SharedObject> {
        self.objects.read().get(key).cloned()
    }

    /// Whether `object` is still the one mapped to `key`
    fn is_current(&self, key: &ResourceKey, object: &SharedObject) -> bool {
        self.objects
            .read()
            .get(key)
            .is_some_and(|mapped| Arc::ptr_eq(mapped, object))
    }

    fn all_objects(&self) -> Vec<SharedObject> {
        self.objects.read().values().cloned().collect()
    }

    /// Find the object for a key, creating it (from the index when possible)
    fn object_for(&self, key: &ResourceKey, domain: &str) -> SharedObject {
        if let Some(object) = self.lookup(key) {
            return object;
        }

        let mut objects = self.objects.write();
        objects
            .entry(key.clone())
            .or_insert_with(|| {
                let restored = match self.storage.lock().load(key) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("Failed to read cache index for {}: {}", key, e);
                        None
                    }
                };
                let object = match restored {
                    Some(mut record) => {
                        debug!("Restored {} from cache index", key);
                        // A file rewritten after indexing counts as observed at its mtime
                        if let Ok(mtime) = self.disk.mtime(&record.disk_location) {
                            record.last_time_modified = record.last_time_modified.max(mtime);
                        }
                        CacheObject::from_record(record)
                    }
                    None => CacheObject::new(key.clone(), domain),
                };
                Arc::new(Mutex::new(object))
            })
            .clone()
    }

    /// Drop `disk_location` if the file was removed behind our back
    fn verify_on_disk(&self, obj: &mut CacheObject) {
        let Some(path) = obj.disk_location() else {
            return;
        };
        if self.disk.exists(path) {
            return;
        }
        info!(
            "{}: cached file {} is missing, will re-fetch",
            obj.key(),
            path.display()
        );
        obj.invalidate();
        if let Err(e) = self.storage.lock().delete(obj.key()) {
            warn!("Failed to drop index entry for {}: {}", obj.key(), e);
        }
    }

    /// Apply a finished transfer's outcome; `None` if nothing finished
    fn settle(&self, obj: &mut CacheObject, now: i64) -> Option<Response> {
        let handle = obj.transfer_mut()?;
        let outcome = match handle.poll() {
            TransferStatus::Active { .. } => return None,
            TransferStatus::Finished(outcome) => outcome,
        };
        let data = handle.take_buffer();
        obj.close_transfer();

        let policy = self.policies.lookup(obj.domain());
        let status = match outcome {
            TransferOutcome::Succeeded(meta) => self.commit(obj, &data, &meta, now),
            TransferOutcome::Failed(err) => {
                warn!("{}: download of {} failed: {}", obj.key(), obj.last_url(), err);
                obj.record_failure(FailureKind::Transport, now);
                RequestStatus::DownloadFailed
            }
            TransferOutcome::Canceled => {
                obj.record_failure(FailureKind::Canceled, now);
                RequestStatus::DownloadFailed
            }
        };
        Some(obj.derive_response(status, &policy, now))
    }

    /// Write a successful transfer to disk, then publish its location
    fn commit(
        &self,
        obj: &mut CacheObject,
        data: &[u8],
        meta: &FetchMeta,
        now: i64,
    ) -> RequestStatus {
        match self.disk.commit(obj.key(), obj.last_url(), data) {
            Ok(path) => {
                debug!("{}: stored {} bytes at {}", obj.key(), data.len(), path.display());
                obj.record_success(path, data.len() as u64, meta, now);
                if let Some(record) = obj.to_record()
                    && let Err(e) = self.storage.lock().upsert(&record)
                {
                    warn!("Failed to index {}: {}", obj.key(), e);
                }
                RequestStatus::CacheHit
            }
            Err(e) => {
                warn!("{}: {}", obj.key(), e);
                obj.record_failure(FailureKind::Filesystem, now);
                RequestStatus::DownloadFailed
            }
        }
    }

    /// Result already applied to an object with no transfer in flight
    fn latest_outcome(&self, obj: &CacheObject, now: i64) -> Option<Response> {
        let policy = self.policies.lookup(obj.domain());
        let status = if obj.last_error().is_some() {
            RequestStatus::DownloadFailed
        } else if obj.is_cached() && !obj.needs_refresh(&policy, now) {
            RequestStatus::CacheHit
        } else {
            return None;
        };
        Some(obj.derive_response(status, &policy, now))
    }

    /// Close an active transfer and record the cancel
    fn abort(&self, obj: &mut CacheObject, now: i64) -> Option<Response> {
        obj.close_transfer()?;
        info!("{}: transfer canceled", obj.key());
        obj.record_failure(FailureKind::Canceled, now);
        let policy = self.policies.lookup(obj.domain());
        Some(obj.derive_response(RequestStatus::DownloadFailed, &policy, now))
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
