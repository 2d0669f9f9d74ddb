//! On-disk cache storage
//!
//! Resource bodies live as plain files sharded under `objects/`. A SQLite
//! index remembers which keys have a completed download so a later process
//! can reuse them.

use rusqlite::{Connection, OptionalExtension, params};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::cache::key::ResourceKey;
use crate::error::CacheError;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 1;

/// Longest URL extension kept on cached file names
const MAX_EXTENSION_LEN: usize = 8;

type Result<T> = std::result::Result<T, CacheError>;

/// Persisted fields of a successfully cached resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub key: ResourceKey,
    pub domain: String,
    pub disk_location: PathBuf,
    pub last_url: String,
    pub last_time_modified: i64,
    pub remote_last_modified: Option<i64>,
    pub size_bytes: u64,
}

/// Sharded file store under `<root>/objects`.
///
/// Holds no connection, so writes can run without the index lock.
#[derive(Debug, Clone)]
pub struct DiskStore {
    objects_dir: PathBuf,
}

/// File store plus SQLite object index
pub struct CacheStorage {
    conn: Connection,
    root: PathBuf,
    disk: DiskStore,
}

impl CacheStorage {
    /// Get the default cache directory (~/.cache/scenecache on Linux)
    pub fn default_dir() -> Result<PathBuf> {
        let cache_base = dirs::cache_dir().ok_or(CacheError::NoHome)?;
        Ok(cache_base.join("scenecache"))
    }

    /// Open or create cache storage rooted at `cache_dir`
    pub fn open_at(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create cache dir: {}", e)))?;

        let db_path = cache_dir.join("index.db");
        let objects_dir = cache_dir.join("objects");
        std::fs::create_dir_all(&objects_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create objects dir: {}", e)))?;

        let conn = Connection::open(&db_path)?;

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Cache schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            Self::nuke(&db_path, &objects_dir)?;
            return Self::open_at(cache_dir);
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_objects (
                resource_key TEXT PRIMARY KEY NOT NULL,
                domain TEXT NOT NULL,
                disk_location TEXT NOT NULL,
                last_url TEXT NOT NULL,
                last_time_modified INTEGER NOT NULL,
                remote_last_modified INTEGER,
                size_bytes INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_domain ON cache_objects(domain);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self {
            conn,
            root: cache_dir.to_path_buf(),
            disk: DiskStore { objects_dir },
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file half of the store
    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    /// Look up the index entry for a key
    pub fn load(&self, key: &ResourceKey) -> Result<Option<IndexRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT resource_key, domain, disk_location, last_url, last_time_modified,
                        remote_last_modified, size_bytes
                 FROM cache_objects WHERE resource_key = ?1",
                [key.as_str()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert or replace the index entry for a completed download
    pub fn upsert(&self, record: &IndexRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO cache_objects
             (resource_key, domain, disk_location, last_url, last_time_modified,
              remote_last_modified, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.key.as_str(),
                record.domain,
                record.disk_location.to_string_lossy().into_owned(),
                record.last_url,
                record.last_time_modified,
                record.remote_last_modified,
                record.size_bytes as i64,
            ],
        )?;
        Ok(())
    }

    /// Delete the index entry for a key
    pub fn delete(&self, key: &ResourceKey) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM cache_objects WHERE resource_key = ?1", [key.as_str()])?;
        Ok(deleted > 0)
    }

    /// All index entries, most recently refreshed first
    pub fn list(&self) -> Result<Vec<IndexRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT resource_key, domain, disk_location, last_url, last_time_modified,
                    remote_last_modified, size_bytes
             FROM cache_objects ORDER BY last_time_modified DESC",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Remove every index entry and cached file
    pub fn clear_all(&self) -> Result<ClearStats> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cache_objects", [], |r| r.get(0))?;

        self.conn.execute("DELETE FROM cache_objects", [])?;

        let objects_dir = &self.disk.objects_dir;
        if objects_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(objects_dir) {
                log::warn!("Failed to clear objects directory: {}", e);
            }
            std::fs::create_dir_all(objects_dir)
                .map_err(|e| CacheError::Io(format!("Failed to recreate objects dir: {}", e)))?;
        }

        Ok(ClearStats {
            entries_removed: count as usize,
        })
    }

    /// Index statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let (total_entries, total_size, oldest, newest): (i64, i64, Option<i64>, Option<i64>) =
            self.conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0),
                        MIN(last_time_modified), MAX(last_time_modified)
                 FROM cache_objects",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )?;

        let domains: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT domain) FROM cache_objects",
            [],
            |r| r.get(0),
        )?;

        Ok(CacheStats {
            total_entries: total_entries as usize,
            domains: domains as usize,
            total_size_bytes: total_size as u64,
            oldest_entry: oldest,
            newest_entry: newest,
        })
    }

    fn nuke(db_path: &Path, objects_dir: &Path) -> Result<()> {
        if db_path.exists() {
            std::fs::remove_file(db_path)
                .map_err(|e| CacheError::Io(format!("Failed to remove cache index: {}", e)))?;
        }
        if objects_dir.exists() {
            std::fs::remove_dir_all(objects_dir)
                .map_err(|e| CacheError::Io(format!("Failed to remove objects dir: {}", e)))?;
        }
        Ok(())
    }
}

impl DiskStore {
    /// Write a completed transfer to its final location.
    ///
    /// Bytes go to a temp file that is synced and renamed into place, so the
    /// returned path never names a partially written file.
    pub fn commit(&self, key: &ResourceKey, url: &str, data: &[u8]) -> Result<PathBuf> {
        let digest = key.digest();
        let shard_dir = self.objects_dir.join(&digest[..2]);
        std::fs::create_dir_all(&shard_dir)
            .map_err(|e| CacheError::Io(format!("Failed to create shard dir: {}", e)))?;

        let filename = match url_extension(url) {
            Some(ext) => format!("{}.{}", digest, ext),
            None => digest.clone(),
        };
        let final_path = shard_dir.join(&filename);
        let tmp_path = shard_dir.join(format!(".{}.part", filename));

        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &final_path)
        };

        if let Err(e) = write() {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CacheError::Io(format!(
                "Failed to write {}: {}",
                final_path.display(),
                e
            )));
        }

        Ok(final_path)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Modification time of a cached file in unix seconds
    pub fn mtime(&self, path: &Path) -> Result<i64> {
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| CacheError::Io(format!("Failed to stat {}: {}", path.display(), e)))?;
        Ok(chrono::DateTime::<chrono::Utc>::from(modified).timestamp())
    }

    /// Delete a cached file; a missing file is not an error
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexRecord> {
    let key: String = row.get(0)?;
    let location: String = row.get(2)?;
    let size: i64 = row.get(6)?;
    Ok(IndexRecord {
        key: ResourceKey::new(key),
        domain: row.get(1)?,
        disk_location: PathBuf::from(location),
        last_url: row.get(3)?,
        last_time_modified: row.get(4)?,
        remote_last_modified: row.get(5)?,
        size_bytes: size.max(0) as u64,
    })
}

/// File extension of the URL path, kept so cached files open by type
fn url_extension(url: &str) -> Option<String> {
    let path = reqwest::Url::parse(url).ok()?.path().to_string();
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Statistics about cache clear operation
#[derive(Debug)]
pub struct ClearStats {
    pub entries_removed: usize,
}

/// Statistics about cache state
#[derive(Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub domains: usize,
    pub total_size_bytes: u64,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}
