use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::key::CacheKey;
use crate::error::CoreError;
use crate::model::{ActionResult, ErrorCode};

/// On-disk form of `<hex>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheEntry {
    key: CacheKey,
    stored_at: DateTime<Utc>,
    result: ActionResult,
}

/// A stored result and the stream bytes captured with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached {
    pub result: ActionResult,
    pub stream: Vec<u8>,
}

/// Outcome of [`CacheStore::get_or_compute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Flight {
    /// Served from the store; the computation never ran.
    Hit(Cached),
    /// Computed here. `warning` is set when the entry could not be stored.
    Computed {
        cached: Cached,
        warning: Option<String>,
    },
}

/// Holds both levels of per-key exclusion until dropped. The file lock is
/// released first.
struct KeyGuard<'a> {
    _file: fs::File,
    _local: LocalFlight<'a>,
}

/// In-process side of a flight. Dropping it removes the key's mutex from
/// the in-flight map once no other caller holds or waits on it.
struct LocalFlight<'a> {
    inflight: &'a Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LocalFlight<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight
            .get(&self.key)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            inflight.remove(&self.key);
        }
    }
}

/// Content-addressed, write-once result store under `.prime/cache/`.
///
/// Entries live at `<ab>/<hex>.json` with the stream bytes beside them in
/// `<ab>/<hex>.stream`. An entry is never rewritten once present.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    inflight: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
}

impl CacheStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn shard(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(&key.hex()[..2])
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.shard(key).join(format!("{}.json", key.hex()))
    }

    fn stream_path(&self, key: &CacheKey) -> PathBuf {
        self.shard(key).join(format!("{}.stream", key.hex()))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }

    /// Look up a key. A hit comes back with `cache_hit` set; a corrupt entry
    /// is logged and treated as a miss.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<Cached>, CoreError> {
        let path = self.entry_path(key);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CacheEntry = match serde_json::from_str(&data) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring corrupt cache entry");
                return Ok(None);
            }
        };
        if &entry.key != key {
            warn!(key = %key, stored = %entry.key, "Cache entry stored under the wrong key");
            return Ok(None);
        }
        let stream = match fs::read(self.stream_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let mut result = entry.result;
        result.cache_hit = true;
        Ok(Some(Cached { result, stream }))
    }

    /// Store a result once. Returns false if the key already had an entry,
    /// which is left untouched.
    pub fn store(
        &self,
        key: &CacheKey,
        result: &ActionResult,
        stream: &[u8],
    ) -> Result<bool, CoreError> {
        let path = self.entry_path(key);
        if path.exists() {
            return Ok(false);
        }
        fs::create_dir_all(self.shard(key))?;

        if !stream.is_empty() {
            write_new(&self.stream_path(key), stream)?;
        }
        let mut stored = result.clone();
        stored.cache_hit = false;
        stored.warnings.clear();
        let entry = CacheEntry {
            key: key.clone(),
            stored_at: Utc::now(),
            result: stored,
        };
        write_new(&path, serde_json::to_string_pretty(&entry)?.as_bytes())?;
        debug!(key = %key, "Stored cache entry");
        Ok(true)
    }

    /// Serve `key` from the store, or run `compute` and store what it
    /// returns. At most one computation per key is in flight: concurrent
    /// callers in this process wait on an async mutex, other processes on
    /// a lock file, and late arrivals then find the stored entry.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> Result<Flight, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Cached>,
    {
        let _guard = self.lock_key(key).await?;
        if let Some(hit) = self.lookup(key)? {
            debug!(key = %key, "Cache hit");
            return Ok(Flight::Hit(hit));
        }

        let cached = compute().await;
        let warning = match self.store(key, &cached.result, &cached.stream) {
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to write cache entry");
                Some(ErrorCode::CacheWriteFailed.warning(e))
            }
        };
        Ok(Flight::Computed { cached, warning })
    }

    async fn lock_key(&self, key: &CacheKey) -> Result<KeyGuard<'_>, CoreError> {
        let mutex = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            inflight.entry(key.clone()).or_default().clone()
        };
        let local = LocalFlight {
            inflight: &self.inflight,
            key: key.clone(),
            guard: Some(mutex.lock_owned().await),
        };

        fs::create_dir_all(self.shard(key))?;
        let lock_path = self.shard(key).join(format!("{}.lock", key.hex()));
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        let file = tokio::task::spawn_blocking(move || {
            fs2::FileExt::lock_exclusive(&file).map(|_| file)
        })
        .await
        .map_err(|e| CoreError::Cache(format!("lock task failed: {e}")))??;

        Ok(KeyGuard {
            _file: file,
            _local: local,
        })
    }
}

/// Write `bytes` to a temporary sibling, then move it into place.
fn write_new(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        CoreError::Cache(format!("{}: {e}", path.display()))
    })
}
