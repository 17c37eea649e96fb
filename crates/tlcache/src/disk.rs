//! Persistent cache tier
//!
//! One file per key under a directory the tier owns exclusively. File names
//! are the hex MD5 digest of the key bytes, so two keys with colliding digests
//! share a slot. Writes go to a temporary file in the same directory that is
//! renamed over the target, so readers never see a partial entry.
//!
//! Mutating operations (`set`, `delete`, `clear`, pruning) are serialized by
//! an internal lock, which makes the tier safe to share between tasks
//! directly. Read and I/O failures surface as misses and `false` results.

use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tokio::{
    fs,
    io::{AsyncBufReadExt, BufReader},
    sync::Mutex,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    codec,
    entry::{CacheEntry, Expiration},
    key::CacheKey,
    CacheError, Result,
};

/// Suffix of in-flight temporary files; never listed as entries
pub const TEMP_SUFFIX: &str = ".__tlcache_tmp";

/// Default permission bits of persisted entries
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// File-per-key cache tier
#[derive(Debug)]
pub struct DiskTier {
    root: PathBuf,
    threshold: usize,
    default_timeout: Duration,
    mode: u32,
    lock: Mutex<()>,
}

impl DiskTier {
    /// Open a tier rooted at `root`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub async fn open(
        root: impl AsRef<Path>,
        threshold: usize,
        default_timeout: Duration,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        debug!("Opened disk cache at {}", root.display());

        Ok(Self {
            root,
            threshold,
            default_timeout,
            mode: DEFAULT_FILE_MODE,
            lock: Mutex::new(()),
        })
    }

    /// Set the permission bits applied to persisted entries (Unix only)
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// File backing `key`
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{:x}", md5::compute(key.as_bytes())))
    }

    /// Look up a live value, removing the file if it has expired
    pub async fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let path = self.entry_path(key);
        match read_entry(&path).await {
            Ok(entry) if entry.is_live() => Some(entry.value),
            Ok(_) => {
                self.remove_expired(&path).await;
                None
            }
            Err(err) => {
                log_read_failure(&path, &err);
                None
            }
        }
    }

    pub async fn get_many<'a, I>(&self, keys: I) -> Vec<Option<serde_json::Value>>
    where
        I: IntoIterator<Item = &'a CacheKey>,
    {
        let mut values = Vec::new();
        for key in keys {
            values.push(self.get(key).await);
        }
        values
    }

    /// Check liveness from the expiration header alone
    pub async fn has(&self, key: &CacheKey) -> bool {
        let path = self.entry_path(key);
        match read_expiration(&path).await {
            Ok(expires) if expires.is_live() => true,
            Ok(_) => {
                self.remove_expired(&path).await;
                false
            }
            Err(err) => {
                log_read_failure(&path, &err);
                false
            }
        }
    }

    /// Persist a value, overwriting any existing entry
    ///
    /// Returns `false` if the entry could not be written; the previous entry,
    /// if any, is left untouched in that case.
    pub async fn set(
        &self,
        key: &CacheKey,
        value: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> bool {
        let expires = Expiration::from_timeout(timeout, self.default_timeout);
        let path = self.entry_path(key);

        let _guard = self.lock.lock().await;
        self.prune().await;

        match self.write_entry(&path, expires, value).await {
            Ok(()) => true,
            Err(err) => {
                debug!("Failed to write cache entry {}: {}", path.display(), err);
                false
            }
        }
    }

    /// Persist a value only if no file exists for `key`
    ///
    /// The existence check and the write are separate steps; two concurrent
    /// adds of the same key may both write.
    pub async fn add(
        &self,
        key: &CacheKey,
        value: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> bool {
        if fs::try_exists(self.entry_path(key)).await.unwrap_or(false) {
            return false;
        }
        self.set(key, value, timeout).await
    }

    /// Persist several values, returning whether all of them were written
    pub async fn set_many<I>(&self, entries: I, timeout: Option<Duration>) -> bool
    where
        I: IntoIterator<Item = (CacheKey, serde_json::Value)>,
    {
        let mut all_written = true;
        for (key, value) in entries {
            all_written &= self.set(&key, &value, timeout).await;
        }
        all_written
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        let path = self.entry_path(key);
        let _guard = self.lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    debug!("Failed to delete cache entry {}: {}", path.display(), err);
                }
                false
            }
        }
    }

    /// Delete every key, returning how many files were removed
    pub async fn delete_many<'a, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a CacheKey>,
    {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await {
                removed += 1;
            }
        }
        removed
    }

    /// Add `delta` to an integer value
    ///
    /// A missing or non-integer value counts as zero. Not atomic: the read and
    /// the write take the tier lock separately. Returns `None` if the new
    /// value could not be written.
    pub async fn inc(&self, key: &CacheKey, delta: i64) -> Option<i64> {
        let current = self
            .get(key)
            .await
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        let next = current.saturating_add(delta);
        self.set(key, &serde_json::Value::from(next), None)
            .await
            .then_some(next)
    }

    pub async fn dec(&self, key: &CacheKey, delta: i64) -> Option<i64> {
        self.inc(key, delta.saturating_neg()).await
    }

    /// Remove every entry, returning whether all removals succeeded
    pub async fn clear(&self) -> bool {
        let _guard = self.lock.lock().await;
        let entries = match self.list_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to list disk cache {}: {}", self.root.display(), err);
                return false;
            }
        };

        let mut all_removed = true;
        for path in entries {
            if let Err(err) = fs::remove_file(&path).await {
                debug!("Failed to remove cache entry {}: {}", path.display(), err);
                all_removed = false;
            }
        }
        all_removed
    }

    /// Number of entry files, expired ones included
    pub async fn len(&self) -> usize {
        self.list_entries()
            .await
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn list_entries(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                continue;
            }
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => {}
                _ => continue,
            }
            paths.push(entry.path());
        }
        Ok(paths)
    }

    // Caller holds the tier lock. Same policy as the memory tier, over
    // directory listing order. Unreadable entries count as expired.
    async fn prune(&self) {
        let entries = match self.list_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to list disk cache {}: {}", self.root.display(), err);
                return;
            }
        };
        if entries.len() <= self.threshold {
            return;
        }

        let now = SystemTime::now();
        let mut removed = 0usize;
        for (idx, path) in entries.iter().enumerate() {
            let expired = read_expiration(path)
                .await
                .map_or(true, |expires| !expires.is_live_at(now));
            if !expired && idx % 3 != 0 {
                continue;
            }
            match fs::remove_file(path).await {
                Ok(()) => removed += 1,
                Err(err) => debug!("Failed to prune cache entry {}: {}", path.display(), err),
            }
        }
        debug!(
            "Pruned {} of {} disk cache entries in {}",
            removed,
            entries.len(),
            self.root.display()
        );
    }

    async fn write_entry(
        &self,
        path: &Path,
        expires: Expiration,
        value: &serde_json::Value,
    ) -> Result<()> {
        let bytes = codec::encode(expires, value)?;
        let temp_path = self
            .root
            .join(format!(".{}{}", Uuid::new_v4().simple(), TEMP_SUFFIX));

        let result = self.replace_with(&temp_path, path, &bytes).await;
        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result
    }

    async fn replace_with(&self, temp_path: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::write(temp_path, bytes).await?;
        apply_mode(temp_path, self.mode).await?;
        fs::rename(temp_path, path).await?;
        Ok(())
    }

    // Re-checks under the lock so a concurrent `set` that replaced the file
    // in the meantime is not thrown away.
    async fn remove_expired(&self, path: &Path) {
        let _guard = self.lock.lock().await;
        if let Ok(expires) = read_expiration(path).await {
            if !expires.is_live() {
                if let Err(err) = fs::remove_file(path).await {
                    debug!("Failed to remove expired entry {}: {}", path.display(), err);
                }
            }
        }
    }
}

async fn read_expiration(path: &Path) -> Result<Expiration> {
    let file = fs::File::open(path).await?;
    let mut header = Vec::new();
    BufReader::new(file).read_until(b'\n', &mut header).await?;
    codec::decode_expiration(&header)
}

async fn read_entry(path: &Path) -> Result<CacheEntry> {
    let bytes = fs::read(path).await?;
    codec::decode(&bytes).map_err(|err| {
        debug!("Undecodable cache entry {}: {}", path.display(), err);
        CacheError::CorruptEntry {
            path: path.to_path_buf(),
        }
    })
}

fn log_read_failure(path: &Path, err: &CacheError) {
    match err {
        CacheError::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
        _ => debug!("Treating cache entry {} as a miss: {}", path.display(), err),
    }
}

#[cfg(unix)]
async fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn apply_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
