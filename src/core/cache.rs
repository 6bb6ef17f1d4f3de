//! Content-addressed audio cache
//!
//! Each entry is one file named `<sha256 hex>.events` holding the framed event
//! sequence exactly as it went out on the wire. The directory is bounded by a
//! byte budget; after every write the least recently used entries (by file
//! modification time, refreshed on every hit) are deleted until the total fits.
//!
//! Cache failures never reach callers: reads degrade to a miss and writes are
//! logged and dropped.

use std::fs::{self, File, FileTimes};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::errors::CacheError;
use crate::protocol::{Event, decode_events, encode_events};

pub const ENTRY_SUFFIX: &str = "events";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hex sha256 of `normalized_text | voice`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(normalized_text: &str, voice: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalized_text.as_bytes());
        hasher.update(b"|");
        hasher.update(voice.unwrap_or_default().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn file_name(&self) -> String {
        format!("{}.{ENTRY_SUFFIX}", self.0)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct EntryMeta {
    path: PathBuf,
    size: u64,
    accessed: SystemTime,
}

pub struct AudioCache {
    enabled: bool,
    dir: PathBuf,
    max_size_bytes: u64,
    prune_lock: Mutex<()>,
}

impl AudioCache {
    /// Create the cache, making the directory if needed. A directory that
    /// cannot be created leaves the cache enabled but every write will fail
    /// and be logged.
    pub fn new(config: &CacheConfig) -> Self {
        if config.enabled {
            match fs::create_dir_all(&config.path) {
                Ok(()) => info!(
                    path = %config.path.display(),
                    max_size_bytes = config.max_size_bytes,
                    "Audio cache enabled"
                ),
                Err(e) => warn!(
                    path = %config.path.display(),
                    error = %e,
                    "Failed to create cache directory"
                ),
            }
        }

        Self {
            enabled: config.enabled,
            dir: config.path.clone(),
            max_size_bytes: config.max_size_bytes,
            prune_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&CacheConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Stored sequence for `key`, refreshing its last-access time.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<Event>> {
        if !self.enabled {
            return None;
        }

        match self.read_entry(key) {
            Ok(Some(events)) => {
                debug!(key = %key, events = events.len(), "Cache hit");
                Some(events)
            }
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Unreadable cache entry, treating as miss");
                None
            }
        }
    }

    /// Replace the entry for `key` with `events`, then prune.
    pub fn set(&self, key: &CacheKey, events: &[Event]) {
        if !self.enabled {
            return;
        }

        match self.write_entry(key, events) {
            Ok(bytes) => debug!(key = %key, events = events.len(), bytes, "Cached response"),
            Err(e) => warn!(key = %key, error = %e, "Failed to write cache entry"),
        }

        if let Err(e) = self.prune() {
            warn!(error = %e, "Failed to prune audio cache");
        }
    }

    /// Delete least recently used entries until the directory fits the budget.
    /// Returns the number of entries removed.
    pub fn prune(&self) -> Result<usize, CacheError> {
        let _guard = self.prune_lock.lock();

        let mut entries = self.scan_entries()?;
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        if total <= self.max_size_bytes {
            return Ok(0);
        }

        entries.sort_by_key(|e| e.accessed);

        let mut removed = 0;
        for entry in entries {
            if total <= self.max_size_bytes {
                break;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    removed += 1;
                    total = total.saturating_sub(entry.size);
                    debug!(path = %entry.path.display(), size = entry.size, "Pruned cache entry");
                }
                // Removed by someone else; it no longer counts.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    total = total.saturating_sub(entry.size);
                }
                Err(e) => warn!(path = %entry.path.display(), error = %e, "Failed to prune entry"),
            }
        }

        info!(
            removed,
            total_bytes = total,
            max_size_bytes = self.max_size_bytes,
            "Pruned audio cache"
        );
        Ok(removed)
    }

    /// Total size of all entries currently on disk.
    pub fn total_size(&self) -> Result<u64, CacheError> {
        Ok(self.scan_entries()?.iter().map(|e| e.size).sum())
    }

    fn read_entry(&self, key: &CacheKey) -> Result<Option<Vec<Event>>, CacheError> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let events =
            decode_events(&bytes).map_err(|e| CacheError::Corrupt(format!("{}: {e}", path.display())))?;
        if events.is_empty() {
            return Err(CacheError::Corrupt(format!("{}: empty entry", path.display())));
        }

        mark_used(&path);
        Ok(Some(events))
    }

    fn write_entry(&self, key: &CacheKey, events: &[Event]) -> Result<usize, CacheError> {
        let bytes = encode_events(events)
            .map_err(|e| CacheError::Corrupt(format!("unencodable sequence: {e}")))?;

        let final_path = self.entry_path(key);
        let temp_path = self.dir.join(format!(
            ".{}.{}-{}.tmp",
            key.as_str(),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let result = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(bytes.len())
    }

    fn scan_entries(&self) -> Result<Vec<EntryMeta>, CacheError> {
        let mut entries = Vec::new();
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        for item in dir {
            let item = item?;
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_SUFFIX) {
                continue;
            }
            // Entries can vanish between listing and stat.
            let Ok(meta) = item.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            entries.push(EntryMeta {
                path,
                size: meta.len(),
                accessed: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(entries)
    }
}

/// Refresh the entry's recency for pruning. A failure only costs LRU accuracy,
/// so the hit is still served.
fn mark_used(path: &Path) {
    if let Err(e) = touch(path) {
        warn!(path = %path.display(), error = %e, "Failed to refresh cache entry time");
    }
}

fn touch(path: &Path) -> std::io::Result<()> {
    let now = SystemTime::now();
    let file = File::options().append(true).open(path)?;
    file.set_times(FileTimes::new().set_accessed(now).set_modified(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::AudioFormat;
    use std::time::Duration;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir, max_size_bytes: u64) -> AudioCache {
        AudioCache::new(&CacheConfig {
            enabled: true,
            path: dir.path().to_path_buf(),
            max_size_bytes,
        })
    }

    fn silent_response() -> Vec<Event> {
        vec![Event::audio_start(AudioFormat::SILENCE), Event::audio_stop()]
    }

    fn entry_count(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().and_then(|x| x.to_str())
                    == Some(ENTRY_SUFFIX)
            })
            .count()
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let when = SystemTime::now() - Duration::from_secs(secs_ago);
        let file = File::options().append(true).open(path).unwrap();
        file.set_times(FileTimes::new().set_modified(when)).unwrap();
    }

    #[test]
    fn test_key_is_sha256_of_text_and_voice() {
        let key = CacheKey::new("Hello world!", None);
        let expected = hex::encode(Sha256::digest(b"Hello world!|"));
        assert_eq!(key.as_str(), expected);
        assert_eq!(key.as_str().len(), 64);

        assert_eq!(key, CacheKey::new("Hello world!", Some("")));
        assert_ne!(key, CacheKey::new("Hello world!", Some("amy")));
        assert_eq!(
            CacheKey::new("hi", Some("amy")).as_str(),
            hex::encode(Sha256::digest(b"hi|amy"))
        );
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 1024 * 1024);
        let key = CacheKey::new("Hello world!", None);

        assert!(cache.get(&key).is_none());
        cache.set(&key, &silent_response());

        assert_eq!(cache.get(&key), Some(silent_response()));
        assert!(cache.entry_path(&key).ends_with(format!("{key}.events")));
    }

    #[test]
    fn test_set_replaces_existing_entry() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 1024 * 1024);
        let key = CacheKey::new("text", Some("voice"));

        cache.set(&key, &silent_response());
        cache.set(&key, &[Event::error("boom")]);

        assert_eq!(cache.get(&key), Some(vec![Event::error("boom")]));
        assert_eq!(entry_count(dir.path()), 1);
    }

    #[test]
    fn test_disabled_cache_never_touches_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache");
        let cache = AudioCache::new(&CacheConfig {
            enabled: false,
            path: path.clone(),
            max_size_bytes: 1024,
        });
        let key = CacheKey::new("x", None);

        cache.set(&key, &silent_response());

        assert!(cache.get(&key).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 1024 * 1024);
        let key = CacheKey::new("x", None);

        fs::write(cache.entry_path(&key), b"{\"type\": \"audio-st").unwrap();
        assert!(cache.get(&key).is_none());

        fs::write(cache.entry_path(&key), b"").unwrap();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_mark_used_tolerates_missing_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.events");

        assert!(touch(&path).is_err());
        mark_used(&path);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_entry_is_still_a_hit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 1024 * 1024);
        let key = CacheKey::new("read only", None);
        cache.set(&key, &silent_response());

        let path = cache.entry_path(&key);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();

        assert_eq!(cache.get(&key), Some(silent_response()));

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_pruning_keeps_total_within_budget() {
        let dir = TempDir::new().unwrap();
        let entry_size = encode_events(&silent_response()).unwrap().len() as u64;
        let cache = cache_in(&dir, entry_size * 3);

        for i in 0..10 {
            cache.set(&CacheKey::new(&format!("text {i}"), None), &silent_response());
            assert!(cache.total_size().unwrap() <= entry_size * 3);
        }
        assert_eq!(entry_count(dir.path()), 3);
    }

    #[test]
    fn test_pruning_evicts_least_recently_used() {
        let dir = TempDir::new().unwrap();
        let entry_size = encode_events(&silent_response()).unwrap().len() as u64;
        let cache = cache_in(&dir, entry_size * 2);

        let old = CacheKey::new("old", None);
        let recent = CacheKey::new("recent", None);
        cache.set(&old, &silent_response());
        cache.set(&recent, &silent_response());
        set_mtime(&cache.entry_path(&old), 60);
        set_mtime(&cache.entry_path(&recent), 30);

        // A hit refreshes "old", so "recent" becomes the eviction candidate.
        assert!(cache.get(&old).is_some());
        cache.set(&CacheKey::new("new", None), &silent_response());

        assert!(cache.get(&old).is_some());
        assert!(cache.get(&recent).is_none());
        assert!(cache.get(&CacheKey::new("new", None)).is_some());
    }

    #[test]
    fn test_zero_budget_deletes_entry_just_written() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 0);
        let key = CacheKey::new("Hello world!", None);

        cache.set(&key, &silent_response());

        assert!(cache.get(&key).is_none());
        assert_eq!(entry_count(dir.path()), 0);
    }

    #[test]
    fn test_entry_larger_than_budget_leaves_empty_directory() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 10);

        cache.set(&CacheKey::new("a", None), &silent_response());

        assert_eq!(entry_count(dir.path()), 0);
    }

    #[test]
    fn test_prune_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 0);
        fs::write(dir.path().join("notes.txt"), vec![0u8; 4096]).unwrap();

        assert_eq!(cache.prune().unwrap(), 0);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_concurrent_sets_stay_within_budget() {
        let dir = TempDir::new().unwrap();
        let entry_size = encode_events(&silent_response()).unwrap().len() as u64;
        let cache = std::sync::Arc::new(cache_in(&dir, entry_size * 4));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        cache.set(&CacheKey::new(&format!("{t}-{i}"), None), &silent_response());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.total_size().unwrap() <= entry_size * 4);
    }
}
