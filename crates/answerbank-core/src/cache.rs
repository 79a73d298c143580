//! Durable title→answer cache backed by a single JSON file.
//!
//! Every read and write goes through one mutex per cache instance, so
//! concurrent callers in the same process never observe a half-written file.
//! Writes land in a temporary file in the target directory that is flushed,
//! fsynced and atomically renamed over the target: after a crash the file is
//! either the old complete mapping or the new one.
//!
//! Nothing here returns an error. Unreadable files are recovered best-effort
//! or backed up and replaced by an empty mapping; failed writes are logged.

use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Flat persistent mapping from normalized question title to answer.
#[derive(Debug)]
pub struct AnswerCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AnswerCache {
    /// Open (or create) the cache file at `path`.
    ///
    /// A missing file is created empty. An existing corrupt file is recovered
    /// or backed up immediately, so the condition is reported at startup.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let cache = Self {
            path: path.into(),
            lock: Mutex::new(()),
        };
        {
            let _guard = cache.guard();
            if cache.path.is_file() {
                let entries = cache.read_entries();
                tracing::debug!(
                    "Answer cache loaded from {} ({} entries)",
                    cache.path.display(),
                    entries.len()
                );
            } else if let Err(e) = cache.write_entries(&BTreeMap::new()) {
                tracing::error!("Failed to create answer cache {}: {e}", cache.path.display());
            }
        }
        cache
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached answer for `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        let _guard = self.guard();
        self.read_entries().remove(key)
    }

    /// Store `answer` under `key`; last writer wins.
    pub fn put(&self, key: &str, answer: &str) {
        let _guard = self.guard();
        let mut entries = self.read_entries();
        entries.insert(key.to_string(), answer.to_string());
        if let Err(e) = self.write_entries(&entries) {
            tracing::error!("Failed to write answer cache {}: {e}", self.path.display());
        }
    }

    /// [`get`](Self::get) on the blocking pool, for use from async code.
    pub async fn get_async(self: &Arc<Self>, key: &str) -> Option<String> {
        let cache = Arc::clone(self);
        let key = key.to_string();
        match tokio::task::spawn_blocking(move || cache.get(&key)).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("Answer cache read task failed: {e}");
                None
            }
        }
    }

    /// [`put`](Self::put) on the blocking pool, for use from async code.
    pub async fn put_async(self: &Arc<Self>, key: &str, answer: &str) {
        let cache = Arc::clone(self);
        let (key, answer) = (key.to_string(), answer.to_string());
        if let Err(e) = tokio::task::spawn_blocking(move || cache.put(&key, &answer)).await {
            tracing::error!("Answer cache write task failed: {e}");
        }
    }

    /// Snapshot of every entry currently on disk.
    pub fn entries(&self) -> BTreeMap<String, String> {
        let _guard = self.guard();
        self.read_entries()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the mapping. Caller holds the lock.
    fn read_entries(&self) -> BTreeMap<String, String> {
        if !self.path.is_file() {
            return BTreeMap::new();
        }
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to read answer cache {}: {e}", self.path.display());
                return BTreeMap::new();
            }
        };

        let parsed = match std::str::from_utf8(&bytes) {
            Ok(text) => match serde_json::from_str::<Value>(text) {
                Ok(value) => into_entries(value).ok_or_else(|| "top level is not an object".to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(format!("invalid UTF-8: {e}")),
        };

        match parsed {
            Ok(entries) => entries,
            Err(reason) => {
                tracing::error!(
                    "Answer cache {} is corrupt ({reason}), attempting recovery",
                    self.path.display()
                );
                if let Some(entries) = recover_entries(&bytes) {
                    tracing::warn!("Recovered {} cache entries", entries.len());
                    return entries;
                }
                self.backup_corrupt_file();
                BTreeMap::new()
            }
        }
    }

    /// Write the mapping via temp file + fsync + rename. Caller holds the lock.
    fn write_entries(&self, entries: &BTreeMap<String, String>) -> std::io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let prefix = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache".to_string());
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&parent)?;

        serde_json::to_writer_pretty(&mut tmp, entries)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        // Dropping a failed persist removes the temp file.
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn backup_corrupt_file(&self) {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache".to_string());
        let backup = self.path.with_file_name(format!("{name}.bak.{stamp}"));
        match std::fs::copy(&self.path, &backup) {
            Ok(_) => tracing::error!(
                "Answer cache backed up to {}, continuing with an empty cache",
                backup.display()
            ),
            Err(e) => tracing::error!("Failed to back up corrupt answer cache: {e}"),
        }
    }
}

/// Keep string-valued entries of a JSON object.
fn into_entries(value: Value) -> Option<BTreeMap<String, String>> {
    let Value::Object(map) = value else {
        return None;
    };
    let total = map.len();
    let entries: BTreeMap<String, String> = map
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect();
    if entries.len() < total {
        tracing::warn!(
            "Dropped {} non-string answer cache entries",
            total - entries.len()
        );
    }
    Some(entries)
}

/// Re-parse the outermost `{...}` region of permissively decoded bytes.
fn recover_entries(bytes: &[u8]) -> Option<BTreeMap<String, String>> {
    let text: String = String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect();
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start >= end {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .and_then(into_entries)
}
