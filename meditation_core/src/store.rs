//! Durable key-value store contract and implementations.
//!
//! Both state machines persist through [`KeyValueStore`]: a flat mapping
//! from string keys to primitive [`Value`]s, read and written synchronously.
//! Absent values always read back as a well-defined default.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;

/// Persisted key names
pub mod keys {
    pub const DAILY_SESSION_COUNT: &str = "dailySessionCount";
    pub const MEDITATION_DATES: &str = "meditationDates";
    pub const CURRENT_STREAK: &str = "currentStreak";
    pub const BEST_STREAK: &str = "bestStreak";
    pub const TOTAL_MEDITATION_TIME: &str = "totalMeditationTime";
    pub const LAST_RESET_DATE: &str = "lastResetDate";
    pub const HAS_LAUNCHED_BEFORE: &str = "hasLaunchedBefore";
    pub const TRIAL_END_DATE: &str = "trialEndDate";
    pub const PURCHASED_PRODUCT_IDS: &str = "purchasedProductIds";
    pub const TIMER_DURATION: &str = "timerDuration";
}

/// A primitive value held by the store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    TimestampList(Vec<DateTime<Utc>>),
    TextSet(BTreeSet<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampList(_) => "timestamp_list",
            Value::TextSet(_) => "text_set",
        }
    }
}

fn mismatched<T>(key: &str, expected: &str, found: &Value, default: T) -> T {
    tracing::warn!(
        "Stored value for {} is {} (expected {}), using default",
        key,
        found.type_name(),
        expected
    );
    default
}

/// Store trait for persisting primitive values by key
///
/// Implementations must be safe to share between the UI thread and a
/// background transaction listener.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// Flush any in-memory changes to durable storage
    fn synchronize(&self) -> Result<()>;

    fn int(&self, key: &str) -> i64 {
        match self.get(key) {
            None => 0,
            Some(Value::Int(v)) => v,
            Some(other) => mismatched(key, "int", &other, 0),
        }
    }

    fn float(&self, key: &str) -> f64 {
        match self.get(key) {
            None => 0.0,
            Some(Value::Float(v)) => v,
            Some(Value::Int(v)) => v as f64,
            Some(other) => mismatched(key, "float", &other, 0.0),
        }
    }

    fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            None => false,
            Some(Value::Bool(v)) => v,
            Some(other) => mismatched(key, "bool", &other, false),
        }
    }

    fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key) {
            None => None,
            Some(Value::Timestamp(v)) => Some(v),
            Some(other) => mismatched(key, "timestamp", &other, None),
        }
    }

    fn timestamps(&self, key: &str) -> Vec<DateTime<Utc>> {
        match self.get(key) {
            None => Vec::new(),
            Some(Value::TimestampList(v)) => v,
            Some(other) => mismatched(key, "timestamp_list", &other, Vec::new()),
        }
    }

    fn text_set(&self, key: &str) -> BTreeSet<String> {
        match self.get(key) {
            None => BTreeSet::new(),
            Some(Value::TextSet(v)) => v,
            Some(other) => mismatched(key, "text_set", &other, BTreeSet::new()),
        }
    }
}

/// Write several keys, attempting every one even if an earlier write fails.
///
/// Returns the first error encountered.
pub fn write_all(store: &dyn KeyValueStore, entries: Vec<(&str, Value)>) -> Result<()> {
    let mut first_error = None;
    for (key, value) in entries {
        if let Err(e) = store.set(key, value) {
            tracing::warn!("Failed to persist {}: {}", key, e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store, used in tests and as a stand-in for a device store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
    deny_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`remove` fail with [`Error::WriteDenied`]
    pub fn set_deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        lock(&self.values).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(Error::WriteDenied { key: key.into() });
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_writable(key)?;
        lock(&self.values).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        lock(&self.values).remove(key);
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// File-backed store
// ============================================================================

/// JSON file store with file locking and atomic replacement
///
/// Values are cached in memory. A write updates the cache first and records
/// the key as pending. A flush holds an exclusive lock on a sidecar
/// `<file>.lock`, re-reads the file, applies the pending changes and
/// atomically replaces it, so several processes can share one file
/// without dropping each other's keys. If the rewrite fails the cache
/// keeps the new value and the change stays pending until the next
/// successful flush.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    cache: Mutex<Cache>,
}

#[derive(Debug)]
struct Cache {
    values: BTreeMap<String, Value>,
    /// Local changes not yet written; `None` marks a removal
    pending: BTreeMap<String, Option<Value>>,
}

impl FileStore {
    /// Open a store file with shared locking
    ///
    /// Returns an empty store if the file doesn't exist.
    /// If the file is corrupted, logs a warning and starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = Self::load(&path)?;
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Ok(Self {
            path,
            lock_path: PathBuf::from(lock_path),
            cache: Mutex::new(Cache {
                values,
                pending: BTreeMap::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, Value>> {
        if !path.exists() {
            tracing::info!("No store file found at {:?}, starting empty", path);
            return Ok(BTreeMap::new());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open store file {:?}: {}. Starting empty.", path, e);
                return Ok(BTreeMap::new());
            }
        };

        // Acquire shared lock for reading
        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock store file {:?}: {}. Starting empty.", path, e);
            return Ok(BTreeMap::new());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read store file {:?}: {}. Starting empty.", path, e);
            return Ok(BTreeMap::new());
        }

        file.unlock()?;

        match serde_json::from_str::<BTreeMap<String, Value>>(&contents) {
            Ok(values) => {
                tracing::debug!("Loaded {} keys from {:?}", values.len(), path);
                Ok(values)
            }
            Err(e) => {
                tracing::warn!("Failed to parse store file {:?}: {}. Starting empty.", path, e);
                Ok(BTreeMap::new())
            }
        }
    }

    /// Write pending changes under the sidecar lock
    fn flush(&self, cache: &mut Cache) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "store path missing parent")
        })?;
        std::fs::create_dir_all(parent)?;

        let guard = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        guard.lock_exclusive()?;
        let result = self.merge_and_write(parent, cache);
        guard.unlock()?;
        result
    }

    /// Re-read the file, apply pending changes, then temp file, fsync, rename
    fn merge_and_write(&self, parent: &Path, cache: &mut Cache) -> Result<()> {
        let mut merged = Self::load(&self.path)?;
        for (key, change) in &cache.pending {
            match change {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }

        let temp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string_pretty(&merged)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!(
            "Saved {} keys ({} changed) to {:?}",
            merged.len(),
            cache.pending.len(),
            self.path
        );
        cache.values = merged;
        cache.pending.clear();
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        lock(&self.cache).values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut cache = lock(&self.cache);
        cache.values.insert(key.to_string(), value.clone());
        cache.pending.insert(key.to_string(), Some(value));
        self.flush(&mut cache)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut cache = lock(&self.cache);
        cache.values.remove(key);
        cache.pending.insert(key.to_string(), None);
        self.flush(&mut cache)
    }

    fn synchronize(&self) -> Result<()> {
        let mut cache = lock(&self.cache);
        self.flush(&mut cache)
    }
}
