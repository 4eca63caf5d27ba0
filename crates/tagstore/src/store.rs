//! Mutex-guarded tag map with write-through JSON persistence

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Reserved tag toggled by the watched-state operation
pub const WATCHED_TAG: &str = "watched";

type TagMap = BTreeMap<String, Vec<String>>;

/// Errors raised while reading or writing the tag document
#[derive(Debug, thiserror::Error)]
pub enum TagStoreError {
    #[error("failed to access tag file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tag file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Tag storage keyed by relative media path
///
/// Tags keep insertion order for display; membership is what matters.
/// Every mutation persists the full document before returning. A failed
/// persist is logged and the in-memory change is kept.
///
/// Disk writes happen on a snapshot after the map lock is released, so
/// readers never wait on file I/O. The writer lock keeps snapshots reaching
/// the disk in mutation order.
#[derive(Debug)]
pub struct TagStore {
    path: PathBuf,
    tags: Mutex<TagMap>,
    writer: Mutex<()>,
}

impl TagStore {
    /// Create an empty store that persists to `path` without reading it
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_tags(path.into(), TagMap::new())
    }

    /// Load the store from `path`
    ///
    /// A missing file yields an empty store. A file that exists but cannot be
    /// read or parsed is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, TagStoreError> {
        let path = path.into();
        let tags = read_document(&path)?;
        tracing::info!("Loaded tags for {} files from {}", tags.len(), path.display());
        Ok(Self::with_tags(path, tags))
    }

    fn with_tags(path: PathBuf, tags: TagMap) -> Self {
        Self {
            path,
            tags: Mutex::new(tags),
            writer: Mutex::new(()),
        }
    }

    /// Path of the backing JSON document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current map to disk
    ///
    /// The document is written to a sibling temp file and renamed over the
    /// target, so readers never observe a half-written file.
    pub fn save(&self) -> Result<(), TagStoreError> {
        let _writer = lock(&self.writer);
        let snapshot = self.lock().clone();
        self.persist(&snapshot)
    }

    /// Tags for a file, empty when the file has none
    pub fn get(&self, file_path: &str) -> Vec<String> {
        self.lock().get(file_path).cloned().unwrap_or_default()
    }

    /// Replace the tag list for a file
    ///
    /// Duplicates are dropped keeping the first occurrence. An empty list
    /// removes the entry.
    pub fn set(&self, file_path: &str, tags: Vec<String>) -> Vec<String> {
        let mut deduped: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !deduped.contains(&tag) {
                deduped.push(tag);
            }
        }

        self.update(|map| {
            if deduped.is_empty() {
                map.remove(file_path);
            } else {
                map.insert(file_path.to_string(), deduped.clone());
            }
            (deduped, true)
        })
    }

    /// Add a tag to a file, returning the resulting list
    ///
    /// Adding a tag that is already present does not touch the disk.
    pub fn add(&self, file_path: &str, tag: &str) -> Vec<String> {
        self.update(|map| {
            let entry = map.entry(file_path.to_string()).or_default();
            if entry.iter().any(|t| t == tag) {
                return (entry.clone(), false);
            }
            entry.push(tag.to_string());
            (entry.clone(), true)
        })
    }

    /// Remove a tag from a file, returning the resulting list
    ///
    /// Removing an absent tag does not touch the disk.
    pub fn remove(&self, file_path: &str, tag: &str) -> Vec<String> {
        self.update(|map| {
            let Some(entry) = map.get_mut(file_path) else {
                return (Vec::new(), false);
            };
            let Some(pos) = entry.iter().position(|t| t == tag) else {
                return (entry.clone(), false);
            };

            entry.remove(pos);
            let result = entry.clone();
            if result.is_empty() {
                map.remove(file_path);
            }
            (result, true)
        })
    }

    /// Flip the watched tag on a file, returning the new watched state
    pub fn toggle_watched(&self, file_path: &str) -> bool {
        self.update(|map| {
            let entry = map.entry(file_path.to_string()).or_default();
            let watched = match entry.iter().position(|t| t == WATCHED_TAG) {
                Some(pos) => {
                    entry.remove(pos);
                    false
                }
                None => {
                    entry.push(WATCHED_TAG.to_string());
                    true
                }
            };

            if entry.is_empty() {
                map.remove(file_path);
            }
            (watched, true)
        })
    }

    /// Sorted union of every tag in the store
    pub fn all_tags(&self) -> Vec<String> {
        let map = self.lock();
        let unique: BTreeSet<&String> = map.values().flatten().collect();
        unique.into_iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, TagMap> {
        lock(&self.tags)
    }

    /// Apply `change` under the map lock and persist a snapshot if it
    /// reports a modification
    fn update<R>(&self, change: impl FnOnce(&mut TagMap) -> (R, bool)) -> R {
        let _writer = lock(&self.writer);
        let (result, snapshot) = {
            let mut map = self.lock();
            let (result, changed) = change(&mut map);
            (result, changed.then(|| map.clone()))
        };

        if let Some(snapshot) = snapshot {
            if let Err(e) = self.persist(&snapshot) {
                tracing::error!("Error saving tags: {}", e);
            }
        }
        result
    }

    fn persist(&self, tags: &TagMap) -> Result<(), TagStoreError> {
        let json = serde_json::to_string_pretty(tags).map_err(|source| TagStoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        let tmp = temp_path(&self.path);
        std::fs::write(&tmp, json).map_err(|source| TagStoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| TagStoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_document(path: &Path) -> Result<TagMap, TagStoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TagMap::new()),
        Err(source) => {
            return Err(TagStoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if raw.trim().is_empty() {
        return Ok(TagMap::new());
    }

    serde_json::from_str(&raw).map_err(|source| TagStoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "tags.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}
