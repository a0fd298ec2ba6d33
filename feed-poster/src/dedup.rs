//! Bounded record of recently posted item ids.
//!
//! The ordered queue and the membership index always hold the same ids; the
//! queue is what gets persisted, the index answers `contains` in O(1).

use memebot_core::{CoreError, DedupError};
use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct DedupCache {
    queue: VecDeque<String>,
    index: HashSet<String>,
    capacity: usize,
    path: Option<PathBuf>,
}

impl DedupCache {
    /// An empty cache that persists to `path`.
    pub fn new(capacity: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            index: HashSet::with_capacity(capacity),
            capacity,
            path: Some(path.into()),
        }
    }

    /// An empty cache with no backing file; `persist` is a no-op.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            index: HashSet::with_capacity(capacity),
            capacity,
            path: None,
        }
    }

    /// Loads the cache from `path`. A missing, unreadable or corrupt file
    /// gives an empty cache.
    pub async fn load(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let mut cache = Self::new(capacity, path);
        let Some(path) = cache.path.clone() else {
            return cache;
        };

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No dedup cache at {}, starting empty", path.display());
                return cache;
            }
            Err(e) => {
                warn!("Dedup cache {} unreadable, starting empty: {}", path.display(), e);
                return cache;
            }
        };

        match serde_json::from_slice::<Vec<String>>(&raw) {
            Ok(ids) => {
                for id in ids {
                    cache.record(&id);
                }
                info!("Loaded {} cached post IDs", cache.len());
            }
            Err(e) => {
                warn!("Dedup cache {} is corrupt, starting empty: {}", path.display(), e);
            }
        }
        cache
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Appends `id` as the most recent entry, evicting the oldest when full.
    /// Returns false (and changes nothing) if `id` is already present.
    pub fn record(&mut self, id: &str) -> bool {
        if self.index.contains(id) {
            debug!("Post {} already recorded", id);
            return false;
        }

        while self.queue.len() >= self.capacity {
            match self.queue.pop_front() {
                Some(oldest) => {
                    self.index.remove(&oldest);
                }
                None => break,
            }
        }

        self.queue.push_back(id.to_string());
        self.index.insert(id.to_string());
        true
    }

    /// Writes the ordered ids as a JSON array via a temp file and a rename.
    pub async fn persist(&self) -> Result<(), CoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let json = serde_json::to_vec(&self.queue)?;
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Persisted {} post IDs to {}", self.queue.len(), path.display());
        Ok(())
    }

    pub fn check_consistency(&self) -> Result<(), DedupError> {
        if self.queue.len() != self.index.len()
            || !self.queue.iter().all(|id| self.index.contains(id))
        {
            return Err(DedupError::Diverged {
                queue_len: self.queue.len(),
                index_len: self.index.len(),
            });
        }
        if self.queue.len() > self.capacity {
            return Err(DedupError::OverCapacity {
                len: self.queue.len(),
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ids from oldest to newest.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
