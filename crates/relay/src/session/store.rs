// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session record storage: in-memory and JSON-file backends.
//!
//! A store is owned by exactly one broker actor, so the trait takes
//! `&mut self` and does no locking of its own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::{is_valid_name, SessionRecord};

/// Durable mapping from session handle to session record.
pub trait SessionStore: Send + 'static {
    /// Insert a new record. Fails if the handle already exists.
    fn insert(&mut self, record: SessionRecord) -> anyhow::Result<()>;

    fn get(&self, handle: &str) -> Option<SessionRecord>;

    /// Replace an existing record. Fails if the handle is unknown.
    fn update(&mut self, record: SessionRecord) -> anyhow::Result<()>;

    /// Delete a batch of records, returning how many existed.
    fn remove(&mut self, handles: &[String]) -> anyhow::Result<usize>;

    fn records(&self) -> Vec<SessionRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every handle with its age at `now_ms`.
    fn ages(&self, now_ms: u64) -> Vec<(String, Duration)> {
        self.records().into_iter().map(|r| (r.handle.clone(), r.age(now_ms))).collect()
    }
}

/// Volatile store; sessions are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: HashMap<String, SessionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn insert(&mut self, record: SessionRecord) -> anyhow::Result<()> {
        if self.sessions.contains_key(&record.handle) {
            anyhow::bail!("duplicate session handle");
        }
        self.sessions.insert(record.handle.clone(), record);
        Ok(())
    }

    fn get(&self, handle: &str) -> Option<SessionRecord> {
        self.sessions.get(handle).cloned()
    }

    fn update(&mut self, record: SessionRecord) -> anyhow::Result<()> {
        match self.sessions.get_mut(&record.handle) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => anyhow::bail!("unknown session handle"),
        }
    }

    fn remove(&mut self, handles: &[String]) -> anyhow::Result<usize> {
        Ok(handles.iter().filter(|h| self.sessions.remove(h.as_str()).is_some()).count())
    }

    fn records(&self) -> Vec<SessionRecord> {
        self.sessions.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// On-disk snapshot format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    sessions: HashMap<String, SessionRecord>,
}

/// Store that mirrors every mutation to a JSON file.
///
/// The whole map is rewritten atomically (write tmp + rename) after each
/// change and reloaded on open.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let sessions = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str::<Snapshot>(&contents)?.sessions
        } else {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            HashMap::new()
        };
        Ok(Self { path, inner: MemoryStore { sessions } })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> anyhow::Result<()> {
        let snapshot = SnapshotRef { sessions: &self.inner.sessions };
        save(&self.path, &snapshot)
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    sessions: &'a HashMap<String, SessionRecord>,
}

impl SessionStore for FileStore {
    fn insert(&mut self, record: SessionRecord) -> anyhow::Result<()> {
        let handle = record.handle.clone();
        self.inner.insert(record)?;
        if let Err(e) = self.flush() {
            self.inner.sessions.remove(&handle);
            return Err(e);
        }
        Ok(())
    }

    fn get(&self, handle: &str) -> Option<SessionRecord> {
        self.inner.get(handle)
    }

    fn update(&mut self, record: SessionRecord) -> anyhow::Result<()> {
        let previous = self
            .inner
            .get(&record.handle)
            .ok_or_else(|| anyhow::anyhow!("unknown session handle"))?;
        self.inner.update(record)?;
        if let Err(e) = self.flush() {
            self.inner.sessions.insert(previous.handle.clone(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn remove(&mut self, handles: &[String]) -> anyhow::Result<usize> {
        let removed: Vec<SessionRecord> =
            handles.iter().filter_map(|h| self.inner.sessions.remove(h)).collect();
        if removed.is_empty() {
            return Ok(0);
        }
        if let Err(e) = self.flush() {
            for record in removed {
                self.inner.sessions.insert(record.handle.clone(), record);
            }
            return Err(e);
        }
        Ok(removed.len())
    }

    fn records(&self) -> Vec<SessionRecord> {
        self.inner.records()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Where each broker domain keeps its sessions.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Memory,
    /// One `<domain>.json` file per domain under this directory.
    Dir(PathBuf),
}

impl StoreBackend {
    pub fn open(&self, domain: &str) -> anyhow::Result<Box<dyn SessionStore>> {
        if !is_valid_name(domain) {
            anyhow::bail!("invalid broker domain: {domain:?}");
        }
        match self {
            Self::Memory => Ok(Box::new(MemoryStore::new())),
            Self::Dir(dir) => Ok(Box::new(FileStore::open(dir.join(format!("{domain}.json")))?)),
        }
    }
}

/// Write JSON atomically (unique tmp file + rename).
///
/// The tmp name carries PID and a counter so concurrent writers in tests
/// never share a tmp file.
fn save<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(value)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
