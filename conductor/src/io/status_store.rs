//! Durable task status map (`.conductor/state/status.json`).
//!
//! Every operation runs under an advisory lock on a sibling `.lock` file, so
//! the orchestrator, its agent threads, and a separate status query process
//! never observe or produce a torn document. Reads take a shared lock;
//! mutations take an exclusive lock spanning the whole read-modify-write.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use fd_lock::RwLock;
use tracing::{debug, instrument, warn};

use crate::core::types::{StatusPatch, StatusRecord};
use crate::error::ConductorError;
use crate::io::write_atomic;

/// Task name to status record, ordered by name for stable output.
pub type StatusMap = BTreeMap<String, StatusRecord>;

#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A missing or corrupt document reads as empty.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn read_all(&self) -> Result<StatusMap> {
        let lock = self.open_lock()?;
        let _guard = lock
            .read()
            .map_err(|err| self.unavailable(format!("acquire shared lock: {err}")))?;
        self.load_unlocked()
    }

    pub fn read_one(&self, name: &str) -> Result<Option<StatusRecord>> {
        Ok(self.read_all()?.remove(name))
    }

    /// Merge `patch` into the record for `name`, creating it if absent.
    #[instrument(skip_all, fields(path = %self.path.display(), task = name))]
    pub fn upsert_one(&self, name: &str, patch: &StatusPatch) -> Result<StatusRecord> {
        let mut lock = self.open_lock()?;
        let _guard = lock
            .write()
            .map_err(|err| self.unavailable(format!("acquire exclusive lock: {err}")))?;
        let mut map = self.load_unlocked()?;
        let record = map
            .entry(name.to_string())
            .or_insert_with(|| StatusRecord::new(name));
        patch.apply(record);
        let record = record.clone();
        self.store_unlocked(&map)?;
        debug!(stage = %record.stage, retry_count = record.retry_count, "status upserted");
        Ok(record)
    }

    /// Replace the whole document with `map`.
    #[instrument(skip_all, fields(path = %self.path.display(), tasks = map.len()))]
    pub fn write_all(&self, map: &StatusMap) -> Result<()> {
        let mut lock = self.open_lock()?;
        let _guard = lock
            .write()
            .map_err(|err| self.unavailable(format!("acquire exclusive lock: {err}")))?;
        self.store_unlocked(map)
    }

    fn open_lock(&self) -> Result<RwLock<File>, ConductorError> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| self.unavailable(format!("create {}: {err}", parent.display())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|err| {
                self.unavailable(format!("open lock {}: {err}", self.lock_path.display()))
            })?;
        Ok(RwLock::new(file))
    }

    fn load_unlocked(&self) -> Result<StatusMap> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StatusMap::new()),
            Err(err) => return Err(self.unavailable(format!("read: {err}")).into()),
        };
        match serde_json::from_str(&contents) {
            Ok(map) => Ok(map),
            Err(err) => {
                warn!(err = %err, "status document is corrupt, treating as empty");
                Ok(StatusMap::new())
            }
        }
    }

    fn store_unlocked(&self, map: &StatusMap) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(map)?;
        buf.push('\n');
        write_atomic(&self.path, &buf).map_err(|err| self.unavailable(format!("{err:#}")))?;
        Ok(())
    }

    fn unavailable(&self, reason: String) -> ConductorError {
        ConductorError::StoreUnavailable {
            path: self.path.clone(),
            reason,
        }
    }
}
