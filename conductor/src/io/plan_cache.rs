//! Content-addressed plan cache (`.conductor/cache/plan_cache.json`).
//!
//! Entries are keyed by a SHA-256 fingerprint of the design document, the
//! model identity, and the prompt schema version, so any change to one of
//! them misses the cache. The document is read and rewritten wholesale; there
//! is no locking, so callers must serialize writers (the planner runs once
//! per run, before any agent starts).

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::core::types::Task;
use crate::error::ConductorError;
use crate::io::write_atomic;

/// Cached planner output for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub plan: Vec<Task>,
    /// RFC 3339 creation time.
    pub timestamp: String,
    pub model: String,
    pub prompt_schema_version: String,
}

impl CacheEntry {
    pub fn new(plan: Vec<Task>, model: &str, prompt_schema_version: &str) -> Self {
        Self {
            plan,
            timestamp: Utc::now().to_rfc3339(),
            model: model.to_string(),
            prompt_schema_version: prompt_schema_version.to_string(),
        }
    }
}

pub type CacheMap = BTreeMap<String, CacheEntry>;

#[derive(Debug, Clone)]
pub struct PlanCache {
    path: PathBuf,
    require_valid: bool,
}

impl PlanCache {
    /// `require_valid` turns an unparsable cache document into a config error
    /// instead of an empty cache.
    pub fn new(path: impl Into<PathBuf>, require_valid: bool) -> Self {
        Self {
            path: path.into(),
            require_valid,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deterministic fingerprint over the cache key inputs.
    ///
    /// Each field is length-prefixed so shifting bytes between fields cannot
    /// produce the same digest. Surrounding whitespace of the document is
    /// ignored.
    pub fn hash(document_text: &str, model_id: &str, prompt_version: &str) -> String {
        let mut hasher = Sha256::new();
        for field in [document_text.trim(), model_id, prompt_version] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<CacheMap> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no plan cache yet");
                return Ok(CacheMap::new());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read plan cache {}", self.path.display()));
            }
        };
        match serde_json::from_str(&contents) {
            Ok(cache) => Ok(cache),
            Err(err) if self.require_valid => Err(ConductorError::Config(format!(
                "plan cache {} is malformed: {err}",
                self.path.display()
            ))
            .into()),
            Err(err) => {
                warn!(err = %err, "plan cache is malformed, treating as empty");
                Ok(CacheMap::new())
            }
        }
    }

    #[instrument(skip_all, fields(path = %self.path.display(), entries = cache.len()))]
    pub fn save(&self, cache: &CacheMap) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(cache).context("serialize plan cache")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}
