//! Canonical on-disk layout for a conductor workspace.

use std::path::PathBuf;

/// All canonical paths for a project root.
///
/// Orchestration state lives under `.conductor/`; generated artifacts live
/// under `generated/` so they can be inspected and committed separately.
#[derive(Debug, Clone)]
pub struct ConductorPaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub state_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub config_path: PathBuf,
    pub status_path: PathBuf,
    pub plan_cache_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub src_dir: PathBuf,
    pub tests_dir: PathBuf,
}

impl ConductorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        let state_dir = conductor_dir.join("state");
        let cache_dir = conductor_dir.join("cache");
        let artifacts_dir = root.join("generated");
        Self {
            root: root.clone(),
            conductor_dir: conductor_dir.clone(),
            state_dir: state_dir.clone(),
            cache_dir: cache_dir.clone(),
            config_path: conductor_dir.join("config.toml"),
            status_path: state_dir.join("status.json"),
            plan_cache_path: cache_dir.join("plan_cache.json"),
            artifacts_dir: artifacts_dir.clone(),
            src_dir: artifacts_dir.join("src"),
            tests_dir: artifacts_dir.join("tests"),
        }
    }

    /// Directories every test run must be able to import from.
    pub fn search_path(&self) -> Vec<PathBuf> {
        vec![self.src_dir.clone(), self.tests_dir.clone()]
    }
}
