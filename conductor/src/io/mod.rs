//! I/O adapters: durable stores, child processes, and prompt rendering.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod config;
pub mod oracle;
pub mod paths;
pub mod plan_cache;
pub mod process;
pub mod prompt;
pub mod status_store;
pub mod test_runner;

/// Replace `path` with `contents` via a sibling temp file and rename, so
/// readers never observe a partially written document.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
