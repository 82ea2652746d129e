//! Conductor configuration stored under `.conductor/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConductorError;

/// What a guided cycle does when its small retry ceiling runs out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuidedExhaustion {
    /// Re-enter `paused_for_guidance` and wait for more input.
    #[default]
    Pause,
    /// Give up on the task (`failed`).
    Fail,
}

/// Conductor configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values
/// below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Debug cycles an agent may spend autonomously before pausing.
    pub max_debug_attempts: u32,

    /// Debug cycles allowed per guided resumption.
    pub guided_debug_attempts: u32,

    pub guided_exhaustion: GuidedExhaustion,

    /// Lines of test-runner output kept in a failure summary.
    pub failure_tail_lines: usize,

    /// Bumped whenever prompt templates change shape; part of the plan cache key.
    pub prompt_schema_version: String,

    /// Treat an unreadable plan cache as fatal instead of empty.
    pub require_valid_cache: bool,

    pub oracle: OracleConfig,
    pub test_runner: TestRunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command that produces a completion (e.g. `["gemini"]`).
    pub command: Vec<String>,
    /// Flag preceding the prompt argument. When unset, the prompt goes to stdin.
    pub prompt_flag: Option<String>,
    /// Flag preceding the model name.
    pub model_flag: Option<String>,
    /// Models tried in order; the first successful response wins.
    pub models: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Prompts longer than this go to stdin even when `prompt_flag` is set,
    /// keeping the command line under the OS argument size limit.
    pub max_arg_bytes: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: vec!["gemini".to_string()],
            prompt_flag: Some("-p".to_string()),
            model_flag: Some("-m".to_string()),
            models: vec!["gemini-2.5-pro".to_string(), "gemini-2.5-flash".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
            max_arg_bytes: 100_000,
        }
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestRunnerConfig {
    /// Command prefix; the test artifact path is appended.
    pub command: Vec<String>,
    /// Environment variable receiving the artifact search path.
    pub search_path_env: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for TestRunnerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python".to_string(),
                "-m".to_string(),
                "pytest".to_string(),
                "-q".to_string(),
            ],
            search_path_env: "PYTHONPATH".to_string(),
            timeout_secs: 5 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl TestRunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_debug_attempts: 10,
            guided_debug_attempts: 3,
            guided_exhaustion: GuidedExhaustion::Pause,
            failure_tail_lines: 40,
            prompt_schema_version: "v1".to_string(),
            require_valid_cache: false,
            oracle: OracleConfig::default(),
            test_runner: TestRunnerConfig::default(),
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<(), ConductorError> {
        let invalid = |msg: &str| Err(ConductorError::Config(msg.to_string()));
        if self.max_debug_attempts == 0 {
            return invalid("max_debug_attempts must be > 0");
        }
        if self.guided_debug_attempts == 0 {
            return invalid("guided_debug_attempts must be > 0");
        }
        if self.failure_tail_lines == 0 {
            return invalid("failure_tail_lines must be > 0");
        }
        if self.prompt_schema_version.trim().is_empty() {
            return invalid("prompt_schema_version must not be empty");
        }
        if self.oracle.command.first().is_none_or(|c| c.trim().is_empty()) {
            return invalid("oracle.command must be a non-empty array");
        }
        if self.oracle.timeout_secs == 0 || self.test_runner.timeout_secs == 0 {
            return invalid("timeouts must be > 0");
        }
        if self.oracle.output_limit_bytes == 0 || self.test_runner.output_limit_bytes == 0 {
            return invalid("output limits must be > 0");
        }
        if self.oracle.max_arg_bytes == 0 {
            return invalid("oracle.max_arg_bytes must be > 0");
        }
        if self
            .test_runner
            .command
            .first()
            .is_none_or(|c| c.trim().is_empty())
        {
            return invalid("test_runner.command must be a non-empty array");
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        return Ok(ConductorConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ConductorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/config.toml");
        let cfg = ConductorConfig {
            guided_exhaustion: GuidedExhaustion::Fail,
            ..ConductorConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_debug_attempts = 2\n[oracle]\nmodels = [\"m1\"]\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_debug_attempts, 2);
        assert_eq!(cfg.guided_debug_attempts, 3);
        assert_eq!(cfg.oracle.models, vec!["m1"]);
        assert_eq!(cfg.oracle.command, vec!["gemini"]);
    }

    #[test]
    fn zero_ceiling_is_a_config_error() {
        let cfg = ConductorConfig {
            max_debug_attempts: 0,
            ..ConductorConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConductorError::Config(_)));
    }

    #[test]
    fn zero_argument_limit_is_a_config_error() {
        let mut cfg = ConductorConfig::default();
        cfg.oracle.max_arg_bytes = 0;
        assert!(cfg.validate().is_err());
    }
}
