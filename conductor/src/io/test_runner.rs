//! Test runner adapter.
//!
//! Runs a generated test artifact with the artifact directories on the
//! interpreter's search path. Exit code 0 is a pass; anything else, including
//! a timeout, is a failure with the combined output attached.

use std::env;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::io::config::TestRunnerConfig;
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone)]
pub struct TestRequest {
    /// Task whose artifacts are under test.
    pub task: String,
    pub test_path: PathBuf,
    /// Directories the tests must be able to import from.
    pub search_path: Vec<PathBuf>,
    pub workdir: PathBuf,
    pub timeout: Duration,
}

/// Raw result of a test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub passed: bool,
    pub output: String,
}

pub trait TestRunner: Send + Sync {
    fn run(&self, request: &TestRequest) -> Result<TestReport>;
}

/// Test runner that spawns a configured command with the test path appended.
pub struct CommandTestRunner {
    config: TestRunnerConfig,
}

impl CommandTestRunner {
    pub fn new(config: TestRunnerConfig) -> Self {
        Self { config }
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(task = %request.task, test_path = %request.test_path.display()))]
    fn run(&self, request: &TestRequest) -> Result<TestReport> {
        let search_path =
            env::join_paths(&request.search_path).context("join test search path")?;
        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&self.config.command[1..])
            .arg(&request.test_path)
            .current_dir(&request.workdir)
            .env(&self.config.search_path_env, search_path);

        let output = run_command_with_timeout(
            cmd,
            None,
            request.timeout,
            self.config.output_limit_bytes,
        )
        .context("run tests")?;

        debug!(exit_code = ?output.status.code(), timed_out = output.timed_out, "test run finished");
        Ok(TestReport {
            passed: output.success(),
            output: output.combined(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner(script: &str) -> CommandTestRunner {
        CommandTestRunner::new(TestRunnerConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string(), "sh".to_string()],
            search_path_env: "CONDUCTOR_TEST_PATH".to_string(),
            timeout_secs: 5,
            output_limit_bytes: 10_000,
        })
    }

    fn request(temp: &tempfile::TempDir) -> TestRequest {
        TestRequest {
            task: "auth".to_string(),
            test_path: temp.path().join("test_auth.py"),
            search_path: vec![temp.path().join("src"), temp.path().join("tests")],
            workdir: temp.path().to_path_buf(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn zero_exit_passes_and_sees_search_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        // $1 is the appended test path.
        let report = runner(r#"echo "$CONDUCTOR_TEST_PATH"; echo "$1""#)
            .run(&request(&temp))
            .expect("run");
        assert!(report.passed);
        assert!(report.output.contains("src"));
        assert!(report.output.contains("test_auth.py"));
    }

    #[test]
    fn nonzero_exit_fails_with_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = runner("echo 'assert 1 == 2' >&2; exit 1")
            .run(&request(&temp))
            .expect("run");
        assert!(!report.passed);
        assert!(report.output.contains("assert 1 == 2"));
    }
}
