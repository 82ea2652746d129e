//! Oracle-backed agent that generates one source module and its tests.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use super::{AgentKind, AgentSettings, AgentState, TaskAgent};
use crate::core::stage::resume_stage;
use crate::core::structured::{parse_structured, strip_fence, tail_lines};
use crate::core::types::{Plan, Stage, StatusRecord, Task, TestOutcome};
use crate::io::oracle::Oracle;
use crate::io::paths::ConductorPaths;
use crate::io::prompt::{CodeContext, PromptEngine};
use crate::io::test_runner::{TestRequest, TestRunner};

/// Collaborators shared by every agent in a run.
#[derive(Clone)]
pub struct AgentDeps {
    pub oracle: Arc<dyn Oracle>,
    pub test_runner: Arc<dyn TestRunner>,
    pub prompts: Arc<PromptEngine>,
    pub paths: ConductorPaths,
}

pub struct LanguageAgent {
    state: AgentState,
    task: Task,
    kind: AgentKind,
    module: String,
    settings: AgentSettings,
    deps: AgentDeps,
}

impl LanguageAgent {
    pub fn new(task: Task, deps: AgentDeps, settings: AgentSettings) -> Self {
        let kind = AgentKind::for_language(task.language.as_deref());
        let mut state = AgentState::new(task.name.clone());
        state.plan = task.plan.clone();
        Self {
            module: module_name(&task.name),
            state,
            task,
            kind,
            settings,
            deps,
        }
    }

    /// Override the artifact module name, e.g. to keep two tasks whose names
    /// snake-case identically from sharing files.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn implementation_path(&self) -> PathBuf {
        self.deps
            .paths
            .src_dir
            .join(format!("{}.{}", self.module, self.kind.extension()))
    }

    pub fn test_path(&self) -> PathBuf {
        self.deps
            .paths
            .tests_dir
            .join(format!("test_{}.{}", self.module, self.kind.extension()))
    }

    /// Restore persisted progress, reloading artifacts from disk.
    ///
    /// The resumed stage follows [`resume_stage`]; a restart from
    /// `initialized` also clears the retry count.
    pub fn rehydrate(&mut self, record: &StatusRecord) {
        let implementation = fs::read_to_string(self.implementation_path()).unwrap_or_default();
        let tests = fs::read_to_string(self.test_path()).unwrap_or_default();
        let present = !implementation.trim().is_empty() && !tests.trim().is_empty();

        let stage = resume_stage(record.stage, present);
        self.state.stage = stage;
        self.state.backend_identity = record.backend_identity.clone();
        self.state.retry_count = if stage == Stage::Initialized {
            0
        } else {
            record.retry_count.min(self.settings.max_debug_attempts)
        };
        self.state.artifact = implementation;
        self.state.test_artifact = tests;
        debug!(
            task = %self.state.name,
            persisted = %record.stage,
            resumed = %stage,
            artifacts_present = present,
            "rehydrated agent"
        );
    }

    fn language(&self) -> &str {
        self.task
            .language
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(self.kind.label())
    }

    fn context(&self) -> Result<CodeContext<'_>> {
        CodeContext::new(
            &self.task,
            self.language(),
            &self.module,
            self.state.plan.as_ref(),
            &self.state.artifact,
            &self.state.test_artifact,
        )
    }

    /// Send `prompt` to the oracle and record which backend answered.
    fn ask(&mut self, prompt: &str) -> Result<String> {
        let generation = self.deps.oracle.generate(prompt)?;
        self.state.backend_identity = self.deps.oracle.identity(&generation);
        Ok(generation.text)
    }

    fn store_implementation(&mut self, response: &str) -> Result<()> {
        let code = strip_fence(response).to_string();
        let path = self.implementation_path();
        write_artifact(&path, &code)?;
        self.state.artifact = code;
        Ok(())
    }
}

impl TaskAgent for LanguageAgent {
    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    fn setup_scripts(&mut self) -> Result<()> {
        for path in [self.implementation_path(), self.test_path()] {
            write_artifact(&path, "")?;
        }
        self.state.artifact.clear();
        self.state.test_artifact.clear();
        Ok(())
    }

    #[instrument(skip_all, fields(task = %self.state.name))]
    fn plan(&mut self) -> Result<()> {
        if self.state.plan.is_some() {
            debug!("plan already attached");
            return Ok(());
        }
        let prompt = self.deps.prompts.task_plan(&self.task, self.language())?;
        let response = self.ask(&prompt)?;
        let plan: Plan = parse_structured("plan", &response)?;
        info!(complexity = ?plan.complexity, sub_tasks = plan.sub_tasks.len(), "planned task");
        self.state.plan = Some(plan);
        Ok(())
    }

    #[instrument(skip_all, fields(task = %self.state.name))]
    fn write_tests(&mut self) -> Result<()> {
        let prompt = self.deps.prompts.write_tests(&self.context()?)?;
        let response = self.ask(&prompt)?;
        let tests = strip_fence(&response).to_string();
        write_artifact(&self.test_path(), &tests)?;
        self.state.test_artifact = tests;
        Ok(())
    }

    #[instrument(skip_all, fields(task = %self.state.name))]
    fn implement(&mut self) -> Result<()> {
        let prompt = self.deps.prompts.implement(&self.context()?)?;
        let response = self.ask(&prompt)?;
        self.store_implementation(&response)
    }

    fn test(&mut self) -> Result<TestOutcome> {
        let request = TestRequest {
            task: self.state.name.clone(),
            test_path: self.test_path(),
            search_path: self.deps.paths.search_path(),
            workdir: self.deps.paths.root.clone(),
            timeout: self.settings.test_timeout,
        };
        let report = self.deps.test_runner.run(&request)?;
        if report.passed {
            Ok(TestOutcome::Passed)
        } else {
            Ok(TestOutcome::Failed {
                summary: tail_lines(&report.output, self.settings.failure_tail_lines),
            })
        }
    }

    #[instrument(skip_all, fields(task = %self.state.name, retry_count = self.state.retry_count))]
    fn debug(&mut self, failure_summary: &str) -> Result<()> {
        let prompt = self.deps.prompts.debug(&self.context()?, failure_summary)?;
        let response = self.ask(&prompt)?;
        self.store_implementation(&response)
    }

    fn revise_with_guidance(&mut self, guidance: &str) -> Result<()> {
        let prompt = self.deps.prompts.guide(&self.context()?, guidance)?;
        let response = self.ask(&prompt)?;
        self.store_implementation(&response)
    }

    fn interactive_prompt(&self) -> Result<String> {
        self.deps.prompts.handoff(
            &self.context()?,
            self.state.stage,
            self.state.retry_count,
            &self.implementation_path(),
            &self.test_path(),
        )
    }
}

fn write_artifact(path: &std::path::Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write artifact {}", path.display()))
}

/// Importable module name derived from a task name.
///
/// Keeps alphanumerics, underscores, and spaces, then snake-cases the result.
pub fn module_name(task_name: &str) -> String {
    let kept: String = task_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ' ')
        .collect();
    let name = kept
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_ascii_lowercase();
    match name.chars().next() {
        None => "task".to_string(),
        Some(c) if c.is_ascii_digit() => format!("task_{name}"),
        Some(_) => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingReporter, ScriptedOracle, ScriptedTestRunner, TestScript, workspace};

    fn task(name: &str) -> Task {
        Task {
            name: name.to_string(),
            description: format!("{name} component"),
            language: Some("Python".to_string()),
            plan: None,
        }
    }

    fn agent_with(
        oracle: Arc<ScriptedOracle>,
        runner: Arc<ScriptedTestRunner>,
        root: &std::path::Path,
        settings: AgentSettings,
    ) -> LanguageAgent {
        let deps = AgentDeps {
            oracle,
            test_runner: runner,
            prompts: Arc::new(PromptEngine::new().expect("prompts")),
            paths: ConductorPaths::new(root),
        };
        LanguageAgent::new(task("Rate Limiter"), deps, settings)
    }

    #[test]
    fn module_names_are_snake_case_identifiers() {
        assert_eq!(module_name("Rate Limiter"), "rate_limiter");
        assert_eq!(module_name("  HTTP-Client (v2) "), "httpclient_v2");
        assert_eq!(module_name("3D engine"), "task_3d_engine");
        assert_eq!(module_name("!!!"), "task");
    }

    #[test]
    fn run_generates_artifacts_and_completes() {
        let dir = workspace();
        let oracle = Arc::new(ScriptedOracle::for_components(&["Rate Limiter"]));
        let runner = Arc::new(ScriptedTestRunner::new());
        let mut agent = agent_with(oracle.clone(), runner.clone(), dir.path(), AgentSettings::default());
        let reporter = RecordingReporter::default();

        let stage = agent.run(&reporter).expect("run");

        assert_eq!(stage, Stage::Completed);
        assert_eq!(
            reporter.stages("Rate Limiter"),
            vec![
                Stage::SettingUp,
                Stage::Planning,
                Stage::WritingTests,
                Stage::Implementing,
                Stage::Testing,
                Stage::Completed,
            ]
        );
        let code = fs::read_to_string(agent.implementation_path()).expect("impl");
        assert!(!code.contains("```"));
        assert!(fs::read_to_string(agent.test_path()).expect("tests").contains("def test_"));
        assert_eq!(agent.state().backend_identity, "scripted:scripted-model");
        assert!(agent.state().plan.is_some());
        assert_eq!(runner.runs("Rate Limiter"), 1);
    }

    #[test]
    fn exhausted_debug_budget_pauses_with_retry_count_at_ceiling() {
        let dir = workspace();
        let oracle = Arc::new(ScriptedOracle::for_components(&["Rate Limiter"]));
        let runner = Arc::new(ScriptedTestRunner::new());
        runner.set_script("Rate Limiter", TestScript::AlwaysFail);
        let settings = AgentSettings {
            max_debug_attempts: 2,
            ..AgentSettings::default()
        };
        let mut agent = agent_with(oracle.clone(), runner.clone(), dir.path(), settings);
        let reporter = RecordingReporter::default();

        let stage = agent.run(&reporter).expect("run");

        assert_eq!(stage, Stage::PausedForGuidance);
        assert_eq!(agent.state().retry_count, 2);
        assert_eq!(reporter.max_retry_count("Rate Limiter"), 2);
        assert_eq!(runner.runs("Rate Limiter"), 3);
        let debug_calls = oracle.calls_of(crate::io::prompt::PromptKind::Debug);
        assert_eq!(debug_calls, 2);
    }

    /// A rehydrated agent resumes its loop with the persisted count and never
    /// reports more than the ceiling on any transition.
    #[test]
    fn resumed_loop_keeps_retry_count_within_ceiling() {
        let dir = workspace();
        let oracle = Arc::new(ScriptedOracle::for_components(&["Rate Limiter"]));
        let runner = Arc::new(ScriptedTestRunner::new());
        runner.set_script("Rate Limiter", TestScript::AlwaysFail);
        let settings = AgentSettings {
            max_debug_attempts: 2,
            ..AgentSettings::default()
        };
        let mut agent = agent_with(oracle.clone(), runner.clone(), dir.path(), settings);
        write_artifact(&agent.implementation_path(), "def limit():\n    pass\n").expect("impl");
        write_artifact(&agent.test_path(), "def test_limit():\n    pass\n").expect("tests");
        let mut record = StatusRecord::new("Rate Limiter");
        record.stage = Stage::Testing;
        record.retry_count = 1;
        agent.rehydrate(&record);
        let reporter = RecordingReporter::default();

        let stage = agent.run(&reporter).expect("run");

        assert_eq!(stage, Stage::PausedForGuidance);
        let events = reporter.events("Rate Limiter");
        assert_eq!(events.first(), Some(&(Stage::Testing, 1)));
        assert!(events.iter().all(|(_, retries)| *retries <= 2));
        assert_eq!(agent.state().retry_count, 2);
        assert_eq!(runner.runs("Rate Limiter"), 2);
        assert_eq!(oracle.calls_of(crate::io::prompt::PromptKind::Debug), 1);
    }

    #[test]
    fn unguided_cycle_does_not_exceed_ceiling() {
        let dir = workspace();
        let oracle = Arc::new(ScriptedOracle::for_components(&["Rate Limiter"]));
        let runner = Arc::new(ScriptedTestRunner::new());
        runner.set_script("Rate Limiter", TestScript::AlwaysFail);
        let settings = AgentSettings {
            max_debug_attempts: 2,
            guided_debug_attempts: 3,
            ..AgentSettings::default()
        };
        let mut agent = agent_with(oracle, runner.clone(), dir.path(), settings);
        agent.state_mut().stage = Stage::PausedForGuidance;
        agent.state_mut().retry_count = 2;
        let reporter = RecordingReporter::default();

        let stage = agent.run_cycle(&reporter).expect("cycle");

        assert_eq!(stage, Stage::PausedForGuidance);
        assert_eq!(runner.runs("Rate Limiter"), 4);
        assert_eq!(reporter.max_retry_count("Rate Limiter"), 2);
        assert_eq!(agent.state().retry_count, 2);
    }

    #[test]
    fn rehydrate_clamps_an_out_of_range_retry_count() {
        let dir = workspace();
        let oracle = Arc::new(ScriptedOracle::for_components(&["Rate Limiter"]));
        let runner = Arc::new(ScriptedTestRunner::new());
        let mut agent = agent_with(oracle, runner, dir.path(), AgentSettings::default());
        let mut record = StatusRecord::new("Rate Limiter");
        record.stage = Stage::PausedForGuidance;
        record.retry_count = 25;

        agent.rehydrate(&record);

        assert_eq!(agent.state().retry_count, 10);
    }

    #[test]
    fn guide_requires_pause_and_resets_retries() {
        let dir = workspace();
        let oracle = Arc::new(ScriptedOracle::for_components(&["Rate Limiter"]));
        let runner = Arc::new(ScriptedTestRunner::new());
        let mut agent = agent_with(oracle, runner, dir.path(), AgentSettings::default());
        let reporter = RecordingReporter::default();

        let err = agent.guide("try harder", &reporter).expect_err("not paused");
        assert!(matches!(
            err.downcast_ref::<crate::error::ConductorError>(),
            Some(crate::error::ConductorError::NotPaused { .. })
        ));

        agent.state_mut().stage = Stage::PausedForGuidance;
        agent.state_mut().retry_count = 10;
        agent.guide("handle empty input", &reporter).expect("guide");
        assert_eq!(agent.state().retry_count, 0);
        assert_eq!(agent.stage(), Stage::Testing);
    }

    #[test]
    fn rehydrate_restarts_when_artifacts_are_missing() {
        let dir = workspace();
        let oracle = Arc::new(ScriptedOracle::for_components(&["Rate Limiter"]));
        let runner = Arc::new(ScriptedTestRunner::new());
        let mut agent = agent_with(oracle, runner, dir.path(), AgentSettings::default());

        let mut record = StatusRecord::new("Rate Limiter");
        record.stage = Stage::Debugging;
        record.retry_count = 4;
        agent.rehydrate(&record);
        assert_eq!(agent.stage(), Stage::Initialized);
        assert_eq!(agent.state().retry_count, 0);

        write_artifact(&agent.implementation_path(), "def limit():\n    pass\n").expect("impl");
        write_artifact(&agent.test_path(), "def test_limit():\n    pass\n").expect("tests");
        agent.rehydrate(&record);
        assert_eq!(agent.stage(), Stage::Debugging);
        assert_eq!(agent.state().retry_count, 4);
        assert!(agent.state().artifact.contains("def limit"));
    }

    #[test]
    fn interactive_prompt_names_artifact_paths() {
        let dir = workspace();
        let oracle = Arc::new(ScriptedOracle::for_components(&["Rate Limiter"]));
        let runner = Arc::new(ScriptedTestRunner::new());
        let agent = agent_with(oracle, runner, dir.path(), AgentSettings::default());

        let text = agent.interactive_prompt().expect("handoff");
        assert!(text.contains("rate_limiter.py"));
        assert!(text.contains("test_rate_limiter.py"));
    }
}
