//! Task agents: one state machine per task.
//!
//! [`TaskAgent`] is the capability interface every agent variant implements
//! (`setup_scripts`, `plan`, `write_tests`, `implement`, `test`, `debug`,
//! `revise_with_guidance`, `interactive_prompt`). [`TaskAgent::run`],
//! [`TaskAgent::run_cycle`], and [`TaskAgent::guide`] are provided methods built on those
//! capabilities, so variants only describe *how* to do each stage.
//!
//! Stage changes never happen by assignment inside an agent: they go through
//! [`StageReporter::set_stage`], which the orchestrator implements to persist
//! the transition before the agent moves on.

use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, info_span, warn};

use crate::core::stage::{LoopStep, after_test, can_transition};
use crate::core::structured::tail_lines;
use crate::core::types::{Plan, Stage, StatusRecord, TestOutcome};
use crate::error::ConductorError;
use crate::io::config::{ConductorConfig, GuidedExhaustion};

pub mod language;

pub use language::LanguageAgent;

/// Applies a stage change to an agent and makes it durable.
///
/// Implementations must finish persisting before returning so an observer of
/// the status store is never more than one transition behind.
pub trait StageReporter: Sync {
    fn set_stage(&self, agent: &mut AgentState, stage: Stage) -> Result<()>;
}

/// Mutable state owned by one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentState {
    pub name: String,
    pub stage: Stage,
    /// Debug cycles spent since the last accepted guidance.
    pub retry_count: u32,
    pub backend_identity: String,
    pub plan: Option<Plan>,
    /// Latest implementation text.
    pub artifact: String,
    /// Latest generated test text.
    pub test_artifact: String,
}

impl AgentState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: Stage::Initialized,
            retry_count: 0,
            backend_identity: String::new(),
            plan: None,
            artifact: String::new(),
            test_artifact: String::new(),
        }
    }

    pub fn status_record(&self) -> StatusRecord {
        StatusRecord {
            name: self.name.clone(),
            stage: self.stage,
            retry_count: self.retry_count,
            backend_identity: self.backend_identity.clone(),
        }
    }
}

/// Retry ceilings and limits an agent runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    pub max_debug_attempts: u32,
    pub guided_debug_attempts: u32,
    pub guided_exhaustion: GuidedExhaustion,
    pub failure_tail_lines: usize,
    pub test_timeout: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &ConductorConfig) -> Self {
        Self {
            max_debug_attempts: config.max_debug_attempts,
            guided_debug_attempts: config.guided_debug_attempts,
            guided_exhaustion: config.guided_exhaustion,
            failure_tail_lines: config.failure_tail_lines,
            test_timeout: config.test_runner.timeout(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&ConductorConfig::default())
    }
}

/// Which agent variant handles a task, chosen from the task's language tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Python,
}

impl AgentKind {
    /// Map a free-form language tag to a variant. Unknown or missing tags
    /// fall back to Python.
    pub fn for_language(language: Option<&str>) -> Self {
        match language.map(|l| l.trim().to_ascii_lowercase()) {
            Some(lang) if lang.is_empty() || lang == "python" || lang == "py" => AgentKind::Python,
            None => AgentKind::Python,
            Some(other) => {
                warn!(language = %other, "no agent for language, using python");
                AgentKind::Python
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AgentKind::Python => "Python",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            AgentKind::Python => "py",
        }
    }
}

/// Capability interface of a task agent plus the shared workflow drivers.
pub trait TaskAgent: Send {
    fn state(&self) -> &AgentState;
    fn state_mut(&mut self) -> &mut AgentState;
    fn settings(&self) -> &AgentSettings;

    /// Create empty artifact placeholders.
    fn setup_scripts(&mut self) -> Result<()>;
    /// Produce the plan unless one is already attached.
    fn plan(&mut self) -> Result<()>;
    fn write_tests(&mut self) -> Result<()>;
    fn implement(&mut self) -> Result<()>;
    /// Run the tests against the current artifacts.
    fn test(&mut self) -> Result<TestOutcome>;
    /// Revise the implementation from a failure summary. Does not re-test.
    fn debug(&mut self, failure_summary: &str) -> Result<()>;
    /// Revise the implementation from human guidance text.
    fn revise_with_guidance(&mut self, guidance: &str) -> Result<()>;
    /// Text handed to an operator starting an interactive session.
    fn interactive_prompt(&self) -> Result<String>;

    fn name(&self) -> &str {
        &self.state().name
    }

    fn stage(&self) -> Stage {
        self.state().stage
    }

    fn status_record(&self) -> StatusRecord {
        self.state().status_record()
    }

    /// Apply guidance to a paused agent: revise the implementation, reset the
    /// retry count, and move to `testing`.
    fn guide(&mut self, guidance: &str, reporter: &dyn StageReporter) -> Result<()> {
        let stage = self.stage();
        if stage != Stage::PausedForGuidance {
            return Err(ConductorError::NotPaused {
                name: self.name().to_string(),
                stage,
            }
            .into());
        }
        info!(task = %self.name(), "applying guidance");
        self.revise_with_guidance(guidance)?;
        self.state_mut().retry_count = 0;
        advance(self, reporter, Stage::Testing)
    }

    /// Drive the full workflow until the agent completes or pauses.
    ///
    /// Errors out of setup, planning, or generation abort this task; failures
    /// inside the test/debug loop never do.
    fn run(&mut self, reporter: &dyn StageReporter) -> Result<Stage> {
        let span = info_span!("agent", task = %self.name());
        let _enter = span.enter();

        match self.stage() {
            Stage::Completed | Stage::PausedForGuidance => {
                info!(stage = %self.stage(), "nothing to do");
                return Ok(self.stage());
            }
            Stage::Testing | Stage::Debugging => {
                info!(stage = %self.stage(), retry_count = self.state().retry_count, "resuming test loop");
            }
            _ => {
                advance(self, reporter, Stage::SettingUp)?;
                self.setup_scripts()?;
                advance(self, reporter, Stage::Planning)?;
                self.plan()?;
                advance(self, reporter, Stage::WritingTests)?;
                self.write_tests()?;
                advance(self, reporter, Stage::Implementing)?;
                self.implement()?;
            }
        }

        let ceiling = self.settings().max_debug_attempts;
        let start = self.state().retry_count;
        let stage = test_debug_loop(self, reporter, ceiling - start.min(ceiling))?;
        if stage == Stage::PausedForGuidance {
            warn!(retry_count = self.state().retry_count, "debug attempts exhausted, waiting for guidance");
        }
        Ok(stage)
    }

    /// Bounded test/debug loop used after guidance, capped by
    /// `guided_debug_attempts` independently of the autonomous ceiling.
    ///
    /// Returns `completed` on success. On exhaustion returns
    /// `paused_for_guidance` or `failed` per `guided_exhaustion`.
    fn run_cycle(&mut self, reporter: &dyn StageReporter) -> Result<Stage> {
        let span = info_span!("guided_cycle", task = %self.name());
        let _enter = span.enter();

        let settings = *self.settings();
        let stage = test_debug_loop(self, reporter, settings.guided_debug_attempts)?;
        if stage == Stage::PausedForGuidance && settings.guided_exhaustion == GuidedExhaustion::Fail {
            advance(self, reporter, Stage::Failed)?;
            return Ok(Stage::Failed);
        }
        Ok(stage)
    }
}

/// Move `agent` to `to` through the reporter, rejecting illegal transitions.
pub fn advance<A: TaskAgent + ?Sized>(
    agent: &mut A,
    reporter: &dyn StageReporter,
    to: Stage,
) -> Result<()> {
    let from = agent.stage();
    if !can_transition(from, to) {
        bail!("illegal stage transition {from} -> {to} for {}", agent.name());
    }
    reporter.set_stage(agent.state_mut(), to)
}

/// Alternate test and debug until the tests pass or `budget` debug cycles
/// have been spent. Test-runner and debug errors count as failed iterations.
///
/// `budget` counts cycles of this call only. The persisted `retry_count`
/// saturates at `max_debug_attempts`, so a guided cycle run without fresh
/// guidance cannot push it past the autonomous ceiling.
fn test_debug_loop<A: TaskAgent + ?Sized>(
    agent: &mut A,
    reporter: &dyn StageReporter,
    budget: u32,
) -> Result<Stage> {
    let tail = agent.settings().failure_tail_lines;
    let ceiling = agent.settings().max_debug_attempts;
    let mut spent = 0u32;
    loop {
        advance(agent, reporter, Stage::Testing)?;
        let outcome = agent.test().unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "test run errored, counting as failure");
            TestOutcome::Failed {
                summary: tail_lines(&format!("{err:#}"), tail),
            }
        });

        match after_test(&outcome, spent, budget) {
            LoopStep::Complete => {
                info!(retry_count = agent.state().retry_count, "tests passed");
                advance(agent, reporter, Stage::Completed)?;
                return Ok(Stage::Completed);
            }
            LoopStep::Exhausted => {
                advance(agent, reporter, Stage::PausedForGuidance)?;
                return Ok(Stage::PausedForGuidance);
            }
            LoopStep::Debug => {
                let summary = match &outcome {
                    TestOutcome::Failed { summary } => summary.as_str(),
                    TestOutcome::Passed => "",
                };
                spent += 1;
                let state = agent.state_mut();
                state.retry_count = (state.retry_count + 1).min(ceiling);
                advance(agent, reporter, Stage::Debugging)?;
                if let Err(err) = agent.debug(summary) {
                    warn!(err = %format!("{err:#}"), retry_count = agent.state().retry_count, "debug attempt failed");
                }
            }
        }
    }
}
