//! Fan-out/fan-in over task agents with a durable status board.
//!
//! One [`Orchestrator`] owns one run: it builds the task set through the
//! [`Planner`], rehydrates agents from the status store, runs them on scoped
//! threads, and persists a full snapshot on every stage transition. The same
//! instance serves the operator-facing lookups and guided resumption.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::agent::language::{AgentDeps, module_name};
use crate::agent::{AgentKind, AgentSettings, AgentState, LanguageAgent, StageReporter, TaskAgent};
use crate::core::types::{Stage, StatusRecord, Task};
use crate::error::ConductorError;
use crate::io::config::ConductorConfig;
use crate::io::oracle::Oracle;
use crate::io::paths::ConductorPaths;
use crate::io::plan_cache::PlanCache;
use crate::io::prompt::PromptEngine;
use crate::io::status_store::{StatusMap, StatusStore};
use crate::io::test_runner::TestRunner;
use crate::planner::Planner;

pub type AgentHandle = Mutex<Box<dyn TaskAgent>>;

/// Final state of one task after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub name: String,
    pub stage: Stage,
    /// Set when the agent aborted with an unrecoverable error.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl RunReport {
    pub fn stage_of(&self, name: &str) -> Option<Stage> {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.stage)
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.outcomes.iter().filter(|o| o.stage == stage).count()
    }
}

/// Hook invoked once per run after the final snapshot is written.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, report: &RunReport) -> Result<()>;
}

/// Evaluator that only logs the run summary.
#[derive(Debug, Default)]
pub struct LogEvaluator;

impl Evaluator for LogEvaluator {
    fn evaluate(&self, report: &RunReport) -> Result<()> {
        info!(
            tasks = report.outcomes.len(),
            completed = report.count(Stage::Completed),
            paused = report.count(Stage::PausedForGuidance),
            failed = report.count(Stage::Failed),
            "run finished"
        );
        for outcome in report.outcomes.iter().filter(|o| o.stage != Stage::Completed) {
            warn!(task = %outcome.name, stage = %outcome.stage, error = ?outcome.error, "task not completed");
        }
        Ok(())
    }
}

pub struct Orchestrator {
    paths: ConductorPaths,
    config: ConductorConfig,
    deps: AgentDeps,
    store: StatusStore,
    board: Mutex<StatusMap>,
    agents: BTreeMap<String, AgentHandle>,
    evaluator: Box<dyn Evaluator>,
}

impl Orchestrator {
    pub fn new(
        paths: ConductorPaths,
        config: ConductorConfig,
        oracle: Arc<dyn Oracle>,
        test_runner: Arc<dyn TestRunner>,
    ) -> Result<Self> {
        config.validate()?;
        let deps = AgentDeps {
            oracle,
            test_runner,
            prompts: Arc::new(PromptEngine::new()?),
            paths: paths.clone(),
        };
        Ok(Self {
            store: StatusStore::new(&paths.status_path),
            paths,
            config,
            deps,
            board: Mutex::new(StatusMap::new()),
            agents: BTreeMap::new(),
            evaluator: Box::new(LogEvaluator),
        })
    }

    pub fn with_evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    /// Plan `document`, then run every task concurrently until each one is
    /// completed, paused, or failed.
    pub fn run(&mut self, document: &str) -> Result<RunReport> {
        self.prepare(document)?;
        self.execute()
    }

    /// Build the task set and agents without running them.
    ///
    /// Agents for task names already present in the status store are
    /// rehydrated from their record and on-disk artifacts.
    #[instrument(skip_all)]
    pub fn prepare(&mut self, document: &str) -> Result<()> {
        let planner = Planner::new(
            self.deps.oracle.as_ref(),
            self.deps.prompts.as_ref(),
            PlanCache::new(&self.paths.plan_cache_path, self.config.require_valid_cache),
            self.config.prompt_schema_version.clone(),
        );
        let tasks = planner.plan_all(document)?;

        let persisted = self.store.read_all()?;
        let settings = AgentSettings::from_config(&self.config);
        let mut modules = BTreeSet::new();
        let mut agents = BTreeMap::new();

        for task in tasks {
            if agents.contains_key(&task.name) {
                warn!(task = %task.name, "duplicate task name, keeping the first");
                continue;
            }
            let module = unique_module(&mut modules, &task.name);
            let mut agent = self.build_agent(task, settings).with_module(module);
            if let Some(record) = persisted.get(agent.name()) {
                agent.rehydrate(record);
            }
            agents.insert(agent.name().to_string(), Mutex::new(Box::new(agent) as Box<dyn TaskAgent>));
        }

        let mut board = persisted;
        for agent in agents.values() {
            let record = lock_agent(agent).status_record();
            board.insert(record.name.clone(), record);
        }
        info!(tasks = agents.len(), "task set ready");
        self.agents = agents;
        *self.board.get_mut().unwrap_or_else(PoisonError::into_inner) = board;
        Ok(())
    }

    fn build_agent(&self, task: Task, settings: AgentSettings) -> LanguageAgent {
        match AgentKind::for_language(task.language.as_deref()) {
            AgentKind::Python => LanguageAgent::new(task, self.deps.clone(), settings),
        }
    }

    /// Run all prepared agents concurrently and write the final snapshot.
    #[instrument(skip_all, fields(tasks = self.agents.len()))]
    pub fn execute(&self) -> Result<RunReport> {
        self.persist_snapshot()?;

        let outcomes: Vec<TaskOutcome> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .agents
                .iter()
                .map(|(name, agent)| (name, scope.spawn(move || self.drive(agent))))
                .collect();
            handles
                .into_iter()
                .map(|(name, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        error!(task = %name, "agent thread panicked");
                        TaskOutcome {
                            name: name.clone(),
                            stage: Stage::Failed,
                            error: Some("agent thread panicked".to_string()),
                        }
                    })
                })
                .collect()
        });
        let report = RunReport { outcomes };

        self.persist_snapshot()?;
        if let Err(err) = self.evaluator.evaluate(&report) {
            warn!(err = %format!("{err:#}"), "evaluation hook failed");
        }
        Ok(report)
    }

    /// Run one agent to a settled stage. Errors abort only this task, which
    /// is then recorded as failed.
    fn drive(&self, handle: &AgentHandle) -> TaskOutcome {
        let mut agent = lock_agent(handle);
        match agent.run(self) {
            Ok(stage) => TaskOutcome {
                name: agent.name().to_string(),
                stage,
                error: None,
            },
            Err(err) => {
                let message = format!("{err:#}");
                error!(task = %agent.name(), stage = %agent.stage(), err = %message, "task aborted");
                if let Err(persist_err) = self.set_stage(agent.state_mut(), Stage::Failed) {
                    error!(task = %agent.name(), err = %format!("{persist_err:#}"), "failed to record task failure");
                }
                TaskOutcome {
                    name: agent.name().to_string(),
                    stage: agent.stage(),
                    error: Some(message),
                }
            }
        }
    }

    pub fn get_task_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn get_task(&self, name: &str) -> Option<&AgentHandle> {
        self.agents.get(name)
    }

    /// Resume a paused task, optionally applying operator guidance first.
    ///
    /// Returns whether the task reached `completed`.
    #[instrument(skip(self, guidance), fields(has_guidance = guidance.is_some()))]
    pub fn resume_guided(&self, name: &str, guidance: Option<&str>) -> Result<bool> {
        let handle = self
            .agents
            .get(name)
            .ok_or_else(|| ConductorError::TaskNotFound(name.to_string()))?;
        let mut agent = lock_agent(handle);
        let stage = agent.stage();
        if stage != Stage::PausedForGuidance {
            return Err(ConductorError::NotPaused {
                name: name.to_string(),
                stage,
            }
            .into());
        }

        match guidance.map(str::trim).filter(|g| !g.is_empty()) {
            Some(text) => agent.guide(text, self)?,
            None => info!("resuming without guidance"),
        }
        let stage = agent.run_cycle(self)?;
        self.on_status_update(agent.state())?;
        info!(stage = %stage, "guided cycle finished");
        Ok(stage == Stage::Completed)
    }

    /// Record `agent`'s current status and rewrite the full snapshot.
    pub fn on_status_update(&self, agent: &AgentState) -> Result<()> {
        let record = agent.status_record();
        let mut board = self.lock_board();
        board.insert(record.name.clone(), record);
        self.store.write_all(&board)
    }

    /// Refresh every agent's record on the board and persist it.
    fn persist_snapshot(&self) -> Result<()> {
        let records: Vec<StatusRecord> = self
            .agents
            .values()
            .map(|agent| lock_agent(agent).status_record())
            .collect();
        let mut board = self.lock_board();
        for record in records {
            board.insert(record.name.clone(), record);
        }
        self.store.write_all(&board)
    }

    fn lock_board(&self) -> MutexGuard<'_, StatusMap> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StageReporter for Orchestrator {
    fn set_stage(&self, agent: &mut AgentState, stage: Stage) -> Result<()> {
        if agent.stage == Stage::Completed && stage != Stage::Completed {
            return Err(anyhow!("{} is already completed", agent.name));
        }
        debug!(task = %agent.name, from = %agent.stage, to = %stage, retry_count = agent.retry_count, "stage transition");
        agent.stage = stage;
        self.on_status_update(agent)
    }
}

fn lock_agent(handle: &AgentHandle) -> MutexGuard<'_, Box<dyn TaskAgent>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Module name for `task_name` that no earlier task in the run has claimed.
fn unique_module(taken: &mut BTreeSet<String>, task_name: &str) -> String {
    let base = module_name(task_name);
    let mut candidate = base.clone();
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{base}_{n}");
        n += 1;
    }
    candidate
}
