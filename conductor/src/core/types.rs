//! Shared types for tasks, plans, and persisted status.
//!
//! Serialized forms of these types are the on-disk contract for the status
//! store and plan cache, so field names and enum spellings must stay stable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a task agent within its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initialized,
    SettingUp,
    Planning,
    WritingTests,
    Implementing,
    Testing,
    Debugging,
    PausedForGuidance,
    Completed,
    /// Aborted by an unrecoverable stage error, or by an exhausted guided
    /// cycle when `guided_exhaustion = "fail"`.
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initialized => "initialized",
            Stage::SettingUp => "setting_up",
            Stage::Planning => "planning",
            Stage::WritingTests => "writing_tests",
            Stage::Implementing => "implementing",
            Stage::Testing => "testing",
            Stage::Debugging => "debugging",
            Stage::PausedForGuidance => "paused_for_guidance",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }

    /// No further work happens without an explicit restart.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// The agent has stopped on its own: terminal, or waiting for guidance.
    pub fn is_settled(self) -> bool {
        self.is_terminal() || self == Stage::PausedForGuidance
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted status for one task (`.conductor/state/status.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub name: String,
    pub stage: Stage,
    pub retry_count: u32,
    pub backend_identity: String,
}

impl StatusRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: Stage::Initialized,
            retry_count: 0,
            backend_identity: String::new(),
        }
    }
}

/// Partial update merged into an existing [`StatusRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPatch {
    pub stage: Option<Stage>,
    pub retry_count: Option<u32>,
    pub backend_identity: Option<String>,
}

impl StatusPatch {
    pub fn apply(&self, record: &mut StatusRecord) {
        if let Some(stage) = self.stage {
            record.stage = stage;
        }
        if let Some(retry_count) = self.retry_count {
            record.retry_count = retry_count;
        }
        if let Some(backend) = &self.backend_identity {
            record.backend_identity = backend.clone();
        }
    }
}

/// Rough size of a task as judged by the planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    #[serde(alias = "low", alias = "LOW")]
    Low,
    #[default]
    #[serde(alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "high", alias = "HIGH")]
    High,
}

/// Structured implementation plan for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub purpose: String,
    #[serde(default)]
    pub sub_tasks: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub edge_cases: Vec<String>,
    #[serde(default)]
    pub complexity: Complexity,
}

/// A component as extracted from the design document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// A unit of work for one agent. Immutable once the task set is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub plan: Option<Plan>,
}

impl Task {
    pub fn from_component(component: Component, plan: Option<Plan>) -> Self {
        Self {
            name: component.name,
            description: component.description,
            language: component.language,
            plan,
        }
    }
}

/// Result of one test-runner invocation as seen by the agent loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// `summary` is the bounded tail of the runner output.
    Failed { summary: String },
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}
