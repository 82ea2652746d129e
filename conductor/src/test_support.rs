//! Test doubles for the oracle, the test runner, and stage reporting.
//!
//! Nothing here spawns processes: the scripted oracle answers by prompt kind
//! and the scripted runner passes or fails per task on a configurable script.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::agent::{AgentState, StageReporter};
use crate::core::types::Stage;
use crate::io::oracle::{Generation, Oracle};
use crate::io::prompt::PromptKind;
use crate::io::test_runner::{TestReport, TestRequest, TestRunner};

/// Fresh temporary project root.
pub fn workspace() -> TempDir {
    tempfile::tempdir().expect("tempdir")
}

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Oracle answering from a closure and recording every prompt it receives.
pub struct ScriptedOracle {
    responder: Responder,
    prompts: Mutex<Vec<String>>,
    failing: Mutex<Vec<PromptKind>>,
}

impl ScriptedOracle {
    pub fn new(responder: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Oracle that extracts exactly `names` as Python components and answers
    /// every code prompt with a small fenced module.
    pub fn for_components(names: &[&str]) -> Self {
        let components = components_yaml(names);
        let plans = unified_plan_yaml(names);
        Self::new(move |prompt| {
            let reply = match PromptKind::of(prompt) {
                Some(PromptKind::ExtractComponents) => components.clone(),
                Some(PromptKind::UnifiedPlan) => plans.clone(),
                Some(PromptKind::TaskPlan) => plan_yaml("generated plan"),
                Some(PromptKind::WriteTests) => {
                    "```python\ndef test_component():\n    assert component() == 1\n```".to_string()
                }
                Some(PromptKind::Implement | PromptKind::Debug | PromptKind::Guide) => {
                    "```python\ndef component():\n    return 1\n```".to_string()
                }
                Some(PromptKind::Handoff) | None => {
                    return Err(anyhow!("unexpected prompt: {prompt}"));
                }
            };
            Ok(reply)
        })
    }

    /// Make every prompt of `kind` fail from now on.
    pub fn fail_on(&self, kind: PromptKind) {
        self.failing.lock().expect("lock").push(kind);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("lock").len()
    }

    pub fn calls_of(&self, kind: PromptKind) -> usize {
        self.prompts
            .lock()
            .expect("lock")
            .iter()
            .filter(|p| PromptKind::of(p) == Some(kind))
            .count()
    }
}

impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    fn generate(&self, prompt: &str) -> Result<Generation> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        if let Some(kind) = PromptKind::of(prompt)
            && self.failing.lock().expect("lock").contains(&kind)
        {
            return Err(anyhow!("scripted failure for {}", kind.as_str()));
        }
        Ok(Generation {
            text: (self.responder)(prompt)?,
            model: self.model_id().to_string(),
        })
    }
}

pub fn components_yaml(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("- name: {name}\n  description: {name} component\n  language: Python\n"))
        .collect()
}

pub fn plan_yaml(purpose: &str) -> String {
    format!(
        "purpose: {purpose}\nsub_tasks: [write code]\ndependencies: []\nedge_cases: [empty input]\ncomplexity: Low\n"
    )
}

pub fn unified_plan_yaml(names: &[&str]) -> String {
    let body: String = names
        .iter()
        .map(|name| {
            format!(
                "- name: {name}\n  plan:\n    purpose: build {name}\n    sub_tasks: [write code]\n    edge_cases: [empty input]\n    complexity: Medium\n"
            )
        })
        .collect();
    format!("```yaml\n{body}```")
}

/// How a scripted test runner answers for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestScript {
    AlwaysPass,
    AlwaysFail,
    /// Fail this many runs after the script is set, then pass.
    FailTimes(u32),
}

#[derive(Debug)]
struct ScriptState {
    script: TestScript,
    since_set: u32,
    total: u32,
}

/// Test runner driven by per-task scripts. Unknown tasks pass.
#[derive(Debug, Default)]
pub struct ScriptedTestRunner {
    tasks: Mutex<BTreeMap<String, ScriptState>>,
}

impl ScriptedTestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_script(&self, task: &str, script: TestScript) {
        let mut tasks = self.tasks.lock().expect("lock");
        let entry = tasks.entry(task.to_string()).or_insert(ScriptState {
            script,
            since_set: 0,
            total: 0,
        });
        entry.script = script;
        entry.since_set = 0;
    }

    pub fn runs(&self, task: &str) -> u32 {
        self.tasks
            .lock()
            .expect("lock")
            .get(task)
            .map_or(0, |s| s.total)
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestReport> {
        let mut tasks = self.tasks.lock().expect("lock");
        let state = tasks.entry(request.task.clone()).or_insert(ScriptState {
            script: TestScript::AlwaysPass,
            since_set: 0,
            total: 0,
        });
        state.since_set += 1;
        state.total += 1;
        let passed = match state.script {
            TestScript::AlwaysPass => true,
            TestScript::AlwaysFail => false,
            TestScript::FailTimes(n) => state.since_set > n,
        };
        let output = if passed {
            "1 passed".to_string()
        } else {
            format!("FAILED test_component - AssertionError (run {})\n1 failed", state.total)
        };
        Ok(TestReport { passed, output })
    }
}

/// Reporter that applies stage changes in memory and records each one with
/// the retry count the agent carried at that moment.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<(String, Stage, u32)>>,
}

impl RecordingReporter {
    /// `(stage, retry_count)` for every transition of `name`, in order.
    pub fn events(&self, name: &str) -> Vec<(Stage, u32)> {
        self.events
            .lock()
            .expect("lock")
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, stage, retries)| (*stage, *retries))
            .collect()
    }

    pub fn stages(&self, name: &str) -> Vec<Stage> {
        self.events(name).into_iter().map(|(stage, _)| stage).collect()
    }

    pub fn max_retry_count(&self, name: &str) -> u32 {
        self.events(name)
            .into_iter()
            .map(|(_, retries)| retries)
            .max()
            .unwrap_or(0)
    }
}

impl StageReporter for RecordingReporter {
    fn set_stage(&self, agent: &mut AgentState, stage: Stage) -> Result<()> {
        agent.stage = stage;
        self.events
            .lock()
            .expect("lock")
            .push((agent.name.clone(), stage, agent.retry_count));
        Ok(())
    }
}
