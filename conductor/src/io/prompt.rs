//! Prompt rendering for the planner and task agents.
//!
//! Templates live in `prompts/` and start with a `<!-- prompt:KIND -->`
//! marker so a rendered prompt can be classified without inspecting its body.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;

use crate::core::types::{Component, Plan, Stage, Task};

const TEMPLATES: [(PromptKind, &str); 8] = [
    (
        PromptKind::ExtractComponents,
        include_str!("prompts/extract_components.md"),
    ),
    (PromptKind::UnifiedPlan, include_str!("prompts/unified_plan.md")),
    (PromptKind::TaskPlan, include_str!("prompts/task_plan.md")),
    (PromptKind::WriteTests, include_str!("prompts/write_tests.md")),
    (PromptKind::Implement, include_str!("prompts/implement.md")),
    (PromptKind::Debug, include_str!("prompts/debug.md")),
    (PromptKind::Guide, include_str!("prompts/guide.md")),
    (PromptKind::Handoff, include_str!("prompts/handoff.md")),
];

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<!--\s*prompt:(\w+)\s*-->").expect("marker regex is valid"));

/// Which template produced a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    ExtractComponents,
    UnifiedPlan,
    TaskPlan,
    WriteTests,
    Implement,
    Debug,
    Guide,
    Handoff,
}

impl PromptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptKind::ExtractComponents => "extract_components",
            PromptKind::UnifiedPlan => "unified_plan",
            PromptKind::TaskPlan => "task_plan",
            PromptKind::WriteTests => "write_tests",
            PromptKind::Implement => "implement",
            PromptKind::Debug => "debug",
            PromptKind::Guide => "guide",
            PromptKind::Handoff => "handoff",
        }
    }

    /// Classify a rendered prompt by its leading marker.
    pub fn of(prompt: &str) -> Option<PromptKind> {
        let caps = MARKER_RE.captures(prompt.trim_start())?;
        let name = caps.get(1)?.as_str();
        TEMPLATES
            .iter()
            .map(|(kind, _)| *kind)
            .find(|kind| kind.as_str() == name)
    }
}

/// Everything a code-generation prompt may refer to.
#[derive(Debug, Clone, Serialize)]
pub struct CodeContext<'a> {
    pub task: &'a Task,
    pub language: &'a str,
    pub module: &'a str,
    /// Plan rendered as YAML, when one exists.
    pub plan: Option<String>,
    pub implementation: &'a str,
    pub tests: &'a str,
}

impl<'a> CodeContext<'a> {
    pub fn new(
        task: &'a Task,
        language: &'a str,
        module: &'a str,
        plan: Option<&Plan>,
        implementation: &'a str,
        tests: &'a str,
    ) -> Result<Self> {
        let plan = plan
            .map(serde_yaml::to_string)
            .transpose()
            .context("render plan as yaml")?;
        Ok(Self {
            task,
            language,
            module,
            plan,
            implementation,
            tests,
        })
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (kind, source) in TEMPLATES {
            env.add_template(kind.as_str(), source)
                .with_context(|| format!("load {} template", kind.as_str()))?;
        }
        Ok(Self { env })
    }

    fn render<S: Serialize>(&self, kind: PromptKind, ctx: S) -> Result<String> {
        let template = self.env.get_template(kind.as_str())?;
        template
            .render(ctx)
            .with_context(|| format!("render {} prompt", kind.as_str()))
    }

    pub fn extract_components(&self, document: &str) -> Result<String> {
        self.render(
            PromptKind::ExtractComponents,
            context! { document => document.trim() },
        )
    }

    pub fn unified_plan(&self, components: &[Component]) -> Result<String> {
        let components = serde_yaml::to_string(components).context("render components")?;
        self.render(PromptKind::UnifiedPlan, context! { components => components })
    }

    pub fn task_plan(&self, task: &Task, language: &str) -> Result<String> {
        self.render(
            PromptKind::TaskPlan,
            context! { task => task, language => language },
        )
    }

    pub fn write_tests(&self, ctx: &CodeContext<'_>) -> Result<String> {
        self.render(PromptKind::WriteTests, ctx)
    }

    pub fn implement(&self, ctx: &CodeContext<'_>) -> Result<String> {
        self.render(PromptKind::Implement, ctx)
    }

    pub fn debug(&self, ctx: &CodeContext<'_>, failure: &str) -> Result<String> {
        self.render(
            PromptKind::Debug,
            context! { failure => failure, ..minijinja::Value::from_serialize(ctx) },
        )
    }

    pub fn guide(&self, ctx: &CodeContext<'_>, guidance: &str) -> Result<String> {
        self.render(
            PromptKind::Guide,
            context! { guidance => guidance.trim(), ..minijinja::Value::from_serialize(ctx) },
        )
    }

    pub fn handoff(
        &self,
        ctx: &CodeContext<'_>,
        stage: Stage,
        retry_count: u32,
        implementation_path: &Path,
        test_path: &Path,
    ) -> Result<String> {
        self.render(
            PromptKind::Handoff,
            context! {
                stage => stage.as_str(),
                retry_count => retry_count,
                implementation_path => implementation_path.display().to_string(),
                test_path => test_path.display().to_string(),
                ..minijinja::Value::from_serialize(ctx)
            },
        )
    }
}
