//! Turns a design document into the task set for a run.
//!
//! One extraction call and one batched plan call per document fingerprint;
//! later runs over the same inputs are served from the plan cache.

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::core::structured::parse_structured;
use crate::core::types::{Component, Plan, Task};
use crate::io::oracle::Oracle;
use crate::io::plan_cache::{CacheEntry, PlanCache};
use crate::io::prompt::PromptEngine;

/// One element of the batched plan response.
#[derive(Debug, Deserialize)]
struct PlannedComponent {
    name: String,
    #[serde(default)]
    plan: Option<Plan>,
}

pub struct Planner<'a> {
    oracle: &'a dyn Oracle,
    prompts: &'a PromptEngine,
    cache: PlanCache,
    prompt_version: String,
}

impl<'a> Planner<'a> {
    pub fn new(
        oracle: &'a dyn Oracle,
        prompts: &'a PromptEngine,
        cache: PlanCache,
        prompt_version: impl Into<String>,
    ) -> Self {
        Self {
            oracle,
            prompts,
            cache,
            prompt_version: prompt_version.into(),
        }
    }

    /// Build the task list for `document`, consulting the cache first.
    ///
    /// A cache hit is returned verbatim. On a miss, malformed oracle output
    /// fails with [`ConductorError::PlanParse`](crate::error::ConductorError)
    /// and nothing is cached.
    #[instrument(skip_all, fields(doc_bytes = document.len()))]
    pub fn plan_all(&self, document: &str) -> Result<Vec<Task>> {
        if document.trim().is_empty() {
            info!("empty design document, no tasks");
            return Ok(Vec::new());
        }

        let model = self.oracle.model_id();
        let key = PlanCache::hash(document, model, &self.prompt_version);
        let mut cache = self.cache.load()?;
        if let Some(entry) = cache.get(&key) {
            info!(fingerprint = %&key[..12], tasks = entry.plan.len(), "plan cache hit");
            return Ok(entry.plan.clone());
        }

        let components = self.extract_components(document)?;
        let tasks = if components.is_empty() {
            warn!("no components extracted from document");
            Vec::new()
        } else {
            self.plan_components(components)?
        };

        cache.insert(
            key.clone(),
            CacheEntry::new(tasks.clone(), model, &self.prompt_version),
        );
        self.cache.save(&cache)?;
        info!(fingerprint = %&key[..12], tasks = tasks.len(), "plan cached");
        Ok(tasks)
    }

    fn extract_components(&self, document: &str) -> Result<Vec<Component>> {
        let prompt = self.prompts.extract_components(document)?;
        let generation = self.oracle.generate(&prompt)?;
        let components: Option<Vec<Component>> =
            parse_structured("component list", &generation.text)?;
        Ok(components.unwrap_or_default())
    }

    fn plan_components(&self, components: Vec<Component>) -> Result<Vec<Task>> {
        let prompt = self.prompts.unified_plan(&components)?;
        let generation = self.oracle.generate(&prompt)?;
        let planned: Option<Vec<PlannedComponent>> =
            parse_structured("unified plan", &generation.text)?;
        let mut planned = planned.unwrap_or_default();

        let tasks = components
            .into_iter()
            .map(|component| {
                let plan = take_plan(&mut planned, &component.name);
                if plan.is_none() {
                    warn!(task = %component.name, "no plan returned for component");
                }
                Task::from_component(component, plan)
            })
            .collect();
        Ok(tasks)
    }
}

/// Remove and return the plan for `name`, preferring an exact match over a
/// case-insensitive one.
fn take_plan(planned: &mut Vec<PlannedComponent>, name: &str) -> Option<Plan> {
    let idx = planned
        .iter()
        .position(|p| p.name == name)
        .or_else(|| {
            planned
                .iter()
                .position(|p| p.name.trim().eq_ignore_ascii_case(name.trim()))
        })?;
    planned.remove(idx).plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConductorError;
    use crate::io::prompt::PromptKind;
    use crate::test_support::{ScriptedOracle, components_yaml, workspace};

    fn cache(root: &std::path::Path) -> PlanCache {
        PlanCache::new(root.join("plan_cache.json"), false)
    }

    #[test]
    fn cache_hit_skips_the_oracle() {
        let dir = workspace();
        let oracle = ScriptedOracle::for_components(&["Parser", "Lexer"]);
        let prompts = PromptEngine::new().expect("prompts");
        let planner = Planner::new(&oracle, &prompts, cache(dir.path()), "v1");

        let first = planner.plan_all("A parser and a lexer.").expect("first");
        assert_eq!(oracle.calls(), 2);
        let second = planner.plan_all("A parser and a lexer.").expect("second");

        assert_eq!(first, second);
        assert_eq!(oracle.calls(), 2);
        assert_eq!(cache(dir.path()).load().expect("load").len(), 1);
        assert_eq!(first[0].name, "Parser");
        assert_eq!(
            first[0].plan.as_ref().map(|p| p.purpose.as_str()),
            Some("build Parser")
        );
    }

    #[test]
    fn schema_version_change_misses_the_cache() {
        let dir = workspace();
        let oracle = ScriptedOracle::for_components(&["Parser"]);
        let prompts = PromptEngine::new().expect("prompts");

        Planner::new(&oracle, &prompts, cache(dir.path()), "v1")
            .plan_all("doc")
            .expect("v1");
        Planner::new(&oracle, &prompts, cache(dir.path()), "v2")
            .plan_all("doc")
            .expect("v2");

        assert_eq!(oracle.calls_of(PromptKind::ExtractComponents), 2);
        assert_eq!(cache(dir.path()).load().expect("load").len(), 2);
    }

    #[test]
    fn empty_document_makes_no_calls() {
        let dir = workspace();
        let oracle = ScriptedOracle::for_components(&["Parser"]);
        let prompts = PromptEngine::new().expect("prompts");
        let planner = Planner::new(&oracle, &prompts, cache(dir.path()), "v1");

        assert!(planner.plan_all("  \n").expect("plan").is_empty());
        assert_eq!(oracle.calls(), 0);
    }

    #[test]
    fn malformed_plan_is_fatal_and_keeps_raw_text() {
        let dir = workspace();
        let components = components_yaml(&["Parser"]);
        let oracle = ScriptedOracle::new(move |prompt| {
            Ok(match PromptKind::of(prompt) {
                Some(PromptKind::ExtractComponents) => components.clone(),
                _ => "```yaml\n- name: [unclosed\n```".to_string(),
            })
        });
        let prompts = PromptEngine::new().expect("prompts");
        let planner = Planner::new(&oracle, &prompts, cache(dir.path()), "v1");

        let err = planner.plan_all("doc").expect_err("parse failure");
        match err.downcast_ref::<ConductorError>() {
            Some(ConductorError::PlanParse { what, raw, .. }) => {
                assert_eq!(*what, "unified plan");
                assert!(raw.contains("[unclosed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(cache(dir.path()).load().expect("load").is_empty());
    }

    #[test]
    fn components_without_plans_are_kept() {
        let dir = workspace();
        let components = components_yaml(&["Parser", "Lexer"]);
        let oracle = ScriptedOracle::new(move |prompt| {
            Ok(match PromptKind::of(prompt) {
                Some(PromptKind::ExtractComponents) => components.clone(),
                _ => "- name: parser\n  plan:\n    purpose: parse\n".to_string(),
            })
        });
        let prompts = PromptEngine::new().expect("prompts");
        let planner = Planner::new(&oracle, &prompts, cache(dir.path()), "v1");

        let tasks = planner.plan_all("doc").expect("plan");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].plan.as_ref().map(|p| p.purpose.as_str()), Some("parse"));
        assert!(tasks[1].plan.is_none());
    }
}
