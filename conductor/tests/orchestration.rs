//! End-to-end orchestration scenarios.
//!
//! Each test builds a real `Orchestrator` over a temporary project root with a
//! scripted oracle and test runner, so agents, the status store, and the plan
//! cache all run for real while no process is spawned.

use std::fs;
use std::sync::Arc;

use conductor::agent::TaskAgent;
use conductor::core::types::Stage;
use conductor::io::config::ConductorConfig;
use conductor::io::paths::ConductorPaths;
use conductor::io::plan_cache::PlanCache;
use conductor::io::prompt::PromptKind;
use conductor::io::status_store::{StatusMap, StatusStore};
use conductor::orchestrator::Orchestrator;
use conductor::test_support::{
    RecordingReporter, ScriptedOracle, ScriptedTestRunner, TestScript, workspace,
};

const DOC: &str = "# Design\n\nComponent A validates input. Component B renders output.\n";

fn config(max_debug_attempts: u32) -> ConductorConfig {
    ConductorConfig {
        max_debug_attempts,
        guided_debug_attempts: 3,
        ..ConductorConfig::default()
    }
}

fn stages(map: &StatusMap) -> Vec<(String, Stage)> {
    map.values().map(|r| (r.name.clone(), r.stage)).collect()
}

/// A passes and B always fails; both run concurrently.
///
/// The final snapshot must contain exactly `{A: completed, B: paused}`, and
/// B's autonomous loop must stop after exactly `max_debug_attempts` debug
/// cycles without further oracle calls.
#[test]
fn passing_and_failing_tasks_settle_independently() {
    let dir = workspace();
    let oracle = Arc::new(ScriptedOracle::for_components(&["A", "B"]));
    let runner = Arc::new(ScriptedTestRunner::new());
    runner.set_script("B", TestScript::AlwaysFail);
    let mut orch = Orchestrator::new(
        ConductorPaths::new(dir.path()),
        config(4),
        oracle.clone(),
        runner.clone(),
    )
    .expect("orchestrator");

    let report = orch.run(DOC).expect("run");

    assert!(report.outcomes.iter().all(|o| o.stage.is_settled()));
    assert_eq!(report.stage_of("A"), Some(Stage::Completed));
    assert_eq!(report.stage_of("B"), Some(Stage::PausedForGuidance));
    let snapshot = orch.store().read_all().expect("read");
    assert_eq!(
        stages(&snapshot),
        vec![
            ("A".to_string(), Stage::Completed),
            ("B".to_string(), Stage::PausedForGuidance),
        ]
    );
    assert_eq!(snapshot["B"].retry_count, 4);
    assert_eq!(snapshot["A"].retry_count, 0);
    assert_eq!(snapshot["A"].backend_identity, "scripted:scripted-model");

    assert_eq!(runner.runs("B"), 5);
    assert_eq!(oracle.calls_of(PromptKind::Debug), 4);
    assert_eq!(orch.get_task_names(), vec!["A".to_string(), "B".to_string()]);
}

/// Guidance on the paused task resets its retry count and, with the runner
/// now passing after one debug iteration, completes it.
#[test]
fn guided_resume_completes_paused_task() {
    let dir = workspace();
    let oracle = Arc::new(ScriptedOracle::for_components(&["A", "B"]));
    let runner = Arc::new(ScriptedTestRunner::new());
    runner.set_script("B", TestScript::AlwaysFail);
    let mut orch = Orchestrator::new(
        ConductorPaths::new(dir.path()),
        config(3),
        oracle.clone(),
        runner.clone(),
    )
    .expect("orchestrator");
    orch.run(DOC).expect("run");

    runner.set_script("B", TestScript::FailTimes(1));
    let completed = orch
        .resume_guided("B", Some("use a different algorithm"))
        .expect("resume");

    assert!(completed);
    let handle = orch.get_task("B").expect("task B");
    let agent = handle.lock().expect("lock");
    assert_eq!(agent.stage(), Stage::Completed);
    assert_eq!(agent.state().retry_count, 1);
    assert_eq!(oracle.calls_of(PromptKind::Guide), 1);
    assert!(
        oracle
            .prompts()
            .iter()
            .any(|p| p.contains("use a different algorithm"))
    );
    let record = orch.store().read_one("B").expect("read").expect("record");
    assert_eq!(record.stage, Stage::Completed);
}

/// A new process rehydrates the paused task from the status store and its
/// artifact files, then resumes it.
#[test]
fn resume_from_a_fresh_orchestrator() {
    let dir = workspace();
    let oracle = Arc::new(ScriptedOracle::for_components(&["A", "B"]));
    let runner = Arc::new(ScriptedTestRunner::new());
    runner.set_script("B", TestScript::AlwaysFail);
    Orchestrator::new(
        ConductorPaths::new(dir.path()),
        config(2),
        oracle.clone(),
        runner.clone(),
    )
    .expect("orchestrator")
    .run(DOC)
    .expect("run");
    let calls_after_run = oracle.calls();

    runner.set_script("B", TestScript::AlwaysPass);
    let mut fresh = Orchestrator::new(
        ConductorPaths::new(dir.path()),
        config(2),
        oracle.clone(),
        runner,
    )
    .expect("orchestrator");
    fresh.prepare(DOC).expect("prepare");

    {
        let agent = fresh.get_task("B").expect("task B").lock().expect("lock");
        assert_eq!(agent.stage(), Stage::PausedForGuidance);
        assert_eq!(agent.state().retry_count, 2);
        assert!(agent.state().artifact.contains("def component"));
    }
    assert!(fresh.resume_guided("B", Some("check the edge case")).expect("resume"));
    // Only the guide prompt: planning came from the cache and tests passed.
    assert_eq!(oracle.calls(), calls_after_run + 1);
}

/// A corrupt status file reads as empty and a new run starts every task
/// from `initialized`.
#[test]
fn malformed_status_file_starts_fresh() {
    let dir = workspace();
    let paths = ConductorPaths::new(dir.path());
    fs::create_dir_all(&paths.state_dir).expect("state dir");
    fs::write(&paths.status_path, "{ not json").expect("corrupt");

    let store = StatusStore::new(&paths.status_path);
    assert!(store.read_all().expect("read").is_empty());

    let oracle = Arc::new(ScriptedOracle::for_components(&["A"]));
    let runner = Arc::new(ScriptedTestRunner::new());
    let mut orch = Orchestrator::new(paths, config(2), oracle.clone(), runner).expect("orchestrator");
    orch.prepare(DOC).expect("prepare");
    {
        let agent = orch.get_task("A").expect("task A").lock().expect("lock");
        assert_eq!(agent.stage(), Stage::Initialized);
    }
    let report = orch.execute().expect("execute");

    assert_eq!(report.stage_of("A"), Some(Stage::Completed));
    assert_eq!(oracle.calls_of(PromptKind::WriteTests), 1);
    assert_eq!(
        stages(&store.read_all().expect("read")),
        vec![("A".to_string(), Stage::Completed)]
    );
}

/// Two runs over the same document produce one cache entry and no second
/// extraction or planning call.
#[test]
fn identical_documents_plan_once() {
    let dir = workspace();
    let paths = ConductorPaths::new(dir.path());
    let oracle = Arc::new(ScriptedOracle::for_components(&["A", "B"]));
    let runner = Arc::new(ScriptedTestRunner::new());

    for _ in 0..2 {
        let mut orch = Orchestrator::new(paths.clone(), config(2), oracle.clone(), runner.clone())
            .expect("orchestrator");
        orch.prepare(DOC).expect("prepare");
    }

    assert_eq!(oracle.calls_of(PromptKind::ExtractComponents), 1);
    assert_eq!(oracle.calls_of(PromptKind::UnifiedPlan), 1);
    let cache = PlanCache::new(&paths.plan_cache_path, true).load().expect("cache");
    assert_eq!(cache.len(), 1);
    let entry = cache.values().next().expect("entry");
    assert_eq!(entry.model, "scripted-model");
    assert_eq!(entry.prompt_schema_version, "v1");
    assert_eq!(entry.plan.len(), 2);
}

/// Pre-supplied plans from the batched call mean agents never ask for their
/// own plan.
#[test]
fn batched_plans_are_attached_to_agents() {
    let dir = workspace();
    let oracle = Arc::new(ScriptedOracle::for_components(&["A", "B"]));
    let runner = Arc::new(ScriptedTestRunner::new());
    let mut orch = Orchestrator::new(ConductorPaths::new(dir.path()), config(2), oracle.clone(), runner)
        .expect("orchestrator");

    orch.run(DOC).expect("run");

    assert_eq!(oracle.calls_of(PromptKind::TaskPlan), 0);
    let paths = ConductorPaths::new(dir.path());
    assert!(paths.src_dir.join("a.py").exists());
    assert!(paths.tests_dir.join("test_b.py").exists());
}

/// Resuming without guidance runs a guided cycle but leaves the persisted
/// retry count within the autonomous ceiling.
#[test]
fn unguided_resume_keeps_retry_count_bounded() {
    let dir = workspace();
    let oracle = Arc::new(ScriptedOracle::for_components(&["A", "B"]));
    let runner = Arc::new(ScriptedTestRunner::new());
    runner.set_script("B", TestScript::AlwaysFail);
    let mut orch = Orchestrator::new(
        ConductorPaths::new(dir.path()),
        config(2),
        oracle,
        runner.clone(),
    )
    .expect("orchestrator");
    orch.run(DOC).expect("run");
    let runs_before = runner.runs("B");

    let completed = orch.resume_guided("B", None).expect("resume");

    assert!(!completed);
    assert_eq!(runner.runs("B") - runs_before, 4);
    let record = orch.store().read_one("B").expect("read").expect("record");
    assert_eq!(record.stage, Stage::PausedForGuidance);
    assert!(record.retry_count <= 2, "retry_count {}", record.retry_count);
}

/// Every transition of a task's autonomous loop carries a retry count in
/// `[0, max_debug_attempts]`.
#[test]
fn retry_count_is_bounded_on_every_transition() {
    let dir = workspace();
    let oracle = Arc::new(ScriptedOracle::for_components(&["A", "B"]));
    let runner = Arc::new(ScriptedTestRunner::new());
    runner.set_script("B", TestScript::AlwaysFail);
    let mut orch = Orchestrator::new(
        ConductorPaths::new(dir.path()),
        config(3),
        oracle,
        runner,
    )
    .expect("orchestrator");
    orch.prepare(DOC).expect("prepare");
    let reporter = RecordingReporter::default();

    let stage = {
        let mut agent = orch.get_task("B").expect("task B").lock().expect("lock");
        agent.run(&reporter).expect("run")
    };

    assert_eq!(stage, Stage::PausedForGuidance);
    let events = reporter.events("B");
    assert!(events.iter().any(|(stage, _)| *stage == Stage::Debugging));
    assert!(events.iter().all(|(_, retries)| *retries <= 3));
    assert_eq!(events.last(), Some(&(Stage::PausedForGuidance, 3)));
}
