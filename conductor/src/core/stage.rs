//! Stage transition table and debug-loop decisions for task agents.

use super::types::{Stage, TestOutcome};

/// Whether an agent may move from `from` to `to`.
///
/// Re-reporting the current stage is always allowed so a rehydrated agent can
/// announce where it resumed.
pub fn can_transition(from: Stage, to: Stage) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (Stage::Completed, _) => false,
        (_, Stage::Failed) => true,
        (Stage::Initialized | Stage::Failed, Stage::SettingUp) => true,
        (Stage::SettingUp, Stage::Planning) => true,
        (Stage::Planning, Stage::WritingTests) => true,
        (Stage::WritingTests, Stage::Implementing) => true,
        (Stage::Implementing, Stage::Testing) => true,
        (Stage::Testing, Stage::Debugging | Stage::Completed | Stage::PausedForGuidance) => true,
        (Stage::Debugging, Stage::Testing) => true,
        (Stage::PausedForGuidance, Stage::Testing) => true,
        _ => false,
    }
}

/// What the test/debug loop does after a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    Complete,
    Debug,
    Exhausted,
}

/// Decide the next loop step given the test outcome and debug cycles spent.
pub fn after_test(outcome: &TestOutcome, debug_cycles: u32, ceiling: u32) -> LoopStep {
    if outcome.passed() {
        LoopStep::Complete
    } else if debug_cycles >= ceiling {
        LoopStep::Exhausted
    } else {
        LoopStep::Debug
    }
}

/// Stage an agent restored from a persisted record should resume from.
///
/// Mid-generation stages restart the workflow because their artifacts may be
/// partial; test/debug stages resume only when both artifacts survived.
pub fn resume_stage(persisted: Stage, artifacts_present: bool) -> Stage {
    match persisted {
        Stage::Completed | Stage::PausedForGuidance => persisted,
        Stage::Testing | Stage::Debugging if artifacts_present => persisted,
        _ => Stage::Initialized,
    }
}
