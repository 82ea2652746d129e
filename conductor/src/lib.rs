//! Concurrent orchestration of oracle-driven build tasks.
//!
//! A design document is planned into tasks, and each task is driven by its
//! own agent through a fixed workflow: set up, plan, write tests, implement,
//! then test and debug until the tests pass or the retry budget runs out and
//! the task pauses for human guidance. The layers are:
//!
//! - **[`core`]**: Pure logic (stage transitions, loop decisions, parsing of
//!   structured oracle output). No I/O.
//! - **[`io`]**: Side effects (status store, plan cache, oracle and test
//!   runner processes, prompt rendering, config).
//!
//! [`agent`], [`planner`], and [`orchestrator`] combine the two.

pub mod agent;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod planner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
