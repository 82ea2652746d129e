//! Typed failure conditions that callers branch on.
//!
//! Everything else travels as `anyhow::Error` with context; these variants are
//! recovered with `downcast_ref` where the caller needs to tell them apart.

use std::path::PathBuf;

use crate::core::types::Stage;

#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// No agent with this name exists in the current run.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The status store could not be locked, read, or replaced.
    #[error("status store unavailable at {}: {reason}", path.display())]
    StoreUnavailable { path: PathBuf, reason: String },

    /// Oracle output did not match the expected structure. `raw` keeps the
    /// offending text verbatim for the operator.
    #[error("failed to parse {what} from oracle output: {message}")]
    PlanParse {
        what: &'static str,
        message: String,
        raw: String,
    },

    /// Every configured model failed to produce a response.
    #[error("oracle failed: {0}")]
    Oracle(String),

    /// Guidance was offered to a task that is not waiting for it.
    #[error("task {name} is not paused for guidance (stage: {stage})")]
    NotPaused { name: String, stage: Stage },

    #[error("invalid configuration: {0}")]
    Config(String),
}
