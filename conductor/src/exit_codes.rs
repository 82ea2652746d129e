//! Stable exit codes for conductor CLI commands.

/// Command succeeded; every task in scope is completed.
pub const OK: i32 = 0;
/// Invalid config or documents, an aborted run, or a task that failed.
pub const INVALID: i32 = 1;
/// At least one task is paused and needs operator guidance.
pub const PAUSED: i32 = 3;
