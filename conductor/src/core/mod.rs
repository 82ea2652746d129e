//! Deterministic, pure logic shared by the conductor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod stage;
pub mod structured;
pub mod types;
