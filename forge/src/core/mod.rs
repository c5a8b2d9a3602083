//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and return deterministic outputs suitable for tests.

pub mod blackboard;
pub mod correction;
pub mod deps;
pub mod markers;
pub mod readme;
pub mod types;
