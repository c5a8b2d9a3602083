//! SRS-to-service generation and release pipeline.
//!
//! Turns a requirements document into a buildable Spring Boot project on a
//! fresh feature branch, re-running safely whenever the document changes.
//!
//! - **[`core`]**: pure parsing and text transforms (file markers, dependency
//!   lines, README block, corrector answers). No I/O.
//! - **[`io`]**: side effects (git, PR host, generation backend, build tool,
//!   files). Each external tool sits behind a trait so tests can script it.
//! - **[`pipeline`]**: the stage chain and the single-stage analyses.
//! - **[`run`]**: the controller that sequences one run.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod run;
pub mod srs;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
