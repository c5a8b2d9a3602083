//! Stable exit codes for the `forge` CLI.

/// Run finished: published with a passing build, or nothing changed.
pub const OK: i32 = 0;
/// Fatal error in any phase (config, git, generation, materialization, ...).
pub const FATAL: i32 = 1;
/// Build failed; the branch was published with a failure report and no PR.
pub const BUILD_FAILED: i32 = 2;
