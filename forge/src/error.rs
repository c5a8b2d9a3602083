//! Error taxonomy for a forge run.
//!
//! Most code propagates `anyhow::Error` with context. The types here are the
//! ones callers need to classify: they are either returned directly or sit in
//! an `anyhow` cause chain where `downcast_ref` / `chain()` can find them.

use std::fmt;

/// Missing or unusable SRS directive. Always raised before any side effect.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing mandatory SRS directive `{0}:`")]
    MissingDirective(&'static str),

    #[error("repository path `{0}` must be relative and stay inside the workspace")]
    UnsafeRepoPath(String),

    #[error("workspace directory `{path}` cannot be made absolute: {reason}")]
    UnresolvableWorkspace { path: String, reason: String },
}

/// Retryable failure from the generation backend (overload, rate limit, 5xx).
///
/// Backends wrap recognised server-side failures in this type; the retry
/// wrapper finds it by walking the cause chain.
#[derive(Debug, thiserror::Error)]
#[error("transient provider error: {message}")]
pub struct TransientProviderError {
    pub message: String,
}

impl TransientProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Terminal generation failure. Used as context on top of the last cause.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{operation}: gave up after {attempts} attempt(s)")]
    RetriesExhausted { operation: String, attempts: u32 },

    #[error("{operation}: non-retryable failure")]
    NonRetryable { operation: String },
}

/// Non-zero exit from a VCS or hosting command, with both streams captured.
#[derive(Debug, thiserror::Error)]
#[error("{program} {args} exited with {code:?}: {}", summarize(.stderr, .stdout))]
pub struct VcsCommandError {
    pub program: String,
    pub args: String,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

fn summarize(stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    stdout.trim().to_string()
}

/// Failure to write one generated artifact. Logged and skipped by callers.
#[derive(Debug, thiserror::Error)]
#[error("materialize {path}: {reason}")]
pub struct MaterializationError {
    pub path: String,
    pub reason: String,
}

/// Run Controller phases, used to label fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Config,
    RepoReady,
    ChangeCheck,
    Branching,
    Generation,
    Materialization,
    Verification,
    Publish,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Config => "config",
            RunPhase::RepoReady => "repo-ready",
            RunPhase::ChangeCheck => "change-check",
            RunPhase::Branching => "branching",
            RunPhase::Generation => "generation",
            RunPhase::Materialization => "materialization",
            RunPhase::Verification => "verification",
            RunPhase::Publish => "publish",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context attached to a fatal error so the top level can report where it
/// happened.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{phase} phase failed")]
pub struct PhaseFailure {
    pub phase: RunPhase,
}

/// Find the phase label attached to an error, if any.
pub fn failed_phase(err: &anyhow::Error) -> Option<RunPhase> {
    err.downcast_ref::<PhaseFailure>().map(|failure| failure.phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    #[test]
    fn vcs_error_prefers_stderr() {
        let err = VcsCommandError {
            program: "git".to_string(),
            args: "push origin x".to_string(),
            code: Some(128),
            stdout: "ignored".to_string(),
            stderr: "fatal: no remote\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "git push origin x exited with Some(128): fatal: no remote"
        );
    }

    #[test]
    fn failed_phase_is_found_through_context() {
        let err = Err::<(), _>(anyhow!("git clone failed"))
            .context(PhaseFailure {
                phase: RunPhase::RepoReady,
            })
            .unwrap_err();
        assert_eq!(failed_phase(&err), Some(RunPhase::RepoReady));
        assert_eq!(format!("{err:#}"), "repo-ready phase failed: git clone failed");
    }
}
