//! Build verification gate (`mvn -B verify` by default).

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::io::config::BuildConfig;
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Passed,
    Failed,
}

/// Result of one build: the gate decision plus everything the tool printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub outcome: BuildOutcome,
    pub transcript: String,
}

impl BuildReport {
    pub fn passed(&self) -> bool {
        self.outcome == BuildOutcome::Passed
    }
}

/// Runs the project build.
///
/// `Err` means the tool could not be run at all. A build that ran and failed,
/// including a timeout, is `Ok` with [`BuildOutcome::Failed`].
pub trait BuildVerifier {
    fn verify(&self, request: &BuildRequest) -> Result<BuildReport>;
}

/// Runs a configured build command in the checkout.
#[derive(Debug, Clone)]
pub struct CommandBuildVerifier {
    command: Vec<String>,
}

impl CommandBuildVerifier {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn from_config(cfg: &BuildConfig) -> Self {
        Self::new(cfg.command.clone())
    }
}

impl BuildVerifier for CommandBuildVerifier {
    #[instrument(skip_all, fields(workdir = %request.workdir.display()))]
    fn verify(&self, request: &BuildRequest) -> Result<BuildReport> {
        let (program, args) = self
            .command
            .split_first()
            .context("build command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);

        let output =
            run_command_with_timeout(cmd, None, request.timeout, request.output_limit_bytes)
                .with_context(|| format!("run build command {}", self.command.join(" ")))?;

        let outcome = if output.success() {
            BuildOutcome::Passed
        } else {
            BuildOutcome::Failed
        };
        match outcome {
            BuildOutcome::Passed => info!("build passed"),
            BuildOutcome::Failed => warn!(
                exit_code = ?output.status.code(),
                timed_out = output.timed_out,
                "build failed"
            ),
        }
        Ok(BuildReport {
            outcome,
            transcript: output.transcript("build"),
        })
    }
}

impl BuildRequest {
    pub fn from_config(workdir: PathBuf, cfg: &BuildConfig) -> Self {
        Self {
            workdir,
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(script: &str) -> CommandBuildVerifier {
        CommandBuildVerifier::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ])
    }

    fn request(workdir: PathBuf, timeout: Duration) -> BuildRequest {
        BuildRequest {
            workdir,
            timeout,
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn zero_exit_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verifier("echo BUILD SUCCESS")
            .verify(&request(temp.path().to_path_buf(), Duration::from_secs(10)))
            .expect("verify");
        assert!(report.passed());
        assert!(report.transcript.contains("BUILD SUCCESS"));
    }

    #[test]
    fn runs_in_the_checkout() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("pom.xml"), "<project/>").expect("write");
        let report = verifier("test -f pom.xml")
            .verify(&request(temp.path().to_path_buf(), Duration::from_secs(10)))
            .expect("verify");
        assert!(report.passed());
    }

    #[test]
    fn non_zero_exit_fails_with_transcript() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verifier("echo '[ERROR] cannot find symbol' >&2; exit 1")
            .verify(&request(temp.path().to_path_buf(), Duration::from_secs(10)))
            .expect("verify");
        assert_eq!(report.outcome, BuildOutcome::Failed);
        assert!(report.transcript.contains("cannot find symbol"));
    }

    #[test]
    fn timeout_is_a_failed_build() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = verifier("sleep 5")
            .verify(&request(temp.path().to_path_buf(), Duration::from_millis(100)))
            .expect("verify");
        assert_eq!(report.outcome, BuildOutcome::Failed);
        assert!(report.transcript.contains("[build timed out]"));
    }

    #[test]
    fn missing_tool_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = CommandBuildVerifier::new(vec!["forge-no-such-build-tool".to_string()])
            .verify(&request(temp.path().to_path_buf(), Duration::from_secs(10)))
            .unwrap_err();
        assert!(format!("{err:#}").contains("forge-no-such-build-tool"));
    }
}
