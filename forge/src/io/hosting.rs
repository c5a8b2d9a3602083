//! Pull request creation through the hosting CLI.
//!
//! The [`PullRequests`] trait keeps the run controller independent of the
//! concrete host. Tests record requests instead of calling out.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::error::VcsCommandError;

/// Parameters for one pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub workdir: PathBuf,
    pub base: String,
    pub head: String,
    pub title: String,
    pub body: String,
}

/// Abstraction over PR hosting backends.
pub trait PullRequests {
    /// Open a pull request and return whatever the host printed (usually a URL).
    fn open(&self, request: &PullRequest) -> Result<String>;
}

/// Opens pull requests with `gh pr create`.
#[derive(Debug, Clone)]
pub struct GhPullRequests {
    /// Program and leading arguments (normally just `["gh"]`).
    pub command: Vec<String>,
}

impl GhPullRequests {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl PullRequests for GhPullRequests {
    #[instrument(skip_all, fields(base = %request.base, head = %request.head))]
    fn open(&self, request: &PullRequest) -> Result<String> {
        let (program, leading) = self
            .command
            .split_first()
            .context("pull request command is empty")?;
        let args: Vec<String> = leading
            .iter()
            .cloned()
            .chain(
                [
                    "pr",
                    "create",
                    "--base",
                    request.base.as_str(),
                    "--head",
                    request.head.as_str(),
                    "--title",
                    request.title.as_str(),
                    "--body",
                    request.body.as_str(),
                ]
                .map(str::to_string),
            )
            .collect();

        let output = Command::new(program)
            .args(&args)
            .current_dir(&request.workdir)
            .output()
            .with_context(|| format!("spawn {program} pr create"))?;
        if !output.status.success() {
            return Err(VcsCommandError {
                program: program.clone(),
                args: "pr create".to_string(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .into());
        }
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(url = %url, "pull request opened");
        Ok(url)
    }
}
