//! Git adapter for the release lifecycle.
//!
//! Every call shells out to `git`, captures both streams, and turns a non-zero
//! exit into a [`VcsCommandError`] so callers can report exactly what git said.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::error::VcsCommandError;

/// Commit identity passed to git as `-c user.name=… -c user.email=…`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    identity: Option<Identity>,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    /// Shallow, single-branch clone of `branch` from `url` into this workdir.
    #[instrument(skip_all, fields(url, branch))]
    pub fn clone_branch(&self, url: &str, branch: &str) -> Result<()> {
        let parent = self
            .workdir
            .parent()
            .ok_or_else(|| anyhow!("clone target {} has no parent", self.workdir.display()))?;
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        // git runs in `parent`, so name the target relative to it.
        let target = self
            .workdir
            .file_name()
            .ok_or_else(|| anyhow!("clone target {} has no name", self.workdir.display()))?
            .to_string_lossy()
            .into_owned();
        debug!(target = %target, "cloning");
        self.run_checked_in(
            parent,
            &[
                "clone",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                branch,
                url,
                &target,
            ],
        )?;
        Ok(())
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD in {}", self.workdir.display()));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Local branch names.
    pub fn local_branches(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Drop uncommitted and untracked changes. Ignored files (and `.git/info/exclude`
    /// entries) are kept.
    #[instrument(skip_all)]
    pub fn discard_local_changes(&self) -> Result<()> {
        self.run_checked(&["reset", "--hard", "-q"])?;
        self.run_checked(&["clean", "-fdq"])?;
        Ok(())
    }

    /// Fast-forward the current branch from `remote/branch`.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn pull_ff_only(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["pull", "--ff-only", remote, branch])?;
        Ok(())
    }

    /// Push `branch` and set its upstream.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn push_branch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["push", "-u", remote, branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Subject line of the HEAD commit.
    pub fn head_subject(&self) -> Result<String> {
        Ok(self.run_capture(&["log", "-1", "--pretty=%s"])?.trim().to_string())
    }

    /// Add `pattern` to `.git/info/exclude` if it is not there yet.
    ///
    /// Keeps local state out of every commit without touching tracked files.
    pub fn ensure_excluded(&self, pattern: &str) -> Result<()> {
        let git_dir = self.run_capture(&["rev-parse", "--git-dir"])?;
        let git_dir = self.workdir.join(git_dir.trim());
        let path = git_dir.join("info").join("exclude");
        let existing = if path.exists() {
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?
        } else {
            String::new()
        };
        if existing.lines().any(|l| l.trim() == pattern) {
            return Ok(());
        }
        let mut out = existing;
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(pattern);
        out.push('\n');
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, out).with_context(|| format!("write {}", path.display()))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        self.run_checked_in(&self.workdir, args)
    }

    fn run_checked_in(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        let output = self.run_in(dir, args)?;
        if !output.status.success() {
            return Err(VcsCommandError {
                program: "git".to_string(),
                args: args.join(" "),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }
            .into());
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        self.run_in(&self.workdir, args)
    }

    fn run_in(&self, dir: &Path, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new("git");
        if let Some(identity) = &self.identity {
            cmd.arg("-c")
                .arg(format!("user.name={}", identity.name))
                .arg("-c")
                .arg(format!("user.email={}", identity.email));
        }
        cmd.args(args)
            .current_dir(dir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
