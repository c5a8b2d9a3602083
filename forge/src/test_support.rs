//! Scripted collaborators and a throwaway git remote for tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::error::TransientProviderError;
use crate::io::build::{BuildOutcome, BuildReport, BuildRequest, BuildVerifier};
use crate::io::config::{ForgeConfig, GitConfig};
use crate::io::generator::{GenerationRequest, Generator};
use crate::io::hosting::{PullRequest, PullRequests};
use crate::retry::RetryPolicy;

pub const TEST_AUTHOR_NAME: &str = "Forge Test";
pub const TEST_AUTHOR_EMAIL: &str = "forge-test@local.invalid";

/// Generator that replays a fixed script and records every prompt.
///
/// Running past the end of the script is a non-transient error.
#[derive(Default)]
pub struct ScriptedGenerator {
    steps: RefCell<VecDeque<Result<String>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_steps(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    pub fn from_steps(steps: Vec<Result<String>>) -> Self {
        Self {
            steps: RefCell::new(steps.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// A step that fails with a retryable provider error.
    pub fn transient(message: &str) -> Result<String> {
        Err(TransientProviderError::new(message).into())
    }

    /// A step that fails with a non-retryable error.
    pub fn terminal(message: &str) -> Result<String> {
        Err(anyhow!("{message}"))
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.steps.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        self.steps
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted generator has no more responses")))
    }
}

/// Build verifier with a fixed outcome that records where it ran and which
/// files were present at that moment.
pub struct ScriptedBuildVerifier {
    outcome: BuildOutcome,
    transcript: String,
    seen: RefCell<Vec<(PathBuf, Vec<String>)>>,
}

impl ScriptedBuildVerifier {
    pub fn passing() -> Self {
        Self {
            outcome: BuildOutcome::Passed,
            transcript: "[INFO] BUILD SUCCESS".to_string(),
            seen: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(transcript: &str) -> Self {
        Self {
            outcome: BuildOutcome::Failed,
            transcript: transcript.to_string(),
            seen: RefCell::new(Vec::new()),
        }
    }

    pub fn runs(&self) -> usize {
        self.seen.borrow().len()
    }

    /// Relative paths of the files present at the last build, sorted.
    pub fn last_files(&self) -> Vec<String> {
        self.seen
            .borrow()
            .last()
            .map(|(_, files)| files.clone())
            .unwrap_or_default()
    }
}

impl BuildVerifier for ScriptedBuildVerifier {
    fn verify(&self, request: &BuildRequest) -> Result<BuildReport> {
        let files = list_files(&request.workdir)?;
        self.seen
            .borrow_mut()
            .push((request.workdir.clone(), files));
        Ok(BuildReport {
            outcome: self.outcome,
            transcript: self.transcript.clone(),
        })
    }
}

fn list_files(root: &Path) -> Result<Vec<String>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_name() == ".git" {
                continue;
            }
            if path.is_dir() {
                walk(root, &path, out)?;
            } else if let Ok(rel) = path.strip_prefix(root) {
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    walk(root, root, &mut out)?;
    out.sort();
    Ok(out)
}

/// PR host that records requests instead of calling out.
#[derive(Default)]
pub struct RecordingPullRequests {
    opened: RefCell<Vec<PullRequest>>,
    fail: bool,
}

impl RecordingPullRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host that rejects every request.
    pub fn failing() -> Self {
        Self {
            opened: RefCell::new(Vec::new()),
            fail: true,
        }
    }

    pub fn opened(&self) -> Vec<PullRequest> {
        self.opened.borrow().clone()
    }
}

impl PullRequests for RecordingPullRequests {
    fn open(&self, request: &PullRequest) -> Result<String> {
        self.opened.borrow_mut().push(request.clone());
        if self.fail {
            return Err(anyhow!("pull request host unavailable"));
        }
        Ok(format!(
            "https://git.example.invalid/pulls/{}",
            self.opened.borrow().len()
        ))
    }
}

/// A bare git remote seeded with one commit on `main`, plus a workspace
/// directory for checkouts.
pub struct TestRemote {
    _temp: TempDir,
    pub remote: PathBuf,
    pub workspace: PathBuf,
}

impl TestRemote {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let remote = temp.path().join("remote.git");
        let seed = temp.path().join("seed");
        let workspace = temp.path().join("workspace");
        fs::create_dir_all(&seed)?;

        git(temp.path(), &["init", "-q", "--bare", "-b", "main", "remote.git"])?;
        git(&seed, &["init", "-q", "-b", "main"])?;
        fs::write(seed.join("README.md"), "# inventory\n\nHand-written notes.\n")?;
        git(&seed, &["add", "-A"])?;
        git(&seed, &["commit", "-q", "-m", "chore: initial commit"])?;
        let remote_arg = remote.to_string_lossy().into_owned();
        git(&seed, &["push", "-q", remote_arg.as_str(), "main"])?;

        Ok(Self {
            _temp: temp,
            remote,
            workspace,
        })
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.remote.display())
    }

    /// SRS text pointing at this remote.
    pub fn srs(&self, repo_name: &str, body: &str) -> String {
        format!(
            "GitHub-URL: {}\ncheckout_branch: main\nRepository-Name: {repo_name}\n\n{body}\n",
            self.url()
        )
    }

    /// Config suitable for tests: no backoff, fixed identity, push enabled.
    pub fn config(&self) -> ForgeConfig {
        ForgeConfig {
            workspace_dir: self.workspace.clone(),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 0,
            },
            git: GitConfig {
                author_name: Some(TEST_AUTHOR_NAME.to_string()),
                author_email: Some(TEST_AUTHOR_EMAIL.to_string()),
                ..GitConfig::default()
            },
            ..ForgeConfig::default()
        }
    }

    /// Branch names on the remote.
    pub fn branches(&self) -> Result<Vec<String>> {
        let out = git_output(&self.remote, &["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        let mut branches: Vec<String> = out.lines().map(str::to_string).collect();
        branches.sort();
        Ok(branches)
    }

    /// File contents at `rev` on the remote.
    pub fn show(&self, rev: &str, path: &str) -> Result<String> {
        git_output(&self.remote, &["show", &format!("{rev}:{path}")])
    }

    /// Commit subject of `rev` on the remote.
    pub fn subject(&self, rev: &str) -> Result<String> {
        Ok(git_output(&self.remote, &["log", "-1", "--pretty=%s", rev])?
            .trim()
            .to_string())
    }

    /// Files tracked at `rev` on the remote.
    pub fn tree(&self, rev: &str) -> Result<Vec<String>> {
        let out = git_output(&self.remote, &["ls-tree", "-r", "--name-only", rev])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Add a commit to `main` on the remote from a separate clone.
    pub fn push_upstream_change(&self, path: &str, contents: &str) -> Result<()> {
        let clone = self.workspace.with_file_name("upstream-clone");
        if clone.exists() {
            fs::remove_dir_all(&clone)?;
        }
        let clone_arg = clone.to_string_lossy().into_owned();
        let parent = clone
            .parent()
            .ok_or_else(|| anyhow!("clone path has no parent"))?;
        git(parent, &["clone", "-q", &self.url(), clone_arg.as_str()])?;
        fs::write(clone.join(path), contents)?;
        git(&clone, &["add", "-A"])?;
        git(&clone, &["commit", "-q", "-m", "docs: upstream change"])?;
        git(&clone, &["push", "-q", "origin", "main"])?;
        Ok(())
    }
}

fn git(dir: &Path, args: &[&str]) -> Result<()> {
    git_output(dir, args).map(|_| ())
}

fn git_output(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("-c")
        .arg(format!("user.name={TEST_AUTHOR_NAME}"))
        .arg("-c")
        .arg(format!("user.email={TEST_AUTHOR_EMAIL}"))
        .args(args)
        .current_dir(dir)
        .output()?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
