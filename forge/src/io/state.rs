//! Local run state kept in `.forge/` inside the checkout.
//!
//! The directory is excluded from git, so it survives branch switches and
//! never shows up in a commit.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const STATE_DIR: &str = ".forge";
pub const LAST_SRS_FILE: &str = "last-srs.md";
pub const LAST_RUN_FILE: &str = "last-run.json";

pub fn last_srs_path(repo: &Path) -> PathBuf {
    repo.join(STATE_DIR).join(LAST_SRS_FILE)
}

pub fn last_run_path(repo: &Path) -> PathBuf {
    repo.join(STATE_DIR).join(LAST_RUN_FILE)
}

/// SRS text of the last run that got as far as materialization.
pub fn load_last_srs(repo: &Path) -> Result<Option<String>> {
    let path = last_srs_path(repo);
    if !path.exists() {
        debug!(path = %path.display(), "no previous SRS");
        return Ok(None);
    }
    let text =
        fs::read_to_string(&path).with_context(|| format!("read last SRS {}", path.display()))?;
    Ok(Some(text))
}

pub fn store_last_srs(repo: &Path, srs: &str) -> Result<()> {
    let path = last_srs_path(repo);
    debug!(path = %path.display(), bytes = srs.len(), "storing last SRS");
    write_atomic(&path, srs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedOutcome {
    NoChange,
    Published,
    BuildFailed,
}

/// Summary of one run for operators (`.forge/last-run.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub outcome: RecordedOutcome,
    pub started_at: String,
    pub finished_at: String,
    pub base_branch: String,
    pub feature_branch: Option<String>,
    pub commit_message: Option<String>,
    pub pull_request: Option<String>,
    pub changelog: Option<String>,
    #[serde(default)]
    pub written_files: Vec<String>,
    #[serde(default)]
    pub failed_files: Vec<String>,
}

pub fn load_run_record(repo: &Path) -> Result<RunRecord> {
    let path = last_run_path(repo);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read run record {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse run record {}", path.display()))
}

pub fn write_run_record(repo: &Path, record: &RunRecord) -> Result<()> {
    let path = last_run_path(repo);
    debug!(path = %path.display(), outcome = ?record.outcome, "writing run record");
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    write_atomic(&path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}
