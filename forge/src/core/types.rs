//! Shared value types passed between pipeline components.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::deps::Dependency;

/// One generated file, path relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArtifact {
    pub relative_path: String,
    pub content: String,
}

/// Everything one generation attempt produces for materialization and publish.
///
/// Built fresh by every attempt; a failed attempt's value is never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub commit_message: String,
    pub requirements_summary: String,
    pub code_and_test_text: String,
    pub dependencies: Vec<Dependency>,
}

/// Outcome of comparing the previous SRS with the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "changelog", rename_all = "snake_case")]
pub enum ChangeVerdict {
    NoFunctionalChange,
    Changed(String),
}

impl ChangeVerdict {
    /// Sentinel the Change Analyzer answers with when nothing functional changed.
    pub const SENTINEL: &'static str = "NO_FUNCTIONAL_CHANGE";

    /// Classify a raw backend answer.
    pub fn from_response(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed == Self::SENTINEL {
            return ChangeVerdict::NoFunctionalChange;
        }
        if trimmed.is_empty() {
            return ChangeVerdict::Changed("SRS updated (no changelog details returned).".to_string());
        }
        ChangeVerdict::Changed(trimmed.to_string())
    }
}

/// Repository coordinates for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitContext {
    /// Absolute checkout directory inside the workspace.
    pub repo_path: PathBuf,
    pub repo_url: String,
    pub base_branch: String,
    /// Set once the Branching phase created it.
    pub feature_branch: Option<String>,
}
