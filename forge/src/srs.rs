//! SRS directive loading.
//!
//! An SRS is free-form prose with a handful of `Key: value` lines that steer
//! the run. Keys are case-sensitive, the first non-empty match wins, and the
//! value is trimmed.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::ConfigError;

pub const REPO_URL_KEY: &str = "GitHub-URL";
pub const BASE_BRANCH_KEY: &str = "checkout_branch";
pub const REPO_PATH_KEY: &str = "Repository-Name";
pub const LANGUAGE_VERSION_KEY: &str = "Java-Version";
pub const FRAMEWORK_VERSION_KEY: &str = "SpringBoot-Version";

pub const DEFAULT_LANGUAGE_VERSION: &str = "17";
pub const DEFAULT_FRAMEWORK_VERSION: &str = "3.2.5";

/// Directives resolved from one SRS document. Immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SrsConfig {
    pub repo_url: String,
    pub base_branch: String,
    /// Repository path as written in the SRS (relative to the workspace dir).
    pub repo_path: String,
    pub language_version: String,
    pub framework_version: String,
    #[serde(skip)]
    pub raw: String,
}

impl SrsConfig {
    /// Parse directives from raw SRS text.
    ///
    /// Pure: performs no I/O, so a missing directive is reported before the
    /// run touches the filesystem or network.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            directive(raw, key).ok_or(ConfigError::MissingDirective(key))
        };
        let repo_url = required(REPO_URL_KEY)?;
        let base_branch = required(BASE_BRANCH_KEY)?;
        let repo_path = required(REPO_PATH_KEY)?;
        Ok(Self {
            repo_url,
            base_branch,
            repo_path,
            language_version: directive(raw, LANGUAGE_VERSION_KEY)
                .unwrap_or_else(|| DEFAULT_LANGUAGE_VERSION.to_string()),
            framework_version: directive(raw, FRAMEWORK_VERSION_KEY)
                .unwrap_or_else(|| DEFAULT_FRAMEWORK_VERSION.to_string()),
            raw: raw.to_string(),
        })
    }

    /// Resolve the checkout directory inside `workspace_dir`.
    ///
    /// The SRS path must be relative and may not climb out of the workspace.
    /// The result is always absolute; a relative `workspace_dir` is taken
    /// from the current directory.
    pub fn resolve_repo_path(&self, workspace_dir: &Path) -> Result<PathBuf, ConfigError> {
        let rel = Path::new(self.repo_path.trim());
        let mut resolved =
            std::path::absolute(workspace_dir).map_err(|e| ConfigError::UnresolvableWorkspace {
                path: workspace_dir.display().to_string(),
                reason: e.to_string(),
            })?;
        let mut depth = 0usize;
        for component in rel.components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => return Err(ConfigError::UnsafeRepoPath(self.repo_path.clone())),
            }
        }
        if depth == 0 {
            return Err(ConfigError::UnsafeRepoPath(self.repo_path.clone()));
        }
        Ok(resolved)
    }
}

/// Read and parse an SRS file.
pub fn load_srs(path: &Path) -> Result<SrsConfig> {
    let raw = fs::read_to_string(path).with_context(|| format!("read SRS {}", path.display()))?;
    let cfg = SrsConfig::parse(&raw)?;
    Ok(cfg)
}

/// First non-empty value of `key` in a `key: value` line.
fn directive(raw: &str, key: &str) -> Option<String> {
    raw.lines().find_map(|line| {
        let (k, v) = line.trim_start().split_once(':')?;
        if k.trim_end() != key {
            return None;
        }
        let value = v.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}
