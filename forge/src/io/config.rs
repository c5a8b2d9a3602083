//! Operator configuration stored in `forge.toml`.
//!
//! Everything about *what* to generate comes from the SRS. This file only
//! describes *how* to reach the outside world: the generation backend, the
//! build tool, git identity and the PR host.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Environment variable that points at the config file.
pub const CONFIG_ENV: &str = "FORGE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "forge.toml";

/// Top-level configuration (TOML). Missing fields take defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForgeConfig {
    /// Directory under which SRS `Repository-Name` paths are resolved.
    pub workspace_dir: PathBuf,
    pub retry: RetryPolicy,
    pub backend: BackendConfig,
    pub build: BuildConfig,
    pub git: GitConfig,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible chat completions over HTTP.
    Http,
    /// Local CLI: prompt on stdin, completion on stdout.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Chat completions URL (http backend).
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key (http backend).
    pub api_key_env: String,
    /// Program and arguments (command backend).
    pub command: Vec<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    /// Substrings of command-backend stderr that mark a retryable failure.
    pub transient_markers: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Http,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "FORGE_API_KEY".to_string(),
            command: vec!["llm".to_string()],
            temperature: 0.2,
            max_output_tokens: 8_192,
            timeout_secs: 600,
            transient_markers: vec![
                "429".to_string(),
                "500".to_string(),
                "502".to_string(),
                "503".to_string(),
                "overloaded".to_string(),
                "rate limit".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Build verification command (e.g. `["mvn","-B","verify"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate build stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec!["mvn".to_string(), "-B".to_string(), "verify".to_string()],
            timeout_secs: 30 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub remote: String,
    /// Commit identity passed as `-c user.name`; `None` uses git's own config.
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    /// Prefix for per-run feature branches.
    pub branch_prefix: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            author_name: None,
            author_email: None,
            branch_prefix: "forge/srs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    /// Push the feature branch after committing.
    pub push: bool,
    /// Open a pull request when the build passes.
    pub open_pull_request: bool,
    /// Program and leading arguments for the PR host CLI.
    pub pr_command: Vec<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            push: true,
            open_pull_request: true,
            pr_command: vec!["gh".to_string()],
        }
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            workspace_dir: std::env::temp_dir().join("forge-workspaces"),
            retry: RetryPolicy::default(),
            backend: BackendConfig::default(),
            build: BuildConfig::default(),
            git: GitConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl ForgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workspace_dir.as_os_str().is_empty() {
            return Err(anyhow!("workspace_dir must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.backend.max_output_tokens == 0 {
            return Err(anyhow!("backend.max_output_tokens must be > 0"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err(anyhow!("backend.temperature must be within 0.0..=2.0"));
        }
        if self.backend.kind == BackendKind::Command && !non_empty_command(&self.backend.command)
        {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        if !non_empty_command(&self.build.command) {
            return Err(anyhow!("build.command must be a non-empty array"));
        }
        if self.build.timeout_secs == 0 {
            return Err(anyhow!("build.timeout_secs must be > 0"));
        }
        if self.build.output_limit_bytes == 0 {
            return Err(anyhow!("build.output_limit_bytes must be > 0"));
        }
        if self.git.remote.trim().is_empty() {
            return Err(anyhow!("git.remote must not be empty"));
        }
        if self.git.branch_prefix.trim().is_empty() {
            return Err(anyhow!("git.branch_prefix must not be empty"));
        }
        if self.publish.open_pull_request && !non_empty_command(&self.publish.pr_command) {
            return Err(anyhow!("publish.pr_command must be a non-empty array"));
        }
        Ok(())
    }
}

fn non_empty_command(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

/// Config path from `FORGE_CONFIG`, else `./forge.toml`.
pub fn default_config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ForgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<ForgeConfig> {
    if !path.exists() {
        let cfg = ForgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ForgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
