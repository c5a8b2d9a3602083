//! Run Controller: one SRS in, at most one published branch out.
//!
//! Phases run strictly in order:
//! config → repo-ready → change-check → branching → generation →
//! materialization → verification → publish.
//! A fatal error carries a [`PhaseFailure`] naming the phase it happened in.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::core::markers::parse_file_blocks;
use crate::core::types::{ChangeVerdict, GitContext, RunResult};
use crate::error::{PhaseFailure, RunPhase};
use crate::exit_codes;
use crate::io::build::{BuildRequest, BuildVerifier};
use crate::io::config::ForgeConfig;
use crate::io::generator::Generator;
use crate::io::git::{Git, Identity};
use crate::io::hosting::{PullRequest, PullRequests};
use crate::io::materialize::{MaterializeReport, write_artifacts};
use crate::io::scaffold::{
    ScaffoldInputs, clean_generated_paths, resolve_dependencies, write_changelog_entry,
    write_failure_analysis, write_scaffold,
};
use crate::io::state::{
    RecordedOutcome, RunRecord, STATE_DIR, load_last_srs, store_last_srs, write_run_record,
};
use crate::pipeline::{
    GenerationSettings, RunInputs, analyze_change, default_stages, review_failure, run_attempt,
};
use crate::retry::with_retry;
use crate::srs::SrsConfig;

pub const BUILD_FAILED_PREFIX: &str = "[BUILD FAILED] ";

/// External collaborators for one run.
pub struct RunDeps<'a> {
    pub generator: &'a dyn Generator,
    pub build: &'a dyn BuildVerifier,
    pub pull_requests: &'a dyn PullRequests,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The SRS did not change functionally; nothing was generated.
    NoChange,
    /// Build passed; branch committed and, if configured, pushed with a PR.
    Published {
        branch: String,
        pull_request: Option<String>,
    },
    /// Build failed; branch committed with the failure report, no PR.
    BuildFailed { branch: String },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::NoChange | RunOutcome::Published { .. } => exit_codes::OK,
            RunOutcome::BuildFailed { .. } => exit_codes::BUILD_FAILED,
        }
    }
}

fn phase(phase: RunPhase) -> PhaseFailure {
    PhaseFailure { phase }
}

/// Run the whole pipeline once for `srs_text`.
#[instrument(skip_all)]
pub fn run_once(srs_text: &str, cfg: &ForgeConfig, deps: &RunDeps<'_>) -> Result<RunOutcome> {
    let started_at = Utc::now();

    let srs = SrsConfig::parse(srs_text).context(phase(RunPhase::Config))?;
    let repo_path = srs
        .resolve_repo_path(&cfg.workspace_dir)
        .context(phase(RunPhase::Config))?;
    let mut ctx = GitContext {
        repo_path,
        repo_url: srs.repo_url.clone(),
        base_branch: srs.base_branch.clone(),
        feature_branch: None,
    };
    info!(
        repo = %ctx.repo_path.display(),
        base = %ctx.base_branch,
        "starting run"
    );

    let git = Git::new(&ctx.repo_path).with_identity(identity(cfg));
    ensure_ready(&git, &ctx, cfg).context(phase(RunPhase::RepoReady))?;

    let settings = GenerationSettings::from(&cfg.backend);
    let verdict = check_change(deps.generator, &settings, cfg, &ctx.repo_path, srs_text)
        .context(phase(RunPhase::ChangeCheck))?;
    let changelog = match verdict {
        ChangeVerdict::NoFunctionalChange => {
            info!("no functional change, nothing to do");
            record(&ctx, started_at, RecordedOutcome::NoChange, None, None, None, None);
            return Ok(RunOutcome::NoChange);
        }
        ChangeVerdict::Changed(changelog) => changelog,
    };

    let branch = create_feature_branch(&git, cfg, &ctx, started_at, &changelog)
        .context(phase(RunPhase::Branching))?;
    ctx.feature_branch = Some(branch.clone());

    let stages = default_stages();
    let inputs = RunInputs::from_srs(&srs);
    let result: RunResult = with_retry(&cfg.retry, "generation attempt", || {
        run_attempt(deps.generator, &settings, &inputs, &stages)
    })
    .context(phase(RunPhase::Generation))?;

    let report = materialize(&ctx.repo_path, &srs, &result, srs_text)
        .context(phase(RunPhase::Materialization))?;

    let build = deps
        .build
        .verify(&BuildRequest::from_config(ctx.repo_path.clone(), &cfg.build))
        .context(phase(RunPhase::Verification))?;

    let outcome = if build.passed() {
        publish_passed(&git, cfg, deps, &ctx, &branch, &result, &changelog)
            .context(phase(RunPhase::Publish))?
    } else {
        publish_failed(&git, cfg, deps, &settings, &ctx, &branch, &result, &build.transcript)
            .context(phase(RunPhase::Publish))?
    };

    let (recorded, commit_message, pull_request) = match &outcome {
        RunOutcome::Published { pull_request, .. } => (
            RecordedOutcome::Published,
            result.commit_message.clone(),
            pull_request.clone(),
        ),
        _ => (
            RecordedOutcome::BuildFailed,
            format!("{BUILD_FAILED_PREFIX}{}", result.commit_message),
            None,
        ),
    };
    record(
        &ctx,
        started_at,
        recorded,
        Some(commit_message),
        pull_request,
        Some(changelog),
        Some(report),
    );
    Ok(outcome)
}

fn identity(cfg: &ForgeConfig) -> Option<Identity> {
    match (&cfg.git.author_name, &cfg.git.author_email) {
        (Some(name), Some(email)) => Some(Identity {
            name: name.clone(),
            email: email.clone(),
        }),
        _ => None,
    }
}

/// Clone, or bring an existing checkout back to the tip of the base branch.
#[instrument(skip_all, fields(base = %ctx.base_branch))]
fn ensure_ready(git: &Git, ctx: &GitContext, cfg: &ForgeConfig) -> Result<()> {
    if ctx.repo_path.exists() {
        info!("updating existing checkout");
        // A run that died mid-way can leave generated files behind.
        git.discard_local_changes()?;
        git.checkout_branch(&ctx.base_branch)?;
        git.pull_ff_only(&cfg.git.remote, &ctx.base_branch)?;
    } else {
        info!(url = %ctx.repo_url, "cloning");
        git.clone_branch(&ctx.repo_url, &ctx.base_branch)?;
    }
    git.ensure_excluded(&format!("{STATE_DIR}/"))?;
    Ok(())
}

fn check_change(
    generator: &dyn Generator,
    settings: &GenerationSettings,
    cfg: &ForgeConfig,
    repo: &Path,
    srs_text: &str,
) -> Result<ChangeVerdict> {
    let previous = load_last_srs(repo)?.unwrap_or_default();
    analyze_change(generator, settings, &cfg.retry, &previous, srs_text)
}

/// Branch name for a run starting at `now`, unique among `existing`.
pub fn feature_branch_name(prefix: &str, now: DateTime<Utc>, existing: &[String]) -> String {
    let base = format!("{prefix}-{}", now.format("%Y%m%d-%H%M%S"));
    if !existing.contains(&base) {
        return base;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{base}-{suffix}");
        if !existing.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[instrument(skip_all)]
fn create_feature_branch(
    git: &Git,
    cfg: &ForgeConfig,
    ctx: &GitContext,
    started_at: DateTime<Utc>,
    changelog: &str,
) -> Result<String> {
    let branch = feature_branch_name(&cfg.git.branch_prefix, started_at, &git.local_branches()?);
    git.checkout_new_branch(&branch)?;
    info!(branch = %branch, "created feature branch");
    clean_generated_paths(&ctx.repo_path);
    let heading = format!("{} ({branch})", started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    write_changelog_entry(&ctx.repo_path, &heading, changelog)?;
    Ok(branch)
}

#[instrument(skip_all)]
fn materialize(
    repo: &Path,
    srs: &SrsConfig,
    result: &RunResult,
    srs_text: &str,
) -> Result<MaterializeReport> {
    let artifacts = parse_file_blocks(&result.code_and_test_text);
    if artifacts.is_empty() {
        warn!("generated text contained no file markers");
    }
    let report = write_artifacts(repo, &artifacts);
    info!(
        written = report.written.len(),
        failed = report.failed.len(),
        "artifacts materialized"
    );

    let project_name = repo
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "service".to_string());
    write_scaffold(
        repo,
        &ScaffoldInputs {
            project_name,
            language_version: srs.language_version.clone(),
            framework_version: srs.framework_version.clone(),
            dependencies: resolve_dependencies(&result.dependencies),
            summary: result.requirements_summary.clone(),
        },
    )?;
    store_last_srs(repo, srs_text)?;
    Ok(report)
}

fn commit(git: &Git, message: &str) -> Result<()> {
    git.add_all()?;
    if !git.commit_staged(message)? {
        warn!("nothing to commit");
    }
    Ok(())
}

/// Push the feature branch. Returns whether the push happened.
fn push(git: &Git, cfg: &ForgeConfig, branch: &str) -> bool {
    if !cfg.publish.push {
        info!("push disabled");
        return false;
    }
    match git.push_branch(&cfg.git.remote, branch) {
        Ok(()) => {
            info!(branch, "pushed feature branch");
            true
        }
        Err(err) => {
            warn!(branch, err = %format!("{err:#}"), "push failed");
            false
        }
    }
}

#[instrument(skip_all, fields(branch = %branch))]
fn publish_passed(
    git: &Git,
    cfg: &ForgeConfig,
    deps: &RunDeps<'_>,
    ctx: &GitContext,
    branch: &str,
    result: &RunResult,
    changelog: &str,
) -> Result<RunOutcome> {
    commit(git, &result.commit_message)?;
    let pushed = push(git, cfg, branch);

    let mut pull_request = None;
    if !cfg.publish.open_pull_request {
        info!("pull requests disabled");
    } else if !pushed {
        warn!("branch not pushed, skipping pull request");
    } else {
        let request = PullRequest {
            workdir: ctx.repo_path.clone(),
            base: ctx.base_branch.clone(),
            head: branch.to_string(),
            title: result.commit_message.clone(),
            body: pull_request_body(changelog, &result.requirements_summary),
        };
        match deps.pull_requests.open(&request) {
            Ok(url) => pull_request = Some(url),
            Err(err) => warn!(err = %format!("{err:#}"), "pull request failed"),
        }
    }
    Ok(RunOutcome::Published {
        branch: branch.to_string(),
        pull_request,
    })
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(branch = %branch))]
fn publish_failed(
    git: &Git,
    cfg: &ForgeConfig,
    deps: &RunDeps<'_>,
    settings: &GenerationSettings,
    ctx: &GitContext,
    branch: &str,
    result: &RunResult,
    transcript: &str,
) -> Result<RunOutcome> {
    let analysis = match review_failure(deps.generator, settings, &cfg.retry, transcript) {
        Ok(analysis) => analysis,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "build review failed");
            format!("Automated review unavailable: {err:#}")
        }
    };
    write_failure_analysis(&ctx.repo_path, branch, &analysis, transcript)?;
    commit(git, &format!("{BUILD_FAILED_PREFIX}{}", result.commit_message))?;
    push(git, cfg, branch);
    info!("build failed, no pull request opened");
    Ok(RunOutcome::BuildFailed {
        branch: branch.to_string(),
    })
}

fn pull_request_body(changelog: &str, summary: &str) -> String {
    format!(
        "## Changes\n\n{}\n\n## Requirements summary\n\n{}\n",
        changelog.trim(),
        summary.trim()
    )
}

/// Best effort: a failed write only costs operators the record.
#[allow(clippy::too_many_arguments)]
fn record(
    ctx: &GitContext,
    started_at: DateTime<Utc>,
    outcome: RecordedOutcome,
    commit_message: Option<String>,
    pull_request: Option<String>,
    changelog: Option<String>,
    report: Option<MaterializeReport>,
) {
    let report = report.unwrap_or_default();
    let record = RunRecord {
        outcome,
        started_at: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        finished_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        base_branch: ctx.base_branch.clone(),
        feature_branch: ctx.feature_branch.clone(),
        commit_message,
        pull_request,
        changelog,
        written_files: report.written,
        failed_files: report.failed,
    };
    if let Err(err) = write_run_record(&ctx.repo_path, &record) {
        warn!(err = %format!("{err:#}"), "could not write run record");
    }
}
