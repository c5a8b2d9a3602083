//! `forge`: generate a Spring Boot service from an SRS and publish it for review.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use forge::exit_codes;
use forge::io::build::CommandBuildVerifier;
use forge::io::config::{ForgeConfig, default_config_path, load_config};
use forge::io::generator::generator_from_config;
use forge::io::hosting::GhPullRequests;
use forge::pipeline::{GenerationSettings, correct, default_stages, review_failure};
use forge::run::{RunDeps, run_once};
use forge::srs::load_srs;

#[derive(Parser)]
#[command(
    name = "forge",
    version,
    about = "Generate, verify and publish a service from a requirements document"
)]
struct Cli {
    /// Config file. Defaults to $FORGE_CONFIG, then ./forge.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline once. Prompts for the SRS path when omitted.
    Run { srs: Option<PathBuf> },
    /// Print the directives parsed from an SRS and the resolved checkout path.
    Directives { srs: PathBuf },
    /// Explain a saved build transcript and propose a corrected stage template.
    Correct { srs: PathBuf, transcript: PathBuf },
}

fn main() {
    forge::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::FATAL);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let cfg = load_config(&config_path)?;
    match cli.command {
        None => cmd_run(&cfg, None),
        Some(Command::Run { srs }) => cmd_run(&cfg, srs),
        Some(Command::Directives { srs }) => cmd_directives(&cfg, &srs),
        Some(Command::Correct { srs, transcript }) => cmd_correct(&cfg, &srs, &transcript),
    }
}

fn cmd_run(cfg: &ForgeConfig, srs: Option<PathBuf>) -> Result<i32> {
    let srs_path = match srs {
        Some(path) => path,
        None => prompt_for_srs_path()?,
    };
    let srs_text =
        std::fs::read_to_string(&srs_path).with_context(|| format!("read {}", srs_path.display()))?;

    let generator = generator_from_config(&cfg.backend)?;
    let build = CommandBuildVerifier::from_config(&cfg.build);
    let pull_requests = GhPullRequests::new(cfg.publish.pr_command.clone());
    let deps = RunDeps {
        generator: generator.as_ref(),
        build: &build,
        pull_requests: &pull_requests,
    };

    let outcome = run_once(&srs_text, cfg, &deps)?;
    info!(?outcome, "run finished");
    println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    Ok(outcome.exit_code())
}

fn outcome_json(outcome: &forge::run::RunOutcome) -> serde_json::Value {
    use forge::run::RunOutcome;
    match outcome {
        RunOutcome::NoChange => json!({ "outcome": "no_change" }),
        RunOutcome::Published {
            branch,
            pull_request,
        } => json!({ "outcome": "published", "branch": branch, "pull_request": pull_request }),
        RunOutcome::BuildFailed { branch } => json!({ "outcome": "build_failed", "branch": branch }),
    }
}

fn prompt_for_srs_path() -> Result<PathBuf> {
    let mut stderr = std::io::stderr();
    write!(stderr, "Path to SRS file: ").context("write prompt")?;
    stderr.flush().context("flush prompt")?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("read SRS path from stdin")?;
    let path = line.trim();
    if path.is_empty() {
        bail!("no SRS path given");
    }
    Ok(PathBuf::from(path))
}

fn cmd_directives(cfg: &ForgeConfig, srs: &Path) -> Result<i32> {
    let config = load_srs(srs)?;
    let repo_path = config.resolve_repo_path(&cfg.workspace_dir)?;
    let out = json!({
        "directives": config,
        "checkout": repo_path,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(exit_codes::OK)
}

fn cmd_correct(cfg: &ForgeConfig, srs: &Path, transcript: &Path) -> Result<i32> {
    let config = load_srs(srs)?;
    info!(repo = %config.repo_path, "reviewing saved build transcript");
    let transcript = std::fs::read_to_string(transcript)
        .with_context(|| format!("read {}", transcript.display()))?;

    let generator = generator_from_config(&cfg.backend)?;
    let settings = GenerationSettings::from(&cfg.backend);
    let analysis = review_failure(generator.as_ref(), &settings, &cfg.retry, &transcript)?;
    println!("## Root cause\n\n{analysis}\n");

    match correct(
        generator.as_ref(),
        &settings,
        &cfg.retry,
        &transcript,
        &default_stages(),
    )? {
        Some(correction) => {
            println!(
                "## Corrected template for stage `{}`\n\n{}",
                correction.failing_stage, correction.corrected_template
            );
        }
        None => println!("## Correction\n\nNo usable correction was proposed."),
    }
    Ok(exit_codes::OK)
}
