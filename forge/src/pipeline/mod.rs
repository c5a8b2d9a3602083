//! Generation pipeline: Requirements → Dependencies → Code → Tests.
//!
//! Stages are plain data. One function, [`run_stage`], renders a stage's
//! template against the run inputs and the outputs of earlier stages, calls the
//! generator and appends the answer to the blackboard.

mod analysis;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::blackboard::StageOutput;
use crate::core::deps::parse_dependency_section;
use crate::core::types::RunResult;
use crate::io::config::BackendConfig;
use crate::io::generator::{GenerationRequest, Generator};
use crate::srs::SrsConfig;

pub use analysis::{analyze_change, apply_correction, correct, review_failure};

pub const REQUIREMENTS_KEY: &str = "requirements";
pub const DEPENDENCIES_KEY: &str = "dependencies";
pub const CODE_KEY: &str = "code";
pub const TEST_KEY: &str = "test";

pub const DEFAULT_COMMIT_MESSAGE: &str = "feat: generate service from SRS";
const COMMIT_MESSAGE_PREFIX: &str = "Commit-Message:";

const REQUIREMENTS_TEMPLATE: &str = include_str!("../prompts/requirements.md");
const DEPENDENCIES_TEMPLATE: &str = include_str!("../prompts/dependencies.md");
const CODE_TEMPLATE: &str = include_str!("../prompts/code.md");
const TEST_TEMPLATE: &str = include_str!("../prompts/test.md");

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub name: String,
    /// minijinja source; may reference run inputs and earlier output keys.
    pub template: String,
    pub output_key: String,
}

impl Stage {
    pub fn new(name: &str, template: &str, output_key: &str) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            output_key: output_key.to_string(),
        }
    }
}

/// The fixed four-stage chain.
pub fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new("requirements", REQUIREMENTS_TEMPLATE, REQUIREMENTS_KEY),
        Stage::new("dependencies", DEPENDENCIES_TEMPLATE, DEPENDENCIES_KEY),
        Stage::new("code", CODE_TEMPLATE, CODE_KEY),
        Stage::new("test", TEST_TEMPLATE, TEST_KEY),
    ]
}

/// Sampling parameters forwarded with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl From<&BackendConfig> for GenerationSettings {
    fn from(cfg: &BackendConfig) -> Self {
        Self {
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_output_tokens,
        }
    }
}

impl GenerationSettings {
    fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            prompt,
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

/// Values every stage template can reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInputs {
    pub srs: String,
    pub java_version: String,
    pub spring_boot_version: String,
}

impl RunInputs {
    pub fn from_srs(srs: &SrsConfig) -> Self {
        Self {
            srs: srs.raw.clone(),
            java_version: srs.language_version.clone(),
            spring_boot_version: srs.framework_version.clone(),
        }
    }

    fn pairs(&self) -> [(&str, &str); 3] {
        [
            ("srs", self.srs.as_str()),
            ("java_version", self.java_version.as_str()),
            ("spring_boot_version", self.spring_boot_version.as_str()),
        ]
    }
}

/// Render `template` with strict undefined-variable semantics.
pub(crate) fn render_template<S: Serialize>(name: &str, template: &str, ctx: S) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.render_str(template, ctx)
        .with_context(|| format!("render {name} template"))
}

pub(crate) fn generate<G: Generator + ?Sized>(
    generator: &G,
    settings: &GenerationSettings,
    prompt: String,
) -> Result<String> {
    generator.generate(&settings.request(prompt))
}

/// Run one stage and append its output to `blackboard`.
#[instrument(skip_all, fields(stage = %stage.name))]
pub fn run_stage<G: Generator + ?Sized>(
    generator: &G,
    settings: &GenerationSettings,
    inputs: &RunInputs,
    blackboard: &mut StageOutput,
    stage: &Stage,
) -> Result<()> {
    let prompt = {
        let pairs = inputs.pairs();
        let ctx = blackboard.render_context(&pairs)?;
        render_template(&stage.name, &stage.template, ctx)?
    };
    debug!(prompt_bytes = prompt.len(), "stage prompt rendered");
    let text = generate(generator, settings, prompt)
        .with_context(|| format!("{} stage", stage.name))?;
    info!(output_bytes = text.len(), "stage complete");
    blackboard.insert(&stage.output_key, text)
}

/// One full pass over `stages`, producing a fresh [`RunResult`].
///
/// Any failure aborts the attempt; nothing from it is kept.
#[instrument(skip_all, fields(stages = stages.len()))]
pub fn run_attempt<G: Generator + ?Sized>(
    generator: &G,
    settings: &GenerationSettings,
    inputs: &RunInputs,
    stages: &[Stage],
) -> Result<RunResult> {
    let mut blackboard = StageOutput::new();
    for stage in stages {
        run_stage(generator, settings, inputs, &mut blackboard, stage)?;
    }

    let output = |key: &str| {
        blackboard
            .get(key)
            .ok_or_else(|| anyhow!("no stage produced `{key}`"))
    };
    let (commit_message, requirements_summary) =
        extract_commit_message(output(REQUIREMENTS_KEY)?);

    let parsed = parse_dependency_section(output(DEPENDENCIES_KEY)?);
    for line in &parsed.skipped {
        warn!(line = %line, "skipping malformed dependency");
    }

    let code_and_test_text = format!("{}\n{}", output(CODE_KEY)?, output(TEST_KEY)?);

    Ok(RunResult {
        commit_message,
        requirements_summary,
        code_and_test_text,
        dependencies: parsed.dependencies,
    })
}

/// Split a leading `Commit-Message:` line off the requirements text.
///
/// Returns the commit message (or the default) and the remaining summary.
pub fn extract_commit_message(requirements: &str) -> (String, String) {
    let mut lines = requirements.lines();
    let first = lines.by_ref().find(|l| !l.trim().is_empty());
    if let Some(first) = first
        && let Some(message) = first.trim().strip_prefix(COMMIT_MESSAGE_PREFIX)
        && !message.trim().is_empty()
    {
        let rest = lines.collect::<Vec<_>>().join("\n");
        return (message.trim().to_string(), rest.trim().to_string());
    }
    (
        DEFAULT_COMMIT_MESSAGE.to_string(),
        requirements.trim().to_string(),
    )
}
