//! Single-stage pipelines: change analysis, build review and the corrector.

use anyhow::Result;
use minijinja::context;
use tracing::{info, instrument, warn};

use super::{CODE_KEY, GenerationSettings, Stage, TEST_KEY, generate, render_template};
use crate::core::correction::{Correction, parse_correction};
use crate::core::types::ChangeVerdict;
use crate::io::generator::Generator;
use crate::retry::{RetryPolicy, with_retry};

const CHANGE_INITIAL_TEMPLATE: &str = include_str!("../prompts/change_initial.md");
const CHANGE_DIFF_TEMPLATE: &str = include_str!("../prompts/change_diff.md");
const REVIEW_TEMPLATE: &str = include_str!("../prompts/review.md");
const CORRECTOR_TEMPLATE: &str = include_str!("../prompts/corrector.md");

/// Build output beyond this many bytes is cut from the front before prompting.
const TRANSCRIPT_PROMPT_LIMIT: usize = 60_000;

/// Decide whether the SRS changed functionally since the last run.
///
/// Identical text never reaches the backend. An empty previous SRS is
/// described as an initial version rather than diffed.
#[instrument(skip_all, fields(old_bytes = old_srs.len(), new_bytes = new_srs.len()))]
pub fn analyze_change<G: Generator + ?Sized>(
    generator: &G,
    settings: &GenerationSettings,
    policy: &RetryPolicy,
    old_srs: &str,
    new_srs: &str,
) -> Result<ChangeVerdict> {
    if old_srs == new_srs {
        info!("SRS unchanged byte-for-byte");
        return Ok(ChangeVerdict::NoFunctionalChange);
    }
    let prompt = if old_srs.trim().is_empty() {
        render_template(
            "change_initial",
            CHANGE_INITIAL_TEMPLATE,
            context! { new_srs => new_srs },
        )?
    } else {
        render_template(
            "change_diff",
            CHANGE_DIFF_TEMPLATE,
            context! { old_srs => old_srs, new_srs => new_srs },
        )?
    };
    let answer = with_retry(policy, "change analysis", || {
        generate(generator, settings, prompt.clone())
    })?;
    let verdict = ChangeVerdict::from_response(&answer);
    info!(changed = matches!(verdict, ChangeVerdict::Changed(_)), "change analysis complete");
    Ok(verdict)
}

/// Ask the backend for a root-cause explanation of a failed build.
#[instrument(skip_all, fields(transcript_bytes = transcript.len()))]
pub fn review_failure<G: Generator + ?Sized>(
    generator: &G,
    settings: &GenerationSettings,
    policy: &RetryPolicy,
    transcript: &str,
) -> Result<String> {
    let prompt = render_template(
        "review",
        REVIEW_TEMPLATE,
        context! { transcript => transcript_tail(transcript) },
    )?;
    let answer = with_retry(policy, "build review", || {
        generate(generator, settings, prompt.clone())
    })?;
    Ok(answer.trim().to_string())
}

/// Ask the backend which of the Code and Test templates caused a failed build.
///
/// Returns `None` unless the answer names a known stage and carries a
/// non-empty corrected template.
#[instrument(skip_all, fields(transcript_bytes = transcript.len()))]
pub fn correct<G: Generator + ?Sized>(
    generator: &G,
    settings: &GenerationSettings,
    policy: &RetryPolicy,
    transcript: &str,
    stages: &[Stage],
) -> Result<Option<Correction>> {
    let template_of = |key: &str| {
        stages
            .iter()
            .find(|s| s.output_key == key)
            .map(|s| s.template.as_str())
            .unwrap_or("")
    };
    let prompt = render_template(
        "corrector",
        CORRECTOR_TEMPLATE,
        context! {
            transcript => transcript_tail(transcript),
            code_template => template_of(CODE_KEY),
            test_template => template_of(TEST_KEY),
        },
    )?;
    let answer = with_retry(policy, "correction", || {
        generate(generator, settings, prompt.clone())
    })?;

    let known: Vec<&str> = stages
        .iter()
        .filter(|s| s.output_key == CODE_KEY || s.output_key == TEST_KEY)
        .map(|s| s.name.as_str())
        .collect();
    let correction = parse_correction(&answer, &known);
    if correction.is_none() {
        warn!("corrector answer did not contain a usable correction");
    }
    Ok(correction)
}

/// Replace the template of the stage named by `correction`.
///
/// Returns false if no such stage exists.
pub fn apply_correction(stages: &mut [Stage], correction: &Correction) -> bool {
    match stages
        .iter_mut()
        .find(|s| s.name == correction.failing_stage)
    {
        Some(stage) => {
            stage.template = correction.corrected_template.clone();
            true
        }
        None => false,
    }
}

fn transcript_tail(transcript: &str) -> &str {
    if transcript.len() <= TRANSCRIPT_PROMPT_LIMIT {
        return transcript;
    }
    let mut start = transcript.len() - TRANSCRIPT_PROMPT_LIMIT;
    while !transcript.is_char_boundary(start) {
        start += 1;
    }
    &transcript[start..]
}
