//! Strict parser for Corrector answers.
//!
//! Expected shape:
//!
//! ```text
//! Failing-Stage: code
//! ---BEGIN-CORRECTED-TEMPLATE---
//! <new instruction template>
//! ---END-CORRECTED-TEMPLATE---
//! ```
//!
//! Parsing fails closed: anything missing or unknown yields `None`.

use std::sync::LazyLock;

use regex::Regex;

pub const BEGIN_TEMPLATE: &str = "---BEGIN-CORRECTED-TEMPLATE---";
pub const END_TEMPLATE: &str = "---END-CORRECTED-TEMPLATE---";

static FAILING_STAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*Failing-Stage:[ \t]*([A-Za-z_-]+)[ \t]*\r?$")
        .expect("failing stage regex")
});

/// A replacement instruction template for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub failing_stage: String,
    pub corrected_template: String,
}

/// Parse a Corrector answer. `known_stages` limits which names are accepted.
pub fn parse_correction(text: &str, known_stages: &[&str]) -> Option<Correction> {
    let caps = FAILING_STAGE_RE.captures(text)?;
    let stage = caps.get(1)?.as_str().to_ascii_lowercase();
    if !known_stages.contains(&stage.as_str()) {
        return None;
    }

    let after_stage = &text[caps.get(0)?.end()..];
    let (_, rest) = after_stage.split_once(BEGIN_TEMPLATE)?;
    let (payload, _) = rest.split_once(END_TEMPLATE)?;
    let payload = payload.trim_matches(['\n', '\r']);
    if payload.trim().is_empty() {
        return None;
    }

    Some(Correction {
        failing_stage: stage,
        corrected_template: payload.to_string(),
    })
}
