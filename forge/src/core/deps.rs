//! Dependency lines produced by the Dependencies stage.
//!
//! Format: `group:artifact[:version][:scope]`, one per line, terminated by
//! [`END_DEPS_SENTINEL`]. Everything after the sentinel is an echo of the
//! requirements and is ignored here.

use serde::Serialize;

pub const END_DEPS_SENTINEL: &str = "---END-DEPS---";

/// One build dependency. Identity is `(group, artifact)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub group: String,
    pub artifact: String,
    pub version: Option<String>,
    pub scope: Option<String>,
}

impl Dependency {
    /// Parse one `group:artifact[:version][:scope]` line.
    ///
    /// Returns `None` for fewer than two fields, or more than four.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        let fields: Vec<&str> = line.split(':').map(str::trim).collect();
        if fields.len() < 2 || fields.len() > 4 {
            return None;
        }
        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        };
        if !valid(fields[0]) || !valid(fields[1]) {
            return None;
        }
        let optional = |idx: usize| {
            fields
                .get(idx)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
        };
        Some(Self {
            group: fields[0].to_string(),
            artifact: fields[1].to_string(),
            version: optional(2),
            scope: optional(3),
        })
    }

    fn same_coordinates(&self, other: &Dependency) -> bool {
        self.group == other.group && self.artifact == other.artifact
    }
}

/// Dependency lines from a Dependencies stage answer, with malformed lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDependencies {
    pub dependencies: Vec<Dependency>,
    /// Non-blank lines before the sentinel that did not parse.
    pub skipped: Vec<String>,
}

/// Parse the dependency section of a Dependencies stage answer.
///
/// Only text before the sentinel is considered; if the sentinel is missing the
/// whole text is scanned. Fence lines are ignored. Duplicates keep the first.
pub fn parse_dependency_section(text: &str) -> ParsedDependencies {
    let section = text
        .split_once(END_DEPS_SENTINEL)
        .map_or(text, |(head, _)| head);

    let mut parsed = ParsedDependencies::default();
    for line in section.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("```") || trimmed.starts_with('#') {
            continue;
        }
        match Dependency::parse(trimmed) {
            Some(dep) => push_unique(&mut parsed.dependencies, dep),
            None => parsed.skipped.push(trimmed.to_string()),
        }
    }
    parsed
}

/// Merge `extra` into `base`, keeping the first occurrence of each coordinate.
pub fn merge_first_wins(base: &[Dependency], extra: &[Dependency]) -> Vec<Dependency> {
    let mut merged = Vec::with_capacity(base.len() + extra.len());
    for dep in base.iter().chain(extra) {
        push_unique(&mut merged, dep.clone());
    }
    merged
}

fn push_unique(list: &mut Vec<Dependency>, dep: Dependency) {
    if !list.iter().any(|existing| existing.same_coordinates(&dep)) {
        list.push(dep);
    }
}
