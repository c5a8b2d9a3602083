//! Deterministic project files: build descriptor, config, CI, README,
//! changelog and the build failure report.
//!
//! Nothing here calls the generation backend. Given the same inputs the
//! output is byte-identical.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, UndefinedBehavior, context};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::deps::{Dependency, merge_first_wins};
use crate::core::readme::update_readme;

const POM_TEMPLATE: &str = include_str!("../scaffold/pom.xml.j2");
const APPLICATION_PROPERTIES_TEMPLATE: &str = include_str!("../scaffold/application.properties.j2");
const CI_TEMPLATE: &str = include_str!("../scaffold/ci.yml.j2");
const GITIGNORE: &str = include_str!("../scaffold/gitignore");

pub const POM_PATH: &str = "pom.xml";
pub const APPLICATION_PROPERTIES_PATH: &str = "src/main/resources/application.properties";
pub const CI_PATH: &str = ".github/workflows/ci.yml";
pub const GITIGNORE_PATH: &str = ".gitignore";
pub const README_PATH: &str = "README.md";
pub const CHANGELOG_PATH: &str = "CHANGELOG.md";
pub const FAILURE_ANALYSIS_PATH: &str = "BUILD_FAILURE_ANALYSIS.md";

/// Paths removed from a fresh feature branch before generation.
pub const GENERATED_PATHS: [&str; 3] = ["pom.xml", "src", ".github"];

const CHANGELOG_HEADER: &str = "# Changelog";
const GROUP_ID: &str = "com.example";
const TRANSCRIPT_TAIL_LINES: usize = 200;

/// Everything the scaffold templates need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldInputs {
    pub project_name: String,
    pub language_version: String,
    pub framework_version: String,
    pub dependencies: Vec<Dependency>,
    pub summary: String,
}

/// Dependencies used when the pipeline produced none.
pub fn default_dependencies() -> Vec<Dependency> {
    vec![
        dependency("org.springframework.boot", "spring-boot-starter-web", None),
        dependency("org.springframework.boot", "spring-boot-starter-data-jpa", None),
        dependency("com.h2database", "h2", Some("runtime")),
    ]
}

/// Dependencies every generated project carries.
pub fn required_dependencies() -> Vec<Dependency> {
    vec![
        dependency("org.springframework.boot", "spring-boot-starter-test", Some("test")),
        dependency("org.springframework.boot", "spring-boot-starter-logging", None),
    ]
}

fn dependency(group: &str, artifact: &str, scope: Option<&str>) -> Dependency {
    Dependency {
        group: group.to_string(),
        artifact: artifact.to_string(),
        version: None,
        scope: scope.map(str::to_string),
    }
}

/// Final dependency list for `pom.xml`.
pub fn resolve_dependencies(generated: &[Dependency]) -> Vec<Dependency> {
    let base = if generated.is_empty() {
        debug!("no generated dependencies, using defaults");
        default_dependencies()
    } else {
        merge_first_wins(generated, &[])
    };
    merge_first_wins(&base, &required_dependencies())
}

/// Maven artifactId derived from the checkout directory name.
pub fn artifact_id(project_name: &str) -> String {
    let mut out = String::new();
    for c in project_name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "service".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Serialize)]
struct TemplateDependency<'a> {
    group: &'a str,
    artifact: &'a str,
    version: Option<&'a str>,
    scope: Option<&'a str>,
}

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_template("pom", POM_TEMPLATE)
        .context("load pom.xml template")?;
    env.add_template("application-properties", APPLICATION_PROPERTIES_TEMPLATE)
        .context("load application.properties template")?;
    env.add_template("ci", CI_TEMPLATE)
        .context("load ci.yml template")?;
    Ok(env)
}

/// Render `pom.xml` for the given inputs.
pub fn render_pom(inputs: &ScaffoldInputs) -> Result<String> {
    let env = environment()?;
    let dependencies: Vec<TemplateDependency<'_>> = inputs
        .dependencies
        .iter()
        .map(|d| TemplateDependency {
            group: &d.group,
            artifact: &d.artifact,
            version: d.version.as_deref(),
            scope: d.scope.as_deref(),
        })
        .collect();
    let rendered = env.get_template("pom")?.render(context! {
        group_id => GROUP_ID,
        artifact_id => artifact_id(&inputs.project_name),
        project_name => inputs.project_name,
        java_version => inputs.language_version,
        spring_boot_version => inputs.framework_version,
        dependencies => dependencies,
    })?;
    Ok(rendered)
}

/// Write every scaffold file under `root` and return the relative paths written.
#[instrument(skip_all, fields(root = %root.display(), project = %inputs.project_name))]
pub fn write_scaffold(root: &Path, inputs: &ScaffoldInputs) -> Result<Vec<String>> {
    let env = environment()?;
    let artifact = artifact_id(&inputs.project_name);

    let properties = env
        .get_template("application-properties")?
        .render(context! { artifact_id => artifact })?;
    let ci = env
        .get_template("ci")?
        .render(context! { java_version => inputs.language_version })?;

    write_file(root, POM_PATH, &render_pom(inputs)?)?;
    write_file(root, APPLICATION_PROPERTIES_PATH, &properties)?;
    write_file(root, CI_PATH, &ci)?;

    let gitignore = merge_gitignore(read_optional(&root.join(GITIGNORE_PATH))?.as_deref());
    write_file(root, GITIGNORE_PATH, &gitignore)?;

    let readme = update_readme(
        read_optional(&root.join(README_PATH))?.as_deref(),
        &inputs.project_name,
        &inputs.summary,
    );
    write_file(root, README_PATH, &readme)?;

    Ok([
        POM_PATH,
        APPLICATION_PROPERTIES_PATH,
        CI_PATH,
        GITIGNORE_PATH,
        README_PATH,
    ]
    .map(str::to_string)
    .to_vec())
}

/// Existing `.gitignore` with the scaffold entries appended where missing.
pub fn merge_gitignore(existing: Option<&str>) -> String {
    let Some(existing) = existing else {
        return GITIGNORE.to_string();
    };
    let mut out = existing.to_string();
    for entry in GITIGNORE.lines().filter(|l| !l.trim().is_empty()) {
        if existing.lines().any(|l| l.trim() == entry) {
            continue;
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(entry);
        out.push('\n');
    }
    out
}

/// Delete previously generated paths so the new branch starts clean.
///
/// Failures are logged and otherwise ignored.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn clean_generated_paths(root: &Path) {
    for relative in GENERATED_PATHS {
        let path = root.join(relative);
        let result = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(_) => continue,
        };
        match result {
            Ok(()) => debug!(path = relative, "removed generated path"),
            Err(err) => warn!(path = relative, err = %err, "could not remove generated path"),
        }
    }
}

/// Changelog text with `body` inserted as the newest entry.
pub fn prepend_changelog(existing: Option<&str>, heading: &str, body: &str) -> String {
    let entry = format!("## {heading}\n\n{}\n", body.trim());
    let older = existing
        .map(|text| {
            text.trim_start()
                .strip_prefix(CHANGELOG_HEADER)
                .unwrap_or(text)
                .trim()
        })
        .unwrap_or("");
    if older.is_empty() {
        format!("{CHANGELOG_HEADER}\n\n{entry}")
    } else {
        format!("{CHANGELOG_HEADER}\n\n{entry}\n{older}\n")
    }
}

/// Add a changelog entry to `CHANGELOG.md` under `root`.
pub fn write_changelog_entry(root: &Path, heading: &str, body: &str) -> Result<()> {
    let existing = read_optional(&root.join(CHANGELOG_PATH))?;
    let updated = prepend_changelog(existing.as_deref(), heading, body);
    write_file(root, CHANGELOG_PATH, &updated)
}

/// Render the failure report committed on the build-failure path.
pub fn render_failure_analysis(branch: &str, analysis: &str, transcript: &str) -> String {
    let lines: Vec<&str> = transcript.lines().collect();
    let tail = &lines[lines.len().saturating_sub(TRANSCRIPT_TAIL_LINES)..];
    format!(
        "# Build failure analysis\n\nBranch: `{branch}`\n\n## Root cause\n\n{}\n\n## Build output (last {} lines)\n\n```text\n{}\n```\n",
        analysis.trim(),
        tail.len(),
        tail.join("\n"),
    )
}

pub fn write_failure_analysis(
    root: &Path,
    branch: &str,
    analysis: &str,
    transcript: &str,
) -> Result<()> {
    write_file(
        root,
        FAILURE_ANALYSIS_PATH,
        &render_failure_analysis(branch, analysis, transcript),
    )
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .with_context(|| format!("read {}", path.display()))
}

fn write_file(root: &Path, relative: &str, contents: &str) -> Result<()> {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    debug!(path = relative, bytes = contents.len(), "wrote scaffold file");
    Ok(())
}
