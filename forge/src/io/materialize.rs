//! Writes generated file artifacts into the checkout.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::types::FileArtifact;
use crate::error::MaterializationError;

/// Which artifacts made it to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub written: Vec<String>,
    pub failed: Vec<String>,
}

/// Write each artifact under `root`, creating parent directories.
///
/// Artifacts are written in order, so a later duplicate path wins. A failing
/// artifact is logged and skipped; it never stops the others.
#[instrument(skip_all, fields(root = %root.display(), artifacts = artifacts.len()))]
pub fn write_artifacts(root: &Path, artifacts: &[FileArtifact]) -> MaterializeReport {
    let mut report = MaterializeReport::default();
    for artifact in artifacts {
        match write_artifact(root, artifact) {
            Ok(path) => {
                debug!(path = %path.display(), bytes = artifact.content.len(), "wrote artifact");
                if !report.written.contains(&artifact.relative_path) {
                    report.written.push(artifact.relative_path.clone());
                }
            }
            Err(err) => {
                warn!(err = %err, "skipping artifact");
                report.failed.push(artifact.relative_path.clone());
            }
        }
    }
    report
}

fn write_artifact(root: &Path, artifact: &FileArtifact) -> Result<PathBuf, MaterializationError> {
    let fail = |reason: String| MaterializationError {
        path: artifact.relative_path.clone(),
        reason,
    };
    let relative = checked_relative_path(&artifact.relative_path).map_err(fail)?;
    let target = root.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| fail(format!("create {}: {e}", parent.display())))?;
    }
    fs::write(&target, &artifact.content)
        .map_err(|e| fail(format!("write {}: {e}", target.display())))?;
    Ok(target)
}

fn checked_relative_path(raw: &str) -> Result<&Path, String> {
    let path = Path::new(raw);
    if raw.trim().is_empty() {
        return Err("empty path".to_string());
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err("path escapes the repository".to_string()),
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute paths are not allowed".to_string());
            }
        }
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(path: &str, content: &str) -> FileArtifact {
        FileArtifact {
            relative_path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn writes_nested_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = write_artifacts(
            temp.path(),
            &[artifact(
                "src/main/java/com/example/App.java",
                "class App {}\n",
            )],
        );
        assert_eq!(report.written, vec!["src/main/java/com/example/App.java"]);
        assert!(report.failed.is_empty());
        let written = fs::read_to_string(temp.path().join("src/main/java/com/example/App.java"))
            .expect("read");
        assert_eq!(written, "class App {}\n");
    }

    #[test]
    fn rejects_escaping_and_absolute_paths_but_keeps_going() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).expect("mkdir");
        let report = write_artifacts(
            &root,
            &[
                artifact("../outside.txt", "x"),
                artifact("/etc/forge-test", "x"),
                artifact("ok.txt", "ok"),
            ],
        );
        assert_eq!(report.failed, vec!["../outside.txt", "/etc/forge-test"]);
        assert_eq!(report.written, vec!["ok.txt"]);
        assert!(!temp.path().join("outside.txt").exists());
    }

    #[test]
    fn later_duplicate_wins() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = write_artifacts(
            temp.path(),
            &[artifact("a.txt", "first"), artifact("a.txt", "second")],
        );
        assert_eq!(report.written, vec!["a.txt"]);
        assert_eq!(
            fs::read_to_string(temp.path().join("a.txt")).expect("read"),
            "second"
        );
    }
}
