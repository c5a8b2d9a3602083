//! Multi-file text protocol: `// File: <relative/path>` units.
//!
//! Each marker line starts a unit that runs until the next marker or the end
//! of the text. Text before the first marker is ignored.

use std::sync::LazyLock;

use regex::Regex;

use super::types::FileArtifact;

static FILE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*//[ \t]*File:[ \t]*(.*?)[ \t]*\r?$").expect("file marker regex")
});

static FENCE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+.\-]*").expect("fence token regex"));

/// Split generated text into file artifacts, in marker order.
///
/// Duplicate paths are all returned; the writer applies last-write-wins. A
/// marker with an empty path still ends the previous unit but yields nothing.
pub fn parse_file_blocks(text: &str) -> Vec<FileArtifact> {
    let markers: Vec<_> = FILE_MARKER_RE.captures_iter(text).collect();
    let mut artifacts = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let whole = caps.get(0).expect("match");
        let path = caps.get(1).map_or("", |m| m.as_str()).trim();
        let start = body_start(text, whole.end());
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        if path.is_empty() {
            continue;
        }
        artifacts.push(FileArtifact {
            relative_path: path.to_string(),
            content: strip_fences(&text[start..end.max(start)]),
        });
    }

    artifacts
}

/// Remove the markdown code-fence lines wrapping a unit body.
///
/// Only the first and last non-blank lines are candidates, so fences inside
/// the file itself (a generated README, say) survive. Falls back to removing
/// fence tokens in place when dropping whole lines would leave nothing (e.g.
/// a single-line fenced body).
pub fn strip_fences(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let mut start = lines
        .iter()
        .position(|line| !line.trim().is_empty())
        .unwrap_or(lines.len());
    let mut end = lines
        .iter()
        .rposition(|line| !line.trim().is_empty())
        .map_or(start, |i| i + 1);
    if start < end && is_fence(lines[start]) {
        start += 1;
    }
    if start < end && is_fence(lines[end - 1]) {
        end -= 1;
    }
    let joined = lines[start..end.max(start)].join("\n");
    let body = if joined.trim().is_empty() {
        FENCE_TOKEN_RE.replace_all(raw, "").trim().to_string()
    } else {
        joined
    };
    normalize(&body)
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn body_start(text: &str, marker_end: usize) -> usize {
    match text[marker_end..].find('\n') {
        Some(offset) => marker_end + offset + 1,
        None => text.len(),
    }
}

fn normalize(body: &str) -> String {
    let trimmed = body.trim_start_matches(['\n', '\r']).trim_end();
    if trimmed.trim().is_empty() {
        return String::new();
    }
    let mut out = trimmed.to_string();
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_one_artifact_per_marker() {
        let text = "\
Here is the code.
// File: src/main/java/com/acme/Item.java
```java
package com.acme;

public class Item {}
```
// File: src/main/java/com/acme/ItemController.java
```java
package com.acme;
```
";
        let artifacts = parse_file_blocks(text);
        assert_eq!(artifacts.len(), 2);
        assert_eq!(
            artifacts[0].relative_path,
            "src/main/java/com/acme/Item.java"
        );
        assert_eq!(
            artifacts[0].content,
            "package com.acme;\n\npublic class Item {}\n"
        );
        assert_eq!(artifacts[1].content, "package com.acme;\n");
    }

    #[test]
    fn trailing_unit_runs_to_end_of_text() {
        let text = "// File: a.txt\nfirst\n// File: b.txt\nsecond\nstill second";
        let artifacts = parse_file_blocks(text);
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[1].relative_path, "b.txt");
        assert_eq!(artifacts[1].content, "second\nstill second\n");
    }

    #[test]
    fn no_markers_yields_nothing() {
        assert!(parse_file_blocks("just prose\n```java\nclass A {}\n```\n").is_empty());
    }

    #[test]
    fn path_is_trimmed_and_duplicates_are_kept() {
        let text = "  //  File:   pom.xml   \none\n// File: pom.xml\ntwo\n";
        let artifacts = parse_file_blocks(text);
        assert_eq!(artifacts.len(), 2);
        assert!(artifacts.iter().all(|a| a.relative_path == "pom.xml"));
        assert_eq!(artifacts[1].content, "two\n");
    }

    #[test]
    fn marker_without_body_yields_empty_artifact() {
        let artifacts = parse_file_blocks("// File: empty.txt");
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].content, "");
    }

    #[test]
    fn single_line_fence_falls_back_to_token_removal() {
        assert_eq!(strip_fences("```java class A {}```"), "class A {}\n");
    }

    #[test]
    fn inner_fences_survive_wrapper_removal() {
        let text = "// File: README.md\n```markdown\n# Items\n\n```sh\nmvn -B verify\n```\n\nDone.\n```\n";
        let artifacts = parse_file_blocks(text);
        assert_eq!(
            artifacts[0].content,
            "# Items\n\n```sh\nmvn -B verify\n```\n\nDone.\n"
        );
    }

    #[test]
    fn unfenced_content_is_untouched() {
        assert_eq!(strip_fences("\nline one\n  line two\n\n"), "line one\n  line two\n");
    }
}
