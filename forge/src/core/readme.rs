//! Idempotent README summary block.
//!
//! The block between [`SUMMARY_START`] and [`SUMMARY_END`] belongs to the
//! pipeline. Everything outside it belongs to humans and is preserved
//! byte-for-byte.

pub const SUMMARY_START: &str = "<!-- forge:summary:start -->";
pub const SUMMARY_END: &str = "<!-- forge:summary:end -->";

/// Render the managed block, markers included.
///
/// Marker text inside `summary` is dropped so the block stays delimited by
/// exactly one start and one end marker.
pub fn render_summary_block(summary: &str) -> String {
    let summary = summary.replace(SUMMARY_START, "").replace(SUMMARY_END, "");
    format!(
        "{SUMMARY_START}\n## Generated service summary\n\n{}\n{SUMMARY_END}",
        summary.trim()
    )
}

/// Compute the new README contents.
///
/// - `existing == None`: full default document containing the block.
/// - both markers present (start before end): replace only the block.
/// - otherwise: prepend the block to the existing text.
pub fn update_readme(existing: Option<&str>, project_name: &str, summary: &str) -> String {
    let block = render_summary_block(summary);
    let Some(existing) = existing else {
        return default_readme(project_name, &block);
    };

    if let Some(start) = existing.find(SUMMARY_START)
        && let Some(end_rel) = existing[start..].find(SUMMARY_END)
    {
        let end = start + end_rel + SUMMARY_END.len();
        let mut out = String::with_capacity(existing.len() + block.len());
        out.push_str(&existing[..start]);
        out.push_str(&block);
        out.push_str(&existing[end..]);
        return out;
    }

    format!("{block}\n\n{existing}")
}

fn default_readme(project_name: &str, block: &str) -> String {
    format!(
        "# {project_name}\n\n{block}\n\n## Building\n\n```sh\nmvn -B verify\n```\n\n\
         Notes outside the summary markers are kept across regenerations.\n"
    )
}
