//! Checklist report rendering and output.

use std::path::{Path, PathBuf};

use crate::checklist::ChecklistReport;
use crate::checksum::write_atomic;
use crate::domain::error::Result;
use crate::layout::{checklist_paths, CHECKLISTS_DIR};

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Human-readable rendering of a report. Mirrors the JSON form.
pub fn render_markdown(report: &ChecklistReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Checklist: {} v{}\n\n",
        report.template, report.template_version
    ));
    out.push_str(&format!(
        "- bundle id: `{}`\n- campaign run id: `{}`\n- generated at: `{}`\n- strict: `{}`\n\n",
        report.bundle_id.as_deref().unwrap_or("<none>"),
        report.campaign_run_id.as_deref().unwrap_or("<none>"),
        report.generated_at,
        report.strict,
    ));

    let s = &report.summary;
    out.push_str("## Summary\n");
    out.push_str(&format!(
        "- verdict: **{}**\n- total: {}\n- passed: {}\n- failed: {}\n- manual review: {}\n\n",
        if s.passed { "PASSED" } else { "NOT PASSED" },
        s.total,
        s.passed_rules,
        s.failed,
        s.manual_review_count,
    ));

    out.push_str("## Rules\n\n");
    out.push_str("| Rule | Severity | Status | Explanation |\n");
    out.push_str("|---|---|---|---|\n");
    for r in &report.results {
        let severity = match r.severity {
            super::Severity::Required => "required",
            super::Severity::ManualReview => "manual_review",
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            r.rule_id,
            severity,
            r.status.as_str(),
            cell(&r.explanation)
        ));
    }

    let detailed: Vec<_> = report.results.iter().filter(|r| !r.evidence.is_empty()).collect();
    if !detailed.is_empty() {
        out.push_str("\n## Evidence\n");
        for r in detailed {
            out.push_str(&format!("\n### {}\n", r.rule_id));
            for line in &r.evidence {
                out.push_str(&format!("- `{}`\n", line));
            }
        }
    }
    out
}

/// Write `checklists/<template>.json` and `.md` under the bundle root.
///
/// Only the annotation area is touched; each file is replaced atomically.
pub fn write_report(bundle_dir: &Path, report: &ChecklistReport) -> Result<(PathBuf, PathBuf)> {
    let dir = bundle_dir.join(CHECKLISTS_DIR);
    std::fs::create_dir_all(&dir)?;
    let (json_rel, md_rel) = checklist_paths(&report.template);
    let json_path = bundle_dir.join(json_rel);
    let md_path = bundle_dir.join(md_rel);

    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    write_atomic(&dir, &json_path, json.as_bytes())?;
    write_atomic(&dir, &md_path, render_markdown(report).as_bytes())?;
    Ok((json_path, md_path))
}
