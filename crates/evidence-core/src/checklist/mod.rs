//! Checklist evaluation engine.
//!
//! Each [`ChecklistRule`] evaluates one [`Predicate`] against materialized
//! [`BundleEvidence`] and yields exactly one [`Status`]. Severity decides how
//! an unsatisfied or inconclusive predicate is reported:
//!
//! | predicate     | `required` | `manual_review` |
//! |---------------|------------|-----------------|
//! | satisfied     | pass       | pass            |
//! | unsatisfied   | fail       | manual_review   |
//! | inconclusive  | fail       | manual_review   |
//!
//! Strict mode is applied afterwards to the aggregate only: `manual_review`
//! verdicts count as failures, but each rule keeps its reported status.

pub mod catalog;
pub mod evidence;
pub mod predicate;
pub mod render;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::Result;

pub use catalog::{all_templates, available_templates, template};
pub use evidence::BundleEvidence;
pub use predicate::{CountMetric, DatasetField, Outcome, Predicate, Satisfaction};
pub use render::{render_markdown, write_report};

pub const REPORT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Required,
    ManualReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pass,
    Fail,
    ManualReview,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::ManualReview => "manual_review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistRule {
    pub rule_id: String,
    pub description: String,
    pub severity: Severity,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistTemplate {
    pub name: String,
    pub version: String,
    pub description: String,
    pub rules: Vec<ChecklistRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub description: String,
    pub severity: Severity,
    pub status: Status,
    pub explanation: String,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistSummary {
    /// Aggregate verdict after strict mode is applied.
    pub passed: bool,
    pub passed_rules: usize,
    pub failed: usize,
    pub manual_review_count: usize,
    pub strict_applied: bool,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistReport {
    pub schema_version: String,
    pub template: String,
    pub template_version: String,
    pub bundle_id: Option<String>,
    pub campaign_run_id: Option<String>,
    pub generated_at: String,
    pub strict: bool,
    pub results: Vec<RuleResult>,
    pub summary: ChecklistSummary,
}

/// Evaluation settings threaded explicitly through a checklist run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistOptions {
    pub strict: bool,
    pub generated_at: DateTime<Utc>,
}

impl Default for ChecklistOptions {
    fn default() -> Self {
        Self {
            strict: false,
            generated_at: Utc::now(),
        }
    }
}

impl ChecklistOptions {
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_generated_at(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = generated_at;
        self
    }
}

/// Map a predicate outcome to a rule verdict.
pub fn evaluate_rule(rule: &ChecklistRule, evidence: &BundleEvidence) -> RuleResult {
    let outcome = rule.predicate.evaluate(evidence);
    let status = match (outcome.satisfaction, rule.severity) {
        (Satisfaction::Satisfied, _) => Status::Pass,
        (_, Severity::Required) => Status::Fail,
        (_, Severity::ManualReview) => Status::ManualReview,
    };
    RuleResult {
        rule_id: rule.rule_id.clone(),
        description: rule.description.clone(),
        severity: rule.severity,
        status,
        explanation: outcome.explanation,
        evidence: outcome.evidence,
    }
}

/// Aggregate per-rule results, applying strict mode to the verdict only.
pub fn summarize(results: &[RuleResult], strict: bool) -> ChecklistSummary {
    let count = |s: Status| results.iter().filter(|r| r.status == s).count();
    let failed = count(Status::Fail);
    let manual_review_count = count(Status::ManualReview);
    let passed = if strict {
        failed + manual_review_count == 0
    } else {
        failed == 0
    };
    ChecklistSummary {
        passed,
        passed_rules: count(Status::Pass),
        failed,
        manual_review_count,
        strict_applied: strict,
        total: results.len(),
    }
}

/// Evaluate every rule of a template. All rules run; nothing short-circuits.
pub fn evaluate_checklist(
    template: &ChecklistTemplate,
    evidence: &BundleEvidence,
    options: &ChecklistOptions,
) -> ChecklistReport {
    let results: Vec<RuleResult> = template
        .rules
        .iter()
        .map(|rule| evaluate_rule(rule, evidence))
        .collect();
    let summary = summarize(&results, options.strict);
    crate::obs::emit_checklist_evaluated(
        &template.name,
        summary.passed,
        summary.failed,
        summary.manual_review_count,
        options.strict,
    );
    ChecklistReport {
        schema_version: REPORT_SCHEMA_VERSION.to_string(),
        template: template.name.clone(),
        template_version: template.version.clone(),
        bundle_id: evidence.manifest_str("bundle_id").map(str::to_string),
        campaign_run_id: evidence.manifest_str("campaign_run_id").map(str::to_string),
        generated_at: options
            .generated_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        strict: options.strict,
        results,
        summary,
    }
}

/// Resolve the template, load the bundle's evidence and evaluate.
///
/// The template is resolved first so an unknown name fails before any I/O.
pub fn run_checklist(
    bundle_dir: &Path,
    template_name: &str,
    options: &ChecklistOptions,
) -> Result<ChecklistReport> {
    let template = catalog::template(template_name)?;
    let evidence = BundleEvidence::load(bundle_dir)?;
    for note in &evidence.notes {
        tracing::debug!(note = %note, "bundle evidence note");
    }
    Ok(evaluate_checklist(&template, &evidence, options))
}
