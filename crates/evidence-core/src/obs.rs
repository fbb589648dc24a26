//! Structured observability hooks for the bundle lifecycle.
//!
//! Events are emitted at `info!` level unless noted; filter with `RUST_LOG`.

use std::path::Path;

use tracing::{info, warn};

use crate::domain::provenance::ProvenanceWarning;
use crate::verify::VerificationResult;

/// RAII guard that enters a span tagged with the campaign run id.
///
/// ```ignore
/// let _span = BundleSpan::enter("run-12345");
/// // every event below carries campaign_run_id = "run-12345"
/// ```
pub struct BundleSpan {
    _span: tracing::span::EnteredSpan,
}

impl BundleSpan {
    pub fn enter(campaign_run_id: &str) -> Self {
        let span = tracing::info_span!("evidence.bundle", campaign_run_id = %campaign_run_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_build_started(campaign_run_id: &str, decision_events: usize, output_dir: &Path) {
    info!(
        event = "bundle.build_started",
        campaign_run_id = %campaign_run_id,
        decision_events = decision_events,
        output_dir = %output_dir.display(),
    );
}

/// Emit event: one in-memory or on-disk pipeline stage completed.
pub fn emit_stage_completed(stage: &str, items: usize) {
    info!(event = "bundle.stage_completed", stage = %stage, items = items);
}

/// Emit event: provenance gap recorded (warning level).
pub fn emit_provenance_incomplete(warning: &ProvenanceWarning) {
    warn!(event = "provenance.incomplete", detail = %warning);
}

pub fn emit_bundle_written(bundle_id: &str, output_dir: &Path, files: usize) {
    info!(
        event = "bundle.written",
        bundle_id = %bundle_id,
        output_dir = %output_dir.display(),
        files = files,
    );
}

pub fn emit_verify_completed(bundle_dir: &Path, result: &VerificationResult) {
    info!(
        event = "verify.completed",
        bundle_dir = %bundle_dir.display(),
        ok = result.ok,
        checked_files = result.checked_files,
        missing = result.missing.len(),
        extra = result.extra.len(),
        mismatched = result.mismatched.len(),
        malformed = result.malformed.len(),
    );
}

/// Emit event: checklist template evaluated with aggregate verdict.
pub fn emit_checklist_evaluated(
    template: &str,
    passed: bool,
    failed: usize,
    manual_review: usize,
    strict: bool,
) {
    info!(
        event = "checklist.evaluated",
        template = %template,
        passed = passed,
        failed = failed,
        manual_review = manual_review,
        strict = strict,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_span_create() {
        let _span = BundleSpan::enter("test-run-id");
        emit_stage_completed("extract", 0);
    }
}
