//! Static, versioned template catalog.
//!
//! `comprehensive` is a closed superset of `core`, and `submission` of
//! `comprehensive`. Composition is declared here, never computed from input.

use crate::checklist::predicate::{CountMetric, DatasetField, Predicate};
use crate::checklist::{ChecklistRule, ChecklistTemplate, Severity};
use crate::domain::error::{EvidenceError, Result};
use crate::layout::REQUIRED_FILES;
use crate::lineage::NodeVariant;

pub const CORE: &str = "core";
pub const COMPREHENSIVE: &str = "comprehensive";
pub const SUBMISSION: &str = "submission";

const TEMPLATE_VERSION: &str = "1.1.0";

const PROHIBITED_CLAIMS: [&str; 5] = [
    "guaranteed cure",
    "guaranteed remission",
    "proven cure",
    "certain cure",
    "eradicate all disease",
];

fn rule(rule_id: &str, description: &str, severity: Severity, predicate: Predicate) -> ChecklistRule {
    ChecklistRule {
        rule_id: rule_id.to_string(),
        description: description.to_string(),
        severity,
        predicate,
    }
}

fn attestation(rule_id: &str, description: &str) -> ChecklistRule {
    rule(
        rule_id,
        description,
        Severity::ManualReview,
        Predicate::Attestation {
            topic: rule_id.to_string(),
        },
    )
}

fn core_rules() -> Vec<ChecklistRule> {
    use Severity::{ManualReview, Required};
    vec![
        rule(
            "bundle_structure",
            "Required bundle files are present",
            Required,
            Predicate::FilePresent {
                paths: REQUIRED_FILES.iter().map(|p| p.to_string()).collect(),
            },
        ),
        rule(
            "integrity_verification",
            "Every bundle file matches checksums.sha256",
            Required,
            Predicate::VerificationOk,
        ),
        rule(
            "decisions_recorded",
            "At least one decision record was extracted",
            Required,
            Predicate::CountAtLeast {
                metric: CountMetric::Decisions,
                min: 1,
            },
        ),
        rule(
            "decision_count_consistent",
            "Manifest decision_count matches decisions.jsonl",
            Required,
            Predicate::DecisionCountConsistent,
        ),
        rule(
            "traceability_lineage",
            "Lineage links plans, decisions and tool calls",
            Required,
            Predicate::NodeVariantsPresent {
                variants: vec![NodeVariant::Plan, NodeVariant::Decision, NodeVariant::ToolCall],
            },
        ),
        rule(
            "lineage_acyclic",
            "Lineage graph is a DAG",
            Required,
            Predicate::LineageAcyclic,
        ),
        rule(
            "dataset_lineage_present",
            "Consumed datasets appear in lineage",
            Required,
            Predicate::NodeVariantsPresent {
                variants: vec![NodeVariant::Dataset],
            },
        ),
        rule(
            "dataset_checksum_and_source",
            "Every dataset declares a checksum and source URL",
            Required,
            Predicate::DatasetFieldsPresent {
                fields: vec![DatasetField::Checksum, DatasetField::SourceUrl],
            },
        ),
        rule(
            "reproducibility_identifiers",
            "Manifest carries the identifiers needed to reproduce the build",
            Required,
            Predicate::ManifestFieldsPresent {
                fields: [
                    "bundle_id",
                    "campaign_run_id",
                    "created_at",
                    "build_nonce",
                    "source_rel_path",
                    "decision_count",
                ]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            },
        ),
        rule(
            "model_provenance_complete",
            "Every decision has model provenance",
            ManualReview,
            Predicate::ModelProvenanceComplete,
        ),
        rule(
            "model_versions_present",
            "Every model used carries a version",
            ManualReview,
            Predicate::ModelVersionsPresent,
        ),
    ]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn comprehensive_rules() -> Vec<ChecklistRule> {
    use Severity::{ManualReview, Required};
    let mut rules = core_rules();
    rules.extend([
        rule(
            "objective_defined",
            "Campaign objective is explicitly stated",
            ManualReview,
            Predicate::ObjectiveDefined,
        ),
        rule(
            "tool_results_present",
            "Tool execution outputs are recorded",
            ManualReview,
            Predicate::ToolResultsPresent,
        ),
        rule(
            "uncertainty_reporting",
            "Tool outputs report confidence or uncertainty",
            ManualReview,
            Predicate::FieldKeysMatch {
                tokens: strings(&[
                    "binding_probability",
                    "confidence",
                    "uncertainty",
                    "ci_low",
                    "ci_high",
                    "warnings",
                ]),
            },
        ),
        rule(
            "safety_signal_capture",
            "Tool outputs capture safety signals",
            ManualReview,
            Predicate::FieldKeysMatch {
                tokens: strings(&[
                    "admet",
                    "tox",
                    "herg",
                    "ames",
                    "warning",
                    "assessment",
                    "safety",
                ]),
            },
        ),
        rule(
            "no_prohibited_claims",
            "Objective and planner text make no absolute efficacy claims",
            Required,
            Predicate::ProhibitedPhrases {
                phrases: strings(&PROHIBITED_CLAIMS),
            },
        ),
        rule(
            "reproducibility_completeness",
            "Bundle was built from a clean, committed source tree",
            ManualReview,
            Predicate::ExecutionProvenanceReproducible,
        ),
        rule(
            "dataset_license_present",
            "Every dataset declares a license",
            ManualReview,
            Predicate::DatasetFieldsPresent {
                fields: vec![DatasetField::License],
            },
        ),
        rule(
            "warnings_dispositioned",
            "No unreviewed build or provenance warnings",
            ManualReview,
            Predicate::NoBundleWarnings,
        ),
        rule(
            "artifact_lineage",
            "Produced artifacts are linked into lineage",
            ManualReview,
            Predicate::NodeVariantsPresent {
                variants: vec![NodeVariant::Artifact],
            },
        ),
        rule(
            "benchmark_evidence_linkage",
            "Benchmark or regression evidence is attached",
            ManualReview,
            Predicate::ArtifactNameMatches {
                tokens: strings(&["benchmark", "baseline", "compare", "gate", "validation"]),
            },
        ),
        attestation("assay_strategy", "Assay strategy and endpoints are documented"),
        attestation(
            "experimental_controls",
            "Experimental controls and replication are documented",
        ),
        attestation("change_control", "Model and data change-control approvals are documented"),
        attestation("human_data_governance", "Human-data governance controls are documented"),
        attestation("translation_plan", "Translational PK/PD validation plan is documented"),
    ]);
    rules
}

fn submission_rules() -> Vec<ChecklistRule> {
    let mut rules = comprehensive_rules();
    rules.extend([
        attestation("submission_mapping", "Evidence artifacts are mapped to submission sections"),
        attestation("benefit_risk_narrative", "Benefit-risk narrative is documented"),
        attestation("gxp_readiness", "GxP readiness mapping is documented"),
    ]);
    rules
}

/// Template names, sorted.
pub fn available_templates() -> Vec<String> {
    let mut names = vec![
        CORE.to_string(),
        COMPREHENSIVE.to_string(),
        SUBMISSION.to_string(),
    ];
    names.sort();
    names
}

/// Look up a template by name.
pub fn template(name: &str) -> Result<ChecklistTemplate> {
    let (description, rules) = match name {
        CORE => ("Structural and integrity evidence for any campaign bundle", core_rules()),
        COMPREHENSIVE => (
            "Core plus reproducibility, dataset licensing and scientific attestations",
            comprehensive_rules(),
        ),
        SUBMISSION => (
            "Comprehensive plus regulatory submission attestations",
            submission_rules(),
        ),
        _ => {
            return Err(EvidenceError::UnknownTemplate {
                name: name.to_string(),
                available: available_templates(),
            })
        }
    };
    Ok(ChecklistTemplate {
        name: name.to_string(),
        version: TEMPLATE_VERSION.to_string(),
        description: description.to_string(),
        rules,
    })
}

/// Every template, sorted by name.
pub fn all_templates() -> Vec<ChecklistTemplate> {
    available_templates()
        .iter()
        .filter_map(|name| template(name).ok())
        .collect()
}
