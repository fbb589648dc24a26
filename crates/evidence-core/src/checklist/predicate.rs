//! Closed set of predicate kinds a checklist rule can evaluate.
//!
//! Predicates are data: templates stay serializable and composable, and every
//! verdict is explained by the evidence lines the predicate collected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checklist::evidence::{flatten_keys, BundleEvidence};
use crate::layout::EXTRAS_DIR;
use crate::lineage::{LineageGraph, NodeVariant};

/// Tri-state predicate outcome before severity is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Satisfaction {
    Satisfied,
    Unsatisfied,
    /// The evidence needed to decide is absent or cannot be machine-checked.
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub satisfaction: Satisfaction,
    pub explanation: String,
    pub evidence: Vec<String>,
}

impl Outcome {
    fn new(satisfaction: Satisfaction, explanation: impl Into<String>, evidence: Vec<String>) -> Self {
        Self {
            satisfaction,
            explanation: explanation.into(),
            evidence,
        }
    }

    fn satisfied(explanation: impl Into<String>, evidence: Vec<String>) -> Self {
        Self::new(Satisfaction::Satisfied, explanation, evidence)
    }

    fn unsatisfied(explanation: impl Into<String>, evidence: Vec<String>) -> Self {
        Self::new(Satisfaction::Unsatisfied, explanation, evidence)
    }

    fn inconclusive(explanation: impl Into<String>) -> Self {
        Self::new(Satisfaction::Inconclusive, explanation, Vec::new())
    }
}

/// Dataset provenance fields a rule can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetField {
    Version,
    SourceUrl,
    Checksum,
    License,
}

impl DatasetField {
    pub fn key(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::SourceUrl => "source_url",
            Self::Checksum => "checksum",
            Self::License => "license",
        }
    }
}

/// Quantities a `count_at_least` rule can threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMetric {
    Decisions,
    Models,
    Datasets,
    LineageNodes,
    LineageEdges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Every listed bundle-relative path exists as a regular file.
    FilePresent { paths: Vec<String> },
    /// The lineage graph has at least one node of each listed variant.
    NodeVariantsPresent { variants: Vec<NodeVariant> },
    /// Every recorded dataset carries each listed field.
    DatasetFieldsPresent { fields: Vec<DatasetField> },
    /// No decision was recorded without model provenance.
    ModelProvenanceComplete,
    /// Every recorded model carries a version.
    ModelVersionsPresent,
    /// The checksum manifest verifies cleanly.
    VerificationOk,
    CountAtLeast { metric: CountMetric, min: u64 },
    /// Top-level `manifest.json` fields are present and non-null.
    ManifestFieldsPresent { fields: Vec<String> },
    LineageAcyclic,
    /// Neither build nor provenance warnings were recorded.
    NoBundleWarnings,
    /// Git facts show a committed, clean source tree.
    ExecutionProvenanceReproducible,
    /// Some bundle file or lineage artifact name contains one of the tokens.
    ArtifactNameMatches { tokens: Vec<String> },
    /// A supplied extra artifact is named after the topic.
    Attestation { topic: String },
    /// The campaign run states a non-empty `objective`.
    ObjectiveDefined,
    /// At least one tool call carries a recorded output.
    ToolResultsPresent,
    /// Some key path in the tool outputs contains one of the tokens.
    FieldKeysMatch { tokens: Vec<String> },
    /// Objective and planner text contain none of the phrases (case-insensitive).
    ProhibitedPhrases { phrases: Vec<String> },
    /// Manifest `decision_count` equals the record lines in `decisions.jsonl`.
    DecisionCountConsistent,
}

impl Predicate {
    pub fn evaluate(&self, evidence: &BundleEvidence) -> Outcome {
        match self {
            Self::FilePresent { paths } => file_present(evidence, paths),
            Self::NodeVariantsPresent { variants } => node_variants_present(evidence, variants),
            Self::DatasetFieldsPresent { fields } => dataset_fields_present(evidence, fields),
            Self::ModelProvenanceComplete => model_provenance_complete(evidence),
            Self::ModelVersionsPresent => model_versions_present(evidence),
            Self::VerificationOk => verification_ok(evidence),
            Self::CountAtLeast { metric, min } => count_at_least(evidence, *metric, *min),
            Self::ManifestFieldsPresent { fields } => manifest_fields_present(evidence, fields),
            Self::LineageAcyclic => lineage_acyclic(evidence),
            Self::NoBundleWarnings => no_bundle_warnings(evidence),
            Self::ExecutionProvenanceReproducible => execution_reproducible(evidence),
            Self::ArtifactNameMatches { tokens } => artifact_name_matches(evidence, tokens),
            Self::Attestation { topic } => attestation(evidence, topic),
            Self::ObjectiveDefined => objective_defined(evidence),
            Self::ToolResultsPresent => tool_results_present(evidence),
            Self::FieldKeysMatch { tokens } => field_keys_match(evidence, tokens),
            Self::ProhibitedPhrases { phrases } => prohibited_phrases(evidence, phrases),
            Self::DecisionCountConsistent => decision_count_consistent(evidence),
        }
    }
}

fn file_present(evidence: &BundleEvidence, paths: &[String]) -> Outcome {
    let missing: Vec<String> = paths
        .iter()
        .filter(|p| !evidence.bundle_dir.join(p.as_str()).is_file())
        .cloned()
        .collect();
    if missing.is_empty() {
        Outcome::satisfied("all required bundle files are present", paths.to_vec())
    } else {
        Outcome::unsatisfied("required bundle files are missing", missing)
    }
}

fn node_variants_present(evidence: &BundleEvidence, variants: &[NodeVariant]) -> Outcome {
    let Some(lineage) = &evidence.lineage else {
        return Outcome::unsatisfied("lineage.json is missing or unreadable", Vec::new());
    };
    let counts: Vec<(NodeVariant, usize)> = variants
        .iter()
        .map(|v| (*v, lineage.count_variant(*v)))
        .collect();
    let lines = counts.iter().map(|(v, n)| format!("{v}: {n}")).collect();
    let absent: Vec<String> = counts
        .iter()
        .filter(|(_, n)| *n == 0)
        .map(|(v, _)| v.to_string())
        .collect();
    if absent.is_empty() {
        Outcome::satisfied("lineage contains every required node variant", lines)
    } else {
        Outcome::unsatisfied(
            format!("lineage has no {} nodes", absent.join(", ")),
            lines,
        )
    }
}

fn non_empty_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn dataset_fields_present(evidence: &BundleEvidence, fields: &[DatasetField]) -> Outcome {
    let Some(datasets) = evidence.manifest_array("datasets") else {
        return Outcome::unsatisfied("manifest records no dataset provenance", Vec::new());
    };
    if datasets.is_empty() {
        return Outcome::unsatisfied("no dataset manifests were supplied", Vec::new());
    }
    let mut gaps = Vec::new();
    for dataset in datasets {
        let id = dataset
            .get("dataset_id")
            .and_then(Value::as_str)
            .unwrap_or("<unnamed>");
        for field in fields {
            if !non_empty_field(dataset, field.key()) {
                gaps.push(format!("{id}: missing {}", field.key()));
            }
        }
    }
    let names: Vec<&str> = fields.iter().map(|f| f.key()).collect();
    if gaps.is_empty() {
        Outcome::satisfied(
            format!("all {} datasets carry {}", datasets.len(), names.join(", ")),
            Vec::new(),
        )
    } else {
        Outcome::unsatisfied(
            format!("dataset provenance lacks {}", names.join(", ")),
            gaps,
        )
    }
}

fn model_provenance_complete(evidence: &BundleEvidence) -> Outcome {
    let Some(manifest) = &evidence.manifest else {
        return Outcome::inconclusive("manifest unavailable to inspect model provenance");
    };
    let incomplete: Vec<String> = manifest
        .get("provenance_warnings")
        .and_then(Value::as_array)
        .map(|ws| {
            ws.iter()
                .filter(|w| w.get("kind").and_then(Value::as_str) == Some("model_incomplete"))
                .map(|w| {
                    format!(
                        "decision {} has no model provenance",
                        w.get("sequence_index").map(Value::to_string).unwrap_or_default()
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    let models = evidence.manifest_array("models").map(Vec::len).unwrap_or(0);
    if !incomplete.is_empty() {
        Outcome::unsatisfied("some decisions lack model provenance", incomplete)
    } else if models == 0 {
        Outcome::inconclusive("no model provenance recorded for any decision")
    } else {
        Outcome::satisfied(
            format!("model provenance recorded for every decision ({models} models)"),
            Vec::new(),
        )
    }
}

fn model_versions_present(evidence: &BundleEvidence) -> Outcome {
    let Some(models) = evidence.manifest_array("models").filter(|m| !m.is_empty()) else {
        return Outcome::inconclusive("no models recorded; versions cannot be checked");
    };
    let unversioned: Vec<String> = models
        .iter()
        .filter(|m| !non_empty_field(m, "version"))
        .map(|m| {
            m.get("name")
                .and_then(Value::as_str)
                .unwrap_or("<unnamed>")
                .to_string()
        })
        .collect();
    if unversioned.is_empty() {
        Outcome::satisfied("every model carries a version", Vec::new())
    } else {
        Outcome::unsatisfied("models without a version", unversioned)
    }
}

fn verification_ok(evidence: &BundleEvidence) -> Outcome {
    let Some(result) = &evidence.verification else {
        return Outcome::unsatisfied("checksums.sha256 is missing", Vec::new());
    };
    if result.ok {
        return Outcome::satisfied(
            format!("{} files verified against checksums.sha256", result.checked_files),
            Vec::new(),
        );
    }
    let mut lines = Vec::new();
    lines.extend(result.missing.iter().map(|p| format!("missing: {p}")));
    lines.extend(result.extra.iter().map(|p| format!("extra: {p}")));
    lines.extend(
        result
            .mismatched
            .iter()
            .map(|m| format!("mismatched: {}", m.relative_path)),
    );
    lines.extend(
        result
            .malformed
            .iter()
            .map(|m| format!("malformed line {}: {}", m.line_number, m.reason)),
    );
    Outcome::unsatisfied("bundle integrity verification failed", lines)
}

fn count_at_least(evidence: &BundleEvidence, metric: CountMetric, min: u64) -> Outcome {
    let count = match metric {
        CountMetric::Decisions => Some(evidence.decisions.len()),
        CountMetric::Models => evidence.manifest_array("models").map(Vec::len),
        CountMetric::Datasets => evidence.manifest_array("datasets").map(Vec::len),
        CountMetric::LineageNodes => evidence.lineage.as_ref().map(|l| l.nodes.len()),
        CountMetric::LineageEdges => evidence.lineage.as_ref().map(|l| l.edges.len()),
    };
    let label = serde_json::to_value(metric)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    match count {
        Some(n) if n as u64 >= min => {
            Outcome::satisfied(format!("{label} = {n} (>= {min})"), Vec::new())
        }
        Some(n) => Outcome::unsatisfied(format!("{label} = {n} (< {min})"), Vec::new()),
        None => Outcome::unsatisfied(format!("{label} could not be counted"), Vec::new()),
    }
}

fn manifest_fields_present(evidence: &BundleEvidence, fields: &[String]) -> Outcome {
    let Some(manifest) = &evidence.manifest else {
        return Outcome::unsatisfied("manifest.json is missing or unreadable", Vec::new());
    };
    let missing: Vec<String> = fields
        .iter()
        .filter(|f| manifest.get(f.as_str()).map_or(true, Value::is_null))
        .cloned()
        .collect();
    if missing.is_empty() {
        Outcome::satisfied("manifest carries all identifiers", fields.to_vec())
    } else {
        Outcome::unsatisfied("manifest is missing identifiers", missing)
    }
}

fn lineage_acyclic(evidence: &BundleEvidence) -> Outcome {
    let Some(lineage) = &evidence.lineage else {
        return Outcome::unsatisfied("lineage.json is missing or unreadable", Vec::new());
    };
    match LineageGraph::from_document(lineage).and_then(|g| g.check_acyclic()) {
        Ok(()) => Outcome::satisfied(
            format!(
                "{} nodes, {} edges, no cycle",
                lineage.nodes.len(),
                lineage.edges.len()
            ),
            Vec::new(),
        ),
        Err(e) => Outcome::unsatisfied("lineage graph is not a DAG", vec![e.to_string()]),
    }
}

fn no_bundle_warnings(evidence: &BundleEvidence) -> Outcome {
    let Some(manifest) = &evidence.manifest else {
        return Outcome::inconclusive("manifest unavailable to inspect warnings");
    };
    let mut lines: Vec<String> = manifest
        .get("warnings")
        .and_then(Value::as_array)
        .map(|ws| ws.iter().map(display_json).collect())
        .unwrap_or_default();
    if let Some(ws) = manifest.get("provenance_warnings").and_then(Value::as_array) {
        lines.extend(ws.iter().map(display_json));
    }
    if lines.is_empty() {
        Outcome::satisfied("no bundle warnings were recorded", Vec::new())
    } else {
        Outcome::unsatisfied("bundle warnings require reviewer disposition", lines)
    }
}

fn display_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn execution_reproducible(evidence: &BundleEvidence) -> Outcome {
    let Some(git) = evidence
        .manifest
        .as_ref()
        .and_then(|m| m.get("execution_provenance"))
        .and_then(|e| e.get("git"))
    else {
        return Outcome::inconclusive("execution provenance was not recorded");
    };
    if git.get("available").and_then(Value::as_bool) != Some(true) {
        return Outcome::inconclusive("source tree was not under git; revision unknown");
    }
    let commit = git
        .get("commit")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match git.get("dirty").and_then(Value::as_bool) {
        Some(false) => Outcome::satisfied("built from a clean, committed tree", vec![commit]),
        Some(true) => Outcome::unsatisfied("built from a tree with uncommitted changes", vec![commit]),
        None => Outcome::inconclusive("work-tree state unknown"),
    }
}

fn artifact_name_matches(evidence: &BundleEvidence, tokens: &[String]) -> Outcome {
    let lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
    let mut names: Vec<String> = evidence.listed_files().to_vec();
    if let Some(lineage) = &evidence.lineage {
        names.extend(lineage.nodes.iter().filter_map(|n| match &n.kind {
            crate::lineage::NodeKind::Artifact { name, .. } => Some(name.clone()),
            _ => None,
        }));
    }
    let matched: Vec<String> = names
        .into_iter()
        .filter(|name| {
            let name = name.to_lowercase();
            lowered.iter().any(|t| name.contains(t.as_str()))
        })
        .collect();
    if matched.is_empty() {
        Outcome::inconclusive(format!("no artifact named after any of: {}", tokens.join(", ")))
    } else {
        Outcome::satisfied("linked artifacts found", matched)
    }
}

fn attestation(evidence: &BundleEvidence, topic: &str) -> Outcome {
    let needle = topic.to_lowercase();
    let found: Vec<String> = evidence
        .listed_files()
        .iter()
        .filter(|p| {
            p.strip_prefix(EXTRAS_DIR)
                .is_some_and(|rest| rest.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect();
    if found.is_empty() {
        Outcome::inconclusive(format!("no attestation for '{topic}' attached; reviewer sign-off needed"))
    } else {
        Outcome::satisfied(format!("attestation for '{topic}' attached"), found)
    }
}

fn objective_defined(evidence: &BundleEvidence) -> Outcome {
    if evidence.campaign_run.is_none() {
        return Outcome::inconclusive("campaign run is missing or unreadable");
    }
    match evidence.run_text("objective") {
        Some(objective) => Outcome::satisfied("campaign objective is stated", vec![objective.to_string()]),
        None => Outcome::unsatisfied("campaign run states no objective", Vec::new()),
    }
}

fn tool_results_present(evidence: &BundleEvidence) -> Outcome {
    match evidence.tool_outputs().len() {
        0 => Outcome::inconclusive("no tool outputs recorded (dry run or outputs not captured)"),
        n => Outcome::satisfied(format!("{n} tool outputs recorded"), Vec::new()),
    }
}

fn field_keys_match(evidence: &BundleEvidence, tokens: &[String]) -> Outcome {
    let outputs = evidence.tool_outputs();
    if outputs.is_empty() {
        return Outcome::inconclusive("no tool outputs to inspect");
    }
    let keys: Vec<String> = outputs.into_iter().flat_map(flatten_keys).collect();
    let mut matched: Vec<String> = tokens
        .iter()
        .map(|t| t.to_lowercase())
        .filter(|t| keys.iter().any(|k| k.contains(t.as_str())))
        .collect();
    matched.sort();
    matched.dedup();
    if matched.is_empty() {
        Outcome::unsatisfied(
            format!("no output field named after any of: {}", tokens.join(", ")),
            Vec::new(),
        )
    } else {
        Outcome::satisfied("tool outputs carry the expected fields", matched)
    }
}

fn prohibited_phrases(evidence: &BundleEvidence, phrases: &[String]) -> Outcome {
    if evidence.campaign_run.is_none() {
        return Outcome::inconclusive("campaign run is missing or unreadable");
    }
    let text = ["objective", "planner_response_text"]
        .iter()
        .filter_map(|key| evidence.run_text(key))
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();
    let found: Vec<String> = phrases
        .iter()
        .filter(|p| text.contains(p.to_lowercase().as_str()))
        .cloned()
        .collect();
    if found.is_empty() {
        Outcome::satisfied("no prohibited claims in objective or planner text", Vec::new())
    } else {
        Outcome::unsatisfied("prohibited claim language found", found)
    }
}

fn decision_count_consistent(evidence: &BundleEvidence) -> Outcome {
    let declared = evidence
        .manifest
        .as_ref()
        .and_then(|m| m.get("decision_count"))
        .and_then(Value::as_u64);
    match (declared, evidence.decision_lines) {
        (None, _) => Outcome::unsatisfied("manifest declares no decision_count", Vec::new()),
        (_, None) => Outcome::unsatisfied("decisions.jsonl is missing or unreadable", Vec::new()),
        (Some(declared), Some(lines)) if declared == lines as u64 => Outcome::satisfied(
            format!("{lines} decision records match the manifest"),
            Vec::new(),
        ),
        (Some(declared), Some(lines)) => Outcome::unsatisfied(
            "decision count mismatch",
            vec![format!("manifest={declared}, decisions.jsonl={lines}")],
        ),
    }
}
