mod common;

use common::{read, Fixture, DATASET_SHA};
use evidence_core::layout::{CHECKSUMS_FILE, DECISIONS_FILE, LINEAGE_FILE, MANIFEST_FILE};
use evidence_core::{
    compute_entries, parse_checksums, read_manifest, summarize_bundle, DecisionRecord,
    LineageDocument, NodeVariant, Relation, RunFormat,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[test]
fn rebuilding_the_same_run_is_byte_identical() {
    let fx = Fixture::new();
    let a = fx.build("a");
    let b = evidence_core::build_bundle(&fx.config("b").with_build_nonce("nonce-2"))
        .expect("second build");

    for file in [DECISIONS_FILE, LINEAGE_FILE] {
        assert_eq!(
            read(&a.bundle_dir.join(file)),
            read(&b.bundle_dir.join(file)),
            "{file} differs between builds"
        );
    }
    assert_ne!(a.manifest.bundle_id, b.manifest.bundle_id);
    assert_eq!(a.manifest.campaign_run_id, b.manifest.campaign_run_id);
}

#[test]
fn decision_ids_do_not_depend_on_nonce_or_timestamp() {
    let fx = Fixture::new();
    let a = fx.build("a");
    let later = chrono::DateTime::parse_from_rfc3339("2030-06-01T12:00:00Z")
        .expect("ts")
        .with_timezone(&chrono::Utc);
    let b = evidence_core::build_bundle(
        &fx.config("b")
            .with_build_nonce("other")
            .with_build_timestamp(later),
    )
    .expect("build");
    let ids = |dir: &std::path::Path| -> Vec<String> {
        String::from_utf8(read(&dir.join(DECISIONS_FILE)))
            .expect("utf8")
            .lines()
            .map(|l| serde_json::from_str::<DecisionRecord>(l).expect("record").decision_id)
            .collect()
    };
    assert_eq!(ids(&a.bundle_dir), ids(&b.bundle_dir));
}

// ---------------------------------------------------------------------------
// Scenario: two decisions sharing one dataset
// ---------------------------------------------------------------------------

#[test]
fn scenario_bundle_shape() {
    let fx = Fixture::new();
    let report = fx.build("bundle");
    let root = &report.bundle_dir;

    let decisions = String::from_utf8(read(&root.join(DECISIONS_FILE))).expect("utf8");
    assert_eq!(decisions.lines().count(), 2);

    let lineage: LineageDocument =
        serde_json::from_slice(&read(&root.join(LINEAGE_FILE))).expect("lineage");
    assert_eq!(lineage.count_variant(NodeVariant::Dataset), 1);
    let dataset = lineage
        .nodes
        .iter()
        .find(|n| n.variant() == NodeVariant::Dataset)
        .expect("dataset node");
    assert_eq!(lineage.inbound(&dataset.node_id, Relation::Consumed), 2);
    assert_eq!(lineage.count_variant(NodeVariant::Decision), 2);
    assert_eq!(lineage.count_variant(NodeVariant::Plan), 1);
    assert_eq!(lineage.count_variant(NodeVariant::ToolCall), 2);
    assert_eq!(lineage.count_variant(NodeVariant::Artifact), 2);

    let checksums = String::from_utf8(read(&root.join(CHECKSUMS_FILE))).expect("utf8");
    let paths: Vec<&str> = checksums
        .lines()
        .map(|l| l.split_once("  ").expect("two-space separator").1)
        .collect();
    assert_eq!(
        paths,
        [
            "artifacts/campaign_run.json",
            "artifacts/data_manifests/manifest_001_chembl.json",
            "decisions.jsonl",
            "lineage.json",
            "manifest.json",
        ]
    );
    assert_eq!(compute_entries(root).expect("entries").len(), paths.len());
    assert!(parse_checksums(&checksums).malformed.is_empty());

    let manifest = read_manifest(root).expect("manifest");
    assert_eq!(manifest.decision_count, 2);
    assert_eq!(manifest.data_count, 1);
    assert_eq!(manifest.datasets[0].checksum.as_deref(), Some(DATASET_SHA));
    assert_eq!(manifest.source_format, RunFormat::DecisionEvents);
    assert_eq!(manifest.created_at, "2024-01-01T00:00:00Z");
    assert_eq!(manifest.provenance_warnings.len(), 2);
}

#[test]
fn model_override_is_declared_provenance() {
    let fx = Fixture::new();
    let report = fx.build_with_model("bundle");
    assert_eq!(report.manifest.model_count, 1);
    assert_eq!(report.manifest.models[0].name, "boltz-2");
    assert!(report.manifest.provenance_warnings.is_empty());
    let lineage: LineageDocument =
        serde_json::from_slice(&read(&report.bundle_dir.join(LINEAGE_FILE))).expect("lineage");
    let model = lineage
        .nodes
        .iter()
        .find(|n| n.variant() == NodeVariant::Model)
        .expect("model node");
    let inbound: Vec<_> = lineage.edges.iter().filter(|e| e.to == model.node_id).collect();
    assert_eq!(inbound.len(), 2);
    assert!(inbound.iter().all(|e| e.from.starts_with("decision:")));
}

#[test]
fn legacy_campaign_format_is_lowered() {
    let fx = Fixture::with_run(json!({
        "run_id": "legacy-run",
        "objective": "Design binders",
        "plan": { "calls": [{ "tool": "validate" }] },
        "results": [
            { "tool": "validate", "args": {}, "output": { "valid": true } },
            { "tool": "fold", "args": { "seq": "MKT" }, "output": { "plddt": 81.5, "model_name": "esmfold" } }
        ]
    }));
    let report = fx.build("legacy");
    let manifest = &report.manifest;
    assert_eq!(manifest.campaign_run_id, "legacy-run");
    assert_eq!(manifest.source_format, RunFormat::LegacyCampaign);
    assert_eq!(manifest.decision_count, 2);
    assert_eq!(manifest.models.len(), 1);
    assert_eq!(manifest.models[0].name, "esmfold");
    // First result carries no model: one incomplete-provenance warning.
    assert_eq!(manifest.provenance_warnings.len(), 1);
}

#[test]
fn summary_reports_counts_and_verification() {
    let fx = Fixture::new();
    let report = fx.build("bundle");
    let summary = summarize_bundle(&report.bundle_dir).expect("summary");
    assert_eq!(summary.bundle_id, report.manifest.bundle_id);
    assert_eq!(summary.decision_count, 2);
    assert!(summary.lineage_nodes > 0);
    assert!(summary.verification.ok);
    assert!(report.bundle_dir.join(MANIFEST_FILE).is_file());
}

// ---------------------------------------------------------------------------
// Numeric payloads
// ---------------------------------------------------------------------------

fn single_decision_run(output: serde_json::Value) -> serde_json::Value {
    json!({
        "campaign_run_id": "numeric-run",
        "decisions": [{
            "decision_type": "estimate",
            "tool_calls": [{ "id": "call-1", "tool": "md", "args": {}, "output": output }]
        }]
    })
}

fn decision_records(dir: &std::path::Path) -> Vec<DecisionRecord> {
    String::from_utf8(read(&dir.join(DECISIONS_FILE)))
        .expect("utf8")
        .lines()
        .map(|l| serde_json::from_str(l).expect("record"))
        .collect()
}

#[test]
fn large_floats_in_tool_outputs_are_hashed() {
    let fx = Fixture::with_run(single_decision_run(json!({
        "avogadro": 6.02e23,
        "upper_bound": 1e300,
        "two_pow_63": 9223372036854775808.0_f64
    })));
    let report = fx.build("bundle");
    assert_eq!(report.manifest.decision_count, 1);
    assert!(evidence_core::verify_bundle(&report.bundle_dir).expect("verify").ok);

    // 2^63 must not collapse onto i64::MAX.
    let saturated = Fixture::with_run(single_decision_run(json!({
        "avogadro": 6.02e23,
        "upper_bound": 1e300,
        "two_pow_63": i64::MAX
    })));
    let other = saturated.build("bundle");
    let a = decision_records(&report.bundle_dir);
    let b = decision_records(&other.bundle_dir);
    assert_eq!(a[0].inputs_digest, b[0].inputs_digest);
    assert_ne!(a[0].outputs_digest, b[0].outputs_digest);
    assert_ne!(a[0].tool_calls[0].output_digest, b[0].tool_calls[0].output_digest);
}

#[test]
fn legacy_run_with_huge_score_derives_an_id() {
    let fx = Fixture::with_run(json!({
        "objective": "Score binders",
        "score": 1e300,
        "results": [{ "tool": "score", "args": {}, "output": { "score": 1e300 } }]
    }));
    let report = fx.build("bundle");
    assert!(report.manifest.campaign_run_id.starts_with("run-"));
    assert_eq!(report.manifest.source_format, RunFormat::LegacyCampaign);
    assert!(evidence_core::verify_bundle(&report.bundle_dir).expect("verify").ok);
}

#[test]
fn numeric_dataset_versions_are_recorded_as_text() {
    let fx = Fixture::with_run(json!({
        "campaign_run_id": "numeric-versions",
        "decisions": [{
            "decision_type": "screen",
            "tool_calls": [{ "tool": "dock", "args": {}, "output": {} }],
            "datasets": [{ "dataset_id": "chembl", "version": 33 }]
        }]
    }));
    let mut manifest = common::dataset_manifest();
    manifest["version"] = json!(33);
    common::write_json(fx.dir.path(), "chembl.json", &manifest);

    let report = fx.build("bundle");
    assert_eq!(report.manifest.datasets[0].version.as_deref(), Some("33"));
    let records = decision_records(&report.bundle_dir);
    assert_eq!(records[0].dataset_refs[0].version.as_deref(), Some("33"));
}
