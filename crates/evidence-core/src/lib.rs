//! Evidence bundle core library.
//!
//! Turns a campaign run into a self-contained, verifiable evidence bundle:
//! decision records with stable ids, provenance, a lineage DAG, a checksum
//! manifest, and checklist verdicts.

pub mod bundle;
pub mod campaign;
pub mod checklist;
pub mod checksum;
pub mod domain;
pub mod execution;
pub mod extract;
pub mod layout;
pub mod lineage;
pub mod obs;
pub mod resolver;
pub mod telemetry;
pub mod verify;

pub use domain::{
    canonical_json, compute_digest, payload_digest, quantize_floats, sha256_hex, CanonicalError,
    DatasetProvenance, DatasetRef, DecisionRecord, EvidenceError, ModelProvenance, ModelSource,
    ProvenanceIncompleteWarning, ProvenanceWarning, Result, ToolCallRef,
};

pub use bundle::{
    build_bundle, bundle_id, read_manifest, summarize_bundle, ArtifactRecord, ArtifactRole,
    BuildConfig, BuildReport, BundleManifest, BundleSummary,
};
pub use campaign::{CampaignRun, DecisionEvent, RunFormat};
pub use checklist::{
    available_templates, evaluate_checklist, run_checklist, write_report, BundleEvidence,
    ChecklistOptions, ChecklistReport, ChecklistRule, ChecklistSummary, ChecklistTemplate,
    Predicate, RuleResult, Severity, Status,
};
pub use checksum::{
    compute_entries, parse_checksums, scan_bundle_files, write_checksums, BundleScan, ChecksumEntry,
};
pub use execution::{capture_execution_provenance, ExecutionProvenance, GitInfo, RuntimeInfo};
pub use extract::extract_decisions;
pub use lineage::{
    build_lineage, LineageDocument, LineageEdge, LineageGraph, LineageNode, NodeKind, NodeVariant,
    Relation,
};
pub use obs::BundleSpan;
pub use resolver::{resolve_provenance, ModelOverride, ProvenanceResolution};
pub use telemetry::init_tracing;
pub use verify::{verify_bundle, Mismatch, VerificationResult};

/// Library version, recorded in every manifest's generator block.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
