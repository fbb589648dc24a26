//! Bundle build pipeline.
//!
//! Extraction, provenance resolution and lineage construction run fully in
//! memory. The bundle is then written into a staging directory beside the
//! output and renamed into place only after `checksums.sha256` exists, so a
//! failed build never leaves a bundle that looks complete.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::campaign::{CampaignRun, RunFormat};
use crate::checklist::{self, ChecklistOptions, ChecklistReport};
use crate::checksum::{hash_file, write_checksums};
use crate::domain::canonical::compute_digest;
use crate::domain::error::{EvidenceError, Result};
use crate::domain::provenance::{DatasetProvenance, ModelProvenance, ProvenanceWarning};
use crate::execution::{capture_execution_provenance, ExecutionProvenance, Generator};
use crate::extract::{extract_decisions, render_decisions_jsonl};
use crate::layout::{
    extra_artifact_path, CAMPAIGN_RUN_FILE, DECISIONS_FILE, LINEAGE_FILE, MANIFEST_FILE,
};
use crate::lineage::{build_lineage, LineageDocument};
use crate::obs;
use crate::resolver::{load_dataset_manifests, resolve_provenance, ModelOverride};
use crate::verify::{verify_bundle, VerificationResult};

pub const MANIFEST_SCHEMA_VERSION: &str = "1.0.0";
pub const DEFAULT_SOURCE_KIND: &str = "campaign_run";

/// Immutable build settings, threaded through every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    pub campaign_run: PathBuf,
    pub output_dir: PathBuf,
    pub data_manifests: Vec<PathBuf>,
    pub extra_artifacts: Vec<PathBuf>,
    pub model_override: Option<ModelOverride>,
    /// Varies the bundle id between builds of the same run. Defaults to the
    /// build timestamp.
    pub build_nonce: Option<String>,
    pub build_timestamp: DateTime<Utc>,
    pub source_kind: String,
    pub overwrite: bool,
    pub checklist_templates: Vec<String>,
    pub checklist_strict: bool,
    pub capture_git: bool,
}

impl BuildConfig {
    pub fn new(campaign_run: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            campaign_run: campaign_run.into(),
            output_dir: output_dir.into(),
            data_manifests: Vec::new(),
            extra_artifacts: Vec::new(),
            model_override: None,
            build_nonce: None,
            build_timestamp: Utc::now(),
            source_kind: DEFAULT_SOURCE_KIND.to_string(),
            overwrite: false,
            checklist_templates: Vec::new(),
            checklist_strict: false,
            capture_git: true,
        }
    }

    pub fn with_data_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_manifests.push(path.into());
        self
    }

    pub fn with_extra_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_artifacts.push(path.into());
        self
    }

    pub fn with_model_override(mut self, model: ModelOverride) -> Self {
        self.model_override = Some(model);
        self
    }

    pub fn with_build_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.build_nonce = Some(nonce.into());
        self
    }

    pub fn with_build_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.build_timestamp = ts;
        self
    }

    pub fn with_source_kind(mut self, kind: impl Into<String>) -> Self {
        self.source_kind = kind.into();
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_checklist(mut self, template: impl Into<String>) -> Self {
        self.checklist_templates.push(template.into());
        self
    }

    pub fn with_checklist_strict(mut self, strict: bool) -> Self {
        self.checklist_strict = strict;
        self
    }

    pub fn with_git_capture(mut self, capture: bool) -> Self {
        self.capture_git = capture;
        self
    }

    fn timestamp(&self) -> String {
        self.build_timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn nonce(&self) -> String {
        self.build_nonce.clone().unwrap_or_else(|| self.timestamp())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    CampaignRun,
    DataManifest,
    Extra,
}

/// A file copied under `artifacts/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub rel_path: String,
    pub role: ArtifactRole,
    pub sha256: String,
    pub byte_length: u64,
}

/// Top-level bundle metadata (`manifest.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub schema_version: String,
    pub bundle_id: String,
    pub campaign_run_id: String,
    pub created_at: String,
    pub build_nonce: String,
    pub source_kind: String,
    pub source_format: RunFormat,
    pub source_rel_path: String,
    pub decision_count: usize,
    pub artifact_count: usize,
    pub model_count: usize,
    pub data_count: usize,
    pub models: Vec<ModelProvenance>,
    pub datasets: Vec<DatasetProvenance>,
    pub artifacts: Vec<ArtifactRecord>,
    pub execution_provenance: ExecutionProvenance,
    pub warnings: Vec<String>,
    pub provenance_warnings: Vec<ProvenanceWarning>,
    pub generator: Generator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub bundle_dir: PathBuf,
    pub manifest: BundleManifest,
    pub checksum_entries: usize,
    pub checklists: Vec<ChecklistReport>,
}

/// Bundle id: deterministic in the run id and the build nonce.
pub fn bundle_id(campaign_run_id: &str, build_nonce: &str) -> Result<String> {
    compute_digest(&json!({
        "campaign_run_id": campaign_run_id,
        "build_nonce": build_nonce,
    }))
}

fn validate(config: &BuildConfig) -> Result<()> {
    if !config.campaign_run.is_file() {
        return Err(EvidenceError::InvalidInput(format!(
            "campaign run file not found: {}",
            config.campaign_run.display()
        )));
    }
    for name in &config.checklist_templates {
        checklist::template(name)?;
    }
    let out = &config.output_dir;
    if out.exists() {
        if !out.is_dir() {
            return Err(EvidenceError::InvalidInput(format!(
                "output path is not a directory: {}",
                out.display()
            )));
        }
        let occupied = std::fs::read_dir(out)?.next().is_some();
        if occupied && !config.overwrite {
            return Err(EvidenceError::OutputNotEmpty { path: out.clone() });
        }
    }
    Ok(())
}

fn write_file(root: &Path, rel: &str, bytes: &[u8]) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

fn copy_artifact(root: &Path, rel: &str, source: &Path, role: ArtifactRole) -> Result<ArtifactRecord> {
    let dest = root.join(rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, &dest)?;
    let (sha256, byte_length) = hash_file(&dest)?;
    Ok(ArtifactRecord {
        rel_path: rel.to_string(),
        role,
        sha256,
        byte_length,
    })
}

fn pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text.into_bytes())
}

/// Staging directories are created owner-only; the finished root is not.
#[cfg(unix)]
fn publish_permissions(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(root, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn publish_permissions(_root: &Path) -> Result<()> {
    Ok(())
}

/// Build an evidence bundle.
pub fn build_bundle(config: &BuildConfig) -> Result<BuildReport> {
    validate(config)?;

    let run = CampaignRun::load(&config.campaign_run)?;
    let _span = obs::BundleSpan::enter(&run.campaign_run_id);
    obs::emit_build_started(&run.campaign_run_id, run.events.len(), &config.output_dir);

    let records = extract_decisions(&run)?;
    obs::emit_stage_completed("extract", records.len());

    let (manifests, mut warnings) = load_dataset_manifests(&config.data_manifests);
    let provenance = resolve_provenance(&run, &records, &manifests, config.model_override.as_ref());
    for w in &provenance.warnings {
        obs::emit_provenance_incomplete(w);
    }
    obs::emit_stage_completed("provenance", provenance.models.len() + provenance.datasets.len());

    let lineage = build_lineage(&run, &records, &provenance)?;
    let lineage_doc = lineage.to_document();
    obs::emit_stage_completed("lineage", lineage.node_count());

    let created_at = config.timestamp();
    let build_nonce = config.nonce();
    let bundle_id = bundle_id(&run.campaign_run_id, &build_nonce)?;
    let execution = capture_execution_provenance(
        config
            .capture_git
            .then(|| config.campaign_run.parent())
            .flatten()
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p }),
        &created_at,
    );

    // Everything below writes into staging only.
    let parent = match config.output_dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".evidence-staging-")
        .tempdir_in(&parent)?;
    let root = staging.path();

    let mut artifacts = vec![copy_artifact(
        root,
        CAMPAIGN_RUN_FILE,
        &config.campaign_run,
        ArtifactRole::CampaignRun,
    )?];
    for m in &manifests {
        artifacts.push(copy_artifact(root, m.rel_path(), &m.source, ArtifactRole::DataManifest)?);
    }
    for (i, extra) in config.extra_artifacts.iter().enumerate() {
        if !extra.is_file() {
            warnings.push(format!("extra artifact not found: {}", extra.display()));
            continue;
        }
        let rel = extra_artifact_path(i + 1, extra);
        artifacts.push(copy_artifact(root, &rel, extra, ArtifactRole::Extra)?);
    }

    write_file(root, DECISIONS_FILE, render_decisions_jsonl(&records)?.as_bytes())?;
    write_file(root, LINEAGE_FILE, &pretty_json(&lineage_doc)?)?;

    let manifest = BundleManifest {
        schema_version: MANIFEST_SCHEMA_VERSION.to_string(),
        bundle_id,
        campaign_run_id: run.campaign_run_id.clone(),
        created_at,
        build_nonce,
        source_kind: config.source_kind.clone(),
        source_format: run.format,
        source_rel_path: CAMPAIGN_RUN_FILE.to_string(),
        decision_count: records.len(),
        artifact_count: artifacts.len(),
        model_count: provenance.models.len(),
        data_count: provenance.datasets.len(),
        models: provenance.models.clone(),
        datasets: provenance.datasets.clone(),
        artifacts,
        execution_provenance: execution,
        warnings,
        provenance_warnings: provenance.warnings.clone(),
        generator: Generator::default(),
    };
    write_file(root, MANIFEST_FILE, &pretty_json(&manifest)?)?;

    let entries = write_checksums(root)?;
    obs::emit_stage_completed("checksums", entries.len());

    publish_permissions(root)?;
    if config.output_dir.exists() {
        std::fs::remove_dir_all(&config.output_dir)?;
    }
    std::fs::rename(root, &config.output_dir)?;
    drop(staging);
    obs::emit_bundle_written(&manifest.bundle_id, &config.output_dir, entries.len());

    let options = ChecklistOptions::default()
        .with_strict(config.checklist_strict)
        .with_generated_at(config.build_timestamp);
    let mut checklists = Vec::new();
    for name in &config.checklist_templates {
        let report = checklist::run_checklist(&config.output_dir, name, &options)?;
        checklist::write_report(&config.output_dir, &report)?;
        checklists.push(report);
    }

    Ok(BuildReport {
        bundle_dir: config.output_dir.clone(),
        manifest,
        checksum_entries: entries.len(),
        checklists,
    })
}

/// Read `manifest.json` from a bundle.
pub fn read_manifest(bundle_dir: &Path) -> Result<BundleManifest> {
    let path = bundle_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(EvidenceError::BundleNotFound { path });
    }
    Ok(serde_json::from_slice(&std::fs::read(path)?)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSummary {
    pub bundle_id: String,
    pub campaign_run_id: String,
    pub created_at: String,
    pub decision_count: usize,
    pub artifact_count: usize,
    pub model_count: usize,
    pub data_count: usize,
    pub lineage_nodes: usize,
    pub lineage_edges: usize,
    pub warning_count: usize,
    pub verification: VerificationResult,
}

/// Summarize an existing bundle, including a fresh verification.
pub fn summarize_bundle(bundle_dir: &Path) -> Result<BundleSummary> {
    if !bundle_dir.is_dir() {
        return Err(EvidenceError::BundleNotFound {
            path: bundle_dir.to_path_buf(),
        });
    }
    let manifest = read_manifest(bundle_dir)?;
    let lineage: Option<LineageDocument> = std::fs::read(bundle_dir.join(LINEAGE_FILE))
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok());
    let verification = verify_bundle(bundle_dir)?;
    Ok(BundleSummary {
        bundle_id: manifest.bundle_id,
        campaign_run_id: manifest.campaign_run_id,
        created_at: manifest.created_at,
        decision_count: manifest.decision_count,
        artifact_count: manifest.artifact_count,
        model_count: manifest.model_count,
        data_count: manifest.data_count,
        lineage_nodes: lineage.as_ref().map_or(0, |l| l.nodes.len()),
        lineage_edges: lineage.as_ref().map_or(0, |l| l.edges.len()),
        warning_count: manifest.warnings.len() + manifest.provenance_warnings.len(),
        verification,
    })
}
