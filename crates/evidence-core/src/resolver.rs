//! Provenance resolution.
//!
//! Attaches model and dataset provenance to extracted decisions. Models come
//! from the fields a run carries (or from an explicit override, which always
//! wins). Datasets come only from externally supplied manifest documents.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::campaign::{CampaignRun, DecisionEvent};
use crate::domain::decision::DecisionRecord;
use crate::domain::provenance::{
    version_text, DatasetProvenance, ModelProvenance, ModelSource, ProvenanceIncompleteWarning,
    ProvenanceWarning,
};
use crate::layout::data_manifest_path;

/// Caller-supplied model identity that takes precedence over inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOverride {
    pub name: String,
    pub version: Option<String>,
}

impl ModelOverride {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// A dataset manifest that parsed successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedManifest {
    pub source: PathBuf,
    pub provenance: DatasetProvenance,
}

impl LoadedManifest {
    /// Bundle-relative path the manifest is copied to.
    pub fn rel_path(&self) -> &str {
        self.provenance.manifest_rel_path.as_deref().unwrap_or_default()
    }
}

/// Load dataset manifests. Unreadable or invalid documents become warnings.
///
/// Bundle copy names are numbered by position in `paths` (1-based), so a
/// skipped manifest leaves a gap rather than renumbering the rest.
pub fn load_dataset_manifests(paths: &[PathBuf]) -> (Vec<LoadedManifest>, Vec<String>) {
    let mut loaded = Vec::new();
    let mut warnings = Vec::new();
    for (i, path) in paths.iter().enumerate() {
        match load_manifest(path) {
            Ok(mut provenance) => {
                provenance.manifest_rel_path = Some(data_manifest_path(i + 1, path));
                loaded.push(LoadedManifest {
                    source: path.clone(),
                    provenance,
                });
            }
            Err(reason) => warnings.push(format!("data manifest {}: {reason}", path.display())),
        }
    }
    (loaded, warnings)
}

fn load_manifest(path: &Path) -> std::result::Result<DatasetProvenance, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("unreadable ({e})"))?;
    let document: Value =
        serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON ({e})"))?;
    parse_manifest(&document)
}

/// Read the fields this system consumes from a dataset manifest document.
pub fn parse_manifest(document: &Value) -> std::result::Result<DatasetProvenance, String> {
    let Value::Object(map) = document else {
        return Err("manifest must be a JSON object".to_string());
    };
    let dataset_id = map
        .get("dataset_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing dataset_id".to_string())?;

    let version = map.get("version").and_then(version_text);

    let source = map.get("source").and_then(Value::as_object);
    let nested = |key: &str| {
        source
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let flat = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(DatasetProvenance {
        dataset_id: dataset_id.to_string(),
        version,
        source_url: nested("url").or_else(|| flat("source_url")),
        checksum: nested("sha256").or_else(|| flat("sha256")),
        license: flat("license_name"),
        manifest_rel_path: None,
    })
}

/// A model attached to a decision, remembering the tool call it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedModel {
    pub provenance: ModelProvenance,
    /// Originating tool call; `None` for event hints and overrides.
    pub call_id: Option<String>,
}

/// Provenance attached to one decision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecisionProvenance {
    pub models: Vec<AttachedModel>,
    pub datasets: Vec<DatasetProvenance>,
}

/// Output of the resolver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProvenanceResolution {
    /// Parallel to the decision records.
    pub per_decision: Vec<DecisionProvenance>,
    /// Distinct models, in first-seen order.
    pub models: Vec<ModelProvenance>,
    /// Every supplied manifest, in input order.
    pub datasets: Vec<DatasetProvenance>,
    pub warnings: Vec<ProvenanceWarning>,
}

impl ProvenanceResolution {
    pub fn incomplete_count(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, ProvenanceWarning::ModelIncomplete(_)))
            .count()
    }
}

/// Resolve provenance for every decision.
///
/// `records` must be the extraction of `run`, so events and records pair up
/// by position.
pub fn resolve_provenance(
    run: &CampaignRun,
    records: &[DecisionRecord],
    manifests: &[LoadedManifest],
    model_override: Option<&ModelOverride>,
) -> ProvenanceResolution {
    let run_scoped = !run.names_datasets();
    let mut resolution = ProvenanceResolution {
        datasets: manifests.iter().map(|m| m.provenance.clone()).collect(),
        ..Default::default()
    };

    for (record, event) in records.iter().zip(&run.events) {
        let inferred = infer_models(record, event);
        let models = match model_override {
            Some(o) => vec![AttachedModel {
                provenance: ModelProvenance {
                    name: o.name.clone(),
                    version: o
                        .version
                        .clone()
                        .or_else(|| inferred.iter().find_map(|m| m.provenance.version.clone())),
                    source: ModelSource::Declared,
                },
                call_id: None,
            }],
            None => inferred,
        };

        if models.is_empty() {
            resolution
                .warnings
                .push(ProvenanceWarning::ModelIncomplete(ProvenanceIncompleteWarning {
                    decision_id: record.decision_id.clone(),
                    sequence_index: record.sequence_index,
                    reason: "no model name found in tool calls, tool outputs or event hints, \
                             and no override supplied"
                        .to_string(),
                }));
        }

        for model in &models {
            if !resolution.models.contains(&model.provenance) {
                resolution.models.push(model.provenance.clone());
            }
        }

        let datasets = if run_scoped {
            resolution.datasets.clone()
        } else {
            let mut matched: Vec<DatasetProvenance> = Vec::new();
            for dataset_ref in &record.dataset_refs {
                let hit = manifests.iter().map(|m| &m.provenance).find(|p| {
                    p.matches(&dataset_ref.dataset_id, dataset_ref.version.as_deref())
                });
                match hit {
                    Some(p) if !matched.contains(p) => matched.push(p.clone()),
                    Some(_) => {}
                    None => resolution.warnings.push(ProvenanceWarning::UnresolvedDataset {
                        decision_id: record.decision_id.clone(),
                        dataset_id: dataset_ref.dataset_id.clone(),
                        version: dataset_ref.version.clone(),
                    }),
                }
            }
            matched
        };

        resolution
            .per_decision
            .push(DecisionProvenance { models, datasets });
    }

    resolution
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Read model identities from tool calls, tool outputs and the event hint.
fn infer_models(record: &DecisionRecord, event: &DecisionEvent) -> Vec<AttachedModel> {
    let mut models: Vec<AttachedModel> = Vec::new();
    let mut push = |name: String, version: Option<String>, call_id: Option<String>| {
        let exists = models
            .iter()
            .any(|m| m.provenance.name == name && m.provenance.version == version);
        if !exists {
            models.push(AttachedModel {
                provenance: ModelProvenance {
                    name,
                    version,
                    source: ModelSource::Inferred,
                },
                call_id,
            });
        }
    };

    for (call, call_ref) in event.tool_calls.iter().zip(&record.tool_calls) {
        let call_id = Some(call_ref.call_id.clone());
        if let Some(name) = non_empty(call.model_name.as_deref()) {
            push(name, non_empty(call.model_version.as_deref()), call_id.clone());
        }
        if let Value::Object(output) = &call.output {
            let name = output
                .get("model_name")
                .or_else(|| output.get("model"))
                .and_then(Value::as_str);
            if let Some(name) = non_empty(name) {
                push(name, output.get("model_version").and_then(version_text), call_id);
            }
        }
    }

    if let Some(hint) = &event.model {
        if let Some(name) = non_empty(Some(&hint.name)) {
            push(name, non_empty(hint.version.as_deref()), None);
        }
    }

    models
}
