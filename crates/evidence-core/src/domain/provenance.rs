//! Provenance records attached to decisions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version text from a JSON scalar: trimmed non-empty strings and numbers.
///
/// Manifests and runs write versions both as `"33"` and as `33`.
pub fn version_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Where a model identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    /// Read from fields the campaign run itself carries (tool outputs, hints).
    Inferred,
    /// Supplied explicitly by the caller at build time.
    Declared,
}

/// Model identity used by a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProvenance {
    pub name: String,
    pub version: Option<String>,
    pub source: ModelSource,
}

/// Dataset identity copied verbatim from an external manifest.
///
/// `checksum` is passed through as declared; it is never recomputed against
/// the original dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetProvenance {
    pub dataset_id: String,
    pub version: Option<String>,
    pub source_url: Option<String>,
    pub checksum: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    /// Bundle-relative path of the copied manifest document.
    #[serde(default)]
    pub manifest_rel_path: Option<String>,
}

impl DatasetProvenance {
    /// Whether this provenance satisfies a dataset reference.
    pub fn matches(&self, dataset_id: &str, version: Option<&str>) -> bool {
        self.dataset_id == dataset_id
            && match version {
                Some(v) => self.version.as_deref() == Some(v),
                None => true,
            }
    }
}

/// Neither inference nor override produced a model identity for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceIncompleteWarning {
    pub decision_id: String,
    pub sequence_index: u64,
    pub reason: String,
}

/// Non-fatal provenance gaps, recorded in `manifest.json` for the checklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProvenanceWarning {
    ModelIncomplete(ProvenanceIncompleteWarning),
    UnresolvedDataset {
        decision_id: String,
        dataset_id: String,
        version: Option<String>,
    },
}

impl std::fmt::Display for ProvenanceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelIncomplete(w) => write!(
                f,
                "decision {} (index {}): {}",
                w.decision_id, w.sequence_index, w.reason
            ),
            Self::UnresolvedDataset {
                decision_id,
                dataset_id,
                version,
            } => write!(
                f,
                "decision {decision_id}: dataset '{dataset_id}'{} not found in supplied manifests",
                version
                    .as_deref()
                    .map(|v| format!(" version '{v}'"))
                    .unwrap_or_default()
            ),
        }
    }
}
