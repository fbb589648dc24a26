//! Materialized bundle evidence, loaded once per checklist run.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::campaign::CampaignRun;
use crate::checksum::scan_bundle_files;
use crate::domain::decision::DecisionRecord;
use crate::domain::error::{EvidenceError, Result};
use crate::layout::{CAMPAIGN_RUN_FILE, DECISIONS_FILE, LINEAGE_FILE, MANIFEST_FILE};
use crate::lineage::LineageDocument;
use crate::verify::{verify_bundle, VerificationResult};

/// Everything the predicates read. Missing or unreadable documents are
/// recorded as `None` and noted; they never abort the checklist run.
#[derive(Debug, Clone)]
pub struct BundleEvidence {
    pub bundle_dir: PathBuf,
    pub manifest: Option<Value>,
    pub lineage: Option<LineageDocument>,
    pub decisions: Vec<DecisionRecord>,
    /// Non-blank lines in `decisions.jsonl`, parseable or not.
    pub decision_lines: Option<usize>,
    /// The bundled campaign run, re-parsed.
    pub campaign_run: Option<CampaignRun>,
    /// `None` when the bundle has no checksum manifest.
    pub verification: Option<VerificationResult>,
    files: Vec<String>,
    pub notes: Vec<String>,
}

impl BundleEvidence {
    /// Load evidence from a bundle directory.
    ///
    /// Fails with [`EvidenceError::BundleNotFound`] only when the directory
    /// itself does not exist.
    pub fn load(bundle_dir: &Path) -> Result<Self> {
        if !bundle_dir.is_dir() {
            return Err(EvidenceError::BundleNotFound {
                path: bundle_dir.to_path_buf(),
            });
        }
        let mut notes = Vec::new();

        let manifest = read_json(&bundle_dir.join(MANIFEST_FILE), &mut notes)
            .filter(Value::is_object);
        let lineage = read_json(&bundle_dir.join(LINEAGE_FILE), &mut notes).and_then(|v| {
            serde_json::from_value::<LineageDocument>(v)
                .map_err(|e| notes.push(format!("{LINEAGE_FILE}: {e}")))
                .ok()
        });
        let (decisions, decision_lines) =
            read_decisions(&bundle_dir.join(DECISIONS_FILE), &mut notes);
        let campaign_run = read_json(&bundle_dir.join(CAMPAIGN_RUN_FILE), &mut notes)
            .and_then(|v| {
                CampaignRun::from_value(v)
                    .map_err(|e| notes.push(format!("{CAMPAIGN_RUN_FILE}: {e}")))
                    .ok()
            });

        let verification = match verify_bundle(bundle_dir) {
            Ok(result) => Some(result),
            Err(EvidenceError::BundleNotFound { path }) => {
                notes.push(format!("{} not found", path.display()));
                None
            }
            Err(e) => return Err(e),
        };

        let scan = scan_bundle_files(bundle_dir)?;
        for bad in &scan.unsupported {
            notes.push(format!("{}: {}", bad.display_path, bad.reason));
        }
        let files = scan.files.into_iter().map(|f| f.relative_path).collect();

        Ok(Self {
            bundle_dir: bundle_dir.to_path_buf(),
            manifest,
            lineage,
            decisions,
            decision_lines,
            campaign_run,
            verification,
            files,
            notes,
        })
    }

    pub fn manifest_str(&self, key: &str) -> Option<&str> {
        self.manifest.as_ref()?.get(key)?.as_str()
    }

    pub fn manifest_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.manifest.as_ref()?.get(key)?.as_array()
    }

    /// Bundle-relative paths of the files currently on disk (checklists excluded).
    pub fn listed_files(&self) -> &[String] {
        &self.files
    }

    /// A trimmed, non-empty top-level string of the campaign run document.
    pub fn run_text(&self, key: &str) -> Option<&str> {
        self.campaign_run
            .as_ref()?
            .document
            .get(key)?
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Recorded outputs of every tool call in the run, in encounter order.
    pub fn tool_outputs(&self) -> Vec<&Value> {
        let Some(run) = &self.campaign_run else {
            return Vec::new();
        };
        run.events
            .iter()
            .flat_map(|e| e.tool_calls.iter())
            .map(|c| &c.output)
            .filter(|o| !o.is_null())
            .collect()
    }
}

/// Lower-cased dotted key paths of a JSON value; array positions appear as `[i]`.
pub fn flatten_keys(value: &Value) -> Vec<String> {
    fn walk(value: &Value, prefix: &str, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, nested) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    out.push(path.to_lowercase());
                    walk(nested, &path, out);
                }
            }
            Value::Array(items) => {
                for (i, nested) in items.iter().enumerate() {
                    walk(nested, &format!("{prefix}[{i}]"), out);
                }
            }
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(value, "", &mut out);
    out
}

fn read_json(path: &Path, notes: &mut Vec<String>) -> Option<Value> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            notes.push(format!("{}: {e}", path.display()));
            return None;
        }
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| notes.push(format!("{}: {e}", path.display())))
        .ok()
}

fn read_decisions(
    path: &Path,
    notes: &mut Vec<String>,
) -> (Vec<DecisionRecord>, Option<usize>) {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            notes.push(format!("{}: {e}", path.display()));
            return (Vec::new(), None);
        }
    };
    let mut records = Vec::new();
    let mut lines = 0;
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        lines += 1;
        match serde_json::from_str::<DecisionRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => notes.push(format!("{DECISIONS_FILE} line {}: {e}", i + 1)),
        }
    }
    (records, Some(lines))
}
