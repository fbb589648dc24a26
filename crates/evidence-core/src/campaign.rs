//! Campaign run input model.
//!
//! A campaign run is read once and never mutated. Two document shapes are
//! accepted:
//!
//! - the decision-event shape: a top-level `decisions` array, one event per
//!   campaign decision;
//! - the legacy campaign shape (`objective`, `plan`, `final_plan`,
//!   `results`), lowered into one `tool_result` event per executed result.
//!
//! Field-level validation (decision type, tool-call presence) belongs to the
//! extractor; this module only establishes the event sequence.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::canonical::payload_digest;
use crate::domain::decision::DatasetRef;
use crate::domain::error::{EvidenceError, Result};
use crate::domain::provenance::version_text;

/// Accept `"33"`, `33` or nothing for a version field.
fn lenient_version<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(version_text))
}

/// Inline model hint carried by a decision event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHint {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_version")]
    pub version: Option<String>,
}

/// A dataset named by an event: either a bare id or `{dataset_id, version}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetHint {
    Id(String),
    Versioned {
        dataset_id: String,
        #[serde(default, deserialize_with = "lenient_version")]
        version: Option<String>,
    },
}

impl DatasetHint {
    pub fn to_ref(&self) -> DatasetRef {
        match self {
            Self::Id(id) => DatasetRef {
                dataset_id: id.trim().to_string(),
                version: None,
            },
            Self::Versioned {
                dataset_id,
                version,
            } => DatasetRef {
                dataset_id: dataset_id.trim().to_string(),
                version: version.clone(),
            },
        }
    }
}

/// An artifact produced by an event: either a bare name or a described artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactHint {
    Name(String),
    Described {
        name: String,
        #[serde(default)]
        sha256: Option<String>,
        #[serde(default)]
        media_type: Option<String>,
    },
}

impl ArtifactHint {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Described { name, .. } => name,
        }
    }

    pub fn sha256(&self) -> Option<&str> {
        match self {
            Self::Name(_) => None,
            Self::Described { sha256, .. } => sha256.as_deref(),
        }
    }

    pub fn media_type(&self) -> Option<&str> {
        match self {
            Self::Name(_) => None,
            Self::Described { media_type, .. } => media_type.as_deref(),
        }
    }
}

/// One executed tool call as recorded in the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    #[serde(default, alias = "id")]
    pub call_id: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_version")]
    pub model_version: Option<String>,
}

/// One decision event in encounter order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    #[serde(default)]
    pub decision_type: Option<String>,
    #[serde(default)]
    pub plan_ref: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallEvent>,
    #[serde(default)]
    pub model: Option<ModelHint>,
    #[serde(default)]
    pub datasets: Vec<DatasetHint>,
    #[serde(default)]
    pub produces: Vec<ArtifactHint>,
    #[serde(default)]
    pub consumes: Vec<String>,
}

/// Which document shape the run was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFormat {
    DecisionEvents,
    LegacyCampaign,
}

/// A parsed campaign run.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignRun {
    pub campaign_run_id: String,
    pub format: RunFormat,
    pub events: Vec<DecisionEvent>,
    /// The original document, kept for checklist predicates that read it.
    pub document: Value,
}

impl CampaignRun {
    /// Parse a campaign run document.
    pub fn from_value(document: Value) -> Result<Self> {
        let Value::Object(map) = &document else {
            return Err(EvidenceError::MalformedRun {
                index: None,
                reason: "campaign run document must be a JSON object".to_string(),
            });
        };

        let (format, events) = if let Some(decisions) = map.get("decisions") {
            (RunFormat::DecisionEvents, parse_events(decisions)?)
        } else if let Some(results) = map.get("results") {
            (RunFormat::LegacyCampaign, lower_legacy(map, results)?)
        } else {
            return Err(EvidenceError::MalformedRun {
                index: None,
                reason: "document exposes neither `decisions` nor `results`".to_string(),
            });
        };

        let campaign_run_id = match explicit_run_id(map) {
            Some(id) => id,
            None => derived_run_id(&document)?,
        };

        Ok(Self {
            campaign_run_id,
            format,
            events,
            document,
        })
    }

    /// Read and parse a campaign run file.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let document: Value = serde_json::from_slice(&bytes).map_err(|e| {
            EvidenceError::MalformedRun {
                index: None,
                reason: format!("{} is not valid JSON: {e}", path.display()),
            }
        })?;
        Self::from_value(document)
    }

    /// Whether any event names a dataset explicitly.
    pub fn names_datasets(&self) -> bool {
        self.events.iter().any(|e| !e.datasets.is_empty())
    }
}

fn explicit_run_id(map: &Map<String, Value>) -> Option<String> {
    ["campaign_run_id", "run_id"]
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn derived_run_id(document: &Value) -> Result<String> {
    let digest = payload_digest(document)?;
    Ok(format!("run-{}", &digest[..32]))
}

fn parse_events(decisions: &Value) -> Result<Vec<DecisionEvent>> {
    let Value::Array(items) = decisions else {
        return Err(EvidenceError::MalformedRun {
            index: None,
            reason: "`decisions` must be an array".to_string(),
        });
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            if !item.is_object() {
                return Err(EvidenceError::malformed(i, "decision event must be an object"));
            }
            serde_json::from_value::<DecisionEvent>(item.clone())
                .map_err(|e| EvidenceError::malformed(i, e.to_string()))
        })
        .collect()
}

/// Lower the legacy campaign shape: one `tool_result` event per executed result.
fn lower_legacy(map: &Map<String, Value>, results: &Value) -> Result<Vec<DecisionEvent>> {
    let Value::Array(items) = results else {
        return Err(EvidenceError::MalformedRun {
            index: None,
            reason: "`results` must be an array".to_string(),
        });
    };

    let plan_ref = if map.get("final_plan").is_some_and(Value::is_object) {
        Some("final".to_string())
    } else if map.get("plan").is_some_and(Value::is_object) {
        Some("initial".to_string())
    } else {
        None
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let Value::Object(result) = item else {
                return Err(EvidenceError::malformed(i, "result entry must be an object"));
            };
            let ordinal = i + 1;
            let tool_call = ToolCallEvent {
                call_id: Some(format!("result-{ordinal}")),
                tool: result.get("tool").and_then(Value::as_str).map(str::to_string),
                args: result.get("args").cloned().unwrap_or(Value::Null),
                output: result.get("output").cloned().unwrap_or(Value::Null),
                model_name: None,
                model_version: None,
            };
            Ok(DecisionEvent {
                decision_type: Some("tool_result".to_string()),
                plan_ref: plan_ref.clone(),
                timestamp: result
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                inputs: json!({ "tool_index": ordinal }),
                outputs: Value::Null,
                tool_calls: vec![tool_call],
                model: None,
                datasets: Vec::new(),
                produces: vec![ArtifactHint::Name(format!("tool_result:{ordinal}"))],
                consumes: Vec::new(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_decision_event_shape() {
        let run = CampaignRun::from_value(json!({
            "campaign_run_id": "run-42",
            "decisions": [{
                "decision_type": "selection",
                "plan_ref": "p1",
                "tool_calls": [{ "id": "c1", "tool": "fold", "args": { "n": 1 } }],
                "datasets": ["chembl", { "dataset_id": "pdb", "version": "2024" }],
                "produces": ["ranked.csv", { "name": "model.pt", "sha256": "ab" }],
            }],
        }))
        .expect("parse");

        assert_eq!(run.campaign_run_id, "run-42");
        assert_eq!(run.format, RunFormat::DecisionEvents);
        let event = &run.events[0];
        assert_eq!(event.tool_calls[0].call_id.as_deref(), Some("c1"));
        assert_eq!(event.datasets[1].to_ref().version.as_deref(), Some("2024"));
        assert_eq!(event.produces[1].name(), "model.pt");
        assert_eq!(event.produces[1].sha256(), Some("ab"));
        assert!(run.names_datasets());
    }

    #[test]
    fn test_numeric_versions_are_accepted() {
        let run = CampaignRun::from_value(json!({
            "decisions": [{
                "decision_type": "screen",
                "tool_calls": [{ "tool": "dock", "model_name": "vina", "model_version": 1.2 }],
                "model": { "name": "vina", "version": 1 },
                "datasets": [{ "dataset_id": "zinc", "version": 20 }],
            }],
        }))
        .expect("parse");
        let event = &run.events[0];
        assert_eq!(event.datasets[0].to_ref().version.as_deref(), Some("20"));
        assert_eq!(event.tool_calls[0].model_version.as_deref(), Some("1.2"));
        assert_eq!(event.model.as_ref().and_then(|m| m.version.as_deref()), Some("1"));
    }

    #[test]
    fn test_lowers_legacy_results() {
        let run = CampaignRun::from_value(json!({
            "run_id": "legacy-1",
            "objective": "Design binders",
            "plan": { "calls": [] },
            "final_plan": { "calls": [] },
            "results": [
                { "tool": "validate", "args": {}, "output": { "valid": true } },
                { "tool": "fold", "args": { "name": "x" }, "output": { "affinity": 0.8 } },
            ],
        }))
        .expect("parse");

        assert_eq!(run.format, RunFormat::LegacyCampaign);
        assert_eq!(run.campaign_run_id, "legacy-1");
        assert_eq!(run.events.len(), 2);
        assert_eq!(run.events[1].plan_ref.as_deref(), Some("final"));
        assert_eq!(run.events[1].tool_calls[0].call_id.as_deref(), Some("result-2"));
        assert_eq!(run.events[1].produces[0].name(), "tool_result:2");
        assert!(!run.names_datasets());
    }

    #[test]
    fn test_derived_run_id_is_deterministic() {
        let doc = json!({ "objective": "x", "results": [], "score": 0.5 });
        let a = CampaignRun::from_value(doc.clone()).expect("parse a");
        let b = CampaignRun::from_value(doc).expect("parse b");
        assert_eq!(a.campaign_run_id, b.campaign_run_id);
        assert!(a.campaign_run_id.starts_with("run-"));
        assert_eq!(a.campaign_run_id.len(), 4 + 32);
    }

    #[test]
    fn test_rejects_document_without_event_sequence() {
        let err = CampaignRun::from_value(json!({ "objective": "x" })).unwrap_err();
        assert!(matches!(err, EvidenceError::MalformedRun { index: None, .. }));
    }

    #[test]
    fn test_rejects_non_object_event_with_index() {
        let err = CampaignRun::from_value(json!({ "decisions": [{}, 7] })).unwrap_err();
        assert!(matches!(err, EvidenceError::MalformedRun { index: Some(1), .. }));
    }
}
