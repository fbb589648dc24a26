//! Decision records extracted from a campaign run.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::canonical::compute_digest;
use crate::domain::error::Result;

/// Reference to a tool call executed for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRef {
    /// Run-unique call identifier (declared or `<sequence_index>.<position>`).
    pub call_id: String,
    /// Tool name.
    pub tool: String,
    /// Digest of the call arguments.
    pub args_digest: String,
    /// Digest of the call output.
    pub output_digest: String,
}

/// A dataset named by a decision event, resolved later against manifests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetRef {
    pub dataset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One campaign decision, in extraction order.
///
/// # Invariants
///
/// `decision_id` is a pure function of `(campaign_run_id, sequence_index,
/// decision_type, inputs_digest, outputs_digest)`; see [`decision_id`].
/// `timestamp` is metadata copied from the source event and never hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub campaign_run_id: String,
    pub sequence_index: u64,
    pub decision_type: String,
    pub plan_ref: String,
    pub inputs_digest: String,
    pub outputs_digest: String,
    pub timestamp: Option<String>,
    pub tool_calls: Vec<ToolCallRef>,
    #[serde(default)]
    pub dataset_refs: Vec<DatasetRef>,
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub consumes: Vec<String>,
}

/// Compute the stable decision identifier.
pub fn decision_id(
    campaign_run_id: &str,
    sequence_index: u64,
    decision_type: &str,
    inputs_digest: &str,
    outputs_digest: &str,
) -> Result<String> {
    compute_digest(&json!({
        "campaign_run_id": campaign_run_id,
        "sequence_index": sequence_index,
        "decision_type": decision_type,
        "inputs_digest": inputs_digest,
        "outputs_digest": outputs_digest,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_id_is_stable() {
        let a = decision_id("run-1", 0, "selection", "in", "out").expect("id a");
        let b = decision_id("run-1", 0, "selection", "in", "out").expect("id b");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_decision_id_changes_with_every_field() {
        let base = decision_id("run-1", 0, "selection", "in", "out").expect("base");
        let variants = [
            decision_id("run-2", 0, "selection", "in", "out"),
            decision_id("run-1", 1, "selection", "in", "out"),
            decision_id("run-1", 0, "planning", "in", "out"),
            decision_id("run-1", 0, "selection", "in2", "out"),
            decision_id("run-1", 0, "selection", "in", "out2"),
        ];
        for variant in variants {
            assert_ne!(base, variant.expect("variant id"));
        }
    }

    #[test]
    fn test_dataset_ref_omits_missing_version() {
        let r = DatasetRef {
            dataset_id: "chembl".to_string(),
            version: None,
        };
        let json = serde_json::to_string(&r).expect("serialize");
        assert_eq!(json, r#"{"dataset_id":"chembl"}"#);
    }
}
