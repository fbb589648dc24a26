//! Decision extraction.
//!
//! Turns the event sequence of a [`CampaignRun`] into [`DecisionRecord`]s in
//! encounter order. No reordering, no deduplication.

use serde_json::{json, Value};

use crate::campaign::{CampaignRun, DecisionEvent};
use crate::domain::canonical::payload_digest;
use crate::domain::decision::{decision_id, DecisionRecord, ToolCallRef};
use crate::domain::error::{EvidenceError, Result};

/// Plan reference used when an event names none.
pub const DEFAULT_PLAN_REF: &str = "default";

/// Extract one decision record per event.
///
/// Fails with [`EvidenceError::MalformedRun`] naming the event index when an
/// event lacks a `decision_type` or carries no tool call.
pub fn extract_decisions(run: &CampaignRun) -> Result<Vec<DecisionRecord>> {
    run.events
        .iter()
        .enumerate()
        .map(|(index, event)| extract_one(&run.campaign_run_id, index, event))
        .collect()
}

fn extract_one(campaign_run_id: &str, index: usize, event: &DecisionEvent) -> Result<DecisionRecord> {
    let decision_type = event
        .decision_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EvidenceError::malformed(index, "missing decision_type"))?;

    if event.tool_calls.is_empty() {
        return Err(EvidenceError::malformed(
            index,
            "decision event references no tool call",
        ));
    }

    let sequence_index = index as u64;
    let mut tool_calls = Vec::with_capacity(event.tool_calls.len());
    for (position, call) in event.tool_calls.iter().enumerate() {
        let tool = call
            .tool
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                EvidenceError::malformed(index, format!("tool call {position} has no tool name"))
            })?;
        let call_id = call
            .call_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{sequence_index}.{position}"));
        tool_calls.push(ToolCallRef {
            call_id,
            tool: tool.to_string(),
            args_digest: payload_digest(&call.args)?,
            output_digest: payload_digest(&call.output)?,
        });
    }

    let inputs_digest = payload_digest(&json!({
        "inputs": event.inputs,
        "tool_calls": event
            .tool_calls
            .iter()
            .map(|c| json!({ "tool": c.tool, "args": c.args }))
            .collect::<Vec<Value>>(),
    }))?;
    let outputs_digest = payload_digest(&json!({
        "outputs": event.outputs,
        "tool_outputs": event.tool_calls.iter().map(|c| c.output.clone()).collect::<Vec<Value>>(),
    }))?;

    let decision_id = decision_id(
        campaign_run_id,
        sequence_index,
        decision_type,
        &inputs_digest,
        &outputs_digest,
    )?;

    Ok(DecisionRecord {
        decision_id,
        campaign_run_id: campaign_run_id.to_string(),
        sequence_index,
        decision_type: decision_type.to_string(),
        plan_ref: event
            .plan_ref
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PLAN_REF)
            .to_string(),
        inputs_digest,
        outputs_digest,
        timestamp: event.timestamp.clone(),
        tool_calls,
        dataset_refs: event.datasets.iter().map(|d| d.to_ref()).collect(),
        produces: event.produces.iter().map(|a| a.name().to_string()).collect(),
        consumes: event.consumes.clone(),
    })
}

/// Render records as JSON Lines, one canonical record per line.
pub fn render_decisions_jsonl(records: &[DecisionRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        let value = serde_json::to_value(record)?;
        out.push_str(&crate::domain::canonical::canonical_json(&value)?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(decisions: Value) -> CampaignRun {
        CampaignRun::from_value(json!({ "campaign_run_id": "run-x", "decisions": decisions }))
            .expect("parse run")
    }

    #[test]
    fn test_extracts_in_encounter_order() {
        let run = run(json!([
            { "decision_type": "plan", "tool_calls": [{ "tool": "design", "output": { "p": 0.5 } }] },
            { "decision_type": "select", "plan_ref": "p2", "tool_calls": [{ "tool": "rank" }] },
        ]));
        let records = extract_decisions(&run).expect("extract");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence_index, 0);
        assert_eq!(records[0].plan_ref, DEFAULT_PLAN_REF);
        assert_eq!(records[0].tool_calls[0].call_id, "0.0");
        assert_eq!(records[1].decision_type, "select");
        assert_eq!(records[1].plan_ref, "p2");
        assert_ne!(records[0].decision_id, records[1].decision_id);
    }

    #[test]
    fn test_identical_events_at_different_positions_get_distinct_ids() {
        let event = json!({ "decision_type": "select", "tool_calls": [{ "tool": "rank" }] });
        let records = extract_decisions(&run(json!([event.clone(), event]))).expect("extract");
        assert_ne!(records[0].decision_id, records[1].decision_id);
        assert_eq!(records[0].inputs_digest, records[1].inputs_digest);
    }

    #[test]
    fn test_output_change_changes_id() {
        let a = run(json!([{ "decision_type": "s", "tool_calls": [{ "tool": "t", "output": 1 }] }]));
        let b = run(json!([{ "decision_type": "s", "tool_calls": [{ "tool": "t", "output": 2 }] }]));
        let ra = extract_decisions(&a).expect("extract a");
        let rb = extract_decisions(&b).expect("extract b");
        assert_eq!(ra[0].inputs_digest, rb[0].inputs_digest);
        assert_ne!(ra[0].outputs_digest, rb[0].outputs_digest);
        assert_ne!(ra[0].decision_id, rb[0].decision_id);
    }

    #[test]
    fn test_missing_decision_type_is_malformed() {
        let err = extract_decisions(&run(json!([
            { "decision_type": "ok", "tool_calls": [{ "tool": "t" }] },
            { "decision_type": "  ", "tool_calls": [{ "tool": "t" }] },
        ])))
        .unwrap_err();
        match err {
            EvidenceError::MalformedRun { index, reason } => {
                assert_eq!(index, Some(1));
                assert!(reason.contains("decision_type"));
            }
            other => panic!("expected MalformedRun, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_tool_calls_is_malformed() {
        let err = extract_decisions(&run(json!([{ "decision_type": "s" }]))).unwrap_err();
        assert!(matches!(err, EvidenceError::MalformedRun { index: Some(0), .. }));
    }

    #[test]
    fn test_jsonl_has_one_line_per_record() {
        let records = extract_decisions(&run(json!([
            { "decision_type": "a", "tool_calls": [{ "tool": "t" }] },
            { "decision_type": "b", "tool_calls": [{ "tool": "t" }] },
        ])))
        .expect("extract");
        let jsonl = render_decisions_jsonl(&records).expect("render");
        assert_eq!(jsonl.lines().count(), 2);
        let first: DecisionRecord = serde_json::from_str(jsonl.lines().next().expect("line"))
            .expect("parse line");
        assert_eq!(first, records[0]);
    }
}
