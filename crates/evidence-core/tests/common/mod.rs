#![allow(dead_code)]

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use evidence_core::{build_bundle, BuildConfig, BuildReport, ModelOverride};
use serde_json::{json, Value};

pub const DATASET_SHA: &str = "abc123def4567890abc123def4567890abc123def4567890abc123def4567890";

pub fn fixed_timestamp() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .expect("parse timestamp")
        .with_timezone(&Utc)
}

pub fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(value).expect("encode")).expect("write json");
    path
}

/// Two decisions, each consuming the same dataset; tool outputs carry no model fields.
pub fn scenario_run() -> Value {
    json!({
        "campaign_run_id": "campaign-2024-001",
        "objective": "Rank binders for target X",
        "decisions": [
            {
                "decision_type": "candidate_generation",
                "plan_ref": "plan-a",
                "timestamp": "2024-01-01T00:00:01Z",
                "inputs": { "target": "X", "n": 3 },
                "tool_calls": [
                    { "id": "call-1", "tool": "generate", "args": { "n": 3 },
                      "output": { "candidates": ["c1", "c2", "c3"] } }
                ],
                "datasets": ["chembl"],
                "produces": ["candidates.csv"]
            },
            {
                "decision_type": "candidate_selection",
                "plan_ref": "plan-a",
                "timestamp": "2024-01-01T00:00:02Z",
                "tool_calls": [
                    { "id": "call-2", "tool": "score", "args": { "top_k": 1 },
                      "output": { "best": "c2", "affinity": 0.87 } }
                ],
                "datasets": ["chembl"],
                "consumes": ["candidates.csv"],
                "produces": ["selection.json"]
            }
        ]
    })
}

pub fn dataset_manifest() -> Value {
    json!({
        "dataset_id": "chembl",
        "version": "33",
        "source_url": "https://example.org/chembl/33",
        "sha256": DATASET_SHA,
        "license_name": "CC-BY-SA-3.0"
    })
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub run: PathBuf,
    pub manifest: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_run(scenario_run())
    }

    pub fn with_run(run: Value) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let run = write_json(dir.path(), "campaign_run.json", &run);
        let manifest = write_json(dir.path(), "chembl.json", &dataset_manifest());
        Self { dir, run, manifest }
    }

    pub fn out(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn config(&self, out: &str) -> BuildConfig {
        BuildConfig::new(&self.run, self.out(out))
            .with_data_manifest(&self.manifest)
            .with_build_timestamp(fixed_timestamp())
            .with_build_nonce("nonce-1")
            .with_git_capture(false)
    }

    pub fn build(&self, out: &str) -> BuildReport {
        build_bundle(&self.config(out)).expect("build bundle")
    }

    pub fn build_with_model(&self, out: &str) -> BuildReport {
        let config = self
            .config(out)
            .with_model_override(ModelOverride::new("boltz-2").with_version("2.1.0"));
        build_bundle(&config).expect("build bundle")
    }
}

pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).expect("read file")
}
