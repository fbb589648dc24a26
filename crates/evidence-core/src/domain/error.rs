//! Error taxonomy for evidence bundle operations.
//!
//! Fatal conditions only. Evidence gaps (incomplete provenance) and failed
//! verifications are reported as data, never raised through this type.

use std::path::PathBuf;

/// Errors produced by the canonical serializer.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("floating-point value at {path} is not permitted in a hashed record")]
    FloatInHashedField { path: String },

    #[error("non-finite number at {path} is not permitted in canonical JSON")]
    NonFinite { path: String },
}

/// Evidence bundle errors.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("malformed campaign run{}: {reason}", fmt_index(.index))]
    MalformedRun {
        index: Option<usize>,
        reason: String,
    },

    #[error("lineage cycle detected: {}", .nodes.join(" -> "))]
    LineageCycle { nodes: Vec<String> },

    #[error("lineage edge references unknown node: {node_id}")]
    InvalidEdge { node_id: String },

    #[error("bundle not found: {}", .path.display())]
    BundleNotFound { path: PathBuf },

    #[error("unknown checklist template '{name}' (available: {})", .available.join(", "))]
    UnknownTemplate {
        name: String,
        available: Vec<String>,
    },

    #[error("output directory is not empty: {} (use overwrite to replace)", .path.display())]
    OutputNotEmpty { path: PathBuf },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported bundle entry {}: {reason}", .path.display())]
    UnsupportedEntry { path: PathBuf, reason: String },

    #[error("canonical serialization error: {0}")]
    Canonical(#[from] CanonicalError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

fn fmt_index(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" (decision event {i})"),
        None => String::new(),
    }
}

impl EvidenceError {
    pub(crate) fn malformed(index: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRun {
            index: Some(index),
            reason: reason.into(),
        }
    }
}

/// Result type for evidence bundle operations.
pub type Result<T> = std::result::Result<T, EvidenceError>;
