//! Domain models for evidence bundles.
//!
//! Canonical definitions for the core records:
//! - `DecisionRecord`: one extracted campaign decision with a stable id
//! - `ModelProvenance` / `DatasetProvenance`: provenance attached to decisions
//! - `ProvenanceWarning`: non-fatal evidence gaps recorded for the checklist

pub mod canonical;
pub mod decision;
pub mod error;
pub mod provenance;

pub use canonical::{canonical_json, compute_digest, payload_digest, quantize_floats, sha256_hex};
pub use decision::{DatasetRef, DecisionRecord, ToolCallRef};
pub use error::{CanonicalError, EvidenceError, Result};
pub use provenance::{
    DatasetProvenance, ModelProvenance, ModelSource, ProvenanceIncompleteWarning,
    ProvenanceWarning,
};
