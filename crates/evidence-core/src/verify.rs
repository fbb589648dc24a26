//! Integrity verification.
//!
//! Recomputes every file hash under a bundle root and compares against
//! `checksums.sha256`. Pure comparison: nothing is repaired or rewritten.
//! Discrepancies are reported in full, never short-circuited.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum::{hash_file, parse_checksums, scan_bundle_files, BundleFile, MalformedLine};
use crate::domain::error::{EvidenceError, Result};
use crate::layout::CHECKSUMS_FILE;

/// A listed file whose current content no longer matches its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub relative_path: String,
    pub expected: String,
    /// `None` when the entry could not be hashed (symlink, unreadable).
    pub actual: Option<String>,
    pub byte_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub ok: bool,
    pub bundle_dir: PathBuf,
    pub checked_files: usize,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub mismatched: Vec<Mismatch>,
    pub malformed: Vec<MalformedLine>,
}

impl VerificationResult {
    pub fn discrepancy_count(&self) -> usize {
        self.missing.len() + self.extra.len() + self.mismatched.len() + self.malformed.len()
    }
}

/// Verify a bundle against its checksum manifest.
///
/// Fails with [`EvidenceError::BundleNotFound`] when the root or its
/// `checksums.sha256` does not exist. Every other outcome is reported.
pub fn verify_bundle(bundle_dir: &Path) -> Result<VerificationResult> {
    if !bundle_dir.is_dir() {
        return Err(EvidenceError::BundleNotFound {
            path: bundle_dir.to_path_buf(),
        });
    }
    let checksum_path = bundle_dir.join(CHECKSUMS_FILE);
    if !checksum_path.is_file() {
        return Err(EvidenceError::BundleNotFound {
            path: checksum_path,
        });
    }

    let parsed = parse_checksums(&std::fs::read_to_string(&checksum_path)?);
    let scan = scan_bundle_files(bundle_dir)?;
    let on_disk: BTreeMap<String, BundleFile> = scan
        .files
        .into_iter()
        .map(|f| (f.relative_path.clone(), f))
        .collect();

    let mut missing = Vec::new();
    let mut mismatched = Vec::new();
    for (rel, expected) in &parsed.entries {
        let Some(file) = on_disk.get(rel) else {
            missing.push(rel.clone());
            continue;
        };
        if file.is_symlink {
            mismatched.push(Mismatch {
                relative_path: rel.clone(),
                expected: expected.clone(),
                actual: None,
                byte_length: None,
                detail: Some("entry is a symlink".to_string()),
            });
            continue;
        }
        match hash_file(&file.path) {
            Ok((actual, len)) if &actual == expected => {
                tracing::trace!(path = %rel, bytes = len, "checksum ok");
            }
            Ok((actual, len)) => mismatched.push(Mismatch {
                relative_path: rel.clone(),
                expected: expected.clone(),
                actual: Some(actual),
                byte_length: Some(len),
                detail: None,
            }),
            Err(e) => mismatched.push(Mismatch {
                relative_path: rel.clone(),
                expected: expected.clone(),
                actual: None,
                byte_length: None,
                detail: Some(e.to_string()),
            }),
        }
    }

    // Unrepresentable names can never be listed, so they are always extra.
    let mut extra: Vec<String> = on_disk
        .keys()
        .filter(|rel| !parsed.entries.contains_key(*rel))
        .cloned()
        .chain(scan.unsupported.into_iter().map(|u| u.display_path))
        .collect();
    extra.sort();

    let mut result = VerificationResult {
        ok: false,
        bundle_dir: bundle_dir.to_path_buf(),
        checked_files: parsed.entries.len(),
        missing,
        extra,
        mismatched,
        malformed: parsed.malformed,
    };
    result.ok = result.discrepancy_count() == 0;
    crate::obs::emit_verify_completed(bundle_dir, &result);
    Ok(result)
}
