//! Bundle directory layout.
//!
//! All paths are bundle-root-relative and use forward slashes on every host.

use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DECISIONS_FILE: &str = "decisions.jsonl";
pub const LINEAGE_FILE: &str = "lineage.json";
pub const CHECKSUMS_FILE: &str = "checksums.sha256";

pub const ARTIFACTS_DIR: &str = "artifacts";
pub const CAMPAIGN_RUN_FILE: &str = "artifacts/campaign_run.json";
pub const DATA_MANIFESTS_DIR: &str = "artifacts/data_manifests";
pub const EXTRAS_DIR: &str = "artifacts/extras";

/// Annotation area written by checklist runs; never checksum-covered.
pub const CHECKLISTS_DIR: &str = "checklists";

/// Files every complete bundle carries.
pub const REQUIRED_FILES: [&str; 5] = [
    MANIFEST_FILE,
    DECISIONS_FILE,
    LINEAGE_FILE,
    CHECKSUMS_FILE,
    CAMPAIGN_RUN_FILE,
];

fn file_name_of(source: &Path) -> String {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string())
}

/// Bundle path of the `index`-th (1-based) copied dataset manifest.
pub fn data_manifest_path(index: usize, source: &Path) -> String {
    format!("{DATA_MANIFESTS_DIR}/manifest_{index:03}_{}", file_name_of(source))
}

/// Bundle path of the `index`-th (1-based) copied extra artifact.
pub fn extra_artifact_path(index: usize, source: &Path) -> String {
    format!("{EXTRAS_DIR}/extra_{index:03}_{}", file_name_of(source))
}

/// Bundle paths of a template's checklist report pair (`.json`, `.md`).
pub fn checklist_paths(template: &str) -> (String, String) {
    (
        format!("{CHECKLISTS_DIR}/{template}.json"),
        format!("{CHECKLISTS_DIR}/{template}.md"),
    )
}

/// Whether a bundle-relative path lies in the checklist annotation area.
pub fn is_annotation(relative_path: &str) -> bool {
    relative_path == CHECKLISTS_DIR
        || relative_path
            .strip_prefix(CHECKLISTS_DIR)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_copy_paths() {
        assert_eq!(
            data_manifest_path(1, Path::new("/tmp/in/chembl.json")),
            "artifacts/data_manifests/manifest_001_chembl.json"
        );
        assert_eq!(
            extra_artifact_path(12, Path::new("report.pdf")),
            "artifacts/extras/extra_012_report.pdf"
        );
    }

    #[test]
    fn test_annotation_area_matches_prefix_only() {
        assert!(is_annotation("checklists/core.json"));
        assert!(is_annotation("checklists"));
        assert!(!is_annotation("checklists.txt"));
        assert!(!is_annotation("artifacts/checklists/core.json"));
    }
}
