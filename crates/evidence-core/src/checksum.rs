//! Checksum manifest engine.
//!
//! Streams every bundle file through SHA-256 and writes `checksums.sha256`
//! in the `<hex>  <path>` form understood by `sha256sum -c`. The checksum
//! file never covers itself or the `checklists/` annotation area.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::domain::error::{EvidenceError, Result};
use crate::layout::{is_annotation, CHECKSUMS_FILE};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumEntry {
    /// Bundle-root-relative, forward-slash separated.
    pub relative_path: String,
    pub sha256_hex: String,
    pub byte_length: u64,
}

/// Hash a file in fixed-size chunks. Returns `(hex digest, byte length)`.
pub fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// A non-directory entry found under the bundle root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFile {
    pub relative_path: String,
    pub path: PathBuf,
    pub is_symlink: bool,
}

/// Convert a path under `root` into the manifest's relative form.
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| EvidenceError::UnsupportedEntry {
            path: path.to_path_buf(),
            reason: "entry lies outside the bundle root".to_string(),
        })?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| EvidenceError::UnsupportedEntry {
                    path: path.to_path_buf(),
                    reason: "path is not valid UTF-8".to_string(),
                })?;
                if part.contains('\n') || part.contains('\r') {
                    return Err(EvidenceError::UnsupportedEntry {
                        path: path.to_path_buf(),
                        reason: "path contains a line break".to_string(),
                    });
                }
                parts.push(part);
            }
            _ => {
                return Err(EvidenceError::UnsupportedEntry {
                    path: path.to_path_buf(),
                    reason: "path is not a plain relative path".to_string(),
                })
            }
        }
    }
    Ok(parts.join("/"))
}

/// An entry whose name cannot be written to a checksum line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedFile {
    /// Lossy, escaped rendering of the relative path (line breaks as `\n`).
    pub display_path: String,
    pub path: PathBuf,
    pub reason: String,
}

/// Everything found under a bundle root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleScan {
    /// Representable entries, sorted by relative path.
    pub files: Vec<BundleFile>,
    /// Entries with non-UTF-8 or multi-line names, sorted by display path.
    pub unsupported: Vec<UnsupportedFile>,
}

/// Relative path for messages and reports; never fails.
pub fn display_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| {
            c.as_os_str()
                .to_string_lossy()
                .replace('\n', "\\n")
                .replace('\r', "\\r")
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `root` without failing on odd names.
///
/// Skips `checksums.sha256` at the root and the checklist annotation area.
/// Symlinks are reported, never followed.
pub fn scan_bundle_files(root: &Path) -> Result<BundleScan> {
    let mut scan = BundleScan::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() != 1
                || !(entry.file_type().is_dir() && is_annotation(&entry.file_name().to_string_lossy()))
        });
    for entry in walker {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        match relative_path(root, entry.path()) {
            Ok(rel) => {
                if rel == CHECKSUMS_FILE || is_annotation(&rel) {
                    continue;
                }
                scan.files.push(BundleFile {
                    relative_path: rel,
                    path: entry.path().to_path_buf(),
                    is_symlink: file_type.is_symlink(),
                });
            }
            Err(EvidenceError::UnsupportedEntry { path, reason }) => {
                scan.unsupported.push(UnsupportedFile {
                    display_path: display_path(root, &path),
                    path,
                    reason,
                });
            }
            Err(e) => return Err(e),
        }
    }
    scan.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    scan.unsupported.sort_by(|a, b| a.display_path.cmp(&b.display_path));
    Ok(scan)
}

/// List every file and symlink under `root`, sorted by relative path.
///
/// Fails with [`EvidenceError::UnsupportedEntry`] on the first name that
/// cannot appear in a checksum line.
pub fn list_bundle_files(root: &Path) -> Result<Vec<BundleFile>> {
    let scan = scan_bundle_files(root)?;
    if let Some(bad) = scan.unsupported.into_iter().next() {
        return Err(EvidenceError::UnsupportedEntry {
            path: bad.path,
            reason: bad.reason,
        });
    }
    Ok(scan.files)
}

/// Hash every bundle file. Symlinks are refused.
pub fn compute_entries(root: &Path) -> Result<Vec<ChecksumEntry>> {
    list_bundle_files(root)?
        .into_iter()
        .map(|file| {
            if file.is_symlink {
                return Err(EvidenceError::UnsupportedEntry {
                    path: file.path,
                    reason: "symlinks are not permitted in a bundle".to_string(),
                });
            }
            let (sha256_hex, byte_length) = hash_file(&file.path)?;
            Ok(ChecksumEntry {
                relative_path: file.relative_path,
                sha256_hex,
                byte_length,
            })
        })
        .collect()
}

/// Render entries as `<hex>  <path>` lines, sorted by path.
pub fn render_checksums(entries: &[ChecksumEntry]) -> String {
    let mut sorted: Vec<&ChecksumEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    let mut out = String::new();
    for entry in sorted {
        out.push_str(&entry.sha256_hex);
        out.push_str("  ");
        out.push_str(&entry.relative_path);
        out.push('\n');
    }
    out
}

/// Compute and write `checksums.sha256` last, atomically.
pub fn write_checksums(root: &Path) -> Result<Vec<ChecksumEntry>> {
    let entries = compute_entries(root)?;
    write_atomic(root, &root.join(CHECKSUMS_FILE), render_checksums(&entries).as_bytes())?;
    Ok(entries)
}

/// Write a file via a temp file in `dir` and rename it into place.
pub(crate) fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// A checksum line that could not be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedLine {
    pub line_number: usize,
    pub content: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedChecksums {
    /// `relative_path -> lowercase hex digest`
    pub entries: BTreeMap<String, String>,
    pub malformed: Vec<MalformedLine>,
}

/// Parse a checksum file. Accepts `hash  path` (text) and `hash *path`
/// (binary) separators. Blank lines are ignored; duplicates and bad lines are
/// collected, not raised.
pub fn parse_checksums(text: &str) -> ParsedChecksums {
    let mut parsed = ParsedChecksums::default();
    for (i, raw) in text.lines().enumerate() {
        let line_number = i + 1;
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.trim().is_empty() {
            continue;
        }
        let mut reject = |reason: &str| {
            parsed.malformed.push(MalformedLine {
                line_number,
                content: line.to_string(),
                reason: reason.to_string(),
            })
        };

        let (hash, rest) = match line.split_once(' ') {
            Some(parts) => parts,
            None => {
                reject("expected `<sha256>  <path>`");
                continue;
            }
        };
        let path = match rest.strip_prefix(' ').or_else(|| rest.strip_prefix('*')) {
            Some(p) if !p.is_empty() => p,
            _ => {
                reject("expected two spaces or ` *` between digest and path");
                continue;
            }
        };
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            reject("digest is not 64 hex characters");
            continue;
        }
        if path.starts_with('/') || path.split('/').any(|seg| seg.is_empty() || seg == "..") {
            reject("path is not bundle-relative");
            continue;
        }
        if parsed.entries.contains_key(path) {
            reject("duplicate path");
            continue;
        }
        parsed
            .entries
            .insert(path.to_string(), hash.to_ascii_lowercase());
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::canonical::sha256_hex;

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, bytes).expect("write");
    }

    #[test]
    fn test_hash_file_streams_large_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = vec![0x5Au8; CHUNK_SIZE * 3 + 17];
        write(dir.path(), "big.bin", &data);
        let (hex, len) = hash_file(&dir.path().join("big.bin")).expect("hash");
        assert_eq!(len, data.len() as u64);
        assert_eq!(hex, sha256_hex(&data));
    }

    #[test]
    fn test_entries_sorted_and_exclude_checksums_and_checklists() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "manifest.json", b"{}");
        write(dir.path(), "artifacts/b.txt", b"b");
        write(dir.path(), "artifacts/a.txt", b"a");
        write(dir.path(), "checksums.sha256", b"stale");
        write(dir.path(), "checklists/core.json", b"{}");

        let entries = compute_entries(dir.path()).expect("entries");
        let paths: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, ["artifacts/a.txt", "artifacts/b.txt", "manifest.json"]);
        assert_eq!(entries[0].byte_length, 1);
    }

    #[test]
    fn test_write_checksums_does_not_cover_itself() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "decisions.jsonl", b"{}\n");
        write_checksums(dir.path()).expect("write");
        let text = std::fs::read_to_string(dir.path().join(CHECKSUMS_FILE)).expect("read");
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with("  decisions.jsonl\n"));
        // Re-running is stable: the checksum file is excluded from the walk.
        write_checksums(dir.path()).expect("rewrite");
        let again = std::fs::read_to_string(dir.path().join(CHECKSUMS_FILE)).expect("read");
        assert_eq!(text, again);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "real.txt", b"x");
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .expect("symlink");
        let err = compute_entries(dir.path()).unwrap_err();
        assert!(matches!(err, EvidenceError::UnsupportedEntry { .. }));
    }

    #[test]
    fn test_parse_accepts_text_and_binary_separators() {
        let a = "a".repeat(64);
        let b = "B".repeat(64);
        let parsed = parse_checksums(&format!("{a}  one.txt\n{b} *dir/two.bin\n\n"));
        assert!(parsed.malformed.is_empty());
        assert_eq!(parsed.entries["one.txt"], a);
        assert_eq!(parsed.entries["dir/two.bin"], "b".repeat(64));
    }

    #[test]
    fn test_parse_collects_malformed_and_duplicate_lines() {
        let h = "0".repeat(64);
        let parsed = parse_checksums(&format!(
            "{h}  x.txt\nnot-a-line\n{h}  x.txt\nabc  y.txt\n{h}  ../escape\n"
        ));
        assert_eq!(parsed.entries.len(), 1);
        let lines: Vec<usize> = parsed.malformed.iter().map(|m| m.line_number).collect();
        assert_eq!(lines, [2, 3, 4, 5]);
    }

    #[test]
    fn test_render_is_sha256sum_compatible() {
        let entries = vec![
            ChecksumEntry {
                relative_path: "z.txt".into(),
                sha256_hex: "1".repeat(64),
                byte_length: 1,
            },
            ChecksumEntry {
                relative_path: "a b.txt".into(),
                sha256_hex: "2".repeat(64),
                byte_length: 2,
            },
        ];
        let text = render_checksums(&entries);
        assert_eq!(
            text,
            format!("{}  a b.txt\n{}  z.txt\n", "2".repeat(64), "1".repeat(64))
        );
        let parsed = parse_checksums(&text);
        assert_eq!(parsed.entries.len(), 2);
    }
}
