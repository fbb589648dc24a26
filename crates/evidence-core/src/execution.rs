//! Execution provenance: where and from what source tree a bundle was built.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub os: String,
    pub arch: String,
    pub family: String,
    pub available_parallelism: Option<usize>,
}

impl RuntimeInfo {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            available_parallelism: std::thread::available_parallelism().ok().map(|n| n.get()),
        }
    }
}

/// Git state of the directory the campaign run was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub available: bool,
    pub commit: Option<String>,
    pub root: Option<String>,
    pub dirty: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    pub name: String,
    pub version: String,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            name: "evidence-core".to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionProvenance {
    pub captured_at: String,
    pub generator: Generator,
    pub runtime: RuntimeInfo,
    pub git: GitInfo,
}

/// Capture runtime facts and, when `git_dir` is given, git facts for it.
pub fn capture_execution_provenance(git_dir: Option<&Path>, captured_at: &str) -> ExecutionProvenance {
    ExecutionProvenance {
        captured_at: captured_at.to_string(),
        generator: Generator::default(),
        runtime: RuntimeInfo::current(),
        git: git_dir.map(capture_git_info).unwrap_or_default(),
    }
}

/// Run a git subcommand in `dir`; `None` when git is missing or the command fails.
fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = match Command::new("git").args(args).current_dir(dir).output() {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(error = %e, "git not runnable");
            return None;
        }
    };
    if !output.status.success() {
        tracing::debug!(
            args = ?args,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git command failed"
        );
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Capture HEAD, work-tree root and dirtiness of the repository containing `dir`.
pub fn capture_git_info(dir: &Path) -> GitInfo {
    let Some(commit) = git_output(dir, &["rev-parse", "HEAD"]).filter(|s| !s.is_empty()) else {
        return GitInfo::default();
    };
    GitInfo {
        available: true,
        commit: Some(commit),
        root: git_output(dir, &["rev-parse", "--show-toplevel"]),
        dirty: git_output(dir, &["status", "--porcelain"]).map(|s| !s.is_empty()),
    }
}
