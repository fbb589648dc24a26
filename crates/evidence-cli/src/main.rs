//! Evidence bundle CLI
//!
//! The `evidence-bundle` command turns a campaign run into a verifiable
//! evidence bundle and inspects existing bundles.
//!
//! ## Commands
//!
//! - `build`: Assemble a bundle from a campaign run and dataset manifests
//! - `verify`: Re-hash a bundle against its checksum manifest
//! - `summary`: Show identifiers, counts and integrity of a bundle
//! - `checklist`: Evaluate a checklist template against a bundle
//! - `templates`: List the available checklist templates
//!
//! Exit status is `0` on success, `1` when verification or a checklist does
//! not pass, and `2` on any fatal error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use evidence_core::checklist::{all_templates, render_markdown};
use evidence_core::{
    build_bundle, run_checklist, summarize_bundle, verify_bundle, write_report, BuildConfig,
    ChecklistOptions, ModelOverride, VerificationResult,
};

#[derive(Parser)]
#[command(name = "evidence-bundle")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and verify campaign evidence bundles", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and machine-readable command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an evidence bundle from a campaign run
    Build {
        /// Campaign run document (JSON)
        #[arg(long)]
        campaign_run: PathBuf,

        /// Directory the bundle is written to (absent or empty)
        #[arg(long)]
        output_dir: PathBuf,

        /// Dataset manifest to attach (repeatable)
        #[arg(long = "data-manifest")]
        data_manifests: Vec<PathBuf>,

        /// Extra artifact to copy into the bundle (repeatable)
        #[arg(long = "extra-artifact")]
        extra_artifacts: Vec<PathBuf>,

        /// Declared model name, overriding inference
        #[arg(long, env = "EVIDENCE_MODEL_NAME")]
        model_name: Option<String>,

        /// Declared model version
        #[arg(long, env = "EVIDENCE_MODEL_VERSION", requires = "model_name")]
        model_version: Option<String>,

        /// Build nonce (default: the build timestamp)
        #[arg(long, env = "EVIDENCE_BUILD_NONCE")]
        build_nonce: Option<String>,

        /// Source kind recorded in the manifest
        #[arg(long, default_value = evidence_core::bundle::DEFAULT_SOURCE_KIND)]
        source_kind: String,

        /// Checklist template to evaluate after the build (repeatable)
        #[arg(long = "checklist-template")]
        checklist_templates: Vec<String>,

        /// Treat manual-review rules as blocking in build-time checklists
        #[arg(long, env = "EVIDENCE_CHECKLIST_STRICT")]
        checklist_strict: bool,

        /// Skip git facts in execution provenance
        #[arg(long)]
        no_git: bool,

        /// Replace a non-empty output directory
        #[arg(long)]
        overwrite: bool,
    },

    /// Verify a bundle against its checksum manifest
    Verify {
        /// Bundle directory
        #[arg(long)]
        bundle_dir: PathBuf,
    },

    /// Summarize a bundle
    Summary {
        /// Bundle directory
        #[arg(long)]
        bundle_dir: PathBuf,
    },

    /// Evaluate a checklist template against a bundle
    Checklist {
        /// Bundle directory
        #[arg(long)]
        bundle_dir: PathBuf,

        /// Template name
        #[arg(long, default_value = evidence_core::checklist::catalog::CORE)]
        template: String,

        /// Treat manual-review rules as blocking
        #[arg(long, env = "EVIDENCE_CHECKLIST_STRICT")]
        strict: bool,

        /// Print the report without writing it into the bundle
        #[arg(long)]
        no_write: bool,
    },

    /// List available checklist templates
    Templates,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    evidence_core::init_tracing(cli.json, level);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Dispatch a command. `Ok(false)` is a business failure, not an error.
fn run(cli: Cli) -> Result<bool> {
    let json = cli.json;
    match cli.command {
        Commands::Build {
            campaign_run,
            output_dir,
            data_manifests,
            extra_artifacts,
            model_name,
            model_version,
            build_nonce,
            source_kind,
            checklist_templates,
            checklist_strict,
            no_git,
            overwrite,
        } => {
            let mut config = BuildConfig::new(campaign_run, output_dir)
                .with_source_kind(source_kind)
                .with_overwrite(overwrite)
                .with_checklist_strict(checklist_strict)
                .with_git_capture(!no_git);
            for path in data_manifests {
                config = config.with_data_manifest(path);
            }
            for path in extra_artifacts {
                config = config.with_extra_artifact(path);
            }
            for name in checklist_templates {
                config = config.with_checklist(name);
            }
            if let Some(nonce) = build_nonce {
                config = config.with_build_nonce(nonce);
            }
            if let Some(name) = model_name {
                let mut model = ModelOverride::new(name);
                if let Some(version) = model_version {
                    model = model.with_version(version);
                }
                config = config.with_model_override(model);
            }
            cmd_build(&config)
        }
        Commands::Verify { bundle_dir } => cmd_verify(&bundle_dir, json),
        Commands::Summary { bundle_dir } => cmd_summary(&bundle_dir, json),
        Commands::Checklist {
            bundle_dir,
            template,
            strict,
            no_write,
        } => cmd_checklist(&bundle_dir, &template, strict, no_write, json),
        Commands::Templates => cmd_templates(json),
    }
}

fn cmd_build(config: &BuildConfig) -> Result<bool> {
    let report = build_bundle(config).with_context(|| {
        format!(
            "Failed to build bundle from {}",
            config.campaign_run.display()
        )
    })?;
    info!(
        bundle_dir = %report.bundle_dir.display(),
        files = report.checksum_entries,
        "bundle built"
    );
    println!("{}", serde_json::to_string_pretty(&report.manifest)?);

    let passed = report.checklists.iter().all(|c| c.summary.passed);
    for checklist in &report.checklists {
        eprintln!(
            "checklist {}: {} ({} failed, {} manual review)",
            checklist.template,
            verdict(checklist.summary.passed),
            checklist.summary.failed,
            checklist.summary.manual_review_count
        );
    }
    Ok(passed)
}

fn cmd_verify(bundle_dir: &Path, json: bool) -> Result<bool> {
    let result = verify_bundle(bundle_dir)
        .with_context(|| format!("Failed to verify {}", bundle_dir.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_verification(&result));
    }
    Ok(result.ok)
}

fn cmd_summary(bundle_dir: &Path, json: bool) -> Result<bool> {
    let summary = summarize_bundle(bundle_dir)
        .with_context(|| format!("Failed to summarize {}", bundle_dir.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(true);
    }
    println!("Bundle:       {}", summary.bundle_id);
    println!("Campaign run: {}", summary.campaign_run_id);
    println!("Created:      {}", summary.created_at);
    println!(
        "Counts:       {} decisions, {} artifacts, {} models, {} datasets",
        summary.decision_count, summary.artifact_count, summary.model_count, summary.data_count
    );
    println!(
        "Lineage:      {} nodes, {} edges",
        summary.lineage_nodes, summary.lineage_edges
    );
    println!("Warnings:     {}", summary.warning_count);
    println!(
        "Integrity:    {} ({} files checked, {} discrepancies)",
        verdict(summary.verification.ok),
        summary.verification.checked_files,
        summary.verification.discrepancy_count()
    );
    Ok(true)
}

fn cmd_checklist(
    bundle_dir: &Path,
    template: &str,
    strict: bool,
    no_write: bool,
    json: bool,
) -> Result<bool> {
    let options = ChecklistOptions::default().with_strict(strict);
    let report = run_checklist(bundle_dir, template, &options)
        .with_context(|| format!("Failed to evaluate checklist '{template}'"))?;

    if !no_write {
        let (json_path, md_path) = write_report(bundle_dir, &report)
            .with_context(|| format!("Failed to write checklist into {}", bundle_dir.display()))?;
        info!(
            json = %json_path.display(),
            markdown = %md_path.display(),
            "checklist written"
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_markdown(&report));
    }
    Ok(report.summary.passed)
}

fn cmd_templates(json: bool) -> Result<bool> {
    let templates = all_templates();
    if json {
        let listing: Vec<serde_json::Value> = templates
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "version": t.version,
                    "description": t.description,
                    "rules": t.rules.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(true);
    }
    for t in &templates {
        println!(
            "{:<15} v{:<7} {:>3} rules  {}",
            t.name,
            t.version,
            t.rules.len(),
            t.description
        );
    }
    Ok(true)
}

fn verdict(passed: bool) -> &'static str {
    if passed {
        "PASSED"
    } else {
        "FAILED"
    }
}

fn render_verification(result: &VerificationResult) -> String {
    let mut out = format!(
        "Bundle: {}\nStatus: {}\nChecked: {} files\n",
        result.bundle_dir.display(),
        verdict(result.ok),
        result.checked_files
    );
    for path in &result.missing {
        out.push_str(&format!("  missing     {path}\n"));
    }
    for path in &result.extra {
        out.push_str(&format!("  extra       {path}\n"));
    }
    for m in &result.mismatched {
        let actual = m.actual.as_deref().unwrap_or("-");
        out.push_str(&format!(
            "  mismatched  {} (expected {}, actual {})\n",
            m.relative_path, m.expected, actual
        ));
        if let Some(detail) = &m.detail {
            out.push_str(&format!("              {detail}\n"));
        }
    }
    for line in &result.malformed {
        out.push_str(&format!(
            "  malformed   line {}: {}\n",
            line.line_number, line.reason
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_model_version_requires_name() {
        let parsed = Cli::try_parse_from([
            "evidence-bundle",
            "build",
            "--campaign-run",
            "run.json",
            "--output-dir",
            "out",
            "--model-version",
            "1.0",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_render_verification_lists_each_discrepancy() {
        let result = VerificationResult {
            ok: false,
            bundle_dir: PathBuf::from("bundle"),
            checked_files: 3,
            missing: vec!["lineage.json".to_string()],
            extra: vec!["artifacts/stray.txt".to_string()],
            mismatched: vec![evidence_core::Mismatch {
                relative_path: "decisions.jsonl".to_string(),
                expected: "aa".to_string(),
                actual: Some("bb".to_string()),
                byte_length: Some(2),
                detail: None,
            }],
            malformed: Vec::new(),
        };
        let text = render_verification(&result);
        assert!(text.contains("Status: FAILED"));
        assert!(text.contains("missing     lineage.json"));
        assert!(text.contains("extra       artifacts/stray.txt"));
        assert!(text.contains("decisions.jsonl (expected aa, actual bb)"));
    }
}
