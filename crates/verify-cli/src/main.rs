//! verify - build verification for Rust projects
//!
//! ## Commands
//!
//! - `run`: run a pipeline against a checkout and gate on the result
//! - `validate`: check a pipeline file without running it
//! - `init`: write the reference pipeline to disk

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

use toolchain_provisioner::{RustupSource, ToolchainProvisioner};
use verify_ci::{
    cancellation, load_pipeline, EventDescriptor, EventKind, Orchestrator, OverallStatus,
    PipelineConfig, PipelineDefinition, RunReport, ShellExecutor,
};

const DEFAULT_PIPELINE_PATH: &str = ".verify/pipeline.toml";

#[derive(Parser)]
#[command(name = "verify")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run build-verification pipelines on isolated toolchains", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline against a checkout
    Run {
        /// Pipeline file (default: the builtin Rust pipeline)
        #[arg(short, long, env = "VERIFY_PIPELINE")]
        pipeline: Option<PathBuf>,

        /// Checkout to verify
        #[arg(short, long, env = "VERIFY_CHECKOUT", default_value = ".")]
        checkout: PathBuf,

        /// Event that triggered the run
        #[arg(long, value_enum, default_value_t = EventArg::Push)]
        event: EventArg,

        /// Git ref of the event (default: the checkout's current branch)
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Event metadata as key=value (repeatable)
        #[arg(long = "meta", value_parser = parse_meta)]
        metadata: Vec<(String, String)>,

        /// Timeout for jobs that do not set their own
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write the run report as JSON
        #[arg(long)]
        report_json: Option<PathBuf>,

        /// Write a markdown summary
        #[arg(long)]
        summary_md: Option<PathBuf>,
    },

    /// Validate a pipeline file
    Validate {
        /// Pipeline file to check
        #[arg(default_value = DEFAULT_PIPELINE_PATH)]
        file: PathBuf,
    },

    /// Write the reference Rust pipeline
    Init {
        /// Output path
        #[arg(short, long, default_value = DEFAULT_PIPELINE_PATH)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EventArg {
    Push,
    PullRequest,
}

impl From<EventArg> for EventKind {
    fn from(arg: EventArg) -> Self {
        match arg {
            EventArg::Push => EventKind::Push,
            EventArg::PullRequest => EventKind::PullRequest,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    verify_ci::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            pipeline,
            checkout,
            event,
            git_ref,
            metadata,
            timeout_secs,
            report_json,
            summary_md,
        } => {
            let git_ref = git_ref.unwrap_or_else(|| current_ref(&checkout));
            let trigger = metadata.into_iter().fold(
                EventDescriptor::new(event.into(), git_ref),
                |trigger, (key, value)| trigger.with_metadata(key, value),
            );
            cmd_run(
                pipeline.as_deref(),
                &checkout,
                trigger,
                timeout_secs,
                report_json.as_deref(),
                summary_md.as_deref(),
            )
            .await
        }
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Init { output, force } => cmd_init(&output, force),
    }
}

async fn cmd_run(
    pipeline_path: Option<&Path>,
    checkout: &Path,
    trigger: EventDescriptor,
    timeout_secs: Option<u64>,
    report_json: Option<&Path>,
    summary_md: Option<&Path>,
) -> Result<()> {
    let pipeline = match pipeline_path {
        Some(path) => load_pipeline(path)?,
        None => PipelineDefinition::default_rust(),
    };
    anyhow::ensure!(
        checkout.is_dir(),
        "checkout {} is not a directory",
        checkout.display()
    );

    let source = RustupSource::from_env().context("failed to set up toolchain source")?;
    let mut orchestrator = Orchestrator::new(
        ToolchainProvisioner::new(Arc::new(source)),
        Arc::new(ShellExecutor::new()),
        checkout,
    );
    if let Some(secs) = timeout_secs {
        orchestrator = orchestrator.with_default_timeout(Duration::from_secs(secs));
    }

    let (cancel, signal) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    println!("Running pipeline '{}' on {}", pipeline.name(), checkout.display());
    println!("Trigger: {}", trigger);
    println!("Jobs: {}", pipeline.job_count());
    println!();

    let report = orchestrator.run_with_cancel(&pipeline, trigger, signal).await;

    if let Some(path) = report_json {
        verify_ci::write_report_json(path, &report)?;
        info!(path = %path.display(), "wrote run report");
    }
    if let Some(path) = summary_md {
        verify_ci::write_summary_md(path, &report)?;
        info!(path = %path.display(), "wrote summary");
    }

    info!(summary = %report, "run complete");
    print_report(&report);

    if report.cancelled() {
        anyhow::bail!("run cancelled");
    }
    if report.overall_status() == OverallStatus::Failed {
        anyhow::bail!("verification failed");
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run ID: {}", report.run_id());

    if report.overall_status() == OverallStatus::NotTriggered {
        println!("Status: not triggered");
        return;
    }

    let status = if report.is_success() {
        "✓ PASSED"
    } else {
        "✗ FAILED"
    };
    println!("Status: {}", status);
    println!("Duration: {}ms", report.duration_ms());
    println!();

    for result in report.results() {
        let mark = if result.passed() { "✓" } else { "✗" };
        let exit_code = result
            .exit_code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} {} [{}] {} ({}ms, exit code: {})",
            mark,
            result.job_name(),
            result.toolchain().unwrap_or("-"),
            result.status(),
            result.duration_ms(),
            exit_code
        );
    }

    println!();
    println!(
        "Summary: {}/{} jobs passed",
        report.passed_count(),
        report.results().len()
    );

    let verdict = report.verdict();
    for violation in &verdict.violations {
        println!("  ✗ {}", violation);
    }
    for warning in &verdict.warnings {
        println!("  ! {}", warning);
    }
    println!("Gate: {}", verdict.message);
}

fn cmd_validate(file: &Path) -> Result<()> {
    let pipeline = load_pipeline(file)?;

    println!("✓ {} is valid", file.display());
    println!("Pipeline: {}", pipeline.name());
    println!("Digest: {}", pipeline.digest());
    for job in pipeline.jobs() {
        println!(
            "  - {} ({}, {}): {}",
            job.name(),
            job.toolchain(),
            job.fail_policy().name(),
            job.command()
        );
    }
    Ok(())
}

fn cmd_init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    PipelineConfig::from(&PipelineDefinition::default_rust()).save_to(output)?;
    println!("✓ Wrote reference pipeline to {}", output.display());
    Ok(())
}

/// Current branch of the checkout, or `HEAD` when detached or not a repo.
fn current_ref(checkout: &Path) -> String {
    std::process::Command::new("git")
        .args(["symbolic-ref", "-q", "HEAD"])
        .current_dir(checkout)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "HEAD".to_string())
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
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
    fn test_parse_meta() {
        assert_eq!(
            parse_meta("sha=abc123").unwrap(),
            ("sha".to_string(), "abc123".to_string())
        );
        assert_eq!(
            parse_meta("title=a=b").unwrap(),
            ("title".to_string(), "a=b".to_string())
        );
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=value").is_err());
    }

    #[test]
    fn test_run_args_parse() {
        let cli = Cli::try_parse_from([
            "verify",
            "run",
            "--event",
            "pull-request",
            "--ref",
            "refs/pull/3/merge",
            "--meta",
            "pr=3",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                event,
                git_ref,
                metadata,
                ..
            } => {
                assert_eq!(EventKind::from(event), EventKind::PullRequest);
                assert_eq!(git_ref.as_deref(), Some("refs/pull/3/merge"));
                assert_eq!(metadata, vec![("pr".to_string(), "3".to_string())]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_init_then_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");

        cmd_init(&path, false).unwrap();
        assert!(cmd_init(&path, false).is_err());
        cmd_init(&path, true).unwrap();
        cmd_validate(&path).unwrap();
    }

    #[test]
    fn test_current_ref_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(current_ref(dir.path()), "HEAD");
    }
}
