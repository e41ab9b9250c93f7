use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use clap::Subcommand;
use serde_json::to_writer_pretty;
use tinypipeline::observability::log_snapshot;
use tinypipeline::validation::validate_manifest;
use tinypipeline::{PipelineManifest, StepRegistry};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Run {
            manifest,
            dry_run,
            print_metrics,
            report_json,
            metrics_json,
            metrics_prometheus,
        } => run_manifest(
            manifest,
            dry_run,
            print_metrics,
            report_json,
            metrics_json,
            metrics_prometheus,
        ),
        Commands::Order { manifest } => print_order(manifest),
        Commands::Validate { manifest } => validate_manifest_cmd(manifest),
        Commands::ListSteps { manifest } => list_steps(manifest),
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn build_registry() -> StepRegistry {
    StepRegistry::new()
}

fn run_manifest(
    manifest_path: PathBuf,
    dry_run: bool,
    print_metrics: bool,
    report_json: Option<PathBuf>,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
) -> Result<()> {
    let manifest = PipelineManifest::load(&manifest_path)?;
    let registry = build_registry();
    let pipeline = manifest.into_pipeline(&registry);

    if dry_run {
        let order = pipeline.order()?;
        info!(
            pipeline = pipeline.name(),
            "Loaded pipeline with {} step(s): {}",
            order.len(),
            order.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
        );
        return Ok(());
    }

    let metrics_handle = pipeline.metrics();
    let outcome = pipeline.execute();

    if print_metrics || metrics_json.is_some() || metrics_prometheus.is_some() {
        let snapshot = metrics_handle.snapshot();
        if print_metrics {
            log_snapshot(&snapshot);
        }
        if let Some(path) = metrics_json {
            create_parent(&path)?;
            let file = File::create(&path)
                .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
            to_writer_pretty(file, &snapshot)
                .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
            info!(metrics = %path.display(), "Metrics JSON written");
        }
        if let Some(path) = metrics_prometheus {
            create_parent(&path)?;
            std::fs::write(&path, snapshot.to_prometheus()).with_context(|| {
                format!("Failed to write Prometheus metrics: {}", path.display())
            })?;
            info!(metrics = %path.display(), "Prometheus metrics written");
        }
    }

    let report = outcome.with_context(|| format!("Pipeline {} failed", pipeline.name()))?;
    info!(
        pipeline = report.pipeline.as_str(),
        steps = report.steps.len(),
        "Pipeline completed"
    );

    if let Some(path) = report_json {
        create_parent(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        to_writer_pretty(file, &report)
            .with_context(|| format!("Failed to write run report: {}", path.display()))?;
        info!(report = %path.display(), "Run report written");
    }

    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn print_order(manifest_path: PathBuf) -> Result<()> {
    let manifest = PipelineManifest::load(&manifest_path)?;
    let pipeline = manifest.into_pipeline(&build_registry());
    let order = pipeline
        .order()
        .with_context(|| format!("Failed to resolve step order for {}", pipeline.name()))?;
    for (idx, step) in order.iter().enumerate() {
        println!("{}. {} ({})", idx + 1, step.name(), step.version());
    }
    Ok(())
}

fn validate_manifest_cmd(manifest_path: PathBuf) -> Result<()> {
    let manifest = PipelineManifest::load(&manifest_path)?;
    let registry = build_registry();
    let report = validate_manifest(&manifest, &registry);

    for warning in &report.warnings {
        warn!(file = %manifest_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %manifest_path.display(), "Manifest validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %manifest_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Manifest validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn list_steps(manifest_path: PathBuf) -> Result<()> {
    let manifest = PipelineManifest::load(&manifest_path)?;
    println!("Steps defined in {}:", manifest.name);
    for (name, spec) in &manifest.definitions {
        if spec.description.is_empty() {
            println!("- {name} ({})", spec.version);
        } else {
            println!("- {name} ({}): {}", spec.version, spec.description);
        }
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "tinypipeline",
    version,
    about = "Run linear and dependency-graph step pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every step of a manifest, stopping at the first failure.
    Run {
        manifest: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "report-json")]
        report_json: Option<PathBuf>,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long = "metrics-prometheus")]
        metrics_prometheus: Option<PathBuf>,
    },
    /// Print the resolved execution order.
    Order { manifest: PathBuf },
    Validate { manifest: PathBuf },
    ListSteps { manifest: PathBuf },
}
