//! CLI commands implementation

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use voxrun_core::{JobDescriptor, JobInputs, VoxrunConfig};
use voxrun_runner::{JobRunner, RunObserver, RunOutcome, RunReport};
use voxrun_runtime::{ContainerGateway, DockerCli};
use voxrun_store::{MaterializedResult, ModelCatalog, DEFAULT_CLASS_THRESHOLD};

/// Arguments of `voxrun run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Catalog model to run
    #[arg(long, conflicts_with = "job", required_unless_present = "job")]
    pub model: Option<String>,

    /// Job descriptor file (TOML) instead of a catalog model
    #[arg(long)]
    pub job: Option<PathBuf>,

    /// Input volume, as NAME=PATH
    #[arg(long = "input", value_parser = parse_assignment)]
    pub inputs: Vec<(String, String)>,

    /// Parameter value, as NAME=VALUE
    #[arg(long = "param", value_parser = parse_assignment)]
    pub params: Vec<(String, String)>,

    /// Pass the GPU through to the container
    #[arg(long)]
    pub gpu: bool,

    /// Threshold for probability volumes
    #[arg(long, default_value_t = DEFAULT_CLASS_THRESHOLD)]
    pub threshold: f32,
}

/// Parse a `NAME=VALUE` pair
pub fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() && !value.is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

/// Observer printing container output to the terminal
pub struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn on_progress(&self, value: f64) {
        eprint!("\rprogress {:.2}", value);
    }

    fn on_log(&self, line: &str) {
        eprint!("\r");
        println!("{}", line);
    }
}

fn gateway(config: &VoxrunConfig) -> Arc<DockerCli> {
    Arc::new(DockerCli::new(config.runtime.clone()))
}

/// Check the container runtime
pub async fn check(config: &VoxrunConfig) -> Result<()> {
    let docker = gateway(config);

    println!("Runtime: {}", docker.executable().display());
    let version = docker.runtime_version().await?;
    println!("Version: {}", version);
    if !version.starts_with("Docker version") {
        eprintln!("Warning: unexpected version banner");
    }

    if docker.is_daemon_available().await? {
        println!("Daemon: running");
    } else {
        anyhow::bail!("Container daemon is not running");
    }

    println!("Staging: {}", config.staging.root.display());
    println!("Models: {}", config.catalog.models_dir.display());
    Ok(())
}

/// Pull an image, by reference or catalog model name
pub async fn pull(config: &VoxrunConfig, image: String) -> Result<()> {
    let catalog = ModelCatalog::new(&config.catalog.models_dir);
    let image = resolve_image(&catalog, image)?;

    let docker = gateway(config);
    if !docker.is_daemon_available().await? {
        anyhow::bail!("Container daemon is not running");
    }
    if docker.ensure_image_present(&image).await? {
        println!("Image '{}' is available", image);
        Ok(())
    } else {
        anyhow::bail!("Image '{}' could not be downloaded", image)
    }
}

/// Image of the catalog model `name`, or `name` itself when no model matches
fn resolve_image(catalog: &ModelCatalog, name: String) -> Result<String> {
    match catalog.find(&name) {
        Ok(Some(manifest)) => Ok(manifest.image),
        Ok(None) => Ok(name),
        Err(e) => {
            warn!(model = %name, error = %e, "Unreadable model manifest");
            Err(e).with_context(|| format!("Failed to load model '{}'", name))
        }
    }
}

/// List catalog models
pub fn models(config: &VoxrunConfig) -> Result<()> {
    let catalog = ModelCatalog::new(&config.catalog.models_dir);
    let models = catalog.list()?;

    if models.is_empty() {
        println!("No models in {}", catalog.base_path().display());
        return Ok(());
    }

    println!("{:<24} {:<14} {:<40} DESCRIPTION", "NAME", "TASK", "IMAGE");
    for model in models {
        println!(
            "{:<24} {:<14} {:<40} {}",
            model.name,
            model.task.as_str(),
            model.image,
            model.description
        );
    }
    Ok(())
}

/// Run a job and print its results
pub async fn run(config: &VoxrunConfig, args: RunArgs) -> Result<()> {
    let job = load_job(config, &args)?;

    let mut inputs = JobInputs::new();
    for (name, path) in &args.inputs {
        inputs = inputs.with_volume(name, path);
    }
    for (name, value) in &args.params {
        inputs = inputs.with_parameter(name, value);
    }

    let runner = JobRunner::new(gateway(config), config)?;
    let handle = runner.start(job, inputs, Arc::new(ConsoleObserver)).await?;

    let cancel = handle.cancellation();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    let report = handle.wait().await?;
    interrupt.abort();
    eprintln!();

    print_report(&report, args.threshold);
    match report.outcome {
        RunOutcome::Failed(e) => Err(e).context("Run failed"),
        _ => Ok(()),
    }
}

fn load_job(config: &VoxrunConfig, args: &RunArgs) -> Result<JobDescriptor> {
    let job = match (&args.job, &args.model) {
        (Some(path), _) => JobDescriptor::from_file(path)
            .with_context(|| format!("Failed to load job {}", path.display()))?,
        (None, Some(model)) => ModelCatalog::new(&config.catalog.models_dir)
            .load(model)?
            .to_descriptor(args.gpu),
        (None, None) => anyhow::bail!("Either --model or --job is required"),
    };
    Ok(if args.gpu { job.with_accelerator(true) } else { job })
}

fn print_report(report: &RunReport, threshold: f32) {
    println!("Run {}: {}", report.run_id, report.state);
    println!(
        "  Lines: {}  Elapsed: {}s",
        report.lines,
        report.elapsed().num_seconds()
    );

    let Some(outputs) = report.outcome.outputs() else {
        return;
    };
    for entry in &outputs.entries {
        match &entry.result {
            Ok(result) => println!("  {}: {}", entry.name, describe(result, threshold)),
            Err(e) => println!("  {}: unavailable ({})", entry.name, e),
        }
    }
}

fn describe(result: &MaterializedResult, threshold: f32) -> String {
    match result {
        MaterializedResult::Volume(volume) => {
            let mut text = format!("volume {:?} from {}", volume.shape(), volume.path.display());
            if volume.segments.is_empty() {
                let selected = volume.threshold(threshold).iter().filter(|v| **v > 0).count();
                text.push_str(&format!(", {} voxels >= {}", selected, threshold));
            } else {
                let names: Vec<String> = volume
                    .segments
                    .iter()
                    .map(|s| format!("{}={}", s.label, s.name))
                    .collect();
                text.push_str(&format!(", segments [{}]", names.join(", ")));
            }
            text
        }
        MaterializedResult::PointSet(points) => format!("{} points", points.len()),
        MaterializedResult::Text(text) => text.trim().to_string(),
    }
}
