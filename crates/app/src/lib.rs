use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use t2o_core::archive::archive_concatenated;
use t2o_core::artifacts::ArtifactWriter;
use t2o_core::backend::ExecutionDevice;
use t2o_core::config::{
    config_path, data_dir, initialize_data_dir, resolve_relative_to, AppConfig,
};
use t2o_core::dataset::ManifestDataset;
use t2o_core::logging::{self, FileSinkPlan, LoggingInitOptions, DEFAULT_LOG_FILTER};
use t2o_core::observer::L1DistanceObserver;
use t2o_core::onnx_policy::OnnxPolicy;
use t2o_core::pipeline::{EditPipeline, PipelineSettings, RunSummary, SUMMARY_FILE_NAME};
use t2o_core::policy::TrajectoryRunner;
use t2o_core::vocab::Vocabulary;

#[derive(Parser)]
#[command(
    name = "t2o",
    about = "Evaluate instruction-driven image editing policies"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Edit every manifest image with its own instruction and save comparisons.
    Infer(EvalArgs),
    /// Measure how much the final edit changes across paraphrased prompts.
    Variance(EvalArgs),
    /// Zip the first comparison images of a results directory.
    Archive(ArchiveArgs),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Infer(_) => "infer",
            Self::Variance(_) => "variance",
            Self::Archive(_) => "archive",
        }
    }
}

#[derive(Args, Debug, Default)]
struct EvalArgs {
    #[arg(long, help = "Manifest JSON overriding paths.manifest")]
    manifest: Option<PathBuf>,
    #[arg(long, help = "Results directory overriding paths.results_dir")]
    results: Option<PathBuf>,
    #[arg(long, help = "Execution device overriding policy.device: cpu, cuda or tensorrt")]
    device: Option<ExecutionDevice>,
    #[arg(long, value_name = "N", help = "Process at most N samples")]
    limit: Option<usize>,
}

#[derive(Args, Debug, Default)]
struct ArchiveArgs {
    #[arg(long)]
    results: Option<PathBuf>,
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
}

/// Filesystem locations for one run. Config paths are relative to the data
/// directory; CLI overrides are taken as given.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RunPaths {
    model: PathBuf,
    trt_cache_dir: PathBuf,
    vocab_dir: PathBuf,
    manifest: PathBuf,
    results_dir: PathBuf,
}

impl RunPaths {
    fn resolve(config: &AppConfig, data_dir: &Path, args: &EvalArgs) -> Self {
        let paths = &config.paths;
        Self {
            model: resolve_relative_to(data_dir, &paths.model_path),
            trt_cache_dir: resolve_relative_to(data_dir, &paths.trt_cache_dir),
            vocab_dir: resolve_relative_to(data_dir, &paths.vocab_dir),
            manifest: args
                .manifest
                .clone()
                .unwrap_or_else(|| resolve_relative_to(data_dir, &paths.manifest)),
            results_dir: args
                .results
                .clone()
                .unwrap_or_else(|| resolve_relative_to(data_dir, &paths.results_dir)),
        }
    }
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    log_startup_metadata(cli.command.name(), &resolved_data_dir);

    if let Err(e) = initialize_data_dir(&resolved_data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }
    let mut config = AppConfig::load_from_path(&config_path(&resolved_data_dir))?;

    match cli.command {
        Commands::Infer(args) => {
            apply_eval_overrides(&mut config, &args);
            config.validate()?;
            run_inference(&config, &resolved_data_dir, &args)
        }
        Commands::Variance(args) => {
            apply_eval_overrides(&mut config, &args);
            config.validate()?;
            run_variance(&config, &resolved_data_dir, &args)
        }
        Commands::Archive(args) => run_archive(&config, &resolved_data_dir, &args),
    }
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let init_options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let init_plan = logging::compose_logging_init_plan(&init_options);
    let filter = init_plan.filters.effective_filter;

    match init_plan.file_sink {
        FileSinkPlan::Ready(ready) => {
            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(parse_env_filter_with_fallback(&filter, "console")),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(ready.appender)
                        .with_filter(parse_env_filter_with_fallback(&filter, "file")),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let attempted_log_dir = fallback
                .attempted_log_dir
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string());
            let reason = fallback.reason;

            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(parse_env_filter_with_fallback(&filter, "console")),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            warn!(
                attempted_log_dir = %attempted_log_dir,
                reason = %reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(command: &str, data_dir: &Path) {
    info!(
        command,
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}

fn apply_eval_overrides(config: &mut AppConfig, args: &EvalArgs) {
    if let Some(device) = args.device {
        config.policy.device = device;
    }
}

fn build_pipeline(
    config: &AppConfig,
    paths: &RunPaths,
    limit: Option<usize>,
) -> Result<EditPipeline<OnnxPolicy>> {
    let vocab = Vocabulary::load(&paths.vocab_dir, &config.vocab.dataset, config.vocab.session)?;
    let policy = OnnxPolicy::load(
        &paths.model,
        config.policy.device,
        Some(paths.trt_cache_dir.as_path()),
    )?;
    info!(
        model = %paths.model.display(),
        device = %policy.device(),
        sampling = %config.policy.sampling,
        "Runner configured"
    );

    let runner = TrajectoryRunner::new(
        policy,
        config.policy.sampling,
        config.policy.encoder_max_len,
    );
    let settings = PipelineSettings {
        end_id: config.policy.end_id,
        batch_size: config.data.batch_size,
        print_every: config.run.print_every,
        limit,
    };
    Ok(EditPipeline::new(
        runner,
        vocab,
        ArtifactWriter::new(&paths.results_dir),
        settings,
    )?)
}

fn run_inference(config: &AppConfig, data_dir: &Path, args: &EvalArgs) -> Result<()> {
    let paths = RunPaths::resolve(config, data_dir, args);
    let dataset = ManifestDataset::load(&paths.manifest, config.data.image_size)?;
    info!(
        manifest = %paths.manifest.display(),
        samples = dataset.len(),
        results = %paths.results_dir.display(),
        "Starting inference"
    );

    let mut pipeline = build_pipeline(config, &paths, args.limit)?;
    let mut observer = L1DistanceObserver::new();
    let summary = pipeline
        .run_inference(dataset.iter(), Some(dataset.len()), &mut observer)?
        .with_distances(observer.init_distance(), observer.distance());

    if let (Some(init), Some(dist)) = (summary.avg_init_l1, summary.avg_l1) {
        info!(init_l1 = init, l1 = dist, "Inference L1 distance");
    }
    write_summary(&summary, &paths.results_dir)
}

fn run_variance(config: &AppConfig, data_dir: &Path, args: &EvalArgs) -> Result<()> {
    let paths = RunPaths::resolve(config, data_dir, args);
    let dataset = ManifestDataset::load(&paths.manifest, config.data.image_size)?;
    info!(
        manifest = %paths.manifest.display(),
        samples = dataset.len(),
        prompts = config.variance.prompts.len(),
        "Starting variance estimation"
    );

    let mut pipeline = build_pipeline(config, &paths, args.limit)?;
    let summary =
        pipeline.run_variance(dataset.iter(), Some(dataset.len()), &config.variance.prompts)?;
    write_summary(&summary, &paths.results_dir)
}

fn run_archive(config: &AppConfig, data_dir: &Path, args: &ArchiveArgs) -> Result<()> {
    let results_dir = args
        .results
        .clone()
        .unwrap_or_else(|| resolve_relative_to(data_dir, &config.paths.results_dir));
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.archive.output.clone());
    let limit = args.limit.unwrap_or(config.archive.limit);

    let archived = archive_concatenated(&results_dir, &output, limit)?;
    if archived.is_empty() {
        warn!(results = %results_dir.display(), "No comparison images found to archive");
    }
    Ok(())
}

fn write_summary(summary: &RunSummary, results_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(results_dir).with_context(|| {
        format!("failed to create results directory: {}", results_dir.display())
    })?;
    let path = results_dir.join(SUMMARY_FILE_NAME);
    summary.save_json(&path)?;
    info!(path = %path.display(), "Wrote run summary");
    Ok(())
}
