use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use panel_extractor::cli::{Args, BrowseOpts, Commands, ConsolidateOpts, RunOpts};
use panel_extractor::cloud::{client::create_s3_client, lister::list_folders, s3::S3ObjectStore};
use panel_extractor::config::{
    load_or_default_settings, validate_session_id, CategorySet, ExtensionRules, PipelineConfig,
    PipelineSettings, SessionLayout,
};
use panel_extractor::pipeline::{run_consolidation, run_pipeline};
use panel_extractor::redaction::CommandAnnotator;

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    let settings = load_or_default_settings(args.config.as_deref())?;

    match &args.command {
        Commands::Run(opts) => handle_run(settings, opts),
        Commands::Consolidate(opts) => handle_consolidate(&settings, opts),
        Commands::Browse(opts) => handle_browse(&settings, opts),
        Commands::InitConfig { path } => {
            info!("Creating default settings file at {}", path.display());
            PipelineSettings::default().save_to_yaml_file(path)?;
            info!("Settings created successfully");
            Ok(())
        }
    }
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ).context("Failed to initialize logger")?;
    Ok(())
}

fn handle_run(mut settings: PipelineSettings, opts: &RunOpts) -> Result<()> {
    opts.apply_to(&mut settings);
    let config = PipelineConfig::from_settings(&settings, &opts.run_parameters(), Utc::now())
        .context("Invalid configuration")?;

    info!(
        "Starting session {}: s3://{}/{} from {} to {}",
        config.session_id,
        config.bucket,
        config.path,
        config.window.start.to_rfc3339(),
        config.window.end.to_rfc3339()
    );

    let client = create_s3_client(config.region.as_deref(), config.profile.as_deref())?;
    let store = Arc::new(S3ObjectStore::new(client));
    let annotator = Arc::new(CommandAnnotator::from_command(&config.annotator_command)?);

    let outcome = run_pipeline(&config, store, annotator)?;

    info!(
        "Session {} finished: {} objects listed, {} downloaded, {} files extracted, {} consolidated outputs",
        config.session_id,
        outcome.download.total,
        outcome.download.downloaded,
        outcome.expansion.total_extracted(),
        outcome.consolidation.output_count()
    );

    let failures = outcome.failure_count();
    if failures > 0 {
        warn!("See {} for the failed units", outcome.summary_path.display());
        bail!(
            "{} units failed; re-run with --session-id {} to resume",
            failures,
            config.session_id
        );
    }
    Ok(())
}

fn handle_consolidate(settings: &PipelineSettings, opts: &ConsolidateOpts) -> Result<()> {
    let session_id = validate_session_id(opts.session_id.trim())?;
    let layout = SessionLayout::new(&opts.output_dir, session_id);
    let categories = CategorySet::new(&settings.categories)?;
    let extensions = ExtensionRules::new(&settings.tabular_extensions, &settings.image_extensions)?;
    let extension = settings.consolidated_extension.trim().trim_start_matches('.');

    let report = run_consolidation(&layout, &categories, &extensions, extension)?;
    info!("Wrote {} consolidated files", report.output_count());

    if report.failure_count() > 0 {
        bail!("{} consolidation groups failed", report.failure_count());
    }
    Ok(())
}

fn handle_browse(settings: &PipelineSettings, opts: &BrowseOpts) -> Result<()> {
    let bucket = opts.bucket.as_deref().unwrap_or(&settings.bucket);
    let region = opts.region.as_deref().or(settings.region.as_deref());
    let profile = opts.profile.as_deref().or(settings.profile.as_deref());

    let client = create_s3_client(region, profile)?;
    let store = S3ObjectStore::new(client);
    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;

    let folders = runtime
        .block_on(list_folders(&store, bucket, &opts.path))
        .context(format!("Failed to list s3://{}/{}", bucket, opts.path))?;

    if folders.is_empty() {
        info!("No folders under s3://{}/{}", bucket, opts.path);
    }
    for folder in folders {
        println!("{}", folder);
    }
    Ok(())
}
