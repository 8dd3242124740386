use clap::{Parser, Subcommand, Args as ClapArgs};
use std::path::PathBuf;

use crate::config::{PipelineSettings, RedactionMode, RunParameters};

/// Command-line arguments for the panel-extractor tool.
///
/// Global options come first; the work itself is selected by a subcommand.
/// Values given here override the settings file.
#[derive(Parser, Debug)]
#[clap(name = "panel-extractor", about = "Resumable extraction, face redaction and CSV consolidation of panelist archives")]
pub struct Args {
    /// Verbose logging
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Path to settings YAML file
    #[clap(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommands
    #[clap(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List, download, expand, redact and consolidate a session
    Run(RunOpts),

    /// Re-run consolidation over an existing session's extracted files
    Consolidate(ConsolidateOpts),

    /// List the immediate sub-folders of a bucket path
    Browse(BrowseOpts),

    /// Create a default settings file
    InitConfig {
        /// Path to output settings file
        #[clap(default_value = "panel-extractor.yaml")]
        path: PathBuf,
    },
}

/// Options for the run subcommand.
#[derive(ClapArgs, Debug, Default)]
pub struct RunOpts {
    /// S3 bucket holding the archives
    #[clap(short, long)]
    pub bucket: Option<String>,

    /// Object path (prefix) to list, e.g. academia/tenant/<tenant>/panelist/<id>/
    #[clap(short, long)]
    pub path: Option<String>,

    /// Start of the modification window (YYYY-MM-DD or RFC 3339; default: one year ago)
    #[clap(long)]
    pub start: Option<String>,

    /// End of the modification window, inclusive (YYYY-MM-DD or RFC 3339; default: now)
    #[clap(long)]
    pub end: Option<String>,

    /// Objects per download batch
    #[clap(long)]
    pub batch_size: Option<usize>,

    /// Concurrent download batches
    #[clap(short, long)]
    pub workers: Option<usize>,

    /// Concurrent entity expansions (default: number of CPUs)
    #[clap(long)]
    pub extract_workers: Option<usize>,

    /// How detected faces are redacted
    #[clap(long, value_enum)]
    pub redaction: Option<RedactionMode>,

    /// Face annotator command line, split on whitespace
    #[clap(long)]
    pub annotator: Option<String>,

    /// Resume an existing session instead of starting a new one
    #[clap(long)]
    pub session_id: Option<String>,

    /// Directory holding session directories
    #[clap(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// AWS region
    #[clap(long)]
    pub region: Option<String>,

    /// AWS profile
    #[clap(long)]
    pub profile: Option<String>,

    /// Keep downloaded and extracted files after a successful run
    #[clap(long)]
    pub keep_intermediate: bool,
}

impl RunOpts {
    /// Overlay command-line values on loaded settings
    pub fn apply_to(&self, settings: &mut PipelineSettings) {
        if let Some(bucket) = &self.bucket {
            settings.bucket = bucket.clone();
        }
        if let Some(path) = &self.path {
            settings.path = Some(path.clone());
        }
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            settings.download_workers = workers;
        }
        if let Some(workers) = self.extract_workers {
            settings.extract_workers = Some(workers);
        }
        if let Some(mode) = self.redaction {
            settings.redaction_mode = mode;
        }
        if let Some(command) = &self.annotator {
            settings.annotator_command = command.split_whitespace().map(str::to_string).collect();
        }
        if self.region.is_some() {
            settings.region = self.region.clone();
        }
        if self.profile.is_some() {
            settings.profile = self.profile.clone();
        }
    }

    pub fn run_parameters(&self) -> RunParameters {
        RunParameters {
            session_id: self.session_id.clone(),
            output_dir: self.output_dir.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
            keep_intermediate: self.keep_intermediate,
        }
    }
}

/// Options for the consolidate subcommand.
#[derive(ClapArgs, Debug)]
pub struct ConsolidateOpts {
    /// Session to consolidate
    #[clap(long)]
    pub session_id: String,

    /// Directory holding session directories
    #[clap(short, long, default_value = ".")]
    pub output_dir: PathBuf,
}

/// Options for the browse subcommand.
#[derive(ClapArgs, Debug)]
pub struct BrowseOpts {
    /// S3 bucket to browse
    #[clap(short, long)]
    pub bucket: Option<String>,

    /// Path whose sub-folders are listed
    #[clap(short, long, default_value = "")]
    pub path: String,

    /// AWS region
    #[clap(long)]
    pub region: Option<String>,

    /// AWS profile
    #[clap(long)]
    pub profile: Option<String>,
}
