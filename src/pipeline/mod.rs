//! The extraction pipeline: list, download, expand, consolidate, clean up.
//!
//! Each stage is a module of its own and can be driven independently; this
//! module wires them together for a full session run.
//!
//! ```text
//!  list_objects_in_window ──▶ download ──▶ expand ──▶ consolidate ──▶ cleanup
//!        (cloud)              (tokio)     (threads)     (rayon)
//! ```
//!
//! Every stage reports per-unit failures instead of aborting, and every stage
//! is idempotent against what is already on disk. Re-running a session with
//! the same id therefore resumes it.

/// Recursive removal of intermediate trees
pub mod cleanup;

/// Per-entity CSV merging by category
pub mod consolidator;

/// Bounded-parallel, resumable batch downloads
pub mod downloader;

/// Archive expansion and image redaction per entity
pub mod expander;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio::runtime::Runtime;

use crate::cloud::lister::list_objects_in_window;
use crate::cloud::store::ObjectStore;
use crate::config::{CategorySet, ExtensionRules, PipelineConfig, QuerySession, SessionLayout};
use crate::models::{ConsolidationReport, DownloadReport, ExpansionReport};
use crate::redaction::{ImageAnnotator, Redactor};
use crate::utils::summary::{create_run_summary, update_consolidation_section};

use cleanup::CleanupOutcome;
use expander::ArchiveExpander;

/// Everything a full run produced
#[derive(Debug)]
pub struct RunOutcome {
    pub session: QuerySession,
    pub download: DownloadReport,
    pub expansion: ExpansionReport,
    pub consolidation: ConsolidationReport,
    pub cleanup: Vec<CleanupOutcome>,
    pub summary_path: PathBuf,
}

impl RunOutcome {
    /// Failed or unfinished units across all stages
    pub fn failure_count(&self) -> usize {
        self.download.failed.len()
            + self.expansion.failure_count()
            + self.consolidation.failure_count()
    }
}

/// Run a full session.
///
/// Listing failures abort the run since nothing downstream can proceed;
/// every later failure is isolated to its unit and reported. Intermediate
/// trees are removed only when no unit failed anywhere, so a re-run with the
/// same session id can pick up the missing pieces.
pub fn run_pipeline(
    config: &PipelineConfig,
    store: Arc<dyn ObjectStore>,
    annotator: Arc<dyn ImageAnnotator>,
) -> Result<RunOutcome> {
    let started_at = Utc::now().to_rfc3339();
    let layout = &config.layout;
    layout.create_dirs()?;
    info!("Session {} at {}", config.session_id, layout.root.display());

    let mut session = QuerySession::new(&config.session_id, config.batch_size, config.download_workers);
    session.save(&layout.session_config_path())?;

    let runtime = Runtime::new().context("Failed to create Tokio runtime")?;

    let objects = runtime
        .block_on(list_objects_in_window(store.as_ref(), &config.bucket, &config.path, &config.window))
        .context(format!("Failed to list s3://{}/{}", config.bucket, config.path))?;
    session.num_files_to_download = objects.len();
    session.save(&layout.session_config_path())?;

    let download = runtime
        .block_on(downloader::download(
            Arc::clone(&store),
            &config.bucket,
            objects,
            config.batch_size,
            config.download_workers,
            &layout.zipped(),
        ))
        .context("Download stage failed")?;
    session.num_files_downloaded = download.completed();
    session.last_batch_begin_id = download.last_batch_begin_key.clone().unwrap_or_default();
    session.save(&layout.session_config_path())?;

    let redactor = Redactor::new(annotator, config.redaction_mode);
    let expansion = ArchiveExpander::new(layout, &config.extensions, &redactor)
        .expand(&layout.zipped(), config.extract_workers)
        .context("Expansion stage failed")?;

    let consolidation = consolidator::consolidate(
        &expansion.tabular_inputs(),
        &config.categories,
        &layout.combined_entities(),
        &config.consolidated_extension,
    );

    let failures = download.failed.len() + expansion.failure_count() + consolidation.failure_count();
    let cleanup = if config.keep_intermediate {
        info!("Keeping intermediate files as requested");
        Vec::new()
    } else if failures > 0 {
        warn!(
            "{} units failed; keeping intermediate files so the session can be resumed with --session-id {}",
            failures, config.session_id
        );
        Vec::new()
    } else {
        cleanup::cleanup_intermediate(layout)
    };

    let summary = create_run_summary(
        &config.session_id,
        &started_at,
        &Utc::now().to_rfc3339(),
        Some(&download),
        Some(&expansion),
        Some(&consolidation),
        &cleanup,
    )?;
    let summary_path = layout.run_summary_path();
    fs::write(&summary_path, summary)
        .context(format!("Failed to write run summary to {}", summary_path.display()))?;
    info!("Run summary written to {}", summary_path.display());

    Ok(RunOutcome {
        session,
        download,
        expansion,
        consolidation,
        cleanup,
        summary_path,
    })
}

/// Re-run consolidation over a session's existing extraction tree.
///
/// An existing `run_summary.json` keeps its download and expansion sections;
/// only the consolidation section is replaced.
pub fn run_consolidation(
    layout: &SessionLayout,
    categories: &CategorySet,
    extensions: &ExtensionRules,
    consolidated_extension: &str,
) -> Result<ConsolidationReport> {
    if !layout.root.is_dir() {
        anyhow::bail!("Session directory {} does not exist", layout.root.display());
    }
    let started_at = Utc::now().to_rfc3339();
    let inputs = consolidator::discover_tabular_files(&layout.unzipped_entities(), extensions)
        .context("Failed to discover extracted tabular files")?;
    if inputs.is_empty() {
        warn!("No extracted tabular files under {}", layout.unzipped_entities().display());
    }

    let report = consolidator::consolidate(&inputs, categories, &layout.combined_entities(), consolidated_extension);

    let summary_path = layout.run_summary_path();
    let finished_at = Utc::now().to_rfc3339();
    let existing = match fs::read_to_string(&summary_path) {
        Ok(existing) => Some(existing),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e).context(format!("Failed to read run summary {}", summary_path.display())),
    };
    let summary = match existing {
        Some(existing) => update_consolidation_section(&existing, &finished_at, &report)
            .context(format!("Failed to update run summary {}", summary_path.display()))?,
        None => {
            let session_id = layout
                .root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            create_run_summary(&session_id, &started_at, &finished_at, None, None, Some(&report), &[])?
        }
    };
    fs::write(&summary_path, summary).context("Failed to write run summary")?;

    Ok(report)
}
