use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::config::{ExtensionRules, SessionLayout};
use crate::constants::ARCHIVE_EXTENSIONS;
use crate::error::{PipelineError, Result};
use crate::models::{EntityArchiveSet, EntityDiscovery, EntityExtraction, ExpansionReport, ExtractedFile, FailedUnit, FileKind};
use crate::redaction::Redactor;
use crate::utils::files::{file_name_lossy, has_extension, is_contained_relative, write_atomic};
use crate::utils::pool::{run_bounded, PoolOutcome};

/// Find entity directories below the download root.
///
/// An entity directory is any directory directly containing archives; its
/// basename is the entity id. Directories sharing a basename are merged into
/// one set so a single worker owns that entity's output tree. Results are
/// ordered by entity id, archives by path. Archives lying directly in the
/// root have no entity and are returned as `unassigned`.
pub fn discover_entities(staging_root: &Path) -> Result<EntityDiscovery> {
    let mut discovery = EntityDiscovery::default();
    if !staging_root.is_dir() {
        warn!("Download directory {} does not exist, nothing to expand", staging_root.display());
        return Ok(discovery);
    }

    let mut grouped: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for entry in WalkDir::new(staging_root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error walking {}: {}", staging_root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_extension(entry.path(), ARCHIVE_EXTENSIONS) {
            continue;
        }

        let Some(parent) = entry.path().parent() else { continue };
        if parent == staging_root {
            warn!("Archive {} is not inside an entity directory", entry.path().display());
            discovery.unassigned.push(entry.path().to_path_buf());
            continue;
        }
        grouped
            .entry(file_name_lossy(parent))
            .or_default()
            .push(entry.path().to_path_buf());
    }

    discovery.entities = grouped
        .into_iter()
        .map(|(entity_id, mut archives)| {
            archives.sort();
            EntityArchiveSet { entity_id, archives }
        })
        .collect();
    Ok(discovery)
}

/// Expands entity archives into the session layout.
///
/// Tabular entries land in `unzipped/panelists/<entity>/`; image entries are
/// staged there raw and their redacted copy is written to
/// `combined/panelists/<entity>/images/`. A matched entry whose output
/// already exists is counted as existing and not touched, which makes
/// re-running after an interruption cheap.
pub struct ArchiveExpander<'a> {
    layout: &'a SessionLayout,
    extensions: &'a ExtensionRules,
    redactor: &'a Redactor,
}

impl<'a> ArchiveExpander<'a> {
    pub fn new(layout: &'a SessionLayout, extensions: &'a ExtensionRules, redactor: &'a Redactor) -> Self {
        ArchiveExpander { layout, extensions, redactor }
    }

    /// Expand every entity below `staging_root` using up to `workers` threads.
    ///
    /// Entities are dispatched in discovery order; each is processed by one
    /// worker start to finish. Entities whose worker crashed are listed in
    /// `unfinished_entities`.
    pub fn expand(&self, staging_root: &Path, workers: usize) -> Result<ExpansionReport> {
        if workers == 0 {
            return Err(PipelineError::config("extract_workers", "worker count must be positive"));
        }

        let discovery = discover_entities(staging_root)?;
        let entities = discovery.entities;
        info!(
            "Expanding archives for {} entities with {} workers, {} redaction",
            entities.len(),
            workers,
            self.redactor.mode()
        );

        let mut report = ExpansionReport {
            unassigned_archives: discovery
                .unassigned
                .iter()
                .map(|archive| FailedUnit::new(archive.display().to_string(), "archive is not inside an entity directory"))
                .collect(),
            ..Default::default()
        };

        let ids: Vec<String> = entities.iter().map(|e| e.entity_id.clone()).collect();
        let outcomes = run_bounded("expand", entities, workers, |set| self.expand_entity(&set));

        for (entity_id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                PoolOutcome::Completed(extraction) => {
                    report.entities.insert(entity_id, extraction);
                }
                PoolOutcome::Crashed(reason) => {
                    error!("Worker for entity {} crashed: {}", entity_id, reason);
                    report.unfinished_entities.push(entity_id);
                }
                PoolOutcome::Unfinished => {
                    error!("Entity {} was never processed", entity_id);
                    report.unfinished_entities.push(entity_id);
                }
            }
        }

        info!(
            "Expansion complete: {} matched entries, {} already present, {} new, {} failures",
            report.total_candidates(),
            report.total_existing(),
            report.total_extracted(),
            report.failure_count()
        );
        Ok(report)
    }

    /// Expand all archives of one entity. Archive failures are recorded, not raised.
    pub fn expand_entity(&self, set: &EntityArchiveSet) -> EntityExtraction {
        let mut result = EntityExtraction::default();

        for dir in [self.layout.entity_unzipped(&set.entity_id), self.layout.entity_images(&set.entity_id)] {
            if let Err(e) = fs::create_dir_all(&dir) {
                error!("Failed to create {}: {}", dir.display(), e);
                result.failed.push(FailedUnit::new(dir.display().to_string(), e));
                return result;
            }
        }

        for archive in &set.archives {
            match self.expand_archive(&set.entity_id, archive) {
                Ok(extraction) => result.merge(extraction),
                Err(e) => {
                    warn!("Error unzipping {}: {}", archive.display(), e);
                    result.failed.push(FailedUnit::new(archive.display().to_string(), e));
                }
            }
        }

        debug!(
            "Entity {}: {} candidates, {} existing, {} extracted, {} failed",
            set.entity_id,
            result.candidates,
            result.existing,
            result.extracted,
            result.failed.len()
        );
        result
    }

    /// Expand a single archive; an archive that cannot be opened is a [`PipelineError::CorruptArchive`]
    pub fn expand_archive(&self, entity_id: &str, archive: &Path) -> Result<EntityExtraction> {
        let corrupt = |reason: String| PipelineError::CorruptArchive {
            archive: archive.to_path_buf(),
            reason,
        };

        let file = File::open(archive).map_err(|e| corrupt(e.to_string()))?;
        let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;

        let unzipped_dir = self.layout.entity_unzipped(entity_id);
        let images_dir = self.layout.entity_images(entity_id);
        let mut result = EntityExtraction::default();

        for i in 0..zip.len() {
            let mut entry = match zip.by_index(i) {
                Ok(entry) => entry,
                Err(e) => {
                    result.failed.push(FailedUnit::new(
                        format!("{}#{}", archive.display(), i),
                        corrupt(format!("entry {}: {}", i, e)),
                    ));
                    continue;
                }
            };
            if entry.is_dir() {
                continue;
            }

            let name = entry.name().to_string();
            let Some(kind) = self.extensions.classify(&name) else {
                continue;
            };
            result.candidates += 1;

            let relative = match entry.enclosed_name() {
                Some(path) if is_contained_relative(path) => path.to_path_buf(),
                _ => {
                    warn!("Skipping unsafe entry name {:?} in {}", name, archive.display());
                    result.failed.push(FailedUnit::new(
                        format!("{}!{}", archive.display(), name),
                        corrupt(format!("unsafe entry name {:?}", name)),
                    ));
                    continue;
                }
            };

            let staged = unzipped_dir.join(&relative);
            let output = match kind {
                FileKind::Tabular => staged.clone(),
                FileKind::Image => images_dir.join(&relative),
            };

            if output.exists() {
                result.existing += 1;
                result.files.push(ExtractedFile { relative_path: relative, path: output, kind });
                continue;
            }

            if let Err(e) = write_atomic(&mut entry, &staged) {
                warn!("Failed to extract {} from {}: {}", name, archive.display(), e);
                result.failed.push(FailedUnit::new(
                    format!("{}!{}", archive.display(), name),
                    corrupt(format!("entry {}: {}", name, e)),
                ));
                continue;
            }

            if kind == FileKind::Image {
                if let Err(e) = self.redactor.redact(&staged, &output) {
                    warn!("Failed to redact {}: {}", staged.display(), e);
                    result.failed.push(FailedUnit::new(staged.display().to_string(), e));
                    continue;
                }
            }

            result.extracted += 1;
            result.files.push(ExtractedFile { relative_path: relative, path: output, kind });
        }

        info!(
            "{}: existing files count: {}, processed new files count: {}",
            archive.display(),
            result.existing,
            result.extracted
        );
        Ok(result)
    }
}
