use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// One remote object selected for download. Immutable once listed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// A fixed-capacity slice of the listing, downloaded by a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Position in partition order, used for dispatch and reporting
    pub index: usize,
    pub objects: Vec<ObjectDescriptor>,
}

impl Batch {
    /// Key of the first object, recorded as the session's `lastBatchBeginId`
    pub fn begin_key(&self) -> Option<&str> {
        self.objects.first().map(|o| o.key.as_str())
    }
}

/// Archives owned by one entity (panelist) directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityArchiveSet {
    pub entity_id: String,
    pub archives: Vec<PathBuf>,
}

/// Archives found below the download root, grouped by owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityDiscovery {
    pub entities: Vec<EntityArchiveSet>,
    /// Archives lying directly in the root, with no entity directory to own them
    pub unassigned: Vec<PathBuf>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Tabular,
    Image,
}

/// An archive entry materialized on disk for an entity.
///
/// `path` is the tabular file under `unzipped/` or the redacted copy under
/// `combined/.../images/`, `relative_path` the entry name inside the archive.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub relative_path: PathBuf,
    pub path: PathBuf,
    pub kind: FileKind,
}

/// A unit of work that failed without stopping its siblings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FailedUnit {
    /// Object key, archive path, image path or category, depending on the stage
    pub unit: String,
    pub error: String,
}

impl FailedUnit {
    pub fn new(unit: impl Into<String>, error: impl ToString) -> Self {
        FailedUnit {
            unit: unit.into(),
            error: error.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub total: usize,
    pub downloaded: usize,
    pub skipped_existing: usize,
    pub failed: Vec<FailedUnit>,
    /// Batches whose worker died before reporting back
    pub unfinished_batches: Vec<usize>,
    pub last_batch_begin_key: Option<String>,
}

impl DownloadReport {
    /// Number of objects present locally after the run
    pub fn completed(&self) -> usize {
        self.downloaded + self.skipped_existing
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.unfinished_batches.is_empty()
    }
}

/// Per-entity outcome of archive expansion.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityExtraction {
    pub files: Vec<ExtractedFile>,
    pub candidates: usize,
    pub existing: usize,
    pub extracted: usize,
    pub failed: Vec<FailedUnit>,
}

impl EntityExtraction {
    pub fn merge(&mut self, other: EntityExtraction) {
        self.files.extend(other.files);
        self.candidates += other.candidates;
        self.existing += other.existing;
        self.extracted += other.extracted;
        self.failed.extend(other.failed);
    }

    /// Tabular files in extraction order, the consolidator's input
    pub fn tabular_paths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| f.kind == FileKind::Tabular)
            .map(|f| f.path.clone())
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionReport {
    pub entities: BTreeMap<String, EntityExtraction>,
    /// Entities whose worker died before reporting back
    pub unfinished_entities: Vec<String>,
    /// Archives that no entity owns; never expanded
    pub unassigned_archives: Vec<FailedUnit>,
}

impl ExpansionReport {
    pub fn total_candidates(&self) -> usize {
        self.entities.values().map(|e| e.candidates).sum()
    }

    pub fn total_existing(&self) -> usize {
        self.entities.values().map(|e| e.existing).sum()
    }

    pub fn total_extracted(&self) -> usize {
        self.entities.values().map(|e| e.extracted).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.entities.values().map(|e| e.failed.len()).sum::<usize>()
            + self.unfinished_entities.len()
            + self.unassigned_archives.len()
    }

    /// Mapping entity → tabular paths handed to consolidation
    pub fn tabular_inputs(&self) -> BTreeMap<String, Vec<PathBuf>> {
        self.entities
            .iter()
            .map(|(id, e)| (id.clone(), e.tabular_paths()))
            .filter(|(_, files)| !files.is_empty())
            .collect()
    }
}

/// One merged output file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConsolidatedOutput {
    pub category: String,
    pub path: PathBuf,
    pub header_source: PathBuf,
    pub source_count: usize,
    /// Data rows written, header excluded
    pub data_rows: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub outputs: BTreeMap<String, Vec<ConsolidatedOutput>>,
    pub failed: BTreeMap<String, Vec<FailedUnit>>,
}

impl ConsolidationReport {
    pub fn output_count(&self) -> usize {
        self.outputs.values().map(Vec::len).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.values().map(Vec::len).sum()
    }
}
