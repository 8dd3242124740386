use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Serialize, Deserialize};

use crate::constants::{
    COMBINED_DIR, ENTITY_GROUP_DIR, IMAGES_DIR, METADATA_DIR, RUN_SUMMARY_FILE,
    SESSION_CONFIG_FILE, UNZIPPED_DIR, ZIPPED_DIR,
};

/// On-disk layout of one session.
///
/// ```text
/// <root>/zipped/<relative key...>
/// <root>/unzipped/panelists/<entity>/<tabular files and raw images>
/// <root>/combined/panelists/<entity>/images/<redacted images>
/// <root>/combined/panelists/<entity>/metadata/<prefix>-consolidated.csv
/// ```
///
/// Every per-entity path is derived from the entity id alone, which is what
/// keeps concurrent entity workers on disjoint subtrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    pub root: PathBuf,
}

impl SessionLayout {
    pub fn new(output_dir: &Path, session_id: &str) -> Self {
        SessionLayout { root: output_dir.join(session_id) }
    }

    pub fn zipped(&self) -> PathBuf {
        self.root.join(ZIPPED_DIR)
    }

    pub fn unzipped(&self) -> PathBuf {
        self.root.join(UNZIPPED_DIR)
    }

    /// Parent of all per-entity extraction directories
    pub fn unzipped_entities(&self) -> PathBuf {
        self.unzipped().join(ENTITY_GROUP_DIR)
    }

    /// Parent of all per-entity output directories
    pub fn combined_entities(&self) -> PathBuf {
        self.root.join(COMBINED_DIR).join(ENTITY_GROUP_DIR)
    }

    pub fn entity_unzipped(&self, entity_id: &str) -> PathBuf {
        self.unzipped_entities().join(entity_id)
    }

    pub fn entity_images(&self, entity_id: &str) -> PathBuf {
        self.combined_entities().join(entity_id).join(IMAGES_DIR)
    }

    pub fn entity_metadata(&self, entity_id: &str) -> PathBuf {
        self.combined_entities().join(entity_id).join(METADATA_DIR)
    }

    pub fn session_config_path(&self) -> PathBuf {
        self.root.join(SESSION_CONFIG_FILE)
    }

    pub fn run_summary_path(&self) -> PathBuf {
        self.root.join(RUN_SUMMARY_FILE)
    }

    /// Create the session root and the download/extraction trees
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.zipped(), self.unzipped()] {
            fs::create_dir_all(&dir)
                .context(format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Persisted record of a session, written for later inspection.
///
/// Resumability never reads this file: skip-if-exists on the filesystem is
/// the source of truth.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuerySession {
    pub query_id: String,
    pub batch_size: usize,
    pub processor_count: usize,
    pub num_files_to_download: usize,
    pub num_files_downloaded: usize,
    pub last_batch_begin_id: String,
}

impl QuerySession {
    pub fn new(query_id: &str, batch_size: usize, processor_count: usize) -> Self {
        QuerySession {
            query_id: query_id.to_string(),
            batch_size,
            processor_count,
            num_files_to_download: 0,
            num_files_downloaded: 0,
            last_batch_begin_id: String::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read session file: {}", path.display()))?;
        let session = serde_json::from_str(&content)
            .context("Failed to parse session JSON")?;
        debug!("Loaded session from {}", path.display());
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize session")?;
        fs::write(path, json)
            .context(format!("Failed to write session to {}", path.display()))?;
        info!("Session configuration saved to {}", path.display());
        Ok(())
    }
}
