use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::SessionLayout;

/// What happened to one intermediate tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum CleanupOutcome {
    Removed { path: PathBuf },
    Missing { path: PathBuf },
    Failed { path: PathBuf, error: String },
}

/// Recursively delete `path`. Never raises: a missing tree is informational
/// and a failed deletion is only logged.
pub fn remove_tree(path: &Path) -> CleanupOutcome {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            info!("Removed {}", path.display());
            CleanupOutcome::Removed { path: path.to_path_buf() }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("{} already absent", path.display());
            CleanupOutcome::Missing { path: path.to_path_buf() }
        }
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            CleanupOutcome::Failed {
                path: path.to_path_buf(),
                error: e.to_string(),
            }
        }
    }
}

/// Delete the session's extraction and download trees, in that order
pub fn cleanup_intermediate(layout: &SessionLayout) -> Vec<CleanupOutcome> {
    [layout.unzipped(), layout.zipped()]
        .iter()
        .map(|dir| remove_tree(dir))
        .collect()
}
