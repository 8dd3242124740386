//! Global constants for the panel-extractor application.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Operator defaults
/// Default number of objects per download batch
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Default number of concurrently running download batches
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 4;

/// Default length of the listing window when no start date is given
pub const DEFAULT_WINDOW_DAYS: i64 = 365;

/// Default bucket holding panelist archives
pub const DEFAULT_BUCKET: &str = "screenlake-zip-prod";

/// Prefix used when generating a session identifier
pub const SESSION_ID_PREFIX: &str = "query_";

// Session layout
pub const ZIPPED_DIR: &str = "zipped";
pub const UNZIPPED_DIR: &str = "unzipped";
pub const COMBINED_DIR: &str = "combined";
pub const ENTITY_GROUP_DIR: &str = "panelists";
pub const IMAGES_DIR: &str = "images";
pub const METADATA_DIR: &str = "metadata";
pub const SESSION_CONFIG_FILE: &str = "query_config.json";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Suffix of in-flight download files, renamed away once complete
pub const PARTIAL_DOWNLOAD_SUFFIX: &str = ".part";

// File classification
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip"];
pub const DEFAULT_TABULAR_EXTENSIONS: &[&str] = &["csv"];
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];
pub const DEFAULT_CONSOLIDATED_EXTENSION: &str = "csv";
pub const CONSOLIDATED_SUFFIX: &str = "-consolidated";

/// Category prefixes in first-match-wins order
pub const DEFAULT_CATEGORY_PREFIXES: &[&str] = &[
    "screenshot_data",
    "app_accessibility_data",
    "app_segment_data",
    "session_data",
];

// Redaction
/// Gaussian sigma applied to face regions in blur mode
pub const BLUR_SIGMA: f32 = 30.0;

/// Luma written over face regions in fill mode
pub const FILL_VALUE: u8 = 0;

// Buffer sizes
/// Buffer size for archive entry extraction (1MB)
pub const EXTRACT_BUFFER_SIZE: usize = 1024 * 1024;
