use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, info};
use serde::{Serialize, Deserialize};

use crate::config::categories::CategorySet;
use crate::config::session::SessionLayout;
use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_BUCKET, DEFAULT_CATEGORY_PREFIXES, DEFAULT_CONSOLIDATED_EXTENSION,
    DEFAULT_DOWNLOAD_WORKERS, DEFAULT_IMAGE_EXTENSIONS, DEFAULT_TABULAR_EXTENSIONS,
    DEFAULT_WINDOW_DAYS, SESSION_ID_PREFIX,
};
use crate::error::PipelineError;
use crate::models::FileKind;

/// How detected face regions are anonymized.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RedactionMode {
    /// Overwrite the region with a solid value
    #[default]
    Fill,
    /// Replace the region with a strong Gaussian blur of itself
    Blur,
}

impl std::fmt::Display for RedactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedactionMode::Fill => write!(f, "fill"),
            RedactionMode::Blur => write!(f, "blur"),
        }
    }
}

/// Operator settings as stored in the YAML settings file.
///
/// Every field has a default so a partial file is valid; command-line flags
/// override whatever is loaded here.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    pub version: String,
    pub description: String,
    pub bucket: String,
    pub path: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub batch_size: usize,
    pub download_workers: usize,
    /// Expansion pool size; defaults to the number of CPUs
    pub extract_workers: Option<usize>,
    pub redaction_mode: RedactionMode,
    /// Program and arguments of the face annotator
    pub annotator_command: Vec<String>,
    pub categories: Vec<String>,
    pub tabular_extensions: Vec<String>,
    pub image_extensions: Vec<String>,
    pub consolidated_extension: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            version: "1.0".to_string(),
            description: "Panelist archive extraction settings".to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            path: None,
            region: None,
            profile: None,
            batch_size: DEFAULT_BATCH_SIZE,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            extract_workers: None,
            redaction_mode: RedactionMode::default(),
            annotator_command: Vec::new(),
            categories: to_strings(DEFAULT_CATEGORY_PREFIXES),
            tabular_extensions: to_strings(DEFAULT_TABULAR_EXTENSIONS),
            image_extensions: to_strings(DEFAULT_IMAGE_EXTENSIONS),
            consolidated_extension: DEFAULT_CONSOLIDATED_EXTENSION.to_string(),
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl PipelineSettings {
    /// Load settings from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read settings file: {}", path.display()))?;

        let settings: PipelineSettings = serde_yaml::from_str(&content)
            .context("Failed to parse YAML settings")?;

        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Save settings to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .context("Failed to serialize settings to YAML")?;

        fs::write(path, yaml)
            .context(format!("Failed to write settings to {}", path.display()))?;

        info!("Saved settings to {}", path.display());
        Ok(())
    }
}

/// Load settings from a file, or fall back to the defaults
pub fn load_or_default_settings(path: Option<&Path>) -> Result<PipelineSettings> {
    match path {
        Some(p) => PipelineSettings::from_yaml_file(p),
        None => Ok(PipelineSettings::default()),
    }
}

/// Inclusive listing window, normalized to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> crate::error::Result<Self> {
        if start > end {
            return Err(PipelineError::config("start", "start date cannot be after end date"));
        }
        Ok(TimeWindow { start, end })
    }

    /// Build a window from optional operator strings.
    ///
    /// Missing start means `now - 365 days`, missing end means `now`. A bare
    /// `YYYY-MM-DD` end date covers that whole day.
    pub fn parse(start: Option<&str>, end: Option<&str>, now: DateTime<Utc>) -> crate::error::Result<Self> {
        let start = match start {
            Some(s) => parse_bound(s, false)?,
            None => now - Duration::days(DEFAULT_WINDOW_DAYS),
        };
        let end = match end {
            Some(s) => parse_bound(s, true)?,
            None => now,
        };
        TimeWindow::new(start, end)
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        self.start <= *instant && *instant <= self.end
    }
}

fn parse_bound(value: &str, end_of_day: bool) -> crate::error::Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    let key = if end_of_day { "end" } else { "start" };
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| PipelineError::config(key, format!("invalid date '{}': {}", value, e)))?;
    let naive = if end_of_day {
        date.and_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    naive
        .map(|n| n.and_utc())
        .ok_or_else(|| PipelineError::config(key, format!("invalid date '{}'", value)))
}

/// Extension rules deciding which archive entries are extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRules {
    tabular: Vec<String>,
    image: Vec<String>,
}

impl ExtensionRules {
    pub fn new(tabular: &[String], image: &[String]) -> crate::error::Result<Self> {
        let normalize = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect()
        };
        let tabular = normalize(tabular);
        let image = normalize(image);

        if tabular.is_empty() {
            return Err(PipelineError::config("tabular_extensions", "at least one tabular extension is required"));
        }
        if let Some(shared) = tabular.iter().find(|e| image.contains(e)) {
            return Err(PipelineError::config(
                "image_extensions",
                format!("extension '{}' is both tabular and image", shared),
            ));
        }
        Ok(ExtensionRules { tabular, image })
    }

    /// Classify an entry name by its extension, case-insensitively
    pub fn classify(&self, name: &str) -> Option<FileKind> {
        let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
        if self.tabular.contains(&ext) {
            Some(FileKind::Tabular)
        } else if self.image.contains(&ext) {
            Some(FileKind::Image)
        } else {
            None
        }
    }

    pub fn is_tabular(&self, name: &str) -> bool {
        self.classify(name) == Some(FileKind::Tabular)
    }
}

impl Default for ExtensionRules {
    fn default() -> Self {
        ExtensionRules {
            tabular: to_strings(DEFAULT_TABULAR_EXTENSIONS),
            image: to_strings(DEFAULT_IMAGE_EXTENSIONS),
        }
    }
}

/// Per-invocation values that never live in the settings file.
#[derive(Debug, Clone, Default)]
pub struct RunParameters {
    pub session_id: Option<String>,
    pub output_dir: PathBuf,
    pub start: Option<String>,
    pub end: Option<String>,
    pub keep_intermediate: bool,
}

/// The validated, immutable configuration threaded through every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub session_id: String,
    pub layout: SessionLayout,
    pub bucket: String,
    pub path: String,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub window: TimeWindow,
    pub batch_size: usize,
    pub download_workers: usize,
    pub extract_workers: usize,
    pub redaction_mode: RedactionMode,
    pub annotator_command: Vec<String>,
    pub categories: CategorySet,
    pub extensions: ExtensionRules,
    pub consolidated_extension: String,
    pub keep_intermediate: bool,
}

impl PipelineConfig {
    /// Validate settings and run parameters. No I/O happens here.
    pub fn from_settings(
        settings: &PipelineSettings,
        params: &RunParameters,
        now: DateTime<Utc>,
    ) -> crate::error::Result<Self> {
        if settings.bucket.trim().is_empty() {
            return Err(PipelineError::config("bucket", "bucket name is required"));
        }
        let path = settings
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PipelineError::config("path", "object path is required"))?;
        if settings.batch_size == 0 {
            return Err(PipelineError::config("batch_size", "batch size must be positive"));
        }
        if settings.download_workers == 0 {
            return Err(PipelineError::config("download_workers", "worker count must be positive"));
        }
        let extract_workers = settings.extract_workers.unwrap_or_else(num_cpus::get);
        if extract_workers == 0 {
            return Err(PipelineError::config("extract_workers", "worker count must be positive"));
        }
        if settings.annotator_command.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(PipelineError::config("annotator_command", "a face annotator command is required"));
        }

        let consolidated_extension = settings.consolidated_extension.trim().trim_start_matches('.').to_string();
        if consolidated_extension.is_empty() {
            return Err(PipelineError::config("consolidated_extension", "extension must not be empty"));
        }

        let session_id = match params.session_id.as_deref().map(str::trim) {
            Some(id) => validate_session_id(id)?.to_string(),
            None => generate_session_id(),
        };

        Ok(PipelineConfig {
            layout: SessionLayout::new(&params.output_dir, &session_id),
            session_id,
            bucket: settings.bucket.trim().to_string(),
            path: path.to_string(),
            region: settings.region.clone(),
            profile: settings.profile.clone(),
            window: TimeWindow::parse(params.start.as_deref(), params.end.as_deref(), now)?,
            batch_size: settings.batch_size,
            download_workers: settings.download_workers,
            extract_workers,
            redaction_mode: settings.redaction_mode,
            annotator_command: settings.annotator_command.clone(),
            categories: CategorySet::new(&settings.categories)?,
            extensions: ExtensionRules::new(&settings.tabular_extensions, &settings.image_extensions)?,
            consolidated_extension,
            keep_intermediate: params.keep_intermediate,
        })
    }
}

/// Session ids become directory names, so only a conservative charset is accepted
pub fn validate_session_id(id: &str) -> crate::error::Result<&str> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(id)
    } else {
        Err(PipelineError::config("session_id", format!("invalid session id '{}'", id)))
    }
}

pub fn generate_session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", SESSION_ID_PREFIX, &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn valid_settings() -> PipelineSettings {
        PipelineSettings {
            path: Some("academia/tenant/t1/panel/p1/".to_string()),
            annotator_command: vec!["face-annotator".to_string()],
            ..Default::default()
        }
    }

    fn params() -> RunParameters {
        RunParameters {
            session_id: Some("query_test".to_string()),
            output_dir: PathBuf::from("/tmp/out"),
            start: Some("2024-01-01".to_string()),
            end: Some("2024-01-31".to_string()),
            keep_intermediate: false,
        }
    }

    #[test]
    fn test_window_defaults() {
        let window = TimeWindow::parse(None, None, now()).unwrap();
        assert_eq!(window.end, now());
        assert_eq!(window.start, now() - Duration::days(365));
    }

    #[test]
    fn test_window_end_date_is_inclusive_of_whole_day() {
        let window = TimeWindow::parse(Some("2024-01-01"), Some("2024-01-31"), now()).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
        let next = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert!(window.contains(&window.start));
        assert!(window.contains(&late));
        assert!(!window.contains(&next));
    }

    #[test]
    fn test_window_rfc3339_is_normalized_to_utc() {
        let window = TimeWindow::parse(Some("2024-01-01T02:00:00+02:00"), None, now()).unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_window_rejects_inverted_range() {
        let err = TimeWindow::parse(Some("2024-02-01"), Some("2024-01-01"), now()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn test_window_rejects_garbage() {
        assert!(TimeWindow::parse(Some("yesterday"), None, now()).is_err());
    }

    #[test]
    fn test_valid_config() {
        let config = PipelineConfig::from_settings(&valid_settings(), &params(), now()).unwrap();
        assert_eq!(config.session_id, "query_test");
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.layout.root, PathBuf::from("/tmp/out/query_test"));
        assert_eq!(config.categories.len(), 4);
    }

    #[test]
    fn test_non_positive_sizes_fail_fast() {
        let mut settings = valid_settings();
        settings.batch_size = 0;
        assert!(PipelineConfig::from_settings(&settings, &params(), now()).is_err());

        let mut settings = valid_settings();
        settings.download_workers = 0;
        assert!(PipelineConfig::from_settings(&settings, &params(), now()).is_err());

        let mut settings = valid_settings();
        settings.extract_workers = Some(0);
        assert!(PipelineConfig::from_settings(&settings, &params(), now()).is_err());
    }

    #[test]
    fn test_missing_annotator_and_path_fail_fast() {
        let mut settings = valid_settings();
        settings.annotator_command.clear();
        assert!(PipelineConfig::from_settings(&settings, &params(), now()).is_err());

        let mut settings = valid_settings();
        settings.path = None;
        assert!(PipelineConfig::from_settings(&settings, &params(), now()).is_err());
    }

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("query_1234").is_ok());
        assert!(validate_session_id("../escape").is_err());
        assert!(validate_session_id("..").is_err());
        assert!(validate_session_id("").is_err());

        let generated = generate_session_id();
        assert!(generated.starts_with(SESSION_ID_PREFIX));
        assert!(validate_session_id(&generated).is_ok());
    }

    #[test]
    fn test_extension_rules() {
        let rules = ExtensionRules::default();
        assert_eq!(rules.classify("data/screenshot_data_1.csv"), Some(FileKind::Tabular));
        assert_eq!(rules.classify("IMG_0001.JPG"), Some(FileKind::Image));
        assert_eq!(rules.classify("photo.jpeg"), Some(FileKind::Image));
        assert_eq!(rules.classify("readme.txt"), None);
        assert_eq!(rules.classify("csv"), None);

        let overlap = ExtensionRules::new(&["csv".to_string()], &["CSV".to_string()]);
        assert!(overlap.is_err());
    }

    #[test]
    fn test_settings_yaml_roundtrip_with_partial_file() {
        let yaml = "bucket: other-bucket\nbatch_size: 10\nredaction_mode: blur\n";
        let settings: PipelineSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.bucket, "other-bucket");
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.redaction_mode, RedactionMode::Blur);
        assert_eq!(settings.download_workers, DEFAULT_DOWNLOAD_WORKERS);
        assert_eq!(settings.categories.len(), 4);
    }
}
