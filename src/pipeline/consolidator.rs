use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder, WriterBuilder};
use log::{debug, info, warn};
use rayon::prelude::*;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::config::{Category, CategorySet, ExtensionRules};
use crate::constants::{CONSOLIDATED_SUFFIX, METADATA_DIR};
use crate::error::{PipelineError, Result};
use crate::models::{ConsolidatedOutput, ConsolidationReport, FailedUnit};
use crate::utils::files::{file_name_lossy, natural_cmp};

/// Bucket an entity's tabular files by category.
///
/// Each file goes to the first category whose prefix starts its file name;
/// files matching none are dropped. Groups follow category order; inside a
/// group files are in natural file-name order (path as tie-breaker), which
/// fixes both the row order and the header source whatever order the files
/// were found in. Empty groups are omitted.
pub fn group_by_category<'c>(files: &[PathBuf], categories: &'c CategorySet) -> Vec<(&'c Category, Vec<PathBuf>)> {
    let mut groups: Vec<(&Category, Vec<PathBuf>)> = categories.iter().map(|c| (c, Vec::new())).collect();

    for file in files {
        let name = file_name_lossy(file);
        match categories.classify(&name) {
            Some(category) => {
                if let Some((_, members)) = groups.iter_mut().find(|(c, _)| c.prefix == category.prefix) {
                    members.push(file.clone());
                }
            }
            None => debug!("{} matches no category, not consolidated", file.display()),
        }
    }

    groups.retain(|(_, members)| !members.is_empty());
    for (_, members) in groups.iter_mut() {
        members.sort_by(|a, b| natural_cmp(&file_name_lossy(a), &file_name_lossy(b)).then_with(|| a.cmp(b)));
    }
    groups
}

/// Path of the merged file for `category` below an entity's output directory
pub fn consolidated_path(entity_dir: &Path, category: &Category, extension: &str) -> PathBuf {
    entity_dir
        .join(METADATA_DIR)
        .join(format!("{}{}.{}", category.prefix, CONSOLIDATED_SUFFIX, extension))
}

/// Merge every entity's tabular files by category.
///
/// Entities are independent and processed in parallel; each writes only
/// under `output_root/<entity>/`. A failing group is recorded against its
/// entity without affecting other groups.
pub fn consolidate(
    entity_files: &BTreeMap<String, Vec<PathBuf>>,
    categories: &CategorySet,
    output_root: &Path,
    extension: &str,
) -> ConsolidationReport {
    info!("Consolidating tabular files for {} entities", entity_files.len());

    let results: Vec<(String, Vec<ConsolidatedOutput>, Vec<FailedUnit>)> = entity_files
        .par_iter()
        .map(|(entity_id, files)| {
            let (outputs, failed) = consolidate_entity(entity_id, files, categories, &output_root.join(entity_id), extension);
            (entity_id.clone(), outputs, failed)
        })
        .collect();

    let mut report = ConsolidationReport::default();
    for (entity_id, outputs, failed) in results {
        if !outputs.is_empty() {
            report.outputs.insert(entity_id.clone(), outputs);
        }
        if !failed.is_empty() {
            report.failed.insert(entity_id, failed);
        }
    }

    info!(
        "Consolidation complete: {} files written, {} groups failed",
        report.output_count(),
        report.failure_count()
    );
    report
}

/// Consolidate one entity's groups into `entity_dir/metadata/`
pub fn consolidate_entity(
    entity_id: &str,
    files: &[PathBuf],
    categories: &CategorySet,
    entity_dir: &Path,
    extension: &str,
) -> (Vec<ConsolidatedOutput>, Vec<FailedUnit>) {
    let mut outputs = Vec::new();
    let mut failed = Vec::new();

    for (category, sources) in group_by_category(files, categories) {
        let output = consolidated_path(entity_dir, category, extension);
        match merge_files(&sources, &output) {
            Ok(merged) => {
                info!(
                    "{}: wrote {} ({} files, {} rows)",
                    entity_id,
                    output.display(),
                    sources.len(),
                    merged.data_rows
                );
                outputs.push(ConsolidatedOutput {
                    category: category.prefix.clone(),
                    path: output,
                    header_source: merged.header_source.unwrap_or_else(|| sources[0].clone()),
                    source_count: sources.len(),
                    data_rows: merged.data_rows,
                });
            }
            Err(e) => {
                warn!("{}: consolidation of {} failed: {}", entity_id, category.prefix, e);
                failed.push(FailedUnit::new(category.prefix.clone(), e));
            }
        }
    }

    (outputs, failed)
}

/// Result of merging one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// First source that had a header row
    pub header_source: Option<PathBuf>,
    pub data_rows: usize,
}

/// Concatenate `sources` into `output`, keeping only the first header row.
///
/// The first non-empty source is copied whole; every later source has its
/// first row dropped and the rest appended. Field bytes are kept as read and
/// rows may have differing field counts, but every record is re-serialized:
/// lines end in `\n` and fields are quoted only where needed, so CRLF input
/// and redundant quotes are normalized. A later header that differs
/// from the kept one is logged but not rejected. The output is written to a
/// temporary sibling and renamed into place only when every source was read.
pub fn merge_files(sources: &[PathBuf], output: &Path) -> Result<MergeSummary> {
    let parent = output.parent().ok_or_else(|| {
        PipelineError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no parent directory for {}", output.display()),
        ))
    })?;
    fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    let mut writer = WriterBuilder::new()
        .flexible(true)
        .from_writer(BufWriter::new(temp));

    let mut header: Option<(ByteRecord, PathBuf)> = None;
    let mut data_rows = 0usize;
    let mut record = ByteRecord::new();

    for source in sources {
        let unreadable = |reason: String| PipelineError::MissingFile {
            path: source.clone(),
            reason,
        };
        let file = File::open(source).map_err(|e| unreadable(e.to_string()))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(BufReader::new(file));

        let mut first_row = true;
        while reader.read_byte_record(&mut record).map_err(|e| unreadable(e.to_string()))? {
            if first_row {
                first_row = false;
                if let Some((kept, kept_from)) = &header {
                    if kept != &record {
                        warn!(
                            "Header of {} differs from {}, appending its rows anyway",
                            source.display(),
                            kept_from.display()
                        );
                    }
                    continue;
                }
                writer.write_byte_record(&record).map_err(io::Error::from)?;
                header = Some((record.clone(), source.clone()));
                continue;
            }
            writer.write_byte_record(&record).map_err(io::Error::from)?;
            data_rows += 1;
        }
    }

    let mut buffered = writer.into_inner().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    buffered.flush()?;
    let temp = buffered.into_inner().map_err(|e| e.into_error())?;
    temp.persist(output).map_err(|e| PipelineError::Io(e.error))?;

    Ok(MergeSummary {
        header_source: header.map(|(_, source)| source),
        data_rows,
    })
}

/// Rebuild the entity → tabular files mapping from an extraction tree.
///
/// Used when consolidating a session without re-running expansion. Each
/// directory directly under `entities_root` is an entity; its tabular files
/// are collected recursively. Merge order is settled by [`group_by_category`].
pub fn discover_tabular_files(entities_root: &Path, rules: &ExtensionRules) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut mapping = BTreeMap::new();
    if !entities_root.is_dir() {
        warn!("{} does not exist, nothing to consolidate", entities_root.display());
        return Ok(mapping);
    }

    let mut entity_dirs: Vec<PathBuf> = fs::read_dir(entities_root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    entity_dirs.sort();

    for dir in entity_dirs {
        let files: Vec<PathBuf> = WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| rules.is_tabular(&file_name_lossy(entry.path())))
            .map(|entry| entry.into_path())
            .collect();

        if !files.is_empty() {
            mapping.insert(file_name_lossy(&dir), files);
        }
    }

    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_group_by_category_first_match_and_order() {
        let categories = CategorySet::default();
        let files = vec![
            PathBuf::from("/x/session_data_1.csv"),
            PathBuf::from("/x/screenshot_data_2.csv"),
            PathBuf::from("/x/unrelated.csv"),
            PathBuf::from("/x/screenshot_data_1.csv"),
        ];

        let groups = group_by_category(&files, &categories);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.prefix, "screenshot_data");
        assert_eq!(
            groups[0].1,
            vec![PathBuf::from("/x/screenshot_data_1.csv"), PathBuf::from("/x/screenshot_data_2.csv")]
        );
        assert_eq!(groups[1].0.prefix, "session_data");
    }

    #[test]
    fn test_group_order_is_independent_of_input_order() {
        let categories = CategorySet::default();
        let extraction_order = vec![
            PathBuf::from("/x/a/screenshot_data_9.csv"),
            PathBuf::from("/x/b/screenshot_data_10.csv"),
            PathBuf::from("/x/a/screenshot_data_1.csv"),
        ];
        let mut discovery_order = extraction_order.clone();
        discovery_order.sort();

        let expected = vec![
            PathBuf::from("/x/a/screenshot_data_1.csv"),
            PathBuf::from("/x/a/screenshot_data_9.csv"),
            PathBuf::from("/x/b/screenshot_data_10.csv"),
        ];
        assert_eq!(group_by_category(&extraction_order, &categories)[0].1, expected);
        assert_eq!(group_by_category(&discovery_order, &categories)[0].1, expected);
    }

    #[test]
    fn test_merge_keeps_single_header() {
        let dir = TempDir::new().unwrap();
        let a = write(dir.path(), "screenshot_data_a.csv", "h1,h2\n1,2\n3,4\n");
        let b = write(dir.path(), "screenshot_data_b.csv", "h1,h2\n5,6\n");
        let output = dir.path().join("metadata/screenshot_data-consolidated.csv");

        let summary = merge_files(&[a.clone(), b], &output).unwrap();

        assert_eq!(fs::read_to_string(&output).unwrap(), "h1,h2\n1,2\n3,4\n5,6\n");
        assert_eq!(summary.data_rows, 3);
        assert_eq!(summary.header_source, Some(a));
    }

    #[test]
    fn test_merge_tolerates_ragged_rows_and_header_mismatch() {
        let dir = TempDir::new().unwrap();
        let a = write(dir.path(), "a.csv", "x,y\n1,2\n");
        let b = write(dir.path(), "b.csv", "x,y,z\n3,4,5\n6\n");
        let output = dir.path().join("out.csv");

        let summary = merge_files(&[a, b], &output).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "x,y\n1,2\n3,4,5\n6\n");
        assert_eq!(summary.data_rows, 3);
    }

    #[test]
    fn test_merge_normalizes_line_endings_and_quoting() {
        let dir = TempDir::new().unwrap();
        let a = write(dir.path(), "a.csv", "h1,h2\r\n\"1\",2\r\n");
        let b = write(dir.path(), "b.csv", "h1,h2\n3,\"x,y\"\n");
        let output = dir.path().join("out.csv");

        merge_files(&[a, b], &output).unwrap();
        assert_eq!(fs::read_to_string(&output).unwrap(), "h1,h2\n1,2\n3,\"x,y\"\n");
    }

    #[test]
    fn test_merge_preserves_quoted_fields() {
        let dir = TempDir::new().unwrap();
        let a = write(dir.path(), "a.csv", "id,text\n1,\"hello, world\"\n");
        let output = dir.path().join("out.csv");

        merge_files(&[a], &output).unwrap();
        let mut reader = csv::Reader::from_path(&output).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[1], "hello, world");
    }

    #[test]
    fn test_missing_source_aborts_group_without_output() {
        let dir = TempDir::new().unwrap();
        let a = write(dir.path(), "a.csv", "h\n1\n");
        let output = dir.path().join("metadata/out.csv");

        let err = merge_files(&[a, dir.path().join("gone.csv")], &output).unwrap_err();
        assert!(matches!(err, PipelineError::MissingFile { .. }));
        assert!(!output.exists());
        assert_eq!(fs::read_dir(output.parent().unwrap()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_group_leaves_sibling_groups_intact() {
        let dir = TempDir::new().unwrap();
        let inputs = dir.path().join("in");
        fs::create_dir_all(&inputs).unwrap();
        let shot = write(&inputs, "screenshot_data_1.csv", "h\n1\n");
        let session = inputs.join("session_data_1.csv");

        let mut entity_files = BTreeMap::new();
        entity_files.insert("p1".to_string(), vec![shot, session]);
        let report = consolidate(&entity_files, &CategorySet::default(), &dir.path().join("out"), "csv");

        assert_eq!(report.output_count(), 1);
        assert_eq!(report.failed["p1"][0].unit, "session_data");
        assert!(dir.path().join("out/p1/metadata/screenshot_data-consolidated.csv").exists());
        assert!(!dir.path().join("out/p1/metadata/session_data-consolidated.csv").exists());
    }

    #[test]
    fn test_unmatched_files_produce_no_output() {
        let dir = TempDir::new().unwrap();
        let other = write(dir.path(), "random.csv", "h\n1\n");

        let mut entity_files = BTreeMap::new();
        entity_files.insert("p1".to_string(), vec![other]);
        let report = consolidate(&entity_files, &CategorySet::default(), &dir.path().join("out"), "csv");

        assert_eq!(report.output_count(), 0);
        assert_eq!(report.failure_count(), 0);
        assert!(!dir.path().join("out/p1/metadata").exists());
    }

    #[test]
    fn test_discover_tabular_files() {
        let dir = TempDir::new().unwrap();
        let p1 = dir.path().join("p1");
        fs::create_dir_all(p1.join("nested")).unwrap();
        write(&p1, "b.csv", "h\n");
        write(&p1, "a.CSV", "h\n");
        write(&p1, "photo.jpg", "x");
        write(&p1.join("nested"), "c.csv", "h\n");
        fs::create_dir_all(dir.path().join("empty")).unwrap();

        let mapping = discover_tabular_files(dir.path(), &ExtensionRules::default()).unwrap();
        assert_eq!(mapping.len(), 1);
        let names: Vec<_> = mapping["p1"].iter().map(|p| file_name_lossy(p)).collect();
        assert_eq!(names, vec!["a.CSV", "b.csv", "c.csv"]);
    }
}
