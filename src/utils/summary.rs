use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{ConsolidationReport, DownloadReport, ExpansionReport};
use crate::pipeline::cleanup::CleanupOutcome;

/// Create a JSON summary of a run.
///
/// Stages that did not run in this invocation are passed as `None` and
/// left out of the document, so `consolidate`-only runs produce a smaller
/// summary than full runs.
///
/// # Example Output
///
/// ```json
/// {
///   "run_id": "550e8400-e29b-41d4-a716-446655440000",
///   "session_id": "query_1a2b3c4d",
///   "started_at": "2024-01-15T14:30:52Z",
///   "finished_at": "2024-01-15T14:41:07Z",
///   "download": {...},
///   "expansion": {...},
///   "consolidation": {...},
///   "cleanup": [...]
/// }
/// ```
pub fn create_run_summary(
    session_id: &str,
    started_at: &str,
    finished_at: &str,
    download: Option<&DownloadReport>,
    expansion: Option<&ExpansionReport>,
    consolidation: Option<&ConsolidationReport>,
    cleanup: &[CleanupOutcome],
) -> Result<String> {
    let mut summary = json!({
        "run_id": Uuid::new_v4().to_string(),
        "session_id": session_id,
        "started_at": started_at,
        "finished_at": finished_at,
        "extractor_version": env!("CARGO_PKG_VERSION"),
        "cleanup": cleanup,
    });

    if let Some(report) = download {
        let download = json!({
            "listed": report.total,
            "downloaded": report.downloaded,
            "skipped_existing": report.skipped_existing,
            "failed": report.failed,
            "unfinished_batches": report.unfinished_batches,
            "last_batch_begin_key": report.last_batch_begin_key,
        });
        if let Some(obj) = summary.as_object_mut() {
            obj.insert("download".to_string(), download);
        }
    }

    if let Some(report) = expansion {
        let entities: serde_json::Map<String, serde_json::Value> = report
            .entities
            .iter()
            .map(|(id, e)| {
                (
                    id.clone(),
                    json!({
                        "candidates": e.candidates,
                        "existing": e.existing,
                        "extracted": e.extracted,
                        "failed": e.failed,
                    }),
                )
            })
            .collect();
        let expansion = json!({
            "candidates": report.total_candidates(),
            "existing": report.total_existing(),
            "extracted": report.total_extracted(),
            "unfinished_entities": report.unfinished_entities,
            "unassigned_archives": report.unassigned_archives,
            "entities": entities,
        });
        if let Some(obj) = summary.as_object_mut() {
            obj.insert("expansion".to_string(), expansion);
        }
    }

    if let Some(report) = consolidation {
        if let Some(obj) = summary.as_object_mut() {
            obj.insert("consolidation".to_string(), consolidation_section(report));
        }
    }

    serde_json::to_string_pretty(&summary).context("Failed to serialize run summary to JSON")
}

/// Replace the consolidation section of an existing summary.
///
/// Download, expansion and cleanup sections, and the failures they list,
/// are left as the original run wrote them. `consolidated_at` records when
/// the section was rewritten.
pub fn update_consolidation_section(
    existing: &str,
    consolidated_at: &str,
    report: &ConsolidationReport,
) -> Result<String> {
    let mut summary: Value = serde_json::from_str(existing).context("Existing run summary is not valid JSON")?;
    let obj = summary
        .as_object_mut()
        .ok_or_else(|| anyhow!("Existing run summary is not a JSON object"))?;
    obj.insert("consolidation".to_string(), consolidation_section(report));
    obj.insert("consolidated_at".to_string(), json!(consolidated_at));

    serde_json::to_string_pretty(&summary).context("Failed to serialize run summary to JSON")
}

fn consolidation_section(report: &ConsolidationReport) -> Value {
    json!({
        "output_count": report.output_count(),
        "outputs": report.outputs,
        "failed": report.failed,
    })
}
