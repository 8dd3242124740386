//! Integration tests for consolidating an existing session.
//!
//! These tests build an extraction tree by hand and drive the same entry
//! point the `consolidate` subcommand uses.

use std::fs;
use std::path::Path;

use anyhow::Result;
use serde_json::Value;
use tempfile::TempDir;

use panel_extractor::config::{CategorySet, ExtensionRules, SessionLayout};
use panel_extractor::pipeline::run_consolidation;

fn write(dir: &Path, name: &str, content: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), content).unwrap();
}

#[test]
fn test_consolidate_existing_session() -> Result<()> {
    let out = TempDir::new()?;
    let layout = SessionLayout::new(out.path(), "query_1234");
    layout.create_dirs()?;

    let p1 = layout.entity_unzipped("p1");
    write(&p1, "screenshot_data_1.csv", "a,b\n1,2\n3,4\n");
    write(&p1, "screenshot_data_2.csv", "a,b\n5,6\n7,8\n9,10\n");
    write(&p1, "app_accessibility_data_1.csv", "x\n1\n");
    write(&p1, "other.csv", "z\n1\n");
    write(&layout.entity_unzipped("p2"), "session_data_1.csv", "s\n1\n");

    let report = run_consolidation(&layout, &CategorySet::default(), &ExtensionRules::default(), "csv")?;

    assert_eq!(report.output_count(), 3);
    assert_eq!(report.failure_count(), 0);

    let merged = fs::read_to_string(layout.entity_metadata("p1").join("screenshot_data-consolidated.csv"))?;
    assert_eq!(merged, "a,b\n1,2\n3,4\n5,6\n7,8\n9,10\n");
    assert_eq!(merged.lines().count(), 1 + 2 + 3);

    let outputs = &report.outputs["p1"];
    let screenshot = outputs.iter().find(|o| o.category == "screenshot_data").unwrap();
    assert_eq!(screenshot.source_count, 2);
    assert_eq!(screenshot.data_rows, 5);
    assert!(screenshot.header_source.ends_with("screenshot_data_1.csv"));

    assert!(layout.entity_metadata("p2").join("session_data-consolidated.csv").exists());
    assert!(!layout.entity_metadata("p1").join("other-consolidated.csv").exists());

    let summary: Value = serde_json::from_str(&fs::read_to_string(layout.run_summary_path())?)?;
    assert_eq!(summary["session_id"], "query_1234");
    assert!(summary["download"].is_null());
    Ok(())
}

#[test]
fn test_consolidation_overwrites_previous_output() -> Result<()> {
    let out = TempDir::new()?;
    let layout = SessionLayout::new(out.path(), "query_again");
    layout.create_dirs()?;
    write(&layout.entity_unzipped("p1"), "session_data_1.csv", "h\n1\n");

    run_consolidation(&layout, &CategorySet::default(), &ExtensionRules::default(), "csv")?;
    write(&layout.entity_unzipped("p1"), "session_data_2.csv", "h\n2\n");
    run_consolidation(&layout, &CategorySet::default(), &ExtensionRules::default(), "csv")?;

    let merged = fs::read_to_string(layout.entity_metadata("p1").join("session_data-consolidated.csv"))?;
    assert_eq!(merged, "h\n1\n2\n");
    Ok(())
}

#[test]
fn test_custom_categories_and_extension() -> Result<()> {
    let out = TempDir::new()?;
    let layout = SessionLayout::new(out.path(), "query_custom");
    layout.create_dirs()?;
    write(&layout.entity_unzipped("p7"), "usage_1.csv", "u\n1\n");
    write(&layout.entity_unzipped("p7"), "usage_2.csv", "u\n2\n");

    let categories = CategorySet::new(&["usage"])?;
    let report = run_consolidation(&layout, &categories, &ExtensionRules::default(), "txt")?;

    assert_eq!(report.output_count(), 1);
    assert!(layout.entity_metadata("p7").join("usage-consolidated.txt").exists());
    Ok(())
}

#[test]
fn test_missing_session_is_an_error() {
    let out = TempDir::new().unwrap();
    let layout = SessionLayout::new(out.path(), "query_absent");
    let result = run_consolidation(&layout, &CategorySet::default(), &ExtensionRules::default(), "csv");
    assert!(result.is_err());
}
