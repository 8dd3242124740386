//! Benchmarks for CSV consolidation performance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use panel_extractor::pipeline::consolidator::merge_files;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_sources(dir: &TempDir, files: usize, rows: usize) -> Vec<PathBuf> {
    (0..files)
        .map(|f| {
            let mut content = String::from("timestamp,package,duration_ms,text\n");
            for r in 0..rows {
                content.push_str(&format!("{},com.example.app{},{},\"row {}, file {}\"\n", 1_700_000_000 + r, r % 7, r * 13, r, f));
            }
            let path = dir.path().join(format!("screenshot_data_{}.csv", f));
            fs::write(&path, content).unwrap();
            path
        })
        .collect()
}

/// Benchmark merging groups of different shapes
fn bench_merge_files(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_files");

    let shapes = vec![
        (10, 100, "10x100"),
        (100, 100, "100x100"),
        (10, 10_000, "10x10000"),
    ];

    for (files, rows, name) in shapes {
        let temp_dir = TempDir::new().unwrap();
        let sources = write_sources(&temp_dir, files, rows);
        let output = temp_dir.path().join("metadata/screenshot_data-consolidated.csv");

        group.throughput(Throughput::Elements((files * rows) as u64));
        group.bench_with_input(BenchmarkId::new("merge", name), &sources, |b, sources| {
            b.iter(|| merge_files(black_box(sources), &output).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merge_files);
criterion_main!(benches);
