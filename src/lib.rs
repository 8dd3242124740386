//! # panel-extractor
//!
//! Resumable batch extraction of panelist archives stored in S3, with face
//! redaction of screenshots and per-category CSV consolidation.
//!
//! ## Overview
//!
//! A session lists every object under a bucket path, keeps those modified
//! inside a time window, and downloads them in bounded-parallel batches.
//! Each panelist's zip archives are then expanded: CSV fragments are kept
//! for consolidation, images are passed through a face annotator and written
//! out redacted. Finally the CSV fragments of each panelist are merged per
//! category prefix and the intermediate trees are removed.
//!
//! ## Features
//!
//! - **Resumable**: every stage skips work whose output already exists
//! - **Bounded parallelism**: download batches, panelist expansion and
//!   consolidation each run on a fixed-size pool
//! - **Failure isolation**: one bad object, archive, image or CSV never
//!   stops its siblings; all failures land in `run_summary.json`
//! - **Pluggable face detection**: any command speaking the annotator
//!   protocol can be used
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use panel_extractor::cloud::{client::create_s3_client, s3::S3ObjectStore};
//! use panel_extractor::config::{PipelineConfig, PipelineSettings, RunParameters};
//! use panel_extractor::pipeline::run_pipeline;
//! use panel_extractor::redaction::CommandAnnotator;
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = PipelineSettings {
//!     path: Some("academia/tenant/acme/panelist/".to_string()),
//!     annotator_command: vec!["face-annotator".to_string()],
//!     ..Default::default()
//! };
//! let params = RunParameters {
//!     output_dir: "/data/sessions".into(),
//!     start: Some("2024-01-01".to_string()),
//!     ..Default::default()
//! };
//! let config = PipelineConfig::from_settings(&settings, &params, Utc::now())?;
//!
//! let store = Arc::new(S3ObjectStore::new(create_s3_client(None, None)?));
//! let annotator = Arc::new(CommandAnnotator::from_command(&config.annotator_command)?);
//! let outcome = run_pipeline(&config, store, annotator)?;
//!
//! println!("{} consolidated files", outcome.consolidation.output_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface definitions and argument parsing
//! - [`models`]: Stage reports and the units they describe
//! - [`config`]: Settings, validated configuration and session layout
//! - [`cloud`]: Object store access (S3) and windowed listing
//! - [`pipeline`]: Download, expansion, consolidation and cleanup stages
//! - [`redaction`]: Face annotation and redaction of images
//! - [`utils`]: Path mapping, atomic writes, worker pool, run summary
//! - [`error`]: Error taxonomy shared by the stages
//! - [`constants`]: Application-wide constants

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Stage reports and the units they describe
pub mod models;

/// Error taxonomy shared by the pipeline stages
pub mod error;

/// Object store access and windowed listing
pub mod cloud;

/// Settings, validated configuration and session layout
pub mod config;

/// The pipeline stages and their orchestration
pub mod pipeline;

/// Face annotation and image redaction
pub mod redaction;

/// Utility functions for paths, atomic writes and worker pools
pub mod utils;

/// Application constants and configuration values
pub mod constants;

/// Test utilities and helpers
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
