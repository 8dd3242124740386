//! Utility functions shared by the pipeline stages.
//!
//! ## Components
//!
//! - **Files**: object key to local path mapping, atomic file writes
//! - **Pool**: bounded thread pool with per-unit panic isolation
//! - **Summary**: run summary reporting
//!
//! ## Common Use Cases
//!
//! ### Mapping an object key
//!
//! ```
//! use panel_extractor::utils::files::relative_key_path;
//! use std::path::PathBuf;
//!
//! assert_eq!(
//!     relative_key_path("academia/tenant/t1/p1/a.zip"),
//!     Some(PathBuf::from("tenant/t1/p1/a.zip"))
//! );
//! ```
//!
//! ### Running bounded work
//!
//! ```
//! use panel_extractor::utils::pool::{run_bounded, PoolOutcome};
//!
//! let outcomes = run_bounded("square", vec![1, 2, 3], 2, |n: u64| n * n);
//! assert_eq!(outcomes[2], PoolOutcome::Completed(9));
//! ```

/// Path mapping and atomic writes
pub mod files;

/// Bounded worker pool
pub mod pool;

/// Run summary generation and reporting
pub mod summary;
