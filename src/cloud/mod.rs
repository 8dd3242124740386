//! Object store access for panelist archives.
//!
//! The pipeline only ever lists and fetches. Both operations sit behind the
//! [`store::ObjectStore`] trait so the downloader can be driven by S3 in
//! production and by an in-memory store in tests.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │   lister.rs     │────▶│  ObjectStore     │◀────│  downloader     │
//! │ (window filter) │     │  (store.rs)      │     │  (batches)      │
//! └─────────────────┘     └────────┬─────────┘     └─────────────────┘
//!                                  │
//!                         ┌────────▼─────────┐
//!                         │  S3ObjectStore   │
//!                         │  (s3.rs)         │
//!                         └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use panel_extractor::cloud::{client::create_s3_client, s3::S3ObjectStore};
//! use panel_extractor::cloud::lister::list_folders;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = create_s3_client(Some("us-east-1"), None)?;
//! let store = S3ObjectStore::new(client);
//! for folder in list_folders(&store, "screenlake-zip-prod", "academia/tenant/").await? {
//!     println!("{}", folder);
//! }
//! # Ok(())
//! # }
//! ```

/// S3 client construction (region and profile resolution)
pub mod client;

/// Paginated listing with time-window filtering
pub mod lister;

/// S3 implementation of the object store capability
pub mod s3;

/// Object store capability consumed by the pipeline
pub mod store;
