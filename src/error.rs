//! Error taxonomy for the extraction pipeline.
//!
//! Every failure is classified by the smallest unit that can be retried on
//! its own: one object fetch, one archive, one image, one consolidation
//! group. Only [`PipelineError::Configuration`] and catastrophic filesystem
//! errors abort a whole run.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the pipeline library
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid operator input, detected before any I/O is attempted
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable description of the problem
        message: String,
        /// The setting that caused the error (e.g. "batch_size")
        key: Option<String>,
    },

    /// Listing or fetching from the object store failed. Not retried.
    #[error("object store error for '{target}': {reason}")]
    TransientIo {
        /// Bucket/prefix for listings, object key for fetches
        target: String,
        reason: String,
    },

    /// An archive could not be opened or one of its entries could not be read
    #[error("corrupt archive {}: {reason}", archive.display())]
    CorruptArchive { archive: PathBuf, reason: String },

    /// An image could not be decoded, annotated or re-encoded
    #[error("corrupt image {}: {reason}", image.display())]
    CorruptImage { image: PathBuf, reason: String },

    /// A consolidation source disappeared or could not be read
    #[error("missing or unreadable file {}: {reason}", path.display())]
    MissingFile { path: PathBuf, reason: String },

    /// Local filesystem error outside the categories above
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Shorthand for a configuration error tied to a specific setting
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
