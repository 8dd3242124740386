//! Face redaction for extracted images.
//!
//! Detection is delegated to an [`ImageAnnotator`]; the [`Redactor`] only
//! decodes, applies fill or blur to the reported regions, and re-encodes.

/// Face detection capability and the external-process implementation
pub mod annotator;

/// Fill/blur application and atomic image output
pub mod redactor;

pub use annotator::{CommandAnnotator, FaceRegion, ImageAnnotator};
pub use redactor::Redactor;
