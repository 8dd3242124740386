//! Test utilities for panel-extractor
//!
//! Fakes for the object store and face annotator, plus builders for the
//! archives and images the pipeline consumes. Compiled for unit tests and,
//! through the `test-utils` feature, for the integration tests.

use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::Path;

use anyhow::Result;
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use zip::write::FileOptions;

/// Write a zip archive containing `entries` (name, content)
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

/// Build a zip archive in memory
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        zip.start_file(*name, FileOptions::default()).expect("start zip entry");
        zip.write_all(content).expect("write zip entry");
    }
    zip.finish().expect("finish zip").into_inner()
}

/// Encode a gradient RGB image as JPEG bytes
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 200])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Jpeg(95))
        .expect("encode test jpeg");
    bytes
}

/// Encode a uniform-white PNG, useful where lossless pixels are asserted
pub fn white_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .expect("encode test png");
    bytes
}

pub mod fake_annotator {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::redaction::{FaceRegion, ImageAnnotator};

    /// Annotator that reports the same regions for every image
    pub struct StubAnnotator {
        regions: Vec<FaceRegion>,
        calls: AtomicUsize,
    }

    impl StubAnnotator {
        pub fn new(regions: Vec<FaceRegion>) -> Self {
            StubAnnotator { regions, calls: AtomicUsize::new(0) }
        }

        pub fn no_faces() -> Self {
            Self::new(Vec::new())
        }

        /// One face covering the top-left 16x16 pixels of every image
        pub fn corner_face() -> Self {
            Self::new(vec![FaceRegion::new(0, 0, 16, 16)])
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ImageAnnotator for StubAnnotator {
        fn detect_faces(&self, _image: &GrayImage) -> anyhow::Result<Vec<FaceRegion>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.regions.clone())
        }
    }

    /// Annotator that always fails
    pub struct FailingAnnotator;

    impl ImageAnnotator for FailingAnnotator {
        fn detect_faces(&self, _image: &GrayImage) -> anyhow::Result<Vec<FaceRegion>> {
            anyhow::bail!("annotator unavailable")
        }
    }
}

pub mod fake_store {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::cloud::store::{ListPage, ObjectStore, RemoteEntry};
    use crate::error::{PipelineError, Result};

    struct StoredObject {
        content: Bytes,
        last_modified: String,
    }

    /// In-memory object store with S3-like pagination.
    ///
    /// Continuation tokens are offsets into the sorted listing; with a
    /// delimiter, keys sharing a folder collapse into one common prefix.
    pub struct FakeObjectStore {
        objects: Mutex<BTreeMap<String, StoredObject>>,
        page_size: usize,
        list_calls: AtomicUsize,
        get_calls: AtomicUsize,
        fail_listing: AtomicBool,
        failing_keys: Mutex<HashSet<String>>,
        panicking_keys: Mutex<HashSet<String>>,
    }

    enum Item {
        Entry(RemoteEntry),
        Prefix(String),
    }

    impl FakeObjectStore {
        pub fn new() -> Self {
            FakeObjectStore {
                objects: Mutex::new(BTreeMap::new()),
                page_size: 1000,
                list_calls: AtomicUsize::new(0),
                get_calls: AtomicUsize::new(0),
                fail_listing: AtomicBool::new(false),
                failing_keys: Mutex::new(HashSet::new()),
                panicking_keys: Mutex::new(HashSet::new()),
            }
        }

        pub fn with_page_size(mut self, page_size: usize) -> Self {
            self.page_size = page_size.max(1);
            self
        }

        pub fn insert(&self, key: &str, content: &[u8], last_modified: &str) {
            self.objects.lock().unwrap().insert(
                key.to_string(),
                StoredObject {
                    content: Bytes::copy_from_slice(content),
                    last_modified: last_modified.to_string(),
                },
            );
        }

        pub fn fail_listing(&self) {
            self.fail_listing.store(true, Ordering::SeqCst);
        }

        /// Make every fetch of `key` fail
        pub fn fail_key(&self, key: &str) {
            self.failing_keys.lock().unwrap().insert(key.to_string());
        }

        /// Make fetches of previously failing keys succeed again
        pub fn heal(&self) {
            self.failing_keys.lock().unwrap().clear();
        }

        /// Make every fetch of `key` panic inside the fetching task
        pub fn panic_on_key(&self, key: &str) {
            self.panicking_keys.lock().unwrap().insert(key.to_string());
        }

        pub fn list_calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }

        pub fn get_calls(&self) -> usize {
            self.get_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            delimiter: Option<&str>,
            continuation_token: Option<&str>,
        ) -> Result<ListPage> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(PipelineError::TransientIo {
                    target: format!("s3://{}/{}", bucket, prefix),
                    reason: "listing refused".to_string(),
                });
            }

            let objects = self.objects.lock().unwrap();
            let mut items = Vec::new();
            let mut seen_prefixes = HashSet::new();
            for (key, object) in objects.range(prefix.to_string()..) {
                if !key.starts_with(prefix) {
                    break;
                }
                let rest = &key[prefix.len()..];
                match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len())) {
                    Some(end) => {
                        let common = format!("{}{}", prefix, &rest[..end]);
                        if seen_prefixes.insert(common.clone()) {
                            items.push(Item::Prefix(common));
                        }
                    }
                    None => items.push(Item::Entry(RemoteEntry {
                        key: key.clone(),
                        last_modified: Some(object.last_modified.clone()),
                        size: Some(object.content.len() as i64),
                    })),
                }
            }

            let total = items.len();
            let offset: usize = continuation_token
                .and_then(|t| t.parse().ok())
                .unwrap_or(0)
                .min(total);
            let end = (offset + self.page_size).min(total);

            let mut page = ListPage::default();
            for item in items.drain(offset..end) {
                match item {
                    Item::Entry(entry) => page.entries.push(entry),
                    Item::Prefix(p) => page.common_prefixes.push(p),
                }
            }
            if end < total {
                page.next_continuation_token = Some(end.to_string());
            }
            Ok(page)
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            let transient = |reason: &str| PipelineError::TransientIo {
                target: format!("s3://{}/{}", bucket, key),
                reason: reason.to_string(),
            };

            let panics = self.panicking_keys.lock().unwrap().contains(key);
            if panics {
                panic!("fetch of {} blew up", key);
            }
            if self.failing_keys.lock().unwrap().contains(key) {
                return Err(transient("connection reset"));
            }
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .map(|o| o.content.clone())
                .ok_or_else(|| transient("NoSuchKey"))
        }
    }
}
