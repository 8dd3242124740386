use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future;
use log::{debug, error, info, warn};
use tokio::fs;
use tokio::sync::Semaphore;

use crate::cloud::store::ObjectStore;
use crate::constants::PARTIAL_DOWNLOAD_SUFFIX;
use crate::error::{PipelineError, Result};
use crate::models::{Batch, DownloadReport, FailedUnit, ObjectDescriptor};
use crate::utils::files::relative_key_path;

/// Split the listing into consecutive batches of at most `batch_size`.
///
/// Concatenating the batches reproduces the input exactly; only the last
/// batch may be short.
pub fn partition(objects: &[ObjectDescriptor], batch_size: usize) -> Vec<Batch> {
    let size = batch_size.max(1);
    objects
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            objects: chunk.to_vec(),
        })
        .collect()
}

/// Local path an object is downloaded to
pub fn destination_for(root: &Path, key: &str) -> Option<PathBuf> {
    relative_key_path(key).map(|relative| root.join(relative))
}

/// Drop objects that cannot be given a private destination.
///
/// Keys that map outside the root, and later keys colliding with an earlier
/// key's destination, are reported as failures before any worker starts.
/// Every remaining object owns its destination exclusively.
pub fn plan_destinations(
    objects: Vec<ObjectDescriptor>,
    root: &Path,
) -> (Vec<ObjectDescriptor>, Vec<FailedUnit>) {
    let mut claimed: HashMap<PathBuf, String> = HashMap::new();
    let mut planned = Vec::with_capacity(objects.len());
    let mut rejected = Vec::new();

    for object in objects {
        let Some(dest) = destination_for(root, &object.key) else {
            warn!("Key {} does not map to a local path, skipping", object.key);
            rejected.push(FailedUnit::new(&object.key, "key does not map to a safe local path"));
            continue;
        };
        if object.key.ends_with(PARTIAL_DOWNLOAD_SUFFIX) {
            warn!("Key {} uses the in-flight download suffix, skipping", object.key);
            rejected.push(FailedUnit::new(&object.key, "key collides with in-flight download names"));
            continue;
        }
        if let Some(owner) = claimed.get(&dest) {
            warn!("Key {} collides with {} at {}", object.key, owner, dest.display());
            rejected.push(FailedUnit::new(
                &object.key,
                format!("destination {} already claimed by {}", dest.display(), owner),
            ));
            continue;
        }
        claimed.insert(dest, object.key.clone());
        planned.push(object);
    }

    (planned, rejected)
}

/// Counts reported back by one batch worker
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub downloaded: usize,
    pub skipped_existing: usize,
    pub failed: Vec<FailedUnit>,
}

enum ObjectOutcome {
    Downloaded,
    Skipped,
}

/// Download `objects` below `root` in bounded-parallel batches.
///
/// At most `workers` batches run at once; batches are admitted in partition
/// order as slots free up. Objects whose destination already exists are not
/// fetched again, so re-running after an interruption only downloads what is
/// missing. A failing object is recorded and its batch carries on; a batch
/// worker that dies is reported in `unfinished_batches`.
pub async fn download(
    store: Arc<dyn ObjectStore>,
    bucket: &str,
    objects: Vec<ObjectDescriptor>,
    batch_size: usize,
    workers: usize,
    root: &Path,
) -> Result<DownloadReport> {
    if batch_size == 0 {
        return Err(PipelineError::config("batch_size", "batch size must be positive"));
    }
    if workers == 0 {
        return Err(PipelineError::config("download_workers", "worker count must be positive"));
    }

    let mut report = DownloadReport {
        total: objects.len(),
        ..Default::default()
    };

    let (planned, rejected) = plan_destinations(objects, root);
    report.failed.extend(rejected);

    let batches = partition(&planned, batch_size);
    info!(
        "Downloading {} objects in {} batches of up to {} with {} workers",
        planned.len(),
        batches.len(),
        batch_size,
        workers
    );

    let semaphore = Arc::new(Semaphore::new(workers));
    let mut dispatched = Vec::with_capacity(batches.len());
    let mut handles = Vec::with_capacity(batches.len());

    for batch in batches {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|e| PipelineError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

        if let Some(key) = batch.begin_key() {
            report.last_batch_begin_key = Some(key.to_string());
        }
        let keys: Vec<String> = batch.objects.iter().map(|o| o.key.clone()).collect();
        let index = batch.index;

        let store = Arc::clone(&store);
        let bucket = bucket.to_string();
        let root = root.to_path_buf();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            download_batch(store.as_ref(), &bucket, &batch, &root).await
        });
        dispatched.push((index, keys));
        handles.push(handle);
    }

    let results = future::join_all(handles).await;
    for ((index, keys), result) in dispatched.into_iter().zip(results) {
        match result {
            Ok(outcome) => {
                report.downloaded += outcome.downloaded;
                report.skipped_existing += outcome.skipped_existing;
                report.failed.extend(outcome.failed);
            }
            Err(e) => {
                error!("Batch {} did not finish: {}", index, e);
                report.unfinished_batches.push(index);
                report.failed.extend(
                    keys.into_iter()
                        .map(|key| FailedUnit::new(key, format!("batch {} worker terminated", index))),
                );
            }
        }
    }

    info!(
        "Downloads complete: {} new, {} already present, {} failed of {} listed",
        report.downloaded,
        report.skipped_existing,
        report.failed.len(),
        report.total
    );
    Ok(report)
}

/// Download one batch sequentially, isolating per-object failures
pub async fn download_batch(
    store: &dyn ObjectStore,
    bucket: &str,
    batch: &Batch,
    root: &Path,
) -> BatchOutcome {
    info!("Batch {}: downloading {} files", batch.index, batch.objects.len());
    let mut outcome = BatchOutcome::default();

    for object in &batch.objects {
        match download_object(store, bucket, object, root).await {
            Ok(ObjectOutcome::Downloaded) => outcome.downloaded += 1,
            Ok(ObjectOutcome::Skipped) => outcome.skipped_existing += 1,
            Err(e) => {
                warn!("Batch {}: failed to download {}: {}", batch.index, object.key, e);
                outcome.failed.push(FailedUnit::new(&object.key, e));
            }
        }
    }

    debug!(
        "Batch {} finished: {} downloaded, {} skipped, {} failed",
        batch.index,
        outcome.downloaded,
        outcome.skipped_existing,
        outcome.failed.len()
    );
    outcome
}

async fn download_object(
    store: &dyn ObjectStore,
    bucket: &str,
    object: &ObjectDescriptor,
    root: &Path,
) -> Result<ObjectOutcome> {
    let dest = destination_for(root, &object.key).ok_or_else(|| PipelineError::TransientIo {
        target: object.key.clone(),
        reason: "key does not map to a safe local path".to_string(),
    })?;

    if fs::try_exists(&dest).await? {
        debug!("Skipping {}, already downloaded", object.key);
        return Ok(ObjectOutcome::Skipped);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }

    let content = store.get_object(bucket, &object.key).await?;

    // Write beside the destination, then rename into place
    let mut partial = dest.clone().into_os_string();
    partial.push(PARTIAL_DOWNLOAD_SUFFIX);
    let partial = PathBuf::from(partial);

    if let Err(e) = fs::write(&partial, &content).await {
        let _ = fs::remove_file(&partial).await;
        return Err(e.into());
    }
    fs::rename(&partial, &dest).await?;

    debug!("Downloaded {} ({} bytes)", object.key, content.len());
    Ok(ObjectOutcome::Downloaded)
}
