use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, warn};

use crate::cloud::store::{ObjectStore, RemoteEntry};
use crate::config::TimeWindow;
use crate::error::Result;
use crate::models::ObjectDescriptor;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Normalize a store timestamp to UTC.
///
/// Zoned timestamps are converted; naive ones are taken to already be UTC so
/// they compare correctly against the UTC window bounds.
pub fn normalize_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Enumerate every object under `prefix` and keep those modified inside `window`.
///
/// The store cannot filter by time, so the full listing is accumulated first
/// by following continuation tokens. Bounds are inclusive on both ends.
/// Listing order is preserved; it becomes the download dispatch order.
pub async fn list_objects_in_window(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    window: &TimeWindow,
) -> Result<Vec<ObjectDescriptor>> {
    let mut entries: Vec<RemoteEntry> = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = store
            .list_objects(bucket, prefix, None, token.as_deref())
            .await?;
        pages += 1;
        entries.extend(page.entries);

        match page.next_continuation_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }

    debug!("Listing of s3://{}/{} returned {} entries in {} pages", bucket, prefix, entries.len(), pages);

    let filtered = filter_entries(entries, window);
    info!(
        "Files fetched: {} objects between {} and {}",
        filtered.len(),
        window.start.to_rfc3339(),
        window.end.to_rfc3339()
    );
    Ok(filtered)
}

/// Apply the time window to raw entries, dropping folder markers and repeats
pub fn filter_entries(entries: Vec<RemoteEntry>, window: &TimeWindow) -> Vec<ObjectDescriptor> {
    let mut seen = HashSet::new();
    let mut filtered = Vec::new();

    for entry in entries {
        if entry.key.ends_with('/') {
            continue;
        }

        let Some(last_modified) = entry.last_modified.as_deref().and_then(normalize_timestamp) else {
            warn!("Skipping {}: missing or unparsable LastModified {:?}", entry.key, entry.last_modified);
            continue;
        };

        if !window.contains(&last_modified) {
            continue;
        }

        if !seen.insert(entry.key.clone()) {
            warn!("Duplicate key in listing ignored: {}", entry.key);
            continue;
        }

        filtered.push(ObjectDescriptor {
            key: entry.key,
            last_modified,
            size: entry.size.unwrap_or(0).max(0) as u64,
        });
    }

    filtered
}

/// List the immediate sub-folders of `path`, for browsing a bucket layout
pub async fn list_folders(store: &dyn ObjectStore, bucket: &str, path: &str) -> Result<Vec<String>> {
    let mut folders = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = store
            .list_objects(bucket, path, Some("/"), token.as_deref())
            .await?;
        folders.extend(page.common_prefixes);

        match page.next_continuation_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }

    Ok(folders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    use crate::test_utils::fake_store::FakeObjectStore;

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap(),
        )
        .unwrap()
    }

    fn entry(key: &str, ts: Option<&str>) -> RemoteEntry {
        RemoteEntry {
            key: key.to_string(),
            last_modified: ts.map(str::to_string),
            size: Some(10),
        }
    }

    #[test]
    fn test_normalize_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert_eq!(normalize_timestamp("2024-01-15T10:00:00.000Z"), Some(expected));
        assert_eq!(normalize_timestamp("2024-01-15T12:00:00+02:00"), Some(expected));
        assert_eq!(normalize_timestamp("2024-01-15T10:00:00"), Some(expected));
        assert_eq!(normalize_timestamp("2024-01-15 10:00:00"), Some(expected));
        assert_eq!(normalize_timestamp("Mon, 15 Jan 2024 10:00:00 GMT"), Some(expected));
        assert_eq!(normalize_timestamp("soon"), None);
    }

    #[test]
    fn test_filter_bounds_are_inclusive() {
        let entries = vec![
            entry("p/a.zip", Some("2024-01-01T00:00:00Z")),
            entry("p/b.zip", Some("2024-01-31T23:59:59Z")),
            entry("p/c.zip", Some("2023-12-31T23:59:59Z")),
            entry("p/d.zip", Some("2024-02-01T00:00:00Z")),
        ];
        let keys: Vec<_> = filter_entries(entries, &window()).into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["p/a.zip", "p/b.zip"]);
    }

    #[test]
    fn test_naive_timestamp_is_treated_as_utc() {
        // Midnight without a zone must not shift out of the window
        let entries = vec![entry("p/naive.zip", Some("2024-01-01T00:00:00"))];
        assert_eq!(filter_entries(entries, &window()).len(), 1);
    }

    #[test]
    fn test_filter_drops_markers_duplicates_and_bad_timestamps() {
        let entries = vec![
            entry("p/folder/", Some("2024-01-10T00:00:00Z")),
            entry("p/a.zip", Some("2024-01-10T00:00:00Z")),
            entry("p/a.zip", Some("2024-01-11T00:00:00Z")),
            entry("p/b.zip", None),
            entry("p/c.zip", Some("not a date")),
        ];
        let filtered = filter_entries(entries, &window());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].key, "p/a.zip");
        assert_eq!(filtered[0].size, 10);
    }

    #[tokio::test]
    async fn test_listing_follows_continuation_tokens() {
        let store = FakeObjectStore::new().with_page_size(2);
        for i in 0..5 {
            store.insert(&format!("tenant/p1/{}.zip", i), b"zip", "2024-01-10T00:00:00Z");
        }
        store.insert("tenant/p1/old.zip", b"zip", "2020-01-10T00:00:00Z");

        let objects = list_objects_in_window(&store, "bucket", "tenant/", &window()).await.unwrap();
        assert_eq!(objects.len(), 5);
        assert_eq!(store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_listing_error_propagates() {
        let store = FakeObjectStore::new();
        store.fail_listing();
        let result = list_objects_in_window(&store, "bucket", "tenant/", &window()).await;
        assert!(matches!(result, Err(crate::error::PipelineError::TransientIo { .. })));
    }

    #[tokio::test]
    async fn test_list_folders() {
        let store = FakeObjectStore::new().with_page_size(1);
        store.insert("tenant/t1/a.zip", b"", "2024-01-10T00:00:00Z");
        store.insert("tenant/t2/b.zip", b"", "2024-01-10T00:00:00Z");
        store.insert("tenant/t2/c.zip", b"", "2024-01-10T00:00:00Z");

        let folders = list_folders(&store, "bucket", "tenant/").await.unwrap();
        assert_eq!(folders, vec!["tenant/t1/", "tenant/t2/"]);
    }

    proptest! {
        #[test]
        fn prop_every_listed_object_is_inside_window(offsets in proptest::collection::vec(-100i64..100, 0..40)) {
            let base = Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap();
            let entries: Vec<RemoteEntry> = offsets
                .iter()
                .enumerate()
                .map(|(i, days)| RemoteEntry {
                    key: format!("p/{}.zip", i),
                    last_modified: Some((base + chrono::Duration::days(*days)).to_rfc3339()),
                    size: Some(1),
                })
                .collect();

            let w = window();
            let filtered = filter_entries(entries, &w);
            for object in &filtered {
                prop_assert!(w.start <= object.last_modified && object.last_modified <= w.end);
            }
            let expected = offsets
                .iter()
                .filter(|d| w.contains(&(base + chrono::Duration::days(**d))))
                .count();
            prop_assert_eq!(filtered.len(), expected);
        }
    }
}
