use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// One entry of a listing page, as reported by the store.
///
/// The timestamp is kept raw: stores disagree on whether they attach a zone,
/// and normalization is the lister's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub key: String,
    pub last_modified: Option<String>,
    pub size: Option<i64>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    /// Common prefixes, populated only when a delimiter was given
    pub common_prefixes: Vec<String>,
    pub next_continuation_token: Option<String>,
}

/// Minimal object store capability consumed by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of objects under `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage>;

    /// Fetch an object's full content
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;
}
