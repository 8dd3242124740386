use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use rusoto_s3::{GetObjectRequest, ListObjectsV2Request, S3Client, S3};
use tokio::io::AsyncReadExt;

use crate::cloud::store::{ListPage, ObjectStore, RemoteEntry};
use crate::error::{PipelineError, Result};

/// [`ObjectStore`] backed by Amazon S3.
///
/// Holds a shared client so one instance can serve every download worker.
/// Requests are issued exactly once; callers decide whether to retry.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Arc<S3Client>,
}

impl S3ObjectStore {
    pub fn new(client: Arc<S3Client>) -> Self {
        S3ObjectStore { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage> {
        let request = ListObjectsV2Request {
            bucket: bucket.to_string(),
            prefix: Some(prefix.to_string()),
            delimiter: delimiter.map(str::to_string),
            continuation_token: continuation_token.map(str::to_string),
            ..Default::default()
        };

        let output = self.client.list_objects_v2(request).await.map_err(|e| {
            PipelineError::TransientIo {
                target: format!("s3://{}/{}", bucket, prefix),
                reason: e.to_string(),
            }
        })?;

        let entries: Vec<RemoteEntry> = output
            .contents
            .unwrap_or_default()
            .into_iter()
            .filter_map(|object| {
                object.key.map(|key| RemoteEntry {
                    key,
                    last_modified: object.last_modified,
                    size: object.size,
                })
            })
            .collect();

        let common_prefixes = output
            .common_prefixes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.prefix)
            .collect();

        debug!("Listed {} objects under s3://{}/{}", entries.len(), bucket, prefix);

        Ok(ListPage {
            entries,
            common_prefixes,
            next_continuation_token: output.next_continuation_token,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let fetch_error = |reason: String| PipelineError::TransientIo {
            target: format!("s3://{}/{}", bucket, key),
            reason,
        };

        let request = GetObjectRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            ..Default::default()
        };

        let output = self.client.get_object(request).await
            .map_err(|e| fetch_error(e.to_string()))?;
        let body = output.body
            .ok_or_else(|| fetch_error("response has no body".to_string()))?;

        let mut contents = Vec::with_capacity(output.content_length.unwrap_or(0).max(0) as usize);
        body.into_async_read()
            .read_to_end(&mut contents)
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        Ok(Bytes::from(contents))
    }
}
