//! AWS S3 object store.
//!
//! Talks to a single S3 (or S3-compatible) bucket.  Keys are used as-is.
//!
//! Credentials come either from an explicit key/secret pair or from the
//! standard AWS credential chain (env vars, `~/.aws/credentials`, IAM role,
//! etc.).

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, MetadataDirective};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tracing::{debug, info, warn};

use super::backend::{CompletedPart, ObjectReader, ObjectStore, ObjectSummary, TimeUpdate};
use crate::config::AwsConfig;
use crate::errors::{FilerError, Result};

/// User metadata entry that carries the time set by `set_modified`.
pub const MTIME_METADATA_KEY: &str = "mtime";

/// Object store backed by one S3 bucket.
pub struct AwsObjectStore {
    /// AWS S3 SDK client.
    client: Client,
    /// The bucket all keys live in.
    bucket: String,
}

impl AwsObjectStore {
    /// Create a new store for `bucket`.
    ///
    /// `credentials` is an explicit (access key, secret) pair; `None` falls
    /// back to the default credential chain.
    pub async fn new(
        bucket: String,
        aws: &AwsConfig,
        credentials: Option<(String, String)>,
    ) -> Self {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(aws.region.clone()));

        if let Some(ref endpoint) = aws.endpoint_url {
            config_loader = config_loader.endpoint_url(endpoint);
        }

        if let Some((key, secret)) = credentials {
            let creds = aws_sdk_s3::config::Credentials::new(
                key,
                secret,
                None, // session_token
                None, // expiry
                "filer-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(aws.use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "AWS object store initialized: bucket={} region={}",
            bucket, aws.region
        );

        Self { client, bucket }
    }

    /// Map an AWS SDK error to a backend error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> FilerError {
        FilerError::Backend(anyhow::anyhow!("AWS S3 {context}: {err}"))
    }

    /// Source argument for a server-side copy of `key` within the bucket.
    fn copy_source(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, key)
    }
}

impl ObjectStore for AwsObjectStore {
    fn list_objects(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectSummary>>> + Send + '_>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            debug!("AWS list_objects_v2: bucket={} prefix={}", self.bucket, prefix);

            let mut summaries = Vec::new();
            let mut continuation_token: Option<String> = None;
            loop {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&prefix);

                if let Some(ref token) = continuation_token {
                    req = req.continuation_token(token);
                }

                let resp = req
                    .send()
                    .await
                    .map_err(|e| Self::map_sdk_error("list_objects_v2", e))?;

                for obj in resp.contents() {
                    let Some(key) = obj.key() else {
                        continue;
                    };
                    summaries.push(ObjectSummary {
                        key: key.to_string(),
                        last_modified: obj
                            .last_modified()
                            .and_then(|t| t.to_millis().ok())
                            .unwrap_or(0),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                    });
                }

                match next_page_token(resp.is_truncated(), resp.next_continuation_token()) {
                    Some(token) => continuation_token = Some(token),
                    None => break,
                }
            }

            Ok(summaries)
        })
    }

    fn get_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectReader>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("AWS get_object: bucket={} key={}", self.bucket, key);

            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        FilerError::NotFound { path: key.clone() }
                    } else {
                        Self::map_sdk_error("get_object", service_err)
                    }
                })?;

            Ok(Box::pin(resp.body.into_async_read()) as ObjectReader)
        })
    }

    fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_length: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            debug!(
                "AWS put_object: bucket={} key={} length={}",
                self.bucket, key, content_length
            );

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .content_length(content_length as i64)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", e))?;

            Ok(())
        })
    }

    fn create_multipart_upload(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("create_multipart_upload", e))?;

            let upload_id = resp
                .upload_id()
                .ok_or_else(|| anyhow::anyhow!("AWS did not return upload ID"))?
                .to_string();

            debug!(
                "AWS create_multipart_upload: bucket={} key={} upload_id={}",
                self.bucket, key, upload_id
            );

            Ok(upload_id)
        })
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        file: &Path,
        content_length: u64,
    ) -> Pin<Box<dyn Future<Output = Result<CompletedPart>> + Send + '_>> {
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        let file = file.to_path_buf();
        Box::pin(async move {
            debug!(
                "AWS upload_part: bucket={} key={} (upload={} part={} length={})",
                self.bucket, key, upload_id, part_number, content_length
            );

            let body = ByteStream::from_path(&file)
                .await
                .map_err(|e| Self::map_sdk_error("upload_part body", e))?;

            let resp = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&key)
                .upload_id(&upload_id)
                .part_number(part_number as i32)
                .content_length(content_length as i64)
                .body(body)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("upload_part", e))?;

            let etag = resp
                .e_tag()
                .ok_or_else(|| anyhow::anyhow!("AWS did not return an ETag for part {part_number}"))?
                .to_string();

            Ok(CompletedPart { part_number, etag })
        })
    }

    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        let parts = parts.to_vec();
        Box::pin(async move {
            debug!(
                "AWS complete_multipart_upload: bucket={} key={} upload_id={} parts={}",
                self.bucket,
                key,
                upload_id,
                parts.len()
            );

            let completed_parts = parts
                .iter()
                .map(|p| {
                    aws_sdk_s3::types::CompletedPart::builder()
                        .e_tag(&p.etag)
                        .part_number(p.part_number as i32)
                        .build()
                })
                .collect();

            let completed_upload = CompletedMultipartUpload::builder()
                .set_parts(Some(completed_parts))
                .build();

            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(&key)
                .upload_id(&upload_id)
                .multipart_upload(completed_upload)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("complete_multipart_upload", e))?;

            Ok(())
        })
    }

    fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        Box::pin(async move {
            debug!(
                "AWS abort_multipart_upload: bucket={} key={} upload_id={}",
                self.bucket, key, upload_id
            );

            self.client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("abort_multipart_upload", e))?;

            Ok(())
        })
    }

    fn delete_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            debug!("AWS delete_object: bucket={} key={}", self.bucket, key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;

            Ok(())
        })
    }

    fn set_modified(
        &self,
        key: &str,
        millis: i64,
    ) -> Pin<Box<dyn Future<Output = Result<TimeUpdate>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let head = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        FilerError::NotFound { path: key.clone() }
                    } else {
                        Self::map_sdk_error("head_object", service_err)
                    }
                })?;

            // S3 owns LastModified.  A self-copy with replaced metadata is the
            // only in-place update available, so the time is kept as user
            // metadata and existing metadata is carried over.
            let mut metadata = head.metadata().cloned().unwrap_or_default();
            metadata.insert(MTIME_METADATA_KEY.to_string(), millis.to_string());

            debug!(
                "AWS set_modified: bucket={} key={} mtime={}",
                self.bucket, key, millis
            );

            self.client
                .copy_object()
                .bucket(&self.bucket)
                .key(&key)
                .copy_source(self.copy_source(&key))
                .metadata_directive(MetadataDirective::Replace)
                .set_metadata(Some(metadata))
                .set_content_type(head.content_type().map(str::to_string))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("copy_object (set_modified)", e))?;

            Ok(TimeUpdate::Advisory)
        })
    }
}

/// Continuation token for the page after a listing response, or `None`
/// when listing is done.  A truncated page without a token ends the listing
/// instead of restarting it.
fn next_page_token(is_truncated: Option<bool>, token: Option<&str>) -> Option<String> {
    if is_truncated != Some(true) {
        return None;
    }
    if token.is_none() {
        warn!("AWS list_objects_v2: truncated page without continuation token");
    }
    token.map(str::to_string)
}

// -- Tests -------------------------------------------------------------------
