//! Abstract object store trait.
//!
//! Every object store must implement [`ObjectStore`].  The trait speaks in
//! flat keys (no leading separator) and knows nothing about paths,
//! directories or records; [`crate::object_filer::ObjectStoreFiler`] builds
//! the filesystem view on top of it.

use bytes::Bytes;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::errors::Result;

/// Streaming reader over an object's content.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// One entry of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// Full object key.
    pub key: String,
    /// Last-modified time in epoch milliseconds.
    pub last_modified: i64,
    /// Object size in bytes.
    pub size: u64,
}

/// Acknowledgment for one uploaded multipart chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// ETag returned by the store for this part.
    pub etag: String,
}

/// Outcome of a modification-time update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUpdate {
    /// The store now reports the requested time as the object's last-modified.
    Persisted,
    /// The time was recorded as object metadata only.  Listings keep
    /// reporting the store-assigned last-modified time.
    Advisory,
}

/// Async object store contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// List every object whose key starts with `prefix`, in key order.
    fn list_objects(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectSummary>>> + Send + '_>>;

    /// Open the content of `key`.  Fails with `NotFound` if absent.
    fn get_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectReader>> + Send + '_>>;

    /// Atomically store `data` under `key`, declaring `content_length` bytes.
    fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_length: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Open a multipart session for `key`, returning its upload id.
    fn create_multipart_upload(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Upload `content_length` bytes read from `file` as part `part_number`.
    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        file: &Path,
        content_length: u64,
    ) -> Pin<Box<dyn Future<Output = Result<CompletedPart>> + Send + '_>>;

    /// Assemble `parts` (ascending part number) into the object at `key`.
    fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Discard a multipart session and every part staged under it.
    fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Delete `key`.  Deleting an absent object succeeds.
    fn delete_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Record `millis` as the modification time of `key`.
    fn set_modified(
        &self,
        key: &str,
        millis: i64,
    ) -> Pin<Box<dyn Future<Output = Result<TimeUpdate>> + Send + '_>>;
}
