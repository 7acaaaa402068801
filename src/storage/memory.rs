//! In-memory object store.
//!
//! Objects live in a `tokio::sync::RwLock<BTreeMap<...>>` so listings come
//! back in key order, as they do from S3.  Multipart parts are staged per
//! upload id and only become visible as an object on completion.

use bytes::Bytes;
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::Cursor;
use std::path::Path;
use std::pin::Pin;

use super::backend::{CompletedPart, ObjectReader, ObjectStore, ObjectSummary, TimeUpdate};
use crate::errors::{FilerError, Result};

/// A stored object.
#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: i64,
}

/// An open multipart session.
#[derive(Debug)]
struct PendingUpload {
    key: String,
    /// part_number -> (data, etag)
    parts: BTreeMap<u32, (Bytes, String)>,
}

/// In-memory object store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: tokio::sync::RwLock<BTreeMap<String, StoredObject>>,
    uploads: tokio::sync::RwLock<HashMap<String, PendingUpload>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current content of `key`, if stored.
    pub async fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).map(|o| o.data.clone())
    }

    /// Number of multipart sessions neither completed nor aborted.
    pub async fn open_uploads(&self) -> usize {
        self.uploads.read().await.len()
    }

    /// Compute the quoted MD5-hex ETag for a byte slice.
    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn list_objects(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectSummary>>> + Send + '_>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            Ok(objects
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, obj)| ObjectSummary {
                    key: key.clone(),
                    last_modified: obj.last_modified,
                    size: obj.data.len() as u64,
                })
                .collect())
        })
    }

    fn get_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectReader>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().await;
            match objects.get(&key) {
                Some(obj) => Ok(Box::pin(Cursor::new(obj.data.clone())) as ObjectReader),
                None => Err(FilerError::NotFound { path: key }),
            }
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
            if data.len() as u64 != content_length {
                return Err(FilerError::Backend(anyhow::anyhow!(
                    "content length mismatch for {key}: declared {content_length}, got {}",
                    data.len()
                )));
            }
            let mut objects = self.objects.write().await;
            objects.insert(
                key,
                StoredObject {
                    data,
                    last_modified: Self::now_millis(),
                },
            );
            Ok(())
        })
    }

    fn create_multipart_upload(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let upload_id = uuid::Uuid::new_v4().to_string();
            let mut uploads = self.uploads.write().await;
            uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    key,
                    parts: BTreeMap::new(),
                },
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
            let data = Bytes::from(tokio::fs::read(&file).await?);
            if data.len() as u64 != content_length {
                return Err(FilerError::Backend(anyhow::anyhow!(
                    "part {part_number} of {key}: declared {content_length} bytes, read {}",
                    data.len()
                )));
            }

            let mut uploads = self.uploads.write().await;
            let upload = uploads
                .get_mut(&upload_id)
                .filter(|u| u.key == key)
                .ok_or_else(|| anyhow::anyhow!("no such upload {upload_id} for {key}"))?;
            let etag = Self::compute_etag(&data);
            upload.parts.insert(part_number, (data, etag.clone()));
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
            if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
                return Err(FilerError::Backend(anyhow::anyhow!(
                    "parts for {key} are not in ascending order"
                )));
            }

            let mut uploads = self.uploads.write().await;
            let upload = uploads
                .get(&upload_id)
                .filter(|u| u.key == key)
                .ok_or_else(|| anyhow::anyhow!("no such upload {upload_id} for {key}"))?;

            let mut assembled = Vec::new();
            for part in &parts {
                match upload.parts.get(&part.part_number) {
                    Some((data, etag)) if *etag == part.etag => assembled.extend_from_slice(data),
                    _ => {
                        return Err(FilerError::Backend(anyhow::anyhow!(
                            "invalid part {} for upload {upload_id}",
                            part.part_number
                        )))
                    }
                }
            }
            uploads.remove(&upload_id);
            drop(uploads);

            let mut objects = self.objects.write().await;
            objects.insert(
                key,
                StoredObject {
                    data: Bytes::from(assembled),
                    last_modified: Self::now_millis(),
                },
            );
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
            let mut uploads = self.uploads.write().await;
            match uploads.remove(&upload_id) {
                Some(_) => Ok(()),
                None => Err(FilerError::Backend(anyhow::anyhow!(
                    "no such upload {upload_id} for {key}"
                ))),
            }
        })
    }

    fn delete_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.objects.write().await.remove(&key);
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
            let mut objects = self.objects.write().await;
            match objects.get_mut(&key) {
                Some(obj) => {
                    obj.last_modified = millis;
                    Ok(TimeUpdate::Persisted)
                }
                None => Err(FilerError::NotFound { path: key }),
            }
        })
    }
}

// -- Tests -------------------------------------------------------------------
