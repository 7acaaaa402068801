//! Filer backed by an object store.
//!
//! Paths map to keys by dropping the leading `/`.  Directories exist only
//! as a naming convention: a key ending in `/` is listed as a directory and
//! [`Filer::create_dirs`] writes such a zero-length marker.  Rename, append
//! and random access have no object-store equivalent and are unsupported.

use bytes::Bytes;
use http::Uri;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{FilerConfig, SecretPrompt};
use crate::errors::{FilerError, Result};
use crate::filer::{DataIo, FileSink, Filer};
use crate::pool::UploadPool;
use crate::record::{path_to_key, Record, SEPARATOR};
use crate::storage::aws::AwsObjectStore;
use crate::storage::backend::{ObjectReader, ObjectStore, TimeUpdate};
use crate::upload::{BufferedUpload, UploadSettings};

/// Filer over one bucket of an [`ObjectStore`].
pub struct ObjectStoreFiler {
    uri: Uri,
    store: Arc<dyn ObjectStore>,
    /// Shared by every upload this filer opens.
    pool: Arc<UploadPool>,
    settings: UploadSettings,
}

impl ObjectStoreFiler {
    /// Create a filer over `store`, starting `threads` upload workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        uri: Uri,
        store: Arc<dyn ObjectStore>,
        settings: UploadSettings,
        threads: usize,
    ) -> Result<Self> {
        if settings.part_size == 0 {
            return Err(FilerError::Config("part_size must be positive".to_string()));
        }
        if settings.part_size < MIN_S3_PART_SIZE {
            warn!(
                "part_size {} is below the 5 MiB S3 minimum; multipart completion may be rejected",
                settings.part_size
            );
        }
        Ok(Self {
            uri,
            store,
            pool: Arc::new(UploadPool::new(threads)),
            settings,
        })
    }

    /// Build an S3-backed filer from configuration.
    ///
    /// A configured key without a secret asks `prompt` for it.
    pub async fn from_config(config: &FilerConfig, prompt: &dyn SecretPrompt) -> Result<Self> {
        let uri = config.uri()?;
        let bucket = config.bucket()?;
        let credentials = config.resolve_credentials(prompt)?;
        let store = AwsObjectStore::new(bucket.clone(), &config.aws, credentials).await;
        let settings = UploadSettings {
            part_size: config.part_size()?,
            temp_dir: config.temp_dir(),
        };

        info!(
            "filer initialized: bucket={} part_size={} threads={} temp_dir={}",
            bucket,
            settings.part_size,
            config.threads,
            settings.temp_dir.display()
        );

        Self::new(uri, Arc::new(store), settings, config.threads)
    }

    /// Open a buffered upload to `path`.
    pub fn upload(&self, path: &str) -> Result<BufferedUpload> {
        BufferedUpload::new(
            Arc::clone(&self.store),
            Arc::clone(&self.pool),
            self.settings.clone(),
            path,
        )
    }

    /// The object store behind this filer.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

/// Smallest non-final part S3 accepts.
const MIN_S3_PART_SIZE: usize = 5 * 1024 * 1024;

impl Filer for ObjectStoreFiler {
    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn list_records(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let prefix = path_to_key(&path)?;
            let summaries = self.store.list_objects(prefix).await?;
            debug!("listed {} entries under {}", summaries.len(), path);
            Ok(summaries
                .into_iter()
                .map(|s| Record::from_key(&self.uri, &s.key, s.last_modified, s.size))
                .collect())
        })
    }

    fn read_file(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectReader>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let key = path_to_key(&path)?;
            self.store.get_object(key).await.map_err(|e| match e {
                FilerError::NotFound { .. } => FilerError::NotFound { path: path.clone() },
                other => other,
            })
        })
    }

    fn write_file(&self, path: &str) -> Result<Box<dyn FileSink>> {
        Ok(Box::new(self.upload(path)?))
    }

    fn append_file(&self, _path: &str) -> Result<Box<dyn FileSink>> {
        Err(FilerError::unsupported("append_file"))
    }

    fn open_file(&self, _path: &str, _write: bool) -> Result<Box<dyn DataIo>> {
        Err(FilerError::unsupported("open_file"))
    }

    fn set_file_time(
        &self,
        path: &str,
        millis: i64,
    ) -> Pin<Box<dyn Future<Output = Result<TimeUpdate>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let key = path_to_key(&path)?;
            let update = self.store.set_modified(key, millis).await.map_err(|e| match e {
                FilerError::NotFound { .. } => FilerError::NotFound { path: path.clone() },
                other => other,
            })?;
            if update == TimeUpdate::Advisory {
                debug!(
                    "modification time of {} stored as metadata only; listings keep the store time",
                    path
                );
            }
            Ok(update)
        })
    }

    fn delete_file(&self, path: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let key = path_to_key(&path)?;
            self.store.delete_object(key).await
        })
    }

    fn rename_file(
        &self,
        _old_path: &str,
        _new_path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Err(FilerError::unsupported("rename_file")) })
    }

    fn create_dirs(&self, path: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let key = path_to_key(&path)?.trim_end_matches(SEPARATOR);
            if key.is_empty() {
                // The root always exists.
                return Ok(());
            }
            let marker = format!("{key}{SEPARATOR}");
            self.store.put_object(&marker, Bytes::new(), 0).await
        })
    }

    fn close(&self) {
        self.pool.shutdown();
    }
}

// -- Tests -------------------------------------------------------------------
