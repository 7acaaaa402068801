//! Buffered multipart upload stream.
//!
//! [`BufferedUpload`] accepts any number of writes and decides at close
//! time between one atomic put and a multipart upload:
//!
//! - Writes accumulate in memory up to `part_size` bytes.  Each time a whole
//!   `part_size` run of bytes is available it is spilled to a temp file and
//!   handed to the shared [`UploadPool`] as the next part.  The multipart
//!   session is opened on the first spill and reused afterwards.
//! - On close, a stream that never spilled does a single put.  Otherwise
//!   the remaining bytes become the last part, every part result is
//!   collected in part-number order, and the session is either completed or
//!   aborted.  Nothing is ever visible under the key after a failed close.
//!
//! Spill files are owned by their part's task and deleted when the attempt
//! finishes, successful or not.  A stream dropped without `close` aborts
//! its multipart session in the background.
//!
//! A stream is driven by one writer at a time; `&mut self` on every
//! operation enforces this.

use bytes::Bytes;
use metrics::counter;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::{FilerError, Result};
use crate::filer::FileSink;
use crate::metrics::{
    MULTIPART_ABORTS_TOTAL, MULTIPART_COMPLETIONS_TOTAL, PARTS_FAILED_TOTAL, PART_BYTES_TOTAL,
    PARTS_UPLOADED_TOTAL, SINGLE_PUTS_TOTAL,
};
use crate::pool::UploadPool;
use crate::record::path_to_key;
use crate::storage::backend::{CompletedPart, ObjectStore};

/// Prefix of spill file names in the temp directory.
pub const SPILL_PREFIX: &str = "filer-part-";

/// Most parts one multipart upload may carry (the S3 limit).
pub const MAX_PARTS: u32 = 10_000;

/// Tunables shared by every upload a filer opens.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Chunk threshold in bytes.
    pub part_size: usize,
    /// Directory for spill files.
    pub temp_dir: PathBuf,
}

/// A submitted part awaiting its upload result.
struct PendingPart {
    part_number: u32,
    result: oneshot::Receiver<Result<CompletedPart>>,
}

/// Output stream that uploads to one object key.
pub struct BufferedUpload {
    store: Arc<dyn ObjectStore>,
    pool: Arc<UploadPool>,
    settings: UploadSettings,
    /// Filer path, used in error reports.
    path: String,
    key: String,
    /// Bytes written but not yet handed to a part.
    buffer: Vec<u8>,
    /// Multipart session id, opened lazily on the first spill.
    upload_id: Option<String>,
    /// Submitted parts, in part-number order.
    pending: Vec<PendingPart>,
    closed: bool,
}

impl BufferedUpload {
    /// Create a stream targeting `path`.  No store call is made until data
    /// crosses the threshold or the stream is closed.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        pool: Arc<UploadPool>,
        settings: UploadSettings,
        path: &str,
    ) -> Result<Self> {
        let key = path_to_key(path)?.to_string();
        if settings.part_size == 0 {
            return Err(FilerError::Config("part_size must be positive".to_string()));
        }
        Ok(Self {
            store,
            pool,
            settings,
            path: path.to_string(),
            key,
            buffer: Vec::new(),
            upload_id: None,
            pending: Vec::new(),
            closed: false,
        })
    }

    /// Target path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of parts handed to the pool so far.
    pub fn parts_submitted(&self) -> usize {
        self.pending.len()
    }

    /// Number of bytes buffered but not yet part of a submitted chunk.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append `buf`, spilling full parts as the threshold is crossed.
    ///
    /// Whole parts are spilled straight from `buf`; only the tail below the
    /// threshold is kept in memory.  On error every byte not yet handed to
    /// a part stays buffered.
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let part_size = self.settings.part_size;
        let mut rest = buf;

        // Buffered bytes come first: top them up to a whole part.
        while !self.buffer.is_empty() {
            let fill = part_size
                .saturating_sub(self.buffer.len())
                .min(rest.len());
            self.buffer.extend_from_slice(&rest[..fill]);
            rest = &rest[fill..];
            if self.buffer.len() < part_size {
                return Ok(());
            }
            if let Err(e) = self.flip_buffered(part_size).await {
                self.buffer.extend_from_slice(rest);
                return Err(e);
            }
        }

        while rest.len() >= part_size {
            let (part, tail) = rest.split_at(part_size);
            if let Err(e) = self.flip(part).await {
                self.buffer.extend_from_slice(rest);
                return Err(e);
            }
            rest = tail;
        }

        self.buffer.extend_from_slice(rest);
        Ok(())
    }

    /// Finish the upload: a single put, or a completed multipart upload.
    ///
    /// On failure the multipart session is aborted and the error names the
    /// target path.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;

        if self.upload_id.is_none() {
            let data = Bytes::from(std::mem::take(&mut self.buffer));
            let length = data.len() as u64;
            debug!("single put: key={} length={}", self.key, length);
            self.store.put_object(&self.key, data, length).await?;
            counter!(SINGLE_PUTS_TOTAL).increment(1);
            return Ok(());
        }

        let mut failure: Option<anyhow::Error> = None;
        while !self.buffer.is_empty() {
            let len = self.buffer.len().min(self.settings.part_size);
            if let Err(e) = self.flip_buffered(len).await {
                failure = Some(anyhow::Error::new(e).context("failed to submit final part"));
                break;
            }
        }

        // Wait for every part, even after a failure, so no spill file or
        // in-flight part outlives the session.
        let mut parts = Vec::with_capacity(self.pending.len());
        for pending in std::mem::take(&mut self.pending) {
            match pending.result.await {
                Ok(Ok(part)) => parts.push(part),
                Ok(Err(e)) => {
                    counter!(PARTS_FAILED_TOTAL).increment(1);
                    failure.get_or_insert_with(|| {
                        anyhow::Error::new(e).context(format!("part {} failed", pending.part_number))
                    });
                }
                Err(_) => {
                    counter!(PARTS_FAILED_TOTAL).increment(1);
                    failure.get_or_insert_with(|| {
                        anyhow::anyhow!("part {} was dropped before completing", pending.part_number)
                    });
                }
            }
        }

        let upload_id = self.upload_id.clone().unwrap_or_default();

        if failure.is_none() {
            match self
                .store
                .complete_multipart_upload(&self.key, &upload_id, &parts)
                .await
            {
                Ok(()) => {
                    debug!(
                        "multipart upload complete: key={} upload_id={} parts={}",
                        self.key,
                        upload_id,
                        parts.len()
                    );
                    counter!(MULTIPART_COMPLETIONS_TOTAL).increment(1);
                    return Ok(());
                }
                Err(e) => {
                    failure = Some(anyhow::Error::new(e).context("failed to complete multipart upload"))
                }
            }
        }

        let cause = failure.unwrap_or_else(|| anyhow::anyhow!("multipart upload failed"));
        warn!(
            "Aborting multipart upload {} for {} due to error: {:#}",
            upload_id, self.path, cause
        );
        if let Err(abort_err) = self
            .store
            .abort_multipart_upload(&self.key, &upload_id)
            .await
        {
            warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
        }
        counter!(MULTIPART_ABORTS_TOTAL).increment(1);

        Err(FilerError::Upload {
            path: self.path.clone(),
            source: cause,
        })
    }

    /// Spill the first `len` buffered bytes as the next part.
    ///
    /// The bytes leave the buffer only once the part is queued, so a failed
    /// flip leaves the stream as it was.
    async fn flip_buffered(&mut self, len: usize) -> Result<()> {
        let spill = spill_part(&self.settings.temp_dir, &self.buffer[..len])?;
        self.submit(spill, len as u64).await?;
        self.buffer.drain(..len);
        Ok(())
    }

    /// Spill `data` as the next part.
    async fn flip(&mut self, data: &[u8]) -> Result<()> {
        let spill = spill_part(&self.settings.temp_dir, data)?;
        self.submit(spill, data.len() as u64).await
    }

    /// Queue the upload of one spilled part.  The spill file is deleted by
    /// the part task, or on return if the part is never queued.
    async fn submit(&mut self, spill: NamedTempFile, size: u64) -> Result<()> {
        let part_number = self.pending.len() as u32 + 1;
        if part_number > MAX_PARTS {
            return Err(FilerError::Upload {
                path: self.path.clone(),
                source: anyhow::anyhow!(
                    "part {part_number} exceeds the limit of {MAX_PARTS} parts per upload"
                ),
            });
        }

        let upload_id = self.session().await?;
        let store = Arc::clone(&self.store);
        let key = self.key.clone();

        let result = self.pool.submit(async move {
            let outcome = store
                .upload_part(&key, &upload_id, part_number, spill.path(), size)
                .await;
            if let Err(e) = spill.close() {
                warn!("Failed to delete spill file for part {} of {}: {}", part_number, key, e);
            }
            if outcome.is_ok() {
                counter!(PARTS_UPLOADED_TOTAL).increment(1);
                counter!(PART_BYTES_TOTAL).increment(size);
            }
            outcome
        })?;

        debug!(
            "submitted part {} of {} ({} bytes)",
            part_number, self.key, size
        );
        self.pending.push(PendingPart {
            part_number,
            result,
        });
        Ok(())
    }

    /// The multipart upload id, opening the session on first use.
    async fn session(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let id = self.store.create_multipart_upload(&self.key).await?;
        debug!("opened multipart upload {} for {}", id, self.key);
        self.upload_id = Some(id.clone());
        Ok(id)
    }
}

impl FileSink for BufferedUpload {
    fn write<'a>(
        &'a mut self,
        buf: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(BufferedUpload::write(self, buf))
    }

    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(BufferedUpload::close(*self))
    }
}

/// Write `data` to a fresh spill file in `dir`.
fn spill_part(dir: &Path, data: &[u8]) -> Result<NamedTempFile> {
    let mut spill = tempfile::Builder::new()
        .prefix(SPILL_PREFIX)
        .tempfile_in(dir)?;
    spill.write_all(data)?;
    spill.flush()?;
    Ok(spill)
}

impl Drop for BufferedUpload {
    fn drop(&mut self) {
        if self.closed || (self.upload_id.is_none() && self.buffer.is_empty()) {
            return;
        }
        warn!(
            "upload to {} dropped without close; {} buffered bytes and {} parts discarded",
            self.path,
            self.buffer.len(),
            self.pending.len()
        );

        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                "no runtime to abort multipart upload {} for {}",
                upload_id, self.path
            );
            return;
        };

        // Abort once every queued part has settled, so no part lands after
        // the session is gone.
        let pending = std::mem::take(&mut self.pending);
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        handle.spawn(async move {
            for part in pending {
                let _ = part.result.await;
            }
            match store.abort_multipart_upload(&key, &upload_id).await {
                Ok(()) => debug!("aborted abandoned multipart upload {} for {}", upload_id, key),
                Err(e) => warn!("Failed to abort multipart upload {}: {}", upload_id, e),
            }
            counter!(MULTIPART_ABORTS_TOTAL).increment(1);
        });
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{ObjectReader, ObjectSummary, TimeUpdate};
    use crate::storage::memory::MemoryObjectStore;
    use std::collections::HashSet;
    use std::future::Future;
    use std::path::Path;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;

    const MIB: usize = 1024 * 1024;

    /// Call journal kept by [`RecordingStore`].
    #[derive(Debug, Default)]
    struct Journal {
        puts: Vec<(String, u64)>,
        sessions: usize,
        /// (part number, bytes) in submission-arrival order.
        parts: Vec<(u32, Vec<u8>)>,
        completions: Vec<Vec<u32>>,
        aborts: usize,
    }

    /// Wraps a [`MemoryObjectStore`], records calls and injects faults.
    struct RecordingStore {
        inner: MemoryObjectStore,
        journal: Mutex<Journal>,
        fail_parts: HashSet<u32>,
        fail_abort: bool,
        fail_complete: bool,
        /// Parts with a lower number are held back so they finish last.
        delay_parts_below: u32,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: MemoryObjectStore::new(),
                journal: Mutex::new(Journal::default()),
                fail_parts: HashSet::new(),
                fail_abort: false,
                fail_complete: false,
                delay_parts_below: 0,
            }
        }

        fn failing(parts: &[u32]) -> Self {
            Self {
                fail_parts: parts.iter().copied().collect(),
                ..Self::new()
            }
        }

        fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
            self.journal.lock().unwrap()
        }
    }

    impl ObjectStore for RecordingStore {
        fn list_objects(
            &self,
            prefix: &str,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<ObjectSummary>>> + Send + '_>> {
            self.inner.list_objects(prefix)
        }

        fn get_object(
            &self,
            key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<ObjectReader>> + Send + '_>> {
            self.inner.get_object(key)
        }

        fn put_object(
            &self,
            key: &str,
            data: Bytes,
            content_length: u64,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            self.journal()
                .puts
                .push((key.to_string(), content_length));
            self.inner.put_object(key, data, content_length)
        }

        fn create_multipart_upload(
            &self,
            key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
            self.journal().sessions += 1;
            self.inner.create_multipart_upload(key)
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
                if part_number < self.delay_parts_below {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
                let data = std::fs::read(&file)?;
                assert_eq!(data.len() as u64, content_length);
                self.journal().parts.push((part_number, data));
                if self.fail_parts.contains(&part_number) {
                    return Err(FilerError::Backend(anyhow::anyhow!(
                        "injected failure for part {part_number}"
                    )));
                }
                self.inner
                    .upload_part(&key, &upload_id, part_number, &file, content_length)
                    .await
            })
        }

        fn complete_multipart_upload(
            &self,
            key: &str,
            upload_id: &str,
            parts: &[CompletedPart],
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            self.journal()
                .completions
                .push(parts.iter().map(|p| p.part_number).collect());
            if self.fail_complete {
                return Box::pin(async {
                    Err::<(), FilerError>(FilerError::Backend(anyhow::anyhow!(
                        "completion rejected"
                    )))
                });
            }
            self.inner.complete_multipart_upload(key, upload_id, parts)
        }

        fn abort_multipart_upload(
            &self,
            key: &str,
            upload_id: &str,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            self.journal().aborts += 1;
            if self.fail_abort {
                return Box::pin(async {
                    Err::<(), FilerError>(FilerError::Backend(anyhow::anyhow!("abort refused")))
                });
            }
            self.inner.abort_multipart_upload(key, upload_id)
        }

        fn delete_object(
            &self,
            key: &str,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            self.inner.delete_object(key)
        }

        fn set_modified(
            &self,
            key: &str,
            millis: i64,
        ) -> Pin<Box<dyn Future<Output = Result<TimeUpdate>> + Send + '_>> {
            self.inner.set_modified(key, millis)
        }
    }

    struct Harness {
        store: Arc<RecordingStore>,
        pool: Arc<UploadPool>,
        temp: tempfile::TempDir,
        part_size: usize,
    }

    impl Harness {
        fn new(store: RecordingStore, part_size: usize, workers: usize) -> Self {
            Self {
                store: Arc::new(store),
                pool: Arc::new(UploadPool::new(workers)),
                temp: tempfile::TempDir::new().unwrap(),
                part_size,
            }
        }

        fn upload(&self, path: &str) -> BufferedUpload {
            let settings = UploadSettings {
                part_size: self.part_size,
                temp_dir: self.temp.path().to_path_buf(),
            };
            BufferedUpload::new(
                Arc::clone(&self.store) as Arc<dyn ObjectStore>,
                Arc::clone(&self.pool),
                settings,
                path,
            )
            .unwrap()
        }

        fn spill_files(&self) -> usize {
            std::fs::read_dir(self.temp.path()).unwrap().count()
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn write_in_pieces(upload: &mut BufferedUpload, data: &[u8], piece: usize) {
        for chunk in data.chunks(piece) {
            upload.write(chunk).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_small_stream_is_single_put() {
        let h = Harness::new(RecordingStore::new(), 5 * MIB, 1);
        let data = pattern(3 * MIB);
        let mut upload = h.upload("/small.bin");
        write_in_pieces(&mut upload, &data, 64 * 1024).await;
        assert_eq!(upload.parts_submitted(), 0);
        upload.close().await.unwrap();

        {
            let journal = h.store.journal();
            assert_eq!(journal.puts, vec![("small.bin".to_string(), data.len() as u64)]);
            assert_eq!(journal.sessions, 0);
            assert!(journal.parts.is_empty());
            assert!(journal.completions.is_empty());
        }
        assert_eq!(h.store.inner.object("small.bin").await.unwrap(), data);
        assert_eq!(h.spill_files(), 0);
    }

    #[tokio::test]
    async fn test_empty_stream_puts_empty_object() {
        let h = Harness::new(RecordingStore::new(), 16, 1);
        h.upload("/empty").close().await.unwrap();
        assert_eq!(h.store.journal().puts, vec![("empty".to_string(), 0)]);
        assert_eq!(h.store.inner.object("empty").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_twelve_mib_in_three_parts() {
        let h = Harness::new(RecordingStore::new(), 5 * MIB, 2);
        let data = pattern(12 * MIB);
        let mut upload = h.upload("/big.bin");
        // One large write must still be split at the threshold.
        upload.write(&data).await.unwrap();
        assert_eq!(upload.parts_submitted(), 2);
        assert_eq!(upload.buffered(), 2 * MIB);
        upload.close().await.unwrap();

        let journal = h.store.journal();
        assert!(journal.puts.is_empty());
        assert_eq!(journal.sessions, 1);
        let mut sizes: Vec<(u32, usize)> =
            journal.parts.iter().map(|(n, d)| (*n, d.len())).collect();
        sizes.sort();
        assert_eq!(sizes, vec![(1, 5 * MIB), (2, 5 * MIB), (3, 2 * MIB)]);
        assert_eq!(journal.completions, vec![vec![1, 2, 3]]);
        assert_eq!(journal.aborts, 0);
        drop(journal);

        assert_eq!(h.store.inner.object("big.bin").await.unwrap(), data);
        assert_eq!(h.spill_files(), 0);
    }

    #[tokio::test]
    async fn test_part_count_and_contents_for_various_lengths() {
        let part_size = 1000;
        for len in [1000, 1001, 2999, 3000, 7321] {
            let h = Harness::new(RecordingStore::new(), part_size, 3);
            let data = pattern(len);
            let mut upload = h.upload("/obj");
            write_in_pieces(&mut upload, &data, 137).await;
            upload.close().await.unwrap();

            let journal = h.store.journal();
            let expected = len.div_ceil(part_size);
            let mut parts = journal.parts.clone();
            parts.sort_by_key(|(n, _)| *n);
            let numbers: Vec<u32> = parts.iter().map(|(n, _)| *n).collect();
            assert_eq!(numbers, (1..=expected as u32).collect::<Vec<_>>(), "len {len}");
            let joined: Vec<u8> = parts.into_iter().flat_map(|(_, d)| d).collect();
            assert_eq!(joined, data, "len {len}");
            assert_eq!(journal.completions.len(), 1);
            drop(journal);
            assert_eq!(h.spill_files(), 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_out_of_order_completion_keeps_part_order() {
        let mut store = RecordingStore::new();
        store.delay_parts_below = 3;
        let h = Harness::new(store, 100, 4);
        let data = pattern(450);
        let mut upload = h.upload("/ordered");
        upload.write(&data).await.unwrap();
        upload.close().await.unwrap();

        let journal = h.store.journal();
        let arrival: Vec<u32> = journal.parts.iter().map(|(n, _)| *n).collect();
        assert_ne!(arrival.first(), Some(&1), "parts 1 and 2 should finish late");
        assert_eq!(journal.completions, vec![vec![1, 2, 3, 4, 5]]);
        drop(journal);
        assert_eq!(h.store.inner.object("ordered").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_failed_part_aborts_without_completion() {
        let h = Harness::new(RecordingStore::failing(&[2]), 100, 2);
        let data = pattern(350);
        let mut upload = h.upload("/doomed.bin");
        upload.write(&data).await.unwrap();
        let err = upload.close().await.unwrap_err();

        match &err {
            FilerError::Upload { path, source } => {
                assert_eq!(path, "/doomed.bin");
                assert!(format!("{source:#}").contains("injected failure for part 2"));
            }
            other => panic!("expected upload error, got {other:?}"),
        }
        assert!(err.to_string().contains("/doomed.bin"));

        let journal = h.store.journal();
        assert!(journal.completions.is_empty());
        assert_eq!(journal.aborts, 1);
        drop(journal);
        assert!(h.store.inner.object("doomed.bin").await.is_none());
        assert_eq!(h.store.inner.open_uploads().await, 0);
        assert_eq!(h.spill_files(), 0);
    }

    #[tokio::test]
    async fn test_abort_failure_does_not_mask_cause() {
        let mut store = RecordingStore::failing(&[1]);
        store.fail_abort = true;
        let h = Harness::new(store, 10, 1);
        let mut upload = h.upload("/x");
        upload.write(&pattern(25)).await.unwrap();
        let err = upload.close().await.unwrap_err();

        match err {
            FilerError::Upload { path, source } => {
                assert_eq!(path, "/x");
                let chain = format!("{source:#}");
                assert!(chain.contains("injected failure for part 1"));
                assert!(!chain.contains("abort refused"));
            }
            other => panic!("expected upload error, got {other:?}"),
        }
        assert_eq!(h.store.journal().aborts, 1);
        assert_eq!(h.spill_files(), 0);
    }

    #[tokio::test]
    async fn test_failed_tail_part_aborts() {
        let h = Harness::new(RecordingStore::failing(&[3]), 10, 1);
        let mut upload = h.upload("/tail");
        upload.write(&pattern(25)).await.unwrap();
        assert_eq!(upload.parts_submitted(), 2);
        assert!(upload.close().await.is_err());
        let journal = h.store.journal();
        assert_eq!(journal.parts.len(), 3);
        assert!(journal.completions.is_empty());
        assert_eq!(journal.aborts, 1);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_tail() {
        let h = Harness::new(RecordingStore::new(), 10, 1);
        let mut upload = h.upload("/exact");
        upload.write(&pattern(30)).await.unwrap();
        assert_eq!(upload.buffered(), 0);
        upload.close().await.unwrap();
        let journal = h.store.journal();
        assert_eq!(journal.parts.len(), 3);
        assert!(journal.parts.iter().all(|(_, d)| d.len() == 10));
        assert_eq!(journal.completions, vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn test_session_opened_once() {
        let h = Harness::new(RecordingStore::new(), 4, 2);
        let mut upload = h.upload("/many");
        for _ in 0..10 {
            upload.write(b"abcdef").await.unwrap();
        }
        upload.close().await.unwrap();
        assert_eq!(h.store.journal().sessions, 1);
        assert_eq!(h.store.journal().completions[0].len(), 15);
    }

    #[tokio::test]
    async fn test_spill_after_pool_shutdown_keeps_buffer() {
        let h = Harness::new(RecordingStore::new(), 10, 1);
        h.pool.shutdown();
        let mut upload = h.upload("/late");
        let err = upload.write(&pattern(12)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(upload.buffered(), 12);
        assert_eq!(upload.parts_submitted(), 0);
        assert_eq!(h.spill_files(), 0);
        // The session was opened, so close must not fall back to a put.
        assert!(upload.close().await.is_err());
        assert!(h.store.journal().puts.is_empty());
        assert!(h.store.inner.object("late").await.is_none());
    }

    #[tokio::test]
    async fn test_relative_path_rejected() {
        let h = Harness::new(RecordingStore::new(), 10, 1);
        let settings = UploadSettings {
            part_size: 10,
            temp_dir: h.temp.path().to_path_buf(),
        };
        let result = BufferedUpload::new(
            Arc::clone(&h.store) as Arc<dyn ObjectStore>,
            Arc::clone(&h.pool),
            settings,
            "no-slash",
        );
        assert!(matches!(result, Err(FilerError::InvalidPath { .. })));
    }

    #[tokio::test]
    async fn test_streams_share_one_pool() {
        let h = Harness::new(RecordingStore::new(), 8, 1);
        let a_data = pattern(20);
        let b_data: Vec<u8> = pattern(20).into_iter().rev().collect();
        let mut a = h.upload("/a");
        let mut b = h.upload("/b");
        a.write(&a_data).await.unwrap();
        b.write(&b_data).await.unwrap();
        a.close().await.unwrap();
        b.close().await.unwrap();
        assert_eq!(h.store.inner.object("a").await.unwrap(), a_data);
        assert_eq!(h.store.inner.object("b").await.unwrap(), b_data);
        assert_eq!(h.store.journal().sessions, 2);
        assert_eq!(h.spill_files(), 0);
    }

    #[tokio::test]
    async fn test_failed_completion_aborts() {
        let mut store = RecordingStore::new();
        store.fail_complete = true;
        let h = Harness::new(store, 10, 2);
        let mut upload = h.upload("/rejected");
        upload.write(&pattern(25)).await.unwrap();
        let err = upload.close().await.unwrap_err();

        match &err {
            FilerError::Upload { path, source } => {
                assert_eq!(path, "/rejected");
                assert!(format!("{source:#}").contains("completion rejected"));
            }
            other => panic!("expected upload error, got {other:?}"),
        }
        let journal = h.store.journal();
        assert_eq!(journal.completions, vec![vec![1, 2, 3]]);
        assert_eq!(journal.aborts, 1);
        drop(journal);
        assert!(h.store.inner.object("rejected").await.is_none());
        assert_eq!(h.store.inner.open_uploads().await, 0);
        assert_eq!(h.spill_files(), 0);
    }

    async fn wait_for_no_open_uploads(store: &MemoryObjectStore) -> usize {
        for _ in 0..100 {
            if store.open_uploads().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store.open_uploads().await
    }

    #[tokio::test]
    async fn test_drop_without_close_aborts_session() {
        let h = Harness::new(RecordingStore::new(), 4, 1);
        let mut upload = h.upload("/abandoned");
        upload.write(&pattern(10)).await.unwrap();
        assert_eq!(upload.parts_submitted(), 2);
        drop(upload);

        assert_eq!(wait_for_no_open_uploads(&h.store.inner).await, 0);
        let journal = h.store.journal();
        assert_eq!(journal.aborts, 1);
        assert!(journal.completions.is_empty());
        drop(journal);
        assert!(h.store.inner.object("abandoned").await.is_none());
        assert_eq!(h.spill_files(), 0);
    }

    #[tokio::test]
    async fn test_drop_after_write_error_aborts_session() {
        let h = Harness::new(RecordingStore::new(), 4, 1);
        h.pool.shutdown();
        let mut upload = h.upload("/late");
        assert!(upload.write(&pattern(10)).await.is_err());
        drop(upload);
        assert_eq!(wait_for_no_open_uploads(&h.store.inner).await, 0);
        assert_eq!(h.store.journal().aborts, 1);
    }

    #[tokio::test]
    async fn test_drop_of_small_stream_touches_nothing() {
        let h = Harness::new(RecordingStore::new(), 100, 1);
        let mut upload = h.upload("/small");
        upload.write(b"abc").await.unwrap();
        drop(upload);
        tokio::task::yield_now().await;
        let journal = h.store.journal();
        assert_eq!(journal.sessions, 0);
        assert_eq!(journal.aborts, 0);
        assert!(journal.puts.is_empty());
    }

    #[tokio::test]
    async fn test_large_write_keeps_only_tail_in_memory() {
        let h = Harness::new(RecordingStore::new(), 1000, 4);
        let data = pattern(250_500);
        let mut upload = h.upload("/large");
        upload.write(&data[..300]).await.unwrap();
        upload.write(&data[300..250_000]).await.unwrap();
        assert_eq!(upload.parts_submitted(), 250);
        assert_eq!(upload.buffered(), 0);
        assert!(upload.buffer.capacity() < 2 * 1000);
        upload.write(&data[250_000..]).await.unwrap();
        assert_eq!(upload.buffered(), 500);
        upload.close().await.unwrap();

        let journal = h.store.journal();
        assert_eq!(journal.parts.len(), 251);
        assert!(journal
            .parts
            .iter()
            .all(|(n, d)| d.len() == if *n == 251 { 500 } else { 1000 }));
        drop(journal);
        assert_eq!(h.store.inner.object("large").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_failed_direct_spill_keeps_all_unsent_bytes() {
        let h = Harness::new(RecordingStore::new(), 10, 1);
        let mut upload = h.upload("/partial");
        upload.write(&pattern(4)).await.unwrap();
        h.pool.shutdown();
        // The topped-up buffer fails to submit; nothing is lost.
        assert!(upload.write(&pattern(30)).await.is_err());
        assert_eq!(upload.buffered(), 34);
        assert_eq!(upload.parts_submitted(), 0);
        assert_eq!(h.spill_files(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_part_limit_fails_with_path() {
        let h = Harness::new(RecordingStore::new(), 1, 8);
        let mut upload = h.upload("/huge");
        let err = upload
            .write(&vec![7u8; MAX_PARTS as usize + 1])
            .await
            .unwrap_err();
        match &err {
            FilerError::Upload { path, source } => {
                assert_eq!(path, "/huge");
                assert!(source.to_string().contains("10000"));
            }
            other => panic!("expected upload error, got {other:?}"),
        }
        assert_eq!(upload.parts_submitted(), MAX_PARTS as usize);
        assert_eq!(upload.buffered(), 1);

        assert!(upload.close().await.is_err());
        let journal = h.store.journal();
        assert!(journal.completions.is_empty());
        assert_eq!(journal.aborts, 1);
        drop(journal);
        assert_eq!(h.store.inner.open_uploads().await, 0);
        assert_eq!(h.spill_files(), 0);
    }
}
