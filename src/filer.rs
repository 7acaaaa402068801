//! The filer capability contract.
//!
//! A [`Filer`] exposes a filesystem-shaped view over some storage: absolute
//! `/`-separated paths, records, streams.  Backends that cannot map an
//! operation fail it with [`crate::errors::FilerError::Unsupported`]
//! instead of emulating it.

use http::Uri;
use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;
use crate::record::Record;
use crate::storage::backend::{ObjectReader, TimeUpdate};

/// Byte sink returned by [`Filer::write_file`].
///
/// Data is only guaranteed to be stored once `close` succeeds.
pub trait FileSink: Send {
    /// Append `buf`.
    fn write<'a>(
        &'a mut self,
        buf: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Flush everything and commit the file.
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Random-access handle returned by [`Filer::open_file`] on backends that
/// support in-place editing.
pub trait DataIo: Send {
    /// Read into `buf` starting at `offset`, returning the number of bytes read.
    fn read_at<'a>(
        &'a mut self,
        offset: u64,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>>;

    /// Write `data` at `offset`.
    fn write_at<'a>(
        &'a mut self,
        offset: u64,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Current size in bytes.
    fn size(&self) -> u64;
}

/// Filesystem operations over one storage root.
pub trait Filer: Send + Sync {
    /// Root identity of this filer.
    fn uri(&self) -> &Uri;

    /// Records for every entry whose key starts with `path`.
    fn list_records(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Record>>> + Send + '_>>;

    /// The first record listed for `path`, or [`Record::no_file`].
    fn get_record(&self, path: &str) -> Pin<Box<dyn Future<Output = Result<Record>> + Send + '_>> {
        let path = path.to_string();
        Box::pin(async move {
            let records = self.list_records(&path).await?;
            Ok(records
                .into_iter()
                .next()
                .unwrap_or_else(|| Record::no_file(self.uri(), &path)))
        })
    }

    /// Stream the content at `path`.  Fails with `NotFound` if absent.
    fn read_file(
        &self,
        path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ObjectReader>> + Send + '_>>;

    /// Open a sink that replaces the content at `path` on close.
    fn write_file(&self, path: &str) -> Result<Box<dyn FileSink>>;

    /// Open a sink that appends to `path`.
    fn append_file(&self, path: &str) -> Result<Box<dyn FileSink>>;

    /// Open `path` for random access.
    fn open_file(&self, path: &str, write: bool) -> Result<Box<dyn DataIo>>;

    /// Set the modification time of `path` to `millis`.
    ///
    /// Object stores rarely let a client rewrite last-modified; the returned
    /// [`TimeUpdate`] says whether listings will reflect the new time.
    fn set_file_time(
        &self,
        path: &str,
        millis: i64,
    ) -> Pin<Box<dyn Future<Output = Result<TimeUpdate>> + Send + '_>>;

    /// Delete `path`.  Deleting an absent path succeeds.
    fn delete_file(&self, path: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Move `old_path` to `new_path`.
    fn rename_file(
        &self,
        old_path: &str,
        new_path: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ensure `path` exists as a directory.
    fn create_dirs(&self, path: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Release resources held by the filer.  Idempotent.
    fn close(&self);
}
