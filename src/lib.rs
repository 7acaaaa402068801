//! BleepFiler -- a filesystem-shaped view over S3-compatible object storage.
//!
//! A [`Filer`] addresses storage by absolute `/`-separated paths.  The
//! object-store backend maps paths to keys, lists prefixes as [`Record`]s
//! and writes through [`upload::BufferedUpload`], which switches from a
//! single put to a pooled multipart upload once a stream outgrows the
//! configured part size.

pub mod config;
pub mod errors;
pub mod filer;
pub mod metrics;
pub mod object_filer;
pub mod pool;
pub mod predicate;
pub mod record;
pub mod storage;
pub mod upload;

pub use errors::{FilerError, Result};
pub use filer::{DataIo, FileSink, Filer};
pub use object_filer::ObjectStoreFiler;
pub use predicate::{PathPredicate, RegexPathPredicate};
pub use record::Record;
