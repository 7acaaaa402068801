//! Path metadata records.
//!
//! A [`Record`] is a snapshot of one listed entry: either an object or an
//! emulated directory (a key ending in [`SEPARATOR`]).  Records are built
//! fresh from each listing and carry no state beyond their fields.

use http::Uri;

use crate::errors::{FilerError, Result};

/// Path separator used by filer paths and object keys alike.
pub const SEPARATOR: char = '/';

/// Metadata for one path entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Root identity of the filer that produced this record.
    pub root: Uri,
    /// Parent path: leading separator, no trailing separator (`/` at the root).
    pub parent: String,
    /// Entry name.  Ends with [`SEPARATOR`] for emulated directories.
    pub name: String,
    /// Last-modified time in epoch milliseconds.
    pub last_modified: i64,
    /// Size in bytes.
    pub size: u64,
    /// Whether this entry is an emulated directory.
    pub is_dir: bool,
    /// False only for the [`Record::no_file`] sentinel.
    listed: bool,
}

impl Record {
    /// Build a record from a raw object key as returned by a listing.
    ///
    /// `a/b/c.txt` becomes parent `/a/b`, name `c.txt`.  A directory marker
    /// `a/b/` becomes parent `/a`, name `b/`.
    pub fn from_key(root: &Uri, key: &str, last_modified: i64, size: u64) -> Self {
        let (parent, name) = split_key(key);
        Self {
            root: root.clone(),
            is_dir: name.ends_with(SEPARATOR),
            parent,
            name,
            last_modified,
            size,
            listed: true,
        }
    }

    /// The sentinel returned for a path with no listed entries.
    ///
    /// A trailing separator is dropped, so the sentinel is never a directory.
    pub fn no_file(root: &Uri, path: &str) -> Self {
        let key = path
            .trim_start_matches(SEPARATOR)
            .trim_end_matches(SEPARATOR);
        let (parent, name) = split_key(key);
        Self {
            root: root.clone(),
            parent,
            name,
            last_modified: 0,
            size: 0,
            is_dir: false,
            listed: false,
        }
    }

    /// False for the [`Record::no_file`] sentinel.
    pub fn exists(&self) -> bool {
        self.listed
    }

    /// Full path of this entry, e.g. `/a/b/c.txt` or `/a/b/`.
    pub fn path(&self) -> String {
        if self.parent == "/" {
            format!("/{}", self.name)
        } else {
            format!("{}/{}", self.parent, self.name)
        }
    }

    /// The object key this record was listed from.
    pub fn key(&self) -> String {
        self.path().trim_start_matches(SEPARATOR).to_string()
    }
}

/// Split a key into (`parent`, `name`) on the last separator, ignoring a
/// single trailing separator so directory markers keep it in their name.
fn split_key(key: &str) -> (String, String) {
    let body = key.strip_suffix(SEPARATOR).unwrap_or(key);
    match body.rfind(SEPARATOR) {
        Some(idx) => (format!("/{}", &body[..idx]), key[idx + 1..].to_string()),
        None => ("/".to_string(), key.to_string()),
    }
}

/// Convert an absolute filer path into an object key by dropping the
/// leading separator.
pub fn path_to_key(path: &str) -> Result<&str> {
    path.strip_prefix(SEPARATOR)
        .ok_or_else(|| FilerError::InvalidPath {
            path: path.to_string(),
            reason: "path must start with '/'",
        })
}
