//! Object stores.
//!
//! The [`backend::ObjectStore`] trait abstracts over where objects
//! physically live.  Implementations include an AWS S3 (or S3-compatible)
//! client and an in-memory store.

pub mod aws;
pub mod backend;
pub mod memory;
