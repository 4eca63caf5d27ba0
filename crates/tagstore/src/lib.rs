//! Persistent tag storage for media files
//!
//! This crate owns the mapping from a root-relative media path to its list of
//! tags. The whole mapping lives in memory behind a mutex and is rewritten to
//! a single JSON document after every mutation.

pub mod store;

pub use store::{TagStore, TagStoreError, WATCHED_TAG};
