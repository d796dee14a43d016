//! Object storage for artefacts and produced output.
//!
//! Jobs only see the [`ObjectStore`] trait; [`S3ObjectStore`] talks to
//! any S3-compatible service (AWS, MinIO).

pub mod s3;
pub mod store;

pub use s3::{S3Config, S3ObjectStore};
pub use store::{ObjectStore, StorageError};
