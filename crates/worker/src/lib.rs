//! Host process for the media archive jobs.
//!
//! Loads configuration, probes the configured tools and owns one
//! [`ProcessRegistry`](asec_pipeline::ProcessRegistry) per job kind.

pub mod catalog;
pub mod config;
pub mod host;

pub use catalog::JsonPackageCatalog;
pub use config::WorkerConfig;
pub use host::{Host, HostError};
