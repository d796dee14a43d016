//! Shared domain types for the media archive backend.
//!
//! Kept free of async runtimes and I/O so every other crate in the
//! workspace can depend on it.

pub mod error;
pub mod media;
pub mod status;
pub mod types;
