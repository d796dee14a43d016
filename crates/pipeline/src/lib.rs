//! Long-running job orchestration.
//!
//! A [`ProcessRegistry`] owns cancellable background jobs. Every job kind
//! shares the state machine and directory layout in [`job`] and drives
//! external command-line tools through [`process`]:
//!
//! - [`digitization`]: capture physical media with a floppy imager or an
//!   audio recorder, pausing for operator input.
//! - [`conversion`]: turn fetched artefacts into emulator-ready files.
//! - [`emulation`]: run an interactive EaaS session with USB passthrough,
//!   screen capture and webcam recording.

pub mod config;
pub mod conversion;
pub mod digitization;
pub mod emulation;
pub mod job;
pub mod log;
pub mod probe;
pub mod process;
pub mod queue;
pub mod registry;

pub use job::{Job, JobCore, JobDirs, JobError, JobSnapshot, Respawn, StatusDetail};
pub use registry::{ProcessRegistry, RegistryError};
