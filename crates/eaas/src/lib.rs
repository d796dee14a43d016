//! Emulation-as-a-Service (EaaS) client library.
//!
//! Provides the collaborator traits the emulation session depends on
//! ([`ComponentService`], [`DeviceControl`]) together with REST clients
//! for the EaaS components API and the per-component QEMU control URL.

pub mod api;
pub mod control;
pub mod models;
pub mod service;

pub use api::ComponentsClient;
pub use control::{QemuControlClient, QemuControlConnector};
pub use service::{ComponentService, DeviceControl, DeviceControlConnector, EaasApiError};
