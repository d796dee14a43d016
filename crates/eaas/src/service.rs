//! Collaborator seams consumed by the emulation session.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{DeviceInfo, MachineComponentRequest};

/// Errors from the EaaS REST layer.
#[derive(Debug, thiserror::Error)]
pub enum EaasApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// EaaS returned a non-2xx status code.
    #[error("EaaS API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The component did not expose a control URL of the requested type.
    #[error("Component {component_id} has no '{kind}' control URL")]
    MissingControlUrl { component_id: String, kind: String },
}

/// Lifecycle operations on virtualization components (running VMs).
#[async_trait]
pub trait ComponentService: Send + Sync {
    /// Start a machine component and return its component id.
    async fn start_component(&self, request: &MachineComponentRequest) -> Result<String, EaasApiError>;

    /// Prevent idle eviction of a running component.
    async fn keepalive(&self, component_id: &str) -> Result<(), EaasApiError>;

    /// Control URLs of a component, keyed by connector type (e.g. `qemu`).
    async fn control_urls(&self, component_id: &str) -> Result<HashMap<String, String>, EaasApiError>;

    async fn stop_component(&self, component_id: &str) -> Result<(), EaasApiError>;
}

/// Device passthrough interface reached through a component control URL.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    async fn device_infos(&self) -> Result<Vec<DeviceInfo>, EaasApiError>;

    /// Send a raw command (as listed in [`DeviceInfo`]) to the VM process.
    async fn post_command(&self, command: &str) -> Result<(), EaasApiError>;
}

/// Opens a [`DeviceControl`] for a control URL.
pub trait DeviceControlConnector: Send + Sync {
    fn connect(&self, url: &str) -> Arc<dyn DeviceControl>;
}
