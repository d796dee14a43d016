//! Client for the QEMU control URL connector of a running component.
//!
//! Lists host USB devices available for passthrough and forwards the
//! attach/detach commands to the QEMU process backing the VM.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::ensure_success;
use crate::models::DeviceInfo;
use crate::service::{DeviceControl, DeviceControlConnector, EaasApiError};

pub struct QemuControlClient {
    client: reqwest::Client,
    url: String,
}

impl QemuControlClient {
    /// * `url` - connector URL as returned by the component's control URLs.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DeviceControl for QemuControlClient {
    async fn device_infos(&self) -> Result<Vec<DeviceInfo>, EaasApiError> {
        let response = self.client.get(&self.url).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json::<Vec<DeviceInfo>>().await?)
    }

    async fn post_command(&self, command: &str) -> Result<(), EaasApiError> {
        let response = self
            .client
            .post(&self.url)
            .body(command.to_string())
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

/// Opens [`QemuControlClient`]s sharing one connection pool.
#[derive(Default)]
pub struct QemuControlConnector {
    client: reqwest::Client,
}

impl QemuControlConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl DeviceControlConnector for QemuControlConnector {
    fn connect(&self, url: &str) -> Arc<dyn DeviceControl> {
        Arc::new(QemuControlClient::new(self.client.clone(), url))
    }
}
