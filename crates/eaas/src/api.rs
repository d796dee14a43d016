//! REST client for the EaaS components endpoints.
//!
//! Wraps component start/stop, keepalive and control URL lookup using
//! [`reqwest`].

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::{MachineComponentRequest, MachineComponentResponse};
use crate::service::{ComponentService, EaasApiError};

/// HTTP client for the EaaS components API.
pub struct ComponentsClient {
    client: reqwest::Client,
    base_url: String,
}

impl ComponentsClient {
    /// Create a new client.
    ///
    /// * `base_url` - EaaS API root, e.g. `http://eaas:8080/emil`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn component_url(&self, component_id: &str, action: &str) -> String {
        format!("{}/components/{}/{}", self.base_url, component_id, action)
    }

    // ---- private helpers ----

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, EaasApiError> {
        let response = ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

/// Ensure the response has a success status code, otherwise return an
/// [`EaasApiError::ApiError`] carrying the status and body text.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, EaasApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(EaasApiError::ApiError {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl ComponentService for ComponentsClient {
    /// `POST /components` with a machine component request.
    async fn start_component(&self, request: &MachineComponentRequest) -> Result<String, EaasApiError> {
        let response = self
            .client
            .post(format!("{}/components", self.base_url))
            .json(request)
            .send()
            .await?;

        let started: MachineComponentResponse = Self::parse_response(response).await?;
        tracing::info!(
            component_id = %started.id,
            environment = %request.environment,
            "EaaS machine component started",
        );
        Ok(started.id)
    }

    async fn keepalive(&self, component_id: &str) -> Result<(), EaasApiError> {
        let response = self
            .client
            .post(self.component_url(component_id, "keepalive"))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn control_urls(&self, component_id: &str) -> Result<HashMap<String, String>, EaasApiError> {
        let response = self
            .client
            .get(self.component_url(component_id, "controlurls"))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// `GET /components/{id}/stop`. The body (an optional emulator log
    /// URL) is not consumed.
    async fn stop_component(&self, component_id: &str) -> Result<(), EaasApiError> {
        let response = self
            .client
            .get(self.component_url(component_id, "stop"))
            .send()
            .await?;
        ensure_success(response).await?;
        tracing::info!(component_id, "EaaS component stopped");
        Ok(())
    }
}
