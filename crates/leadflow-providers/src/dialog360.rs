//! 360dialog BSP adapter.
//!
//! 360dialog fronts the WhatsApp Business API behind a single `D360-API-KEY`
//! header and forwards the Cloud API payload dialect, so the send body is
//! shared in spirit with [`crate::meta`]. Unlike the Cloud API it answers
//! message lookups by client reference, which is what makes post-crash
//! reconciliation fully automatic on this backend.

use crate::error::ProviderError;
use crate::traits::{ProviderAck, ProviderAdapter, SendRequest, StatusSnapshot};
use crate::Result;
use async_trait::async_trait;
use leadflow_core::types::{DeliveryStatus, ProviderType};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// 360dialog WhatsApp API base URL.
const D360_API_BASE: &str = "https://waba.360dialog.io";

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Adapter for the 360dialog BSP.
pub struct Dialog360Adapter {
    /// Tenant's D360 API key.
    api_key: String,

    /// API base URL; overridable for tests.
    base_url: String,

    /// HTTP client.
    client: Client,
}

impl std::fmt::Debug for Dialog360Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog360Adapter")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct D360MessagePayload<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'static str,
    text: D360Text<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_ref: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct D360Text<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct D360SendResponse {
    #[serde(default)]
    messages: Vec<D360MessageRef>,
}

#[derive(Debug, Deserialize)]
struct D360MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct D360LookupResponse {
    #[serde(default)]
    messages: Vec<D360MessageStatus>,
}

#[derive(Debug, Deserialize)]
struct D360MessageStatus {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct D360ErrorResponse {
    #[serde(default)]
    meta: D360ErrorMeta,
}

#[derive(Debug, Default, Deserialize)]
struct D360ErrorMeta {
    #[serde(default)]
    developer_message: String,
}

impl Dialog360Adapter {
    /// Create a new adapter.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: D360_API_BASE.to_string(),
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Override the API base URL (tests, staging stacks).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn classify_error(status: u16, body: &str) -> ProviderError {
        let message = serde_json::from_str::<D360ErrorResponse>(body)
            .map(|e| e.meta.developer_message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.to_string());

        match status {
            429 => ProviderError::RateLimited { retry_after_secs: None },
            401 | 403 => ProviderError::AuthFailure(message),
            404 | 400 if message.contains("recipient") => {
                ProviderError::InvalidRecipient(message)
            }
            s if s >= 500 => ProviderError::Api { status: s, message },
            s => ProviderError::Api { status: s, message },
        }
    }

    fn parse_status(raw: &str) -> DeliveryStatus {
        DeliveryStatus::parse(raw).unwrap_or(DeliveryStatus::Sent)
    }
}

#[async_trait]
impl ProviderAdapter for Dialog360Adapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Dialog360
    }

    async fn send(&self, request: &SendRequest) -> Result<ProviderAck> {
        debug!(
            to = %request.to_number,
            client_ref = %request.client_ref,
            "Sending via 360dialog"
        );

        let payload = D360MessagePayload {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: request.to_number.as_str(),
            message_type: "text",
            text: D360Text { body: &request.body },
            client_ref: Some(&request.client_ref),
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("D360-API-KEY", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status.as_u16(), &body));
        }

        let send_response: D360SendResponse = response.json().await?;
        let provider_message_id = send_response
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| {
                ProviderError::Payload("Send response carried no message ID".to_string())
            })?;

        Ok(ProviderAck { provider_message_id })
    }

    async fn lookup_status(&self, client_ref: &str) -> Result<Option<StatusSnapshot>> {
        let response = self
            .client
            .get(format!("{}/v1/messages", self.base_url))
            .header("D360-API-KEY", &self.api_key)
            .query(&[("client_ref", client_ref)])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status.as_u16(), &body));
        }

        let lookup: D360LookupResponse = response.json().await?;
        Ok(lookup.messages.into_iter().next().map(|m| StatusSnapshot {
            status: Self::parse_status(&m.status),
            provider_message_id: Some(m.id),
        }))
    }
}
