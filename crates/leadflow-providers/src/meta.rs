//! Meta WhatsApp Cloud API adapter.
//!
//! Speaks the Graph API. Delivery statuses come back exclusively through
//! webhooks; the Cloud API has no status query by client reference, so
//! `lookup_status` reports unsupported and the worker falls back to its
//! unverifiable-dispatch handling.

use crate::error::ProviderError;
use crate::traits::{ProviderAck, ProviderAdapter, SendRequest, StatusSnapshot};
use crate::Result;
use async_trait::async_trait;
use leadflow_core::types::ProviderType;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// WhatsApp Cloud API base URL.
const META_API_BASE: &str = "https://graph.facebook.com/v18.0";

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Adapter for Meta's WhatsApp Cloud API.
pub struct MetaCloudAdapter {
    /// Phone number ID from WhatsApp Business.
    phone_number_id: String,

    /// Access token for the API.
    access_token: String,

    /// API base URL; overridable for tests.
    base_url: String,

    /// HTTP client.
    client: Client,
}

impl std::fmt::Debug for MetaCloudAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaCloudAdapter")
            .field("phone_number_id", &self.phone_number_id)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct MetaMessagePayload<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'static str,
    text: MetaText<'a>,
    /// Opaque client data echoed back in status webhooks.
    #[serde(skip_serializing_if = "Option::is_none")]
    biz_opaque_callback_data: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct MetaText<'a> {
    body: &'a str,
    preview_url: bool,
}

#[derive(Debug, Deserialize)]
struct MetaSendResponse {
    #[serde(default)]
    messages: Vec<MetaMessageRef>,
}

#[derive(Debug, Deserialize)]
struct MetaMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MetaErrorResponse {
    error: MetaErrorBody,
}

#[derive(Debug, Deserialize)]
struct MetaErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

impl MetaCloudAdapter {
    /// Create a new adapter for one phone number.
    pub fn new(phone_number_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
            base_url: META_API_BASE.to_string(),
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Override the API base URL (tests, regional proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.base_url, self.phone_number_id)
    }

    /// Map a Graph API failure onto the error taxonomy.
    fn classify_error(status: u16, body: &str) -> ProviderError {
        let code = serde_json::from_str::<MetaErrorResponse>(body)
            .map(|e| e.error.code)
            .unwrap_or(0);
        let message = serde_json::from_str::<MetaErrorResponse>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string());

        match (status, code) {
            // Throughput and pair rate limits
            (429, _) | (_, 130429) | (_, 80007) | (_, 131056) => {
                ProviderError::RateLimited { retry_after_secs: None }
            }
            // Undeliverable recipient / closed messaging window
            (_, 131026) | (_, 131030) | (_, 131047) => ProviderError::InvalidRecipient(message),
            // OAuth and permission failures
            (401, _) | (403, _) | (_, 190) | (_, 10) => ProviderError::AuthFailure(message),
            (s, _) if s >= 500 => ProviderError::Api { status: s, message },
            (s, _) => ProviderError::Api { status: s, message },
        }
    }
}

#[async_trait]
impl ProviderAdapter for MetaCloudAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::MetaCloud
    }

    async fn send(&self, request: &SendRequest) -> Result<ProviderAck> {
        debug!(
            to = %request.to_number,
            client_ref = %request.client_ref,
            "Sending via Meta Cloud API"
        );

        let payload = MetaMessagePayload {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: request.to_number.as_str(),
            message_type: "text",
            text: MetaText {
                body: &request.body,
                preview_url: false,
            },
            biz_opaque_callback_data: Some(&request.client_ref),
        };

        let response = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status.as_u16(), &body));
        }

        let send_response: MetaSendResponse = response.json().await?;
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

    async fn lookup_status(&self, _client_ref: &str) -> Result<Option<StatusSnapshot>> {
        // The Cloud API only reports message status via webhook.
        Err(ProviderError::StatusLookupUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        let body = r#"{"error":{"message":"Too many requests","code":130429}}"#;
        let err = MetaCloudAdapter::classify_error(400, body);
        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalid_recipient_classification() {
        let body = r#"{"error":{"message":"Message Undeliverable","code":131026}}"#;
        let err = MetaCloudAdapter::classify_error(400, body);
        assert!(matches!(err, ProviderError::InvalidRecipient(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_auth_failure_classification() {
        let body = r#"{"error":{"message":"Error validating access token","code":190}}"#;
        let err = MetaCloudAdapter::classify_error(401, body);
        assert!(matches!(err, ProviderError::AuthFailure(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_server_error_is_retryable() {
        let err = MetaCloudAdapter::classify_error(503, "upstream unavailable");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unparseable_body_falls_back_to_api_error() {
        let err = MetaCloudAdapter::classify_error(400, "not json");
        assert!(matches!(err, ProviderError::Api { status: 400, .. }));
    }

    #[test]
    fn test_payload_shape() {
        let payload = MetaMessagePayload {
            messaging_product: "whatsapp",
            recipient_type: "individual",
            to: "4917612345678",
            message_type: "text",
            text: MetaText { body: "hi", preview_url: false },
            biz_opaque_callback_data: Some("msg-1"),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["text"]["body"], "hi");
        assert_eq!(value["biz_opaque_callback_data"], "msg-1");
    }
}
