//! The provider capability contract.

use crate::Result;
use async_trait::async_trait;
use leadflow_core::types::{DeliveryStatus, PhoneNumber, ProviderType, TenantId};
use std::fmt::Debug;

/// A generic outbound send, already tenant-scoped and quota-approved.
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Owning tenant.
    pub tenant_id: TenantId,

    /// Client reference attached to the provider call; lets a lost
    /// acknowledgment be reconciled by lookup afterwards. Leadflow uses the
    /// outbound message ID.
    pub client_ref: String,

    /// Sending number.
    pub from_number: PhoneNumber,

    /// Recipient number.
    pub to_number: PhoneNumber,

    /// Message text.
    pub body: String,
}

/// Successful provider acknowledgment.
#[derive(Debug, Clone)]
pub struct ProviderAck {
    /// Message ID assigned by the provider.
    pub provider_message_id: String,
}

/// Provider-side state of a message, as answered by a status lookup.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Provider message ID, when the provider reports one.
    pub provider_message_id: Option<String>,

    /// Current delivery status at the provider.
    pub status: DeliveryStatus,
}

/// Uniform interface over heterogeneous WhatsApp Business API backends.
///
/// Implementations translate the generic request into their native HTTP
/// call and normalize every failure into [`crate::ProviderError`]; adding a
/// backend never changes queue or worker code.
///
/// A `send` is side-effecting and non-idempotent at the provider, so it is
/// invoked at most once per job attempt.
#[async_trait]
pub trait ProviderAdapter: Send + Sync + Debug {
    /// Which backend this adapter speaks to.
    fn provider_type(&self) -> ProviderType;

    /// Send one message; the acknowledgment carries the provider's ID.
    async fn send(&self, request: &SendRequest) -> Result<ProviderAck>;

    /// Look up a message by the client reference passed at send time.
    ///
    /// `Ok(None)` means the provider definitively knows nothing about the
    /// reference. Backends without this capability return
    /// [`crate::ProviderError::StatusLookupUnsupported`].
    async fn lookup_status(&self, client_ref: &str) -> Result<Option<StatusSnapshot>>;
}
