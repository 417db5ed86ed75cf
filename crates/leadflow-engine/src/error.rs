//! Engine error types.

use leadflow_providers::ProviderError;
use leadflow_store::StoreError;
use thiserror::Error;

/// Engine result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the delivery engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Durable-state failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Provider adapter failure.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A job or event payload failed to deserialize.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The referenced tenant is not configured.
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    /// Tenant or engine configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}
