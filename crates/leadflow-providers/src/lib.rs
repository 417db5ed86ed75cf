//! # leadflow-providers
//!
//! WhatsApp Business API provider adapters.
//!
//! Every backend implements the same capability contract: send a message,
//! classify its own errors into the retry taxonomy, and (where the API
//! allows it) look a message up by client reference for post-crash
//! reconciliation. Queue and worker code never see a provider-specific
//! type.

pub mod dialog360;
pub mod error;
pub mod meta;
pub mod traits;
pub mod webhook;

pub use dialog360::Dialog360Adapter;
pub use error::ProviderError;
pub use meta::MetaCloudAdapter;
pub use traits::{ProviderAck, ProviderAdapter, SendRequest, StatusSnapshot};

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
