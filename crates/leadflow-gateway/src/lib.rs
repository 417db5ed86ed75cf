//! # leadflow-gateway
//!
//! The HTTP boundary of the delivery engine: the enqueue API consumed by
//! the web layer, signature-verified provider and CRM webhook endpoints,
//! and the per-tenant observability surface.
//!
//! Webhook handlers translate, enqueue, and acknowledge immediately; all
//! reconciliation work happens asynchronously in the worker pool.

pub mod error;
pub mod handlers;
pub mod server;
pub mod signature;

pub use error::GatewayError;
pub use server::{router, serve, AppState};

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
