//! Configuration management.

mod loader;
mod schema;

pub use schema::{
    Config, DatabaseConfig, GatewayConfig, LoggingConfig, ProviderCredentials, QueueConfig,
    TenantConfig, WarmupConfig, WorkerConfig,
};
