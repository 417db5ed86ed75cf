//! Configuration schema definitions.

use crate::types::{PhoneNumber, ProviderType, TenantId};
use serde::{Deserialize, Serialize};

/// Main Leadflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Job queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Warm-up ladder settings, shared by all sending numbers.
    #[serde(default)]
    pub warmup: WarmupConfig,

    /// Gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Tenant entries. Written by onboarding flows; read-only to the core.
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

/// Database configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database URL.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://leadflow.db?mode=rwc".to_string(),
        }
    }
}

/// Job queue configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempt ceiling before a job is dead-lettered.
    pub max_attempts: u32,

    /// Base retry delay in seconds.
    pub base_backoff_secs: u64,

    /// Exponential backoff factor.
    pub backoff_factor: f64,

    /// Retry delay cap in seconds.
    pub max_backoff_secs: u64,

    /// Claim lease duration in seconds; an expired lease returns the job
    /// to pending.
    pub lease_secs: u64,

    /// How often the sweeper reclaims expired leases, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff_secs: 30,
            backoff_factor: 2.0,
            max_backoff_secs: 3600,
            lease_secs: 120,
            sweep_interval_secs: 30,
        }
    }
}

/// Worker pool configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    pub count: usize,

    /// Per-attempt execution timeout in seconds.
    pub attempt_timeout_secs: u64,

    /// Idle poll interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            attempt_timeout_secs: 30,
            poll_interval_ms: 250,
        }
    }
}

/// Warm-up ladder configuration.
///
/// The exact thresholds are deliberately tunable; providers do not publish
/// them and operators adjust per account history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    /// Daily cap for a fresh number.
    pub initial_daily_limit: i64,

    /// Consecutive clean days required to leave warming-up.
    pub clean_days_to_ramp: i64,

    /// Daily cap multiplier while ramping.
    pub ramp_multiplier: f64,

    /// Cap for a fully active number.
    pub active_daily_limit: i64,

    /// Failure rate that marks a day as dirty.
    pub failure_rate_threshold: f64,

    /// Minimum sends before the failure rate is trusted.
    pub failure_min_sample: i64,

    /// Cap multiplier applied on throttle.
    pub throttle_factor: f64,

    /// Throttle strikes before the number is suspended.
    pub strikes_to_suspend: i64,

    /// Clean days a throttled number needs before ramping again.
    pub recovery_clean_days: i64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            initial_daily_limit: 50,
            clean_days_to_ramp: 7,
            ramp_multiplier: 2.0,
            active_daily_limit: 1000,
            failure_rate_threshold: 0.05,
            failure_min_sample: 20,
            throttle_factor: 0.5,
            strikes_to_suspend: 3,
            recovery_clean_days: 2,
        }
    }
}

/// Gateway configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind address.
    pub bind: String,

    /// Port number.
    pub port: u16,

    /// Enable permissive CORS (for the dashboard during development).
    pub cors: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            cors: false,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "leadflow=info".to_string(),
        }
    }
}

/// Per-tenant configuration, written by onboarding flows outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Tenant identifier.
    pub tenant_id: TenantId,

    /// The tenant's sending number.
    pub from_number: PhoneNumber,

    /// Which provider backend the tenant sends through.
    pub provider: ProviderType,

    /// Provider credentials and webhook secrets.
    pub credentials: ProviderCredentials,

    /// Overrides the warm-up ceiling for this tenant's number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit_override: Option<i64>,

    /// UTC hour at which the tenant's daily quota rolls over.
    #[serde(default)]
    pub rollover_hour_utc: u8,
}

/// Provider credentials for one tenant.
///
/// Which fields are required depends on the provider type; `validate`
/// checks the combination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    /// Meta Cloud API access token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Meta Cloud API phone number ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,

    /// BSP API key (360dialog).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Secret for webhook signature verification.
    pub app_secret: String,

    /// Token echoed during webhook subscription verification.
    pub verify_token: String,

    /// Application token expected on CRM webhook calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crm_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.max_attempts, 8);
        assert_eq!(config.warmup.initial_daily_limit, 50);
        assert_eq!(config.gateway.port, 8787);
        assert!(config.tenants.is_empty());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = json5::from_str(r#"{ gateway: { bind: "0.0.0.0", port: 9000, cors: true } }"#).unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(config.queue.max_attempts, 8);
    }
}
