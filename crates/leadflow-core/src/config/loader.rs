//! Configuration loading and persistence.

use super::Config;
use crate::error::ConfigError;
use crate::types::ProviderType;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 doesn't have a serializer, so we use serde_json with pretty print
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.gateway.port == 0 {
            errors.push("Gateway port cannot be 0".to_string());
        }

        if self.workers.count == 0 {
            errors.push("Worker count must be at least 1".to_string());
        }

        if self.queue.max_attempts == 0 {
            errors.push("queue.max_attempts must be at least 1".to_string());
        }

        if self.queue.lease_secs == 0 {
            errors.push("queue.lease_secs must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.warmup.failure_rate_threshold) {
            errors.push(format!(
                "warmup.failure_rate_threshold must be within 0..=1, got {}",
                self.warmup.failure_rate_threshold
            ));
        }

        if self.warmup.initial_daily_limit > self.warmup.active_daily_limit {
            errors.push(format!(
                "warmup.initial_daily_limit ({}) exceeds active_daily_limit ({})",
                self.warmup.initial_daily_limit, self.warmup.active_daily_limit
            ));
        }

        if self.warmup.ramp_multiplier <= 1.0 {
            errors.push("warmup.ramp_multiplier must be greater than 1".to_string());
        }

        let mut seen_tenants = HashSet::new();
        for tenant in &self.tenants {
            let id = tenant.tenant_id.as_str();

            if !seen_tenants.insert(id.to_string()) {
                errors.push(format!("Duplicate tenant entry: {}", id));
            }

            if !tenant.from_number.is_valid() {
                errors.push(format!(
                    "Tenant {}: invalid from_number '{}'",
                    id, tenant.from_number
                ));
            }

            if tenant.rollover_hour_utc > 23 {
                errors.push(format!(
                    "Tenant {}: rollover_hour_utc must be 0-23, got {}",
                    id, tenant.rollover_hour_utc
                ));
            }

            match tenant.provider {
                ProviderType::MetaCloud => {
                    if tenant.credentials.access_token.is_none() {
                        errors.push(format!("Tenant {}: meta_cloud requires access_token", id));
                    }
                    if tenant.credentials.phone_number_id.is_none() {
                        errors.push(format!("Tenant {}: meta_cloud requires phone_number_id", id));
                    }
                }
                ProviderType::Dialog360 => {
                    if tenant.credentials.api_key.is_none() {
                        errors.push(format!("Tenant {}: dialog360 requires api_key", id));
                    }
                }
            }

            if tenant.credentials.app_secret.is_empty() {
                errors.push(format!("Tenant {}: app_secret cannot be empty", id));
            }

            if tenant.credentials.verify_token.is_empty() {
                errors.push(format!("Tenant {}: verify_token cannot be empty", id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}
