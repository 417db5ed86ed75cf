//! Tenant context resolution.
//!
//! Maps a job or webhook payload to its owning company and hands out the
//! provider adapter, sending number, and webhook secrets bound to it.
//! Unknown tenants are rejected here, at the edge; everything downstream
//! only ever sees a resolved context.

use crate::error::{EngineError, Result};
use leadflow_core::config::Config;
use leadflow_core::types::{PhoneNumber, ProviderType, TenantId};
use leadflow_providers::{Dialog360Adapter, MetaCloudAdapter, ProviderAdapter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Webhook secrets bound to one tenant.
#[derive(Debug, Clone)]
pub struct WebhookSecrets {
    /// Secret for provider webhook signature verification.
    pub app_secret: String,

    /// Token echoed during webhook subscription verification.
    pub verify_token: String,

    /// Application token expected on CRM webhook calls.
    pub crm_token: Option<String>,
}

/// Everything the engine needs to act on behalf of one tenant.
#[derive(Debug)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub from_number: PhoneNumber,
    pub provider: Arc<dyn ProviderAdapter>,
    pub webhook: WebhookSecrets,

    /// Overrides the warm-up ceiling for this tenant's number.
    pub daily_limit_override: Option<i64>,

    /// UTC hour at which this tenant's quota day rolls over.
    pub rollover_hour_utc: u8,
}

/// Registry of configured tenants, built once at startup.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: HashMap<String, Arc<TenantContext>>,
}

impl TenantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with one adapter per configured tenant.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();

        for tenant in &config.tenants {
            let id = tenant.tenant_id.as_str();
            let provider: Arc<dyn ProviderAdapter> = match tenant.provider {
                ProviderType::MetaCloud => {
                    let phone_number_id =
                        tenant.credentials.phone_number_id.as_deref().ok_or_else(|| {
                            EngineError::Config(format!("Tenant {id}: missing phone_number_id"))
                        })?;
                    let access_token =
                        tenant.credentials.access_token.as_deref().ok_or_else(|| {
                            EngineError::Config(format!("Tenant {id}: missing access_token"))
                        })?;
                    Arc::new(MetaCloudAdapter::new(phone_number_id, access_token))
                }
                ProviderType::Dialog360 => {
                    let api_key = tenant.credentials.api_key.as_deref().ok_or_else(|| {
                        EngineError::Config(format!("Tenant {id}: missing api_key"))
                    })?;
                    Arc::new(Dialog360Adapter::new(api_key))
                }
            };

            registry.insert(TenantContext {
                tenant_id: tenant.tenant_id.clone(),
                from_number: tenant.from_number.clone(),
                provider,
                webhook: WebhookSecrets {
                    app_secret: tenant.credentials.app_secret.clone(),
                    verify_token: tenant.credentials.verify_token.clone(),
                    crm_token: tenant.credentials.crm_token.clone(),
                },
                daily_limit_override: tenant.daily_limit_override,
                rollover_hour_utc: tenant.rollover_hour_utc,
            });
        }

        info!(tenants = registry.len(), "Tenant registry built");
        Ok(registry)
    }

    /// Register one tenant context.
    pub fn insert(&mut self, context: TenantContext) {
        self.tenants
            .insert(context.tenant_id.as_str().to_string(), Arc::new(context));
    }

    /// Resolve a tenant ID to its context.
    pub fn resolve(&self, tenant_id: &TenantId) -> Result<Arc<TenantContext>> {
        self.tenants
            .get(tenant_id.as_str())
            .cloned()
            .ok_or_else(|| EngineError::UnknownTenant(tenant_id.to_string()))
    }

    /// Iterate over all tenant contexts.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TenantContext>> {
        self.tenants.values()
    }

    /// Number of configured tenants.
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// Whether no tenants are configured.
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
