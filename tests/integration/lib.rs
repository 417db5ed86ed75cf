//! Shared harness for the integration scenarios: a scriptable provider and
//! a fully wired engine over a throwaway database.

use async_trait::async_trait;
use leadflow_core::config::{QueueConfig, WarmupConfig, WorkerConfig};
use leadflow_core::types::{DeliveryStatus, PhoneNumber, ProviderType, TenantId};
use leadflow_engine::{
    JobQueue, RateGovernor, Reconciler, TenantContext, TenantRegistry, WebhookSecrets, WorkerPool,
};
use leadflow_providers::{
    ProviderAck, ProviderAdapter, ProviderError, SendRequest, StatusSnapshot,
};
use leadflow_store::Store;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A provider whose behavior tests can script per scenario.
#[derive(Debug, Default)]
pub struct MockProvider {
    /// Requests that reached `send`.
    pub sent: Mutex<Vec<SendRequest>>,

    /// Fail this many sends with a transient error before succeeding.
    pub fail_first: AtomicUsize,

    /// Answer for `lookup_status`; `None` means "reference unknown".
    pub lookup: Mutex<Option<StatusSnapshot>>,

    /// Report status lookup as unsupported (Cloud-API-style backend).
    pub lookup_unsupported: bool,
}

impl MockProvider {
    /// Number of sends that reached the provider.
    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Script a successful lookup answer.
    pub fn set_lookup(&self, provider_message_id: &str, status: DeliveryStatus) {
        *self.lookup.lock().unwrap() = Some(StatusSnapshot {
            provider_message_id: Some(provider_message_id.to_string()),
            status,
        });
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Dialog360
    }

    async fn send(&self, request: &SendRequest) -> Result<ProviderAck, ProviderError> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::TransientNetwork("scripted failure".into()));
        }

        self.sent.lock().unwrap().push(request.clone());
        Ok(ProviderAck {
            provider_message_id: format!("wamid.{}", request.client_ref),
        })
    }

    async fn lookup_status(
        &self,
        _client_ref: &str,
    ) -> Result<Option<StatusSnapshot>, ProviderError> {
        if self.lookup_unsupported {
            return Err(ProviderError::StatusLookupUnsupported);
        }
        Ok(self.lookup.lock().unwrap().clone())
    }
}

/// A fully wired engine over a scriptable provider.
pub struct TestEngine {
    pub store: Store,
    pub queue: Arc<JobQueue>,
    pub governor: Arc<RateGovernor>,
    pub reconciler: Arc<Reconciler>,
    pub registry: Arc<TenantRegistry>,
    pub pool: Arc<WorkerPool>,
    pub provider: Arc<MockProvider>,
    pub tenant: TenantId,
    pub from: PhoneNumber,
    pub to: PhoneNumber,
}

/// Queue settings tuned for tests: immediate retries, short lease.
pub fn test_queue_config() -> QueueConfig {
    QueueConfig {
        max_attempts: 3,
        base_backoff_secs: 0,
        backoff_factor: 2.0,
        max_backoff_secs: 0,
        lease_secs: 60,
        sweep_interval_secs: 1,
    }
}

impl TestEngine {
    /// Wire an engine over the given store and provider.
    pub async fn with_store(store: Store, provider: MockProvider) -> Self {
        let provider = Arc::new(provider);
        let tenant = TenantId::new("acme-immo");
        let from = PhoneNumber::new("4915112345678");
        let to = PhoneNumber::new("4917612345678");

        let queue = Arc::new(JobQueue::new(store.clone(), test_queue_config()));
        let governor = Arc::new(RateGovernor::new(store.clone(), WarmupConfig::default()));
        let reconciler = Arc::new(Reconciler::new(store.clone()));

        let mut registry = TenantRegistry::new();
        registry.insert(TenantContext {
            tenant_id: tenant.clone(),
            from_number: from.clone(),
            provider: provider.clone(),
            webhook: WebhookSecrets {
                app_secret: "app-secret".to_string(),
                verify_token: "verify-me".to_string(),
                crm_token: Some("crm-token".to_string()),
            },
            daily_limit_override: None,
            rollover_hour_utc: 0,
        });
        let registry = Arc::new(registry);

        let context = registry.resolve(&tenant).unwrap();
        governor.register_number(&context).await.unwrap();

        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            governor.clone(),
            reconciler.clone(),
            registry.clone(),
            WorkerConfig {
                count: 2,
                attempt_timeout_secs: 5,
                poll_interval_ms: 10,
            },
        ));

        Self {
            store,
            queue,
            governor,
            reconciler,
            registry,
            pool,
            provider,
            tenant,
            from,
            to,
        }
    }

    /// Engine over an in-memory database.
    pub async fn in_memory(provider: MockProvider) -> Self {
        let store = Store::connect_in_memory().await.unwrap();
        Self::with_store(store, provider).await
    }

    /// Engine over a file-backed database inside `dir`, so multiple pooled
    /// connections exercise real cross-connection atomicity.
    pub async fn on_disk(provider: MockProvider, dir: &tempfile::TempDir) -> Self {
        let url = format!("sqlite://{}", dir.path().join("leadflow.db").display());
        let store = Store::connect(&url).await.unwrap();
        Self::with_store(store, provider).await
    }

    /// Process jobs until nothing is claimable.
    pub async fn drain(&self) {
        while self.pool.process_one("itest-worker").await.unwrap() {}
    }
}
