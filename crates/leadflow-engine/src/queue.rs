//! Job queue API over the durable store.
//!
//! Claiming rotates round-robin across the tenants that currently have
//! runnable work, so one tenant's backlog never starves the others. The
//! claim itself is atomic in the store; this layer only decides which
//! tenant to try next.

use crate::backoff::retry_delay;
use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use leadflow_core::config::QueueConfig;
use leadflow_core::types::{
    InboundEvent, Job, JobId, JobKind, JobStatus, PhoneNumber, SendMessagePayload, TenantId,
};
use leadflow_store::{JobCounts, NewJob, Store};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// The durable, at-least-once work queue.
pub struct JobQueue {
    store: Store,
    config: QueueConfig,

    /// Round-robin cursor over tenants with runnable work.
    cursor: Mutex<usize>,
}

impl JobQueue {
    /// Create a queue over the given store.
    pub fn new(store: Store, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            cursor: Mutex::new(0),
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Enqueue a job of any kind.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        tenant_id: TenantId,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> Result<JobId> {
        let job = NewJob {
            id: JobId::new(),
            kind,
            tenant_id,
            payload,
            max_attempts: self.config.max_attempts,
            next_run_at: run_at,
        };
        self.store.insert_job(&job).await?;
        Ok(job.id)
    }

    /// Enqueue an outbound message send.
    pub async fn enqueue_send_message(
        &self,
        tenant_id: TenantId,
        to_number: PhoneNumber,
        from_number: PhoneNumber,
        body: String,
    ) -> Result<JobId> {
        let payload = serde_json::to_value(SendMessagePayload {
            to_number,
            from_number,
            body,
        })?;
        self.enqueue(JobKind::SendMessage, tenant_id, payload, Utc::now())
            .await
    }

    /// Enqueue reconciliation of one normalized inbound event.
    pub async fn enqueue_sync_inbound(&self, event: &InboundEvent) -> Result<JobId> {
        let payload = serde_json::to_value(event)?;
        self.enqueue(
            JobKind::SyncInbound,
            event.tenant_id.clone(),
            payload,
            Utc::now(),
        )
        .await
    }

    /// Claim the next runnable job, fairly across tenants.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let now = Utc::now();
        let tenants = self.store.runnable_tenants(now).await?;
        if tenants.is_empty() {
            return Ok(None);
        }

        let start = {
            let mut cursor = self.cursor.lock().await;
            let start = *cursor % tenants.len();
            *cursor = cursor.wrapping_add(1);
            start
        };

        let lease = ChronoDuration::seconds(self.config.lease_secs as i64);
        for offset in 0..tenants.len() {
            let tenant = &tenants[(start + offset) % tenants.len()];
            if let Some(job) = self
                .store
                .claim_next_for_tenant(tenant, worker_id, now, lease)
                .await?
            {
                debug!(job_id = %job.id, tenant = %tenant, worker_id, "Job claimed");
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    /// Mark a claimed job as succeeded.
    pub async fn complete(&self, job_id: &JobId) -> Result<()> {
        self.store.mark_succeeded(job_id).await?;
        debug!(job_id = %job_id, "Job succeeded");
        Ok(())
    }

    /// Report a failed attempt for a claimed job.
    ///
    /// Retryable failures reschedule with exponential backoff until the
    /// attempt ceiling, then dead-letter. Non-retryable failures are
    /// terminal immediately. Returns the resulting status.
    pub async fn fail(&self, job: &Job, error: &str, retryable: bool) -> Result<JobStatus> {
        if !retryable {
            self.store.mark_failed(&job.id, error).await?;
            info!(job_id = %job.id, error, "Job failed terminally");
            return Ok(JobStatus::Failed);
        }

        if job.attempt >= job.max_attempts {
            self.store.mark_dead_lettered(&job.id, error).await?;
            warn!(
                job_id = %job.id,
                attempts = job.attempt,
                error,
                "Job dead-lettered after exhausting retries"
            );
            return Ok(JobStatus::DeadLettered);
        }

        let delay = retry_delay(&self.config, job.attempt);
        let next_run_at = Utc::now()
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(0));
        self.store.reschedule_job(&job.id, next_run_at, error).await?;
        debug!(
            job_id = %job.id,
            attempt = job.attempt,
            delay_ms = delay.as_millis() as u64,
            error,
            "Job rescheduled"
        );
        Ok(JobStatus::Pending)
    }

    /// Move a claimed job straight to the dead-letter state.
    pub async fn dead_letter(&self, job_id: &JobId, error: &str) -> Result<()> {
        self.store.mark_dead_lettered(job_id, error).await?;
        warn!(job_id = %job_id, error, "Job dead-lettered");
        Ok(())
    }

    /// Reclaim expired leases and dead-letter jobs that are out of
    /// attempts. Called periodically; safe to run concurrently.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<(u64, u64)> {
        let dead = self.store.dead_letter_exhausted(now).await?;
        let released = self.store.release_expired_leases(now).await?;
        Ok((released, dead))
    }

    /// Run the lease sweeper until shutdown.
    pub async fn run_sweeper(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.sweep(Utc::now()).await {
                warn!(error = %e, "Lease sweep failed");
            }
        }
        info!("Lease sweeper stopped");
    }

    /// Per-tenant job counts for the observability surface.
    pub async fn tenant_stats(&self, tenant_id: &TenantId) -> Result<JobCounts> {
        Ok(self.store.job_counts(tenant_id).await?)
    }

    /// Fetch one job.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        Ok(self.store.get_job(job_id).await?)
    }

    /// List jobs for inspection.
    pub async fn list_jobs(
        &self,
        tenant_id: Option<&TenantId>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        Ok(self.store.list_jobs(tenant_id, status, limit).await?)
    }

    /// Manually requeue a dead-lettered job with a fresh attempt budget.
    pub async fn requeue_dead_letter(&self, job_id: &JobId) -> Result<bool> {
        Ok(self
            .store
            .requeue_dead_letter(job_id, self.config.max_attempts)
            .await?)
    }
}
