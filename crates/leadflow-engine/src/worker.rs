//! Worker pool.
//!
//! A fixed set of concurrent workers, each looping claim -> dispatch ->
//! report. Every dispatch is wrapped so component errors are classified
//! into the retry taxonomy instead of escaping as a pool crash, and every
//! attempt is bounded by a timeout.
//!
//! The delicate part is the send path: a provider send is non-idempotent,
//! so the worker persists a dispatch marker before the call. An attempt
//! that later finds a marker without a provider acknowledgment never
//! resends; it asks the provider for the truth instead.

use crate::error::Result;
use crate::governor::{RateGovernor, Reservation};
use crate::queue::JobQueue;
use crate::reconciler::Reconciler;
use crate::tenant::{TenantContext, TenantRegistry};
use leadflow_core::config::WorkerConfig;
use leadflow_core::id;
use leadflow_core::types::{
    InboundEvent, Job, JobKind, MessageId, OutboundMessage, SendMessagePayload,
};
use leadflow_providers::{ProviderError, SendRequest};
use leadflow_store::{NewOutboundMessage, Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How a finished dispatch settles its job.
#[derive(Debug)]
enum Disposition {
    /// Call `complete`.
    Done,
    /// Retryable failure: requeue with backoff.
    Retry(String),
    /// Tenant-visible terminal failure: no further attempts.
    Terminal(String),
    /// Unrecoverable without a human: dead-letter and alert.
    Dead(String),
}

/// The worker pool.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    governor: Arc<RateGovernor>,
    reconciler: Arc<Reconciler>,
    tenants: Arc<TenantRegistry>,
    store: Store,
    config: WorkerConfig,
}

impl WorkerPool {
    /// Assemble a pool.
    pub fn new(
        queue: Arc<JobQueue>,
        governor: Arc<RateGovernor>,
        reconciler: Arc<Reconciler>,
        tenants: Arc<TenantRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let store = queue.store().clone();
        Self {
            queue,
            governor,
            reconciler,
            tenants,
            store,
            config,
        }
    }

    /// Run `config.count` workers until the shutdown signal flips.
    ///
    /// Workers finish their current job and stop claiming; anything a dead
    /// process leaves behind is recovered through lease expiry.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::with_capacity(self.config.count);
        for index in 0..self.config.count {
            let pool = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let worker_id = format!("worker-{index}-{}", id::short_id());
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id, shutdown).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }

    async fn worker_loop(&self, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %worker_id, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_one(&worker_id).await {
                Ok(true) => {}
                Ok(false) => {
                    // Queue idle; doze until work could exist or we stop.
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    warn!(worker = %worker_id, error = %e, "Worker iteration failed");
                    tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
                }
            }
        }
        info!(worker = %worker_id, "Worker stopped");
    }

    /// Claim and process one job. Returns `false` when nothing was
    /// claimable. Public so tests and drain tools can step the pool.
    pub async fn process_one(&self, worker_id: &str) -> Result<bool> {
        let Some(job) = self.queue.claim_next(worker_id).await? else {
            return Ok(false);
        };

        let timeout = Duration::from_secs(self.config.attempt_timeout_secs);
        let disposition = match tokio::time::timeout(timeout, self.dispatch(&job)).await {
            Ok(disposition) => disposition,
            // The attempt is abandoned mid-flight; for sends, the dispatch
            // marker stays set, steering the next attempt into
            // reconciliation rather than a blind resend.
            Err(_) => Disposition::Retry(format!("attempt timed out after {timeout:?}")),
        };

        self.settle(&job, disposition).await?;
        Ok(true)
    }

    async fn settle(&self, job: &Job, disposition: Disposition) -> Result<()> {
        match disposition {
            Disposition::Done => self.queue.complete(&job.id).await,
            Disposition::Retry(reason) => {
                self.queue.fail(job, &reason, true).await?;
                Ok(())
            }
            Disposition::Terminal(reason) => {
                self.queue.fail(job, &reason, false).await?;
                Ok(())
            }
            Disposition::Dead(reason) => {
                error!(job_id = %job.id, reason, "Job requires manual intervention");
                self.queue.dead_letter(&job.id, &reason).await
            }
        }
    }

    async fn dispatch(&self, job: &Job) -> Disposition {
        match job.kind {
            JobKind::SendMessage => self.dispatch_send(job).await,
            JobKind::SyncInbound => self.dispatch_sync(job).await,
        }
    }

    async fn dispatch_send(&self, job: &Job) -> Disposition {
        let payload: SendMessagePayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => return Disposition::Dead(format!("malformed send payload: {e}")),
        };

        let context = match self.tenants.resolve(&job.tenant_id) {
            Ok(context) => context,
            Err(e) => return Disposition::Terminal(e.to_string()),
        };

        let message = match self
            .store
            .create_message_for_job(&NewOutboundMessage {
                id: MessageId::new(),
                tenant_id: job.tenant_id.clone(),
                job_id: job.id.clone(),
                from_number: payload.from_number.clone(),
                to_number: payload.to_number.clone(),
                body: payload.body.clone(),
            })
            .await
        {
            Ok(message) => message,
            Err(e) => return Disposition::Retry(format!("store error: {e}")),
        };

        // A previous attempt already got the acknowledgment persisted but
        // died before completing the job; nothing left to send.
        if message.provider_message_id.is_some() {
            return Disposition::Done;
        }

        // A dispatch marker without an acknowledgment means an earlier
        // attempt may have reached the provider. Never resend blindly.
        if message.needs_reconciliation || message.dispatch_attempt.is_some() {
            return self.reconcile_dispatch(&context, &message).await;
        }

        match self
            .governor
            .reserve(&job.tenant_id, &payload.from_number)
            .await
        {
            Ok(Reservation::Allowed) => {}
            Ok(Reservation::Denied(reason)) => {
                let reason = format!("send denied: {reason}");
                if let Err(e) = self
                    .store
                    .mark_message_failed(&job.tenant_id, &message.id, &reason)
                    .await
                {
                    return Disposition::Retry(format!("store error: {e}"));
                }
                return Disposition::Terminal(reason);
            }
            Err(e) => return Disposition::Retry(format!("governor error: {e}")),
        }

        // Persist the marker before the non-idempotent provider call.
        if let Err(e) = self
            .store
            .mark_dispatch_started(&job.tenant_id, &message.id, job.attempt)
            .await
        {
            // The reservation is spent but nothing external happened.
            return Disposition::Retry(format!("store error before dispatch: {e}"));
        }

        let request = SendRequest {
            tenant_id: job.tenant_id.clone(),
            client_ref: message.id.to_string(),
            from_number: payload.from_number.clone(),
            to_number: payload.to_number.clone(),
            body: payload.body.clone(),
        };

        match context.provider.send(&request).await {
            Ok(ack) => {
                if let Err(e) = self
                    .store
                    .record_provider_ack(&job.tenant_id, &message.id, &ack.provider_message_id)
                    .await
                {
                    // The provider side effect happened. Flag the message so
                    // the retry resolves it by lookup instead of resending.
                    error!(
                        job_id = %job.id,
                        message_id = %message.id,
                        error = %e,
                        "Persistence failed after provider acknowledgment"
                    );
                    if let Err(flag_err) = self
                        .store
                        .flag_message_reconciliation(&job.tenant_id, &message.id)
                        .await
                    {
                        warn!(message_id = %message.id, error = %flag_err, "Could not flag message");
                    }
                    return Disposition::Retry(format!(
                        "persistence failed after provider ack: {e}"
                    ));
                }
                Disposition::Done
            }
            Err(e) => self.handle_send_error(&context, &message, e).await,
        }
    }

    /// Classify a send failure returned by the adapter.
    ///
    /// The adapter answered, so the provider definitively did not accept a
    /// message; the dispatch marker is cleared and a retryable failure may
    /// send fresh on the next attempt.
    async fn handle_send_error(
        &self,
        context: &TenantContext,
        message: &OutboundMessage,
        err: ProviderError,
    ) -> Disposition {
        if let Err(e) = self
            .store
            .clear_dispatch_marker(&context.tenant_id, &message.id)
            .await
        {
            warn!(message_id = %message.id, error = %e, "Could not clear dispatch marker");
        }

        if err.is_rate_limit() {
            if let Err(e) = self
                .governor
                .note_rate_limited(&context.tenant_id, &message.from_number)
                .await
            {
                warn!(error = %e, "Could not record rate-limit feedback");
            }
            return Disposition::Retry(err.to_string());
        }

        // Provider-side rejections count against the number's reputation.
        if matches!(
            err,
            ProviderError::InvalidRecipient(_) | ProviderError::Api { .. }
        ) {
            if let Err(e) = self
                .governor
                .note_send_failure(&context.tenant_id, &message.from_number)
                .await
            {
                warn!(error = %e, "Could not record send failure");
            }
        }

        if err.is_retryable() {
            return Disposition::Retry(err.to_string());
        }

        let reason = err.to_string();
        if let Err(e) = self
            .store
            .mark_message_failed(&context.tenant_id, &message.id, &reason)
            .await
        {
            return Disposition::Retry(format!("store error: {e}"));
        }

        match err {
            // A tenant configuration problem; surfaced to the tenant admin
            // through the terminal job status, not silently retried.
            ProviderError::AuthFailure(_) => {
                warn!(
                    tenant = %context.tenant_id,
                    "Provider rejected tenant credentials"
                );
                Disposition::Terminal(reason)
            }
            _ => Disposition::Terminal(reason),
        }
    }

    /// Resolve a send whose acknowledgment was lost, using the provider's
    /// own record instead of resending.
    async fn reconcile_dispatch(
        &self,
        context: &TenantContext,
        message: &OutboundMessage,
    ) -> Disposition {
        info!(
            message_id = %message.id,
            tenant = %context.tenant_id,
            "Reconciling send with lost acknowledgment"
        );

        match context.provider.lookup_status(message.id.as_str()).await {
            Ok(Some(snapshot)) => {
                match self
                    .store
                    .resolve_reconciled_message(
                        &context.tenant_id,
                        &message.id,
                        snapshot.provider_message_id.as_deref(),
                        snapshot.status,
                    )
                    .await
                {
                    Ok(()) => {
                        info!(
                            message_id = %message.id,
                            status = snapshot.status.as_str(),
                            "Send reconciled from provider state"
                        );
                        Disposition::Done
                    }
                    Err(e) => Disposition::Retry(format!("store error: {e}")),
                }
            }
            Ok(None) => {
                // The provider definitively never saw the reference. Failing
                // the message is the conservative end state; resending on
                // the word of a possibly stale lookup risks a duplicate.
                let reason = "dispatch unconfirmed by provider".to_string();
                if let Err(e) = self
                    .store
                    .mark_message_failed(&context.tenant_id, &message.id, &reason)
                    .await
                {
                    return Disposition::Retry(format!("store error: {e}"));
                }
                Disposition::Terminal(reason)
            }
            Err(ProviderError::StatusLookupUnsupported) => {
                let reason = "delivery state unverifiable after crash".to_string();
                if let Err(e) = self
                    .store
                    .mark_message_failed(&context.tenant_id, &message.id, &reason)
                    .await
                {
                    return Disposition::Retry(format!("store error: {e}"));
                }
                Disposition::Dead(reason)
            }
            Err(e) if e.is_retryable() => {
                if let Err(flag_err) = self
                    .store
                    .flag_message_reconciliation(&context.tenant_id, &message.id)
                    .await
                {
                    warn!(message_id = %message.id, error = %flag_err, "Could not flag message");
                }
                Disposition::Retry(format!("status lookup failed: {e}"))
            }
            Err(e) => Disposition::Dead(format!("status lookup failed: {e}")),
        }
    }

    async fn dispatch_sync(&self, job: &Job) -> Disposition {
        let event: InboundEvent = match serde_json::from_value(job.payload.clone()) {
            Ok(event) => event,
            Err(e) => return Disposition::Dead(format!("malformed inbound event: {e}")),
        };

        match self.reconciler.apply(&event).await {
            Ok(outcome) => {
                debug!(
                    event_id = %event.provider_event_id,
                    outcome = ?outcome,
                    "Inbound event processed"
                );
                Disposition::Done
            }
            Err(crate::EngineError::Store(StoreError::InvalidEvent(reason))) => {
                Disposition::Terminal(reason)
            }
            Err(crate::EngineError::Payload(e)) => {
                Disposition::Dead(format!("malformed inbound event payload: {e}"))
            }
            Err(e) => Disposition::Retry(e.to_string()),
        }
    }
}
