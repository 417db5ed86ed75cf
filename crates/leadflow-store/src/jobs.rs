//! Job queue storage.
//!
//! The claim is the sole point of contention for job assignment: a single
//! conditional `UPDATE ... RETURNING` that transitions `pending -> running`,
//! stamps the claim owner and lease expiry, and bumps the attempt counter.
//! SQLite serializes writers, so two workers can never receive the same
//! runnable job.

use crate::{from_millis, to_millis, Result, Store, StoreError};
use chrono::{DateTime, Duration, Utc};
use leadflow_core::types::{Job, JobId, JobKind, JobStatus, TenantId};
use serde::Serialize;
use tracing::{debug, warn};

/// A job to insert.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub kind: JobKind,
    pub tenant_id: TenantId,
    pub payload: serde_json::Value,
    pub max_attempts: u32,
    pub next_run_at: DateTime<Utc>,
}

/// Per-tenant job counts by status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobCounts {
    pub pending: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub dead_lettered: i64,
}

type JobRow = (
    String,         // id
    String,         // kind
    String,         // tenant_id
    String,         // payload
    String,         // status
    i64,            // attempt
    i64,            // max_attempts
    i64,            // next_run_at
    Option<String>, // claim_owner
    Option<i64>,    // lease_expires_at
    i64,            // created_at
    Option<String>, // last_error
);

const JOB_COLUMNS: &str = "id, kind, tenant_id, payload, status, attempt, max_attempts, \
     next_run_at, claim_owner, lease_expires_at, created_at, last_error";

fn job_from_row(row: JobRow) -> Result<Job> {
    let (
        id,
        kind,
        tenant_id,
        payload,
        status,
        attempt,
        max_attempts,
        next_run_at,
        claim_owner,
        lease_expires_at,
        created_at,
        last_error,
    ) = row;

    let kind = JobKind::parse(&kind)
        .ok_or_else(|| StoreError::corrupted("jobs", format!("unknown kind '{kind}'")))?;
    let status = JobStatus::parse(&status)
        .ok_or_else(|| StoreError::corrupted("jobs", format!("unknown status '{status}'")))?;

    Ok(Job {
        id: JobId::from_string(id),
        kind,
        tenant_id: TenantId::new(tenant_id),
        payload: serde_json::from_str(&payload)?,
        status,
        attempt: attempt as u32,
        max_attempts: max_attempts as u32,
        next_run_at: from_millis(next_run_at),
        claim_owner,
        lease_expires_at: lease_expires_at.map(from_millis),
        created_at: from_millis(created_at),
        last_error,
    })
}

impl Store {
    /// Insert a new pending job.
    pub async fn insert_job(&self, job: &NewJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, kind, tenant_id, payload, status, attempt, max_attempts, \
             next_run_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7)",
        )
        .bind(job.id.as_str())
        .bind(job.kind.as_str())
        .bind(job.tenant_id.as_str())
        .bind(serde_json::to_string(&job.payload)?)
        .bind(job.max_attempts as i64)
        .bind(to_millis(job.next_run_at))
        .bind(to_millis(Utc::now()))
        .execute(self.pool())
        .await?;

        debug!(job_id = %job.id, kind = job.kind.as_str(), "Job enqueued");
        Ok(())
    }

    /// Atomically claim the next runnable job for one tenant.
    ///
    /// A `running` job whose lease has expired is claimable again (crash
    /// recovery). The attempt counter increments on every hand-out, so it
    /// also bounds workers that die without reporting back.
    pub async fn claim_next_for_tenant(
        &self,
        tenant_id: &TenantId,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Job>> {
        let now_ms = to_millis(now);
        let lease_expires = to_millis(now + lease);

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = 'running', claim_owner = ?1, lease_expires_at = ?2, \
             attempt = attempt + 1 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE tenant_id = ?3 AND next_run_at <= ?4 AND attempt < max_attempts \
                   AND (status = 'pending' \
                        OR (status = 'running' AND lease_expires_at <= ?4)) \
                 ORDER BY next_run_at ASC, created_at ASC \
                 LIMIT 1 \
             ) \
             AND (status = 'pending' OR (status = 'running' AND lease_expires_at <= ?4)) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(worker_id)
        .bind(lease_expires)
        .bind(tenant_id.as_str())
        .bind(now_ms)
        .fetch_optional(self.pool())
        .await?;

        row.map(job_from_row).transpose()
    }

    /// Tenants that currently have claimable work, ordered for a stable
    /// round-robin rotation.
    pub async fn runnable_tenants(&self, now: DateTime<Utc>) -> Result<Vec<TenantId>> {
        let now_ms = to_millis(now);
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT tenant_id FROM jobs \
             WHERE next_run_at <= ?1 AND attempt < max_attempts \
               AND (status = 'pending' OR (status = 'running' AND lease_expires_at <= ?1)) \
             ORDER BY tenant_id",
        )
        .bind(now_ms)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(t,)| TenantId::new(t)).collect())
    }

    /// Mark a claimed job as succeeded.
    pub async fn mark_succeeded(&self, job_id: &JobId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'succeeded', claim_owner = NULL, lease_expires_at = NULL \
             WHERE id = ?1 AND status = 'running'",
        )
        .bind(job_id.as_str())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            warn!(job_id = %job_id, "Completed a job whose lease had already expired");
        }
        Ok(())
    }

    /// Return a claimed job to pending with a future run time.
    pub async fn reschedule_job(
        &self,
        job_id: &JobId,
        next_run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'pending', claim_owner = NULL, lease_expires_at = NULL, \
             next_run_at = ?1, last_error = ?2 \
             WHERE id = ?3 AND status = 'running'",
        )
        .bind(to_millis(next_run_at))
        .bind(error)
        .bind(job_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Terminally fail a claimed job (tenant-visible, no retries).
    pub async fn mark_failed(&self, job_id: &JobId, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', claim_owner = NULL, lease_expires_at = NULL, \
             last_error = ?1 \
             WHERE id = ?2 AND status = 'running'",
        )
        .bind(error)
        .bind(job_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Move a claimed job to the dead-letter state.
    pub async fn mark_dead_lettered(&self, job_id: &JobId, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'dead_lettered', claim_owner = NULL, \
             lease_expires_at = NULL, last_error = ?1 \
             WHERE id = ?2 AND status IN ('running', 'pending')",
        )
        .bind(error)
        .bind(job_id.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Return expired-lease jobs that still have attempts left to pending.
    pub async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', claim_owner = NULL, lease_expires_at = NULL \
             WHERE status = 'running' AND lease_expires_at <= ?1 AND attempt < max_attempts",
        )
        .bind(to_millis(now))
        .execute(self.pool())
        .await?;

        let released = result.rows_affected();
        if released > 0 {
            warn!(released, "Released expired job leases");
        }
        Ok(released)
    }

    /// Dead-letter expired-lease jobs that are out of attempts.
    pub async fn dead_letter_exhausted(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'dead_lettered', claim_owner = NULL, \
             lease_expires_at = NULL, \
             last_error = COALESCE(last_error, 'lease expired with attempts exhausted') \
             WHERE status = 'running' AND lease_expires_at <= ?1 AND attempt >= max_attempts",
        )
        .bind(to_millis(now))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Fetch one job by ID.
    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
                .bind(job_id.as_str())
                .fetch_optional(self.pool())
                .await?;

        row.map(job_from_row).transpose()
    }

    /// Per-tenant counts by status, for the observability surface.
    pub async fn job_counts(&self, tenant_id: &TenantId) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM jobs WHERE tenant_id = ?1 GROUP BY status",
        )
        .bind(tenant_id.as_str())
        .fetch_all(self.pool())
        .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => counts.pending = count,
                "running" => counts.running = count,
                "succeeded" => counts.succeeded = count,
                "failed" => counts.failed = count,
                "dead_lettered" => counts.dead_lettered = count,
                other => warn!(status = other, "Unknown job status in counts"),
            }
        }
        Ok(counts)
    }

    /// List jobs for inspection (CLI and dashboard).
    pub async fn list_jobs(
        &self,
        tenant_id: Option<&TenantId>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE (?1 = '' OR tenant_id = ?1) AND (?2 = '' OR status = ?2) \
             ORDER BY created_at DESC LIMIT ?3"
        );

        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(tenant_id.map(|t| t.as_str()).unwrap_or(""))
            .bind(status.map(|s| s.as_str()).unwrap_or(""))
            .bind(limit)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(job_from_row).collect()
    }

    /// Manually requeue a dead-lettered job, extending its attempt budget.
    ///
    /// The attempt counter itself never decreases; the ceiling moves instead.
    pub async fn requeue_dead_letter(&self, job_id: &JobId, extra_attempts: u32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', next_run_at = ?1, \
             max_attempts = attempt + ?2, last_error = NULL \
             WHERE id = ?3 AND status = 'dead_lettered'",
        )
        .bind(to_millis(Utc::now()))
        .bind(extra_attempts as i64)
        .bind(job_id.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
