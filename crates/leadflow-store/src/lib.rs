//! # leadflow-store
//!
//! Durable tenant state over SQLite.
//!
//! Workers run in separate processes, so every cross-worker invariant in
//! this crate is enforced by a single conditional SQL statement rather than
//! an in-process lock: the job claim, the quota reservation, the monotonic
//! delivery-status advance, and the inbound-event seen-set insert.

mod events;
mod jobs;
mod leads;
mod messages;
mod numbers;

pub use jobs::{JobCounts, NewJob};
pub use messages::NewOutboundMessage;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Store result type alias.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Payload (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Row not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stored row failed to map back into its domain type.
    #[error("Corrupted row in {entity}: {reason}")]
    Corrupted { entity: String, reason: String },

    /// An event is structurally valid but cannot be applied (for example a
    /// CRM event for an unmapped lead without a phone number). Not
    /// retryable.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

impl StoreError {
    pub(crate) fn corrupted(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of applying an inbound event against the seen-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The event mutated tenant state.
    Applied,
    /// The event had already been applied; nothing changed.
    Duplicate,
}

/// Handle to the Leadflow database.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        tenant_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempt INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        next_run_at INTEGER NOT NULL,
        claim_owner TEXT,
        lease_expires_at INTEGER,
        created_at INTEGER NOT NULL,
        last_error TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON jobs(status, next_run_at)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_tenant_status ON jobs(tenant_id, status)",
    "CREATE TABLE IF NOT EXISTS outbound_messages (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        job_id TEXT NOT NULL UNIQUE,
        from_number TEXT NOT NULL,
        to_number TEXT NOT NULL,
        body TEXT NOT NULL,
        provider_message_id TEXT,
        delivery_status TEXT NOT NULL DEFAULT 'queued',
        delivery_rank INTEGER NOT NULL DEFAULT 0,
        dispatch_attempt INTEGER,
        needs_reconciliation INTEGER NOT NULL DEFAULT 0,
        failure_reason TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_outbound_provider
        ON outbound_messages(tenant_id, provider_message_id)",
    "CREATE TABLE IF NOT EXISTS sending_numbers (
        tenant_id TEXT NOT NULL,
        from_number TEXT NOT NULL,
        warmup_state TEXT NOT NULL DEFAULT 'warming_up',
        daily_limit INTEGER NOT NULL,
        sent_today INTEGER NOT NULL DEFAULT 0,
        failures_today INTEGER NOT NULL DEFAULT 0,
        clean_days INTEGER NOT NULL DEFAULT 0,
        throttle_strikes INTEGER NOT NULL DEFAULT 0,
        state_entered_at INTEGER NOT NULL,
        last_rollover_day TEXT,
        PRIMARY KEY (tenant_id, from_number)
    )",
    "CREATE TABLE IF NOT EXISTS inbound_events (
        tenant_id TEXT NOT NULL,
        provider_event_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        received_at INTEGER NOT NULL,
        PRIMARY KEY (tenant_id, provider_event_id)
    )",
    "CREATE TABLE IF NOT EXISTS leads (
        id TEXT NOT NULL,
        tenant_id TEXT NOT NULL,
        phone TEXT NOT NULL,
        name TEXT,
        source TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (tenant_id, phone)
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_leads_id ON leads(tenant_id, id)",
    "CREATE TABLE IF NOT EXISTS conversation_messages (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        lead_id TEXT NOT NULL,
        direction TEXT NOT NULL,
        body TEXT NOT NULL,
        provider_message_id TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_conversation_lead
        ON conversation_messages(tenant_id, lead_id, created_at)",
    "CREATE TABLE IF NOT EXISTS crm_links (
        tenant_id TEXT NOT NULL,
        crm_id TEXT NOT NULL,
        lead_id TEXT NOT NULL,
        PRIMARY KEY (tenant_id, crm_id)
    )",
];

impl Store {
    /// Open (creating if missing) the database at `url` and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory database, for tests and `leadflow doctor`-style
    /// dry runs.
    pub async fn connect_in_memory() -> Result<Self> {
        // A single connection: every pooled connection would otherwise get
        // its own private in-memory database.
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create all tables and indexes; every statement is idempotent.
    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready");
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Convert a timestamp to its storage form (unix milliseconds).
pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Convert a stored unix-millisecond timestamp back.
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
