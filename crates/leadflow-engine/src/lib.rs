//! # leadflow-engine
//!
//! The asynchronous delivery and synchronization engine: a durable job
//! queue with per-tenant fairness, a worker pool dispatching sends and
//! webhook reconciliation, a per-number warm-up rate governor, and the
//! idempotent inbound-event reconciler.

pub mod backoff;
pub mod error;
pub mod governor;
pub mod queue;
pub mod reconciler;
pub mod tenant;
pub mod worker;

pub use error::{EngineError, Result};
pub use governor::{DenyReason, RateGovernor, Reservation};
pub use queue::JobQueue;
pub use reconciler::Reconciler;
pub use tenant::{TenantContext, TenantRegistry, WebhookSecrets};
pub use worker::WorkerPool;

pub use leadflow_store::ReconcileOutcome;
