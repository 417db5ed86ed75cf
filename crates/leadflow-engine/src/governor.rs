//! Rate and warm-up governor.
//!
//! Gates every send against the owning number's daily allowance and walks
//! the warm-up ladder over time. The reservation itself is one atomic
//! compare-and-increment in the store; this layer owns the state machine
//! around it.

use crate::error::Result;
use crate::tenant::{TenantContext, TenantRegistry};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use leadflow_core::config::WarmupConfig;
use leadflow_core::types::{PhoneNumber, SendingNumber, TenantId, WarmupState};
use leadflow_store::Store;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why a reservation was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Today's quota is spent.
    QuotaExhausted,
    /// The number is suspended pending manual review.
    Suspended,
    /// The number was never registered with the governor.
    UnknownNumber,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::QuotaExhausted => write!(f, "daily quota exhausted"),
            DenyReason::Suspended => write!(f, "sending number suspended"),
            DenyReason::UnknownNumber => write!(f, "unknown sending number"),
        }
    }
}

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// One send reserved; the counter is already incremented.
    Allowed,
    /// Nothing reserved.
    Denied(DenyReason),
}

/// Computed outcome of one number's daily rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RolloverPlan {
    state: WarmupState,
    daily_limit: i64,
    clean_days: i64,
    state_changed: bool,
}

/// The per-number rate and warm-up governor.
pub struct RateGovernor {
    store: Store,
    config: WarmupConfig,
}

impl RateGovernor {
    /// Create a governor over the given store.
    pub fn new(store: Store, config: WarmupConfig) -> Self {
        Self { store, config }
    }

    /// The warm-up ceiling for one tenant, honoring its override.
    fn ceiling_for(&self, context: &TenantContext) -> i64 {
        context
            .daily_limit_override
            .unwrap_or(self.config.active_daily_limit)
    }

    /// Register a tenant's sending number, if unknown. Existing warm-up
    /// state survives restarts untouched.
    pub async fn register_number(&self, context: &TenantContext) -> Result<()> {
        let initial = self.config.initial_daily_limit.min(self.ceiling_for(context));
        self.store
            .register_number(&context.tenant_id, &context.from_number, initial)
            .await?;
        Ok(())
    }

    /// Atomically reserve one send against the number's allowance.
    ///
    /// The reservation happens before the actual send and is never
    /// refunded; slight under-utilization beats bursting past provider
    /// limits.
    pub async fn reserve(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
    ) -> Result<Reservation> {
        if self.store.try_reserve_send(tenant_id, from_number).await? {
            return Ok(Reservation::Allowed);
        }

        // Denied; read the row once to name the reason.
        let reason = match self.store.get_number(tenant_id, from_number).await? {
            None => DenyReason::UnknownNumber,
            Some(number) if number.warmup_state == WarmupState::Suspended => DenyReason::Suspended,
            Some(_) => DenyReason::QuotaExhausted,
        };

        debug!(tenant = %tenant_id, number = %from_number, %reason, "Reservation denied");
        Ok(Reservation::Denied(reason))
    }

    /// Record a provider-reported send failure and throttle the number if
    /// today's failure rate has spiked.
    pub async fn note_send_failure(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
    ) -> Result<()> {
        self.store.record_send_failure(tenant_id, from_number).await?;

        if let Some(number) = self.store.get_number(tenant_id, from_number).await? {
            let spiked = number.sent_today >= self.config.failure_min_sample
                && number
                    .failure_rate_today()
                    .is_some_and(|rate| rate > self.config.failure_rate_threshold);
            if spiked {
                warn!(
                    tenant = %tenant_id,
                    number = %from_number,
                    failures = number.failures_today,
                    sent = number.sent_today,
                    "Failure rate spiked"
                );
                self.throttle(tenant_id, from_number).await?;
            }
        }
        Ok(())
    }

    /// React to a provider-issued rate-limit warning: tighten immediately.
    pub async fn note_rate_limited(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
    ) -> Result<()> {
        self.store.record_send_failure(tenant_id, from_number).await?;
        self.throttle(tenant_id, from_number).await
    }

    /// Cut the cap and record a strike; repeated violations suspend.
    async fn throttle(&self, tenant_id: &TenantId, from_number: &PhoneNumber) -> Result<()> {
        let Some(number) = self.store.get_number(tenant_id, from_number).await? else {
            return Ok(());
        };
        if number.warmup_state == WarmupState::Suspended {
            return Ok(());
        }

        if number.throttle_strikes + 1 >= self.config.strikes_to_suspend {
            self.store
                .suspend_number(tenant_id, from_number, Utc::now())
                .await?;
            return Ok(());
        }

        let new_limit =
            ((number.daily_limit as f64 * self.config.throttle_factor) as i64).max(1);
        self.store
            .apply_throttle(tenant_id, from_number, new_limit, Utc::now())
            .await?;
        Ok(())
    }

    /// The quota day a tenant is currently in: the calendar date shifted
    /// back by its rollover boundary hour.
    pub fn rollover_day(now: DateTime<Utc>, rollover_hour_utc: u8) -> NaiveDate {
        (now - ChronoDuration::hours(rollover_hour_utc as i64)).date_naive()
    }

    /// Roll one tenant's numbers over into the current quota day.
    ///
    /// Idempotent: the store guards each row with its `last_rollover_day`
    /// stamp, so replayed or overlapping runs change nothing. Returns how
    /// many numbers rolled.
    pub async fn rollover_tenant(
        &self,
        context: &TenantContext,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let day = Self::rollover_day(now, context.rollover_hour_utc);
        let ceiling = self.ceiling_for(context);
        let due = self
            .store
            .numbers_needing_rollover(&context.tenant_id, day)
            .await?;

        let mut rolled = 0;
        for number in due {
            // A freshly registered number has no rollover stamp yet; give it
            // one without consuming a warm-up day.
            let plan = if number.last_rollover_day.is_none() {
                RolloverPlan {
                    state: number.warmup_state,
                    daily_limit: number.daily_limit,
                    clean_days: number.clean_days,
                    state_changed: false,
                }
            } else {
                self.plan_next_day(&number, ceiling)
            };

            let applied = self
                .store
                .apply_rollover(
                    &context.tenant_id,
                    &number.from_number,
                    day,
                    plan.state,
                    plan.daily_limit,
                    plan.clean_days,
                    plan.state_changed,
                    now,
                )
                .await?;
            if applied {
                rolled += 1;
                if plan.state_changed {
                    info!(
                        tenant = %context.tenant_id,
                        number = %number.from_number,
                        state = plan.state.as_str(),
                        limit = plan.daily_limit,
                        "Warm-up state advanced"
                    );
                }
            }
        }
        Ok(rolled)
    }

    /// Compute the next quota day for one number.
    fn plan_next_day(&self, number: &SendingNumber, ceiling: i64) -> RolloverPlan {
        let clean = number.failures_today == 0
            || number
                .failure_rate_today()
                .is_some_and(|rate| rate <= self.config.failure_rate_threshold);

        let mut plan = RolloverPlan {
            state: number.warmup_state,
            daily_limit: number.daily_limit.min(ceiling),
            clean_days: if clean { number.clean_days + 1 } else { 0 },
            state_changed: false,
        };

        match number.warmup_state {
            WarmupState::WarmingUp => {
                if clean && plan.clean_days >= self.config.clean_days_to_ramp {
                    plan.state = WarmupState::Ramping;
                    plan.state_changed = true;
                    plan.clean_days = 0;
                }
            }
            WarmupState::Ramping => {
                if clean {
                    let grown =
                        ((number.daily_limit as f64 * self.config.ramp_multiplier) as i64)
                            .min(ceiling);
                    plan.daily_limit = grown;
                    if grown >= ceiling {
                        plan.state = WarmupState::Active;
                        plan.state_changed = true;
                    }
                }
            }
            WarmupState::Active => {
                plan.daily_limit = ceiling;
            }
            WarmupState::Throttled => {
                if clean && plan.clean_days >= self.config.recovery_clean_days {
                    plan.state = WarmupState::Ramping;
                    plan.state_changed = true;
                    plan.clean_days = 0;
                }
            }
            WarmupState::Suspended => {
                // Counters still reset; only a manual reset changes state.
                plan.clean_days = 0;
            }
        }

        plan
    }

    /// Run rollovers for every tenant on a fixed cadence until shutdown.
    pub async fn run_rollover_scheduler(
        &self,
        registry: Arc<TenantRegistry>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            let now = Utc::now();
            for context in registry.iter() {
                if let Err(e) = self.rollover_tenant(context, now).await {
                    warn!(tenant = %context.tenant_id, error = %e, "Rollover failed");
                }
            }
        }
        info!("Rollover scheduler stopped");
    }

    /// Warm-up state and remaining allowance for a tenant's numbers.
    pub async fn number_status(&self, tenant_id: &TenantId) -> Result<Vec<SendingNumber>> {
        Ok(self.store.list_numbers(tenant_id).await?)
    }

    /// Manually reset a (typically suspended) number to a fresh warm-up.
    pub async fn reset_number(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
    ) -> Result<bool> {
        Ok(self
            .store
            .reset_number(
                tenant_id,
                from_number,
                self.config.initial_daily_limit,
                Utc::now(),
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_core::types::ProviderType;
    use leadflow_providers::{ProviderAck, ProviderAdapter, SendRequest, StatusSnapshot};

    #[derive(Debug)]
    struct NullAdapter;

    #[async_trait::async_trait]
    impl ProviderAdapter for NullAdapter {
        fn provider_type(&self) -> ProviderType {
            ProviderType::MetaCloud
        }
        async fn send(
            &self,
            _request: &SendRequest,
        ) -> leadflow_providers::Result<ProviderAck> {
            Ok(ProviderAck {
                provider_message_id: "wamid.null".to_string(),
            })
        }
        async fn lookup_status(
            &self,
            _client_ref: &str,
        ) -> leadflow_providers::Result<Option<StatusSnapshot>> {
            Ok(None)
        }
    }

    fn context(tenant: &str, number: &str) -> TenantContext {
        TenantContext {
            tenant_id: TenantId::new(tenant),
            from_number: PhoneNumber::new(number),
            provider: Arc::new(NullAdapter),
            webhook: crate::tenant::WebhookSecrets {
                app_secret: "secret".to_string(),
                verify_token: "verify".to_string(),
                crm_token: None,
            },
            daily_limit_override: None,
            rollover_hour_utc: 0,
        }
    }

    fn config() -> WarmupConfig {
        WarmupConfig::default()
    }

    async fn governor() -> (RateGovernor, TenantContext) {
        let store = Store::connect_in_memory().await.unwrap();
        let governor = RateGovernor::new(store, config());
        let ctx = context("acme", "4915112345678");
        governor.register_number(&ctx).await.unwrap();
        (governor, ctx)
    }

    fn number_with(state: WarmupState, limit: i64, sent: i64, failures: i64, clean: i64) -> SendingNumber {
        SendingNumber {
            from_number: PhoneNumber::new("4915112345678"),
            tenant_id: TenantId::new("acme"),
            warmup_state: state,
            daily_limit: limit,
            sent_today: sent,
            failures_today: failures,
            clean_days: clean,
            throttle_strikes: 0,
            state_entered_at: Utc::now(),
            last_rollover_day: Some(NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_quota_boundary() {
        let (governor, ctx) = governor().await;

        // Warming-up cap of 50: the 51st request is denied with a quota reason
        for _ in 0..50 {
            assert_eq!(
                governor.reserve(&ctx.tenant_id, &ctx.from_number).await.unwrap(),
                Reservation::Allowed
            );
        }
        assert_eq!(
            governor.reserve(&ctx.tenant_id, &ctx.from_number).await.unwrap(),
            Reservation::Denied(DenyReason::QuotaExhausted)
        );
    }

    #[tokio::test]
    async fn test_unknown_number_denied() {
        let (governor, ctx) = governor().await;
        let other = PhoneNumber::new("4915100000000");
        assert_eq!(
            governor.reserve(&ctx.tenant_id, &other).await.unwrap(),
            Reservation::Denied(DenyReason::UnknownNumber)
        );
    }

    #[tokio::test]
    async fn test_rate_limit_throttles_then_suspends() {
        let (governor, ctx) = governor().await;

        governor
            .note_rate_limited(&ctx.tenant_id, &ctx.from_number)
            .await
            .unwrap();
        let number = governor
            .number_status(&ctx.tenant_id)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(number.warmup_state, WarmupState::Throttled);
        assert_eq!(number.daily_limit, 25);
        assert_eq!(number.throttle_strikes, 1);

        governor
            .note_rate_limited(&ctx.tenant_id, &ctx.from_number)
            .await
            .unwrap();
        // Third strike suspends (strikes_to_suspend = 3)
        governor
            .note_rate_limited(&ctx.tenant_id, &ctx.from_number)
            .await
            .unwrap();
        let number = governor
            .number_status(&ctx.tenant_id)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(number.warmup_state, WarmupState::Suspended);

        assert_eq!(
            governor.reserve(&ctx.tenant_id, &ctx.from_number).await.unwrap(),
            Reservation::Denied(DenyReason::Suspended)
        );

        // Manual reset brings the number back to a fresh warm-up
        assert!(governor
            .reset_number(&ctx.tenant_id, &ctx.from_number)
            .await
            .unwrap());
        assert_eq!(
            governor.reserve(&ctx.tenant_id, &ctx.from_number).await.unwrap(),
            Reservation::Allowed
        );
    }

    #[tokio::test]
    async fn test_warming_up_advances_to_ramping() {
        let (governor, _ctx) = governor().await;

        let number = number_with(WarmupState::WarmingUp, 50, 40, 0, 6);
        let plan = governor.plan_next_day(&number, 1000);
        assert_eq!(plan.state, WarmupState::Ramping);
        assert!(plan.state_changed);
    }

    #[tokio::test]
    async fn test_dirty_day_resets_clean_streak() {
        let (governor, _ctx) = governor().await;

        // 10 failures out of 40 sends is far past the 5% threshold
        let number = number_with(WarmupState::WarmingUp, 50, 40, 10, 6);
        let plan = governor.plan_next_day(&number, 1000);
        assert_eq!(plan.state, WarmupState::WarmingUp);
        assert_eq!(plan.clean_days, 0);
    }

    #[tokio::test]
    async fn test_ramping_doubles_until_active() {
        let (governor, _ctx) = governor().await;

        let number = number_with(WarmupState::Ramping, 400, 100, 0, 2);
        let plan = governor.plan_next_day(&number, 1000);
        assert_eq!(plan.daily_limit, 800);
        assert_eq!(plan.state, WarmupState::Ramping);

        let number = number_with(WarmupState::Ramping, 800, 100, 0, 3);
        let plan = governor.plan_next_day(&number, 1000);
        assert_eq!(plan.daily_limit, 1000);
        assert_eq!(plan.state, WarmupState::Active);
        assert!(plan.state_changed);
    }

    #[tokio::test]
    async fn test_throttled_recovers_after_clean_days() {
        let (governor, _ctx) = governor().await;

        let number = number_with(WarmupState::Throttled, 25, 10, 0, 1);
        let plan = governor.plan_next_day(&number, 1000);
        assert_eq!(plan.state, WarmupState::Ramping);
        assert!(plan.state_changed);
    }

    #[tokio::test]
    async fn test_rollover_is_idempotent_end_to_end() {
        let (governor, ctx) = governor().await;
        let now = Utc::now();

        // First pass stamps the fresh number
        assert_eq!(governor.rollover_tenant(&ctx, now).await.unwrap(), 1);
        // Same day again: nothing to do
        assert_eq!(governor.rollover_tenant(&ctx, now).await.unwrap(), 0);

        // Next day: counters reset
        governor.reserve(&ctx.tenant_id, &ctx.from_number).await.unwrap();
        let tomorrow = now + ChronoDuration::days(1);
        assert_eq!(governor.rollover_tenant(&ctx, tomorrow).await.unwrap(), 1);
        let number = governor
            .number_status(&ctx.tenant_id)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(number.sent_today, 0);
    }

    #[test]
    fn test_rollover_day_boundary() {
        let before = DateTime::parse_from_rfc3339("2026-08-07T03:59:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let after = DateTime::parse_from_rfc3339("2026-08-07T04:01:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // With a 4:00 UTC boundary, 03:59 still belongs to the previous day
        assert_eq!(
            RateGovernor::rollover_day(before, 4),
            NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
        );
        assert_eq!(
            RateGovernor::rollover_day(after, 4),
            NaiveDate::from_ymd_opt(2026, 8, 7).unwrap()
        );
    }
}
