//! Sending-number quota storage.
//!
//! The reservation is one conditional compare-and-increment; there is no
//! read-then-write anywhere, so racing workers in separate processes can
//! never push `sent_today` past `daily_limit`.

use crate::{from_millis, to_millis, Result, Store, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use leadflow_core::types::{PhoneNumber, SendingNumber, TenantId, WarmupState};
use tracing::{debug, warn};

type NumberRow = (
    String,         // tenant_id
    String,         // from_number
    String,         // warmup_state
    i64,            // daily_limit
    i64,            // sent_today
    i64,            // failures_today
    i64,            // clean_days
    i64,            // throttle_strikes
    i64,            // state_entered_at
    Option<String>, // last_rollover_day
);

const NUMBER_COLUMNS: &str = "tenant_id, from_number, warmup_state, daily_limit, sent_today, \
     failures_today, clean_days, throttle_strikes, state_entered_at, last_rollover_day";

fn number_from_row(row: NumberRow) -> Result<SendingNumber> {
    let (
        tenant_id,
        from_number,
        warmup_state,
        daily_limit,
        sent_today,
        failures_today,
        clean_days,
        throttle_strikes,
        state_entered_at,
        last_rollover_day,
    ) = row;

    let warmup_state = WarmupState::parse(&warmup_state).ok_or_else(|| {
        StoreError::corrupted(
            "sending_numbers",
            format!("unknown warmup state '{warmup_state}'"),
        )
    })?;

    Ok(SendingNumber {
        tenant_id: TenantId::new(tenant_id),
        from_number: PhoneNumber::new(from_number),
        warmup_state,
        daily_limit,
        sent_today,
        failures_today,
        clean_days,
        throttle_strikes,
        state_entered_at: from_millis(state_entered_at),
        last_rollover_day: last_rollover_day.and_then(|d| d.parse::<NaiveDate>().ok()),
    })
}

impl Store {
    /// Register a sending number if it is not known yet; existing state is
    /// left untouched.
    pub async fn register_number(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
        initial_limit: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sending_numbers \
             (tenant_id, from_number, warmup_state, daily_limit, state_entered_at) \
             VALUES (?1, ?2, 'warming_up', ?3, ?4) \
             ON CONFLICT(tenant_id, from_number) DO NOTHING",
        )
        .bind(tenant_id.as_str())
        .bind(from_number.as_str())
        .bind(initial_limit)
        .bind(to_millis(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Atomically reserve one send against today's quota.
    ///
    /// Returns `true` when the reservation was granted. The increment and
    /// the ceiling check are one statement; a reservation is never refunded.
    pub async fn try_reserve_send(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sending_numbers SET sent_today = sent_today + 1 \
             WHERE tenant_id = ?1 AND from_number = ?2 \
               AND warmup_state != 'suspended' AND sent_today < daily_limit",
        )
        .bind(tenant_id.as_str())
        .bind(from_number.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch one sending number.
    pub async fn get_number(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
    ) -> Result<Option<SendingNumber>> {
        let row: Option<NumberRow> = sqlx::query_as(&format!(
            "SELECT {NUMBER_COLUMNS} FROM sending_numbers \
             WHERE tenant_id = ?1 AND from_number = ?2"
        ))
        .bind(tenant_id.as_str())
        .bind(from_number.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(number_from_row).transpose()
    }

    /// All sending numbers of one tenant.
    pub async fn list_numbers(&self, tenant_id: &TenantId) -> Result<Vec<SendingNumber>> {
        let rows: Vec<NumberRow> = sqlx::query_as(&format!(
            "SELECT {NUMBER_COLUMNS} FROM sending_numbers WHERE tenant_id = ?1 \
             ORDER BY from_number"
        ))
        .bind(tenant_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(number_from_row).collect()
    }

    /// Count one provider-reported send failure against today's record.
    pub async fn record_send_failure(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sending_numbers SET failures_today = failures_today + 1 \
             WHERE tenant_id = ?1 AND from_number = ?2",
        )
        .bind(tenant_id.as_str())
        .bind(from_number.as_str())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Throttle a number: cut the cap, record a strike, reset clean days.
    /// Suspended numbers are left alone.
    pub async fn apply_throttle(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
        new_limit: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sending_numbers SET warmup_state = 'throttled', daily_limit = ?1, \
             throttle_strikes = throttle_strikes + 1, clean_days = 0, state_entered_at = ?2 \
             WHERE tenant_id = ?3 AND from_number = ?4 AND warmup_state != 'suspended'",
        )
        .bind(new_limit)
        .bind(to_millis(now))
        .bind(tenant_id.as_str())
        .bind(from_number.as_str())
        .execute(self.pool())
        .await?;

        warn!(tenant = %tenant_id, number = %from_number, new_limit, "Sending number throttled");
        Ok(())
    }

    /// Suspend a number; only a manual reset brings it back.
    pub async fn suspend_number(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sending_numbers SET warmup_state = 'suspended', state_entered_at = ?1 \
             WHERE tenant_id = ?2 AND from_number = ?3",
        )
        .bind(to_millis(now))
        .bind(tenant_id.as_str())
        .bind(from_number.as_str())
        .execute(self.pool())
        .await?;

        warn!(tenant = %tenant_id, number = %from_number, "Sending number suspended");
        Ok(())
    }

    /// Manually reset a number to a fresh warm-up.
    pub async fn reset_number(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
        initial_limit: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sending_numbers SET warmup_state = 'warming_up', daily_limit = ?1, \
             sent_today = 0, failures_today = 0, clean_days = 0, throttle_strikes = 0, \
             state_entered_at = ?2 \
             WHERE tenant_id = ?3 AND from_number = ?4",
        )
        .bind(initial_limit)
        .bind(to_millis(now))
        .bind(tenant_id.as_str())
        .bind(from_number.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Numbers of one tenant whose counters have not rolled over for `day`
    /// yet.
    pub async fn numbers_needing_rollover(
        &self,
        tenant_id: &TenantId,
        day: NaiveDate,
    ) -> Result<Vec<SendingNumber>> {
        let rows: Vec<NumberRow> = sqlx::query_as(&format!(
            "SELECT {NUMBER_COLUMNS} FROM sending_numbers \
             WHERE tenant_id = ?1 \
               AND (last_rollover_day IS NULL OR last_rollover_day < ?2)"
        ))
        .bind(tenant_id.as_str())
        .bind(day.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(number_from_row).collect()
    }

    /// Apply one number's computed rollover for `day`.
    ///
    /// Guarded by `last_rollover_day`, so replayed or concurrent rollover
    /// runs for the same day change nothing and return `false`.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_rollover(
        &self,
        tenant_id: &TenantId,
        from_number: &PhoneNumber,
        day: NaiveDate,
        new_state: WarmupState,
        new_limit: i64,
        new_clean_days: i64,
        state_changed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sending_numbers SET warmup_state = ?1, daily_limit = ?2, \
             clean_days = ?3, sent_today = 0, failures_today = 0, last_rollover_day = ?4, \
             state_entered_at = CASE WHEN ?5 THEN ?6 ELSE state_entered_at END \
             WHERE tenant_id = ?7 AND from_number = ?8 \
               AND (last_rollover_day IS NULL OR last_rollover_day < ?4)",
        )
        .bind(new_state.as_str())
        .bind(new_limit)
        .bind(new_clean_days)
        .bind(day.to_string())
        .bind(state_changed)
        .bind(to_millis(now))
        .bind(tenant_id.as_str())
        .bind(from_number.as_str())
        .execute(self.pool())
        .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            debug!(
                tenant = %tenant_id,
                number = %from_number,
                state = new_state.as_str(),
                limit = new_limit,
                %day,
                "Daily rollover applied"
            );
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup(limit: i64) -> (Store, TenantId, PhoneNumber) {
        let store = Store::connect_in_memory().await.unwrap();
        let tenant = TenantId::new("acme");
        let number = PhoneNumber::new("4915112345678");
        store.register_number(&tenant, &number, limit).await.unwrap();
        (store, tenant, number)
    }

    #[tokio::test]
    async fn test_reserve_up_to_limit() {
        let (store, tenant, number) = setup(2).await;

        assert!(store.try_reserve_send(&tenant, &number).await.unwrap());
        assert!(store.try_reserve_send(&tenant, &number).await.unwrap());
        assert!(!store.try_reserve_send(&tenant, &number).await.unwrap());

        let stored = store.get_number(&tenant, &number).await.unwrap().unwrap();
        assert_eq!(stored.sent_today, 2);
        assert!(stored.sent_today <= stored.daily_limit);
    }

    #[tokio::test]
    async fn test_suspended_number_rejects_reservations() {
        let (store, tenant, number) = setup(50).await;
        store.suspend_number(&tenant, &number, Utc::now()).await.unwrap();

        assert!(!store.try_reserve_send(&tenant, &number).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (store, tenant, number) = setup(50).await;
        store.try_reserve_send(&tenant, &number).await.unwrap();

        // Re-registering must not reset counters
        store.register_number(&tenant, &number, 50).await.unwrap();
        let stored = store.get_number(&tenant, &number).await.unwrap().unwrap();
        assert_eq!(stored.sent_today, 1);
    }

    #[tokio::test]
    async fn test_rollover_is_idempotent() {
        let (store, tenant, number) = setup(50).await;
        store.try_reserve_send(&tenant, &number).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();
        let first = store
            .apply_rollover(&tenant, &number, day, WarmupState::WarmingUp, 50, 1, false, Utc::now())
            .await
            .unwrap();
        assert!(first);

        // Second run for the same day is a no-op
        let second = store
            .apply_rollover(&tenant, &number, day, WarmupState::WarmingUp, 50, 2, false, Utc::now())
            .await
            .unwrap();
        assert!(!second);

        let stored = store.get_number(&tenant, &number).await.unwrap().unwrap();
        assert_eq!(stored.sent_today, 0);
        assert_eq!(stored.clean_days, 1);
        assert_eq!(stored.last_rollover_day, Some(day));
    }

    #[tokio::test]
    async fn test_throttle_leaves_suspended_alone() {
        let (store, tenant, number) = setup(50).await;
        store.suspend_number(&tenant, &number, Utc::now()).await.unwrap();
        store.apply_throttle(&tenant, &number, 25, Utc::now()).await.unwrap();

        let stored = store.get_number(&tenant, &number).await.unwrap().unwrap();
        assert_eq!(stored.warmup_state, WarmupState::Suspended);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let (store, tenant, number) = setup(50).await;
        store.suspend_number(&tenant, &number, Utc::now()).await.unwrap();

        assert!(store.reset_number(&tenant, &number, 50, Utc::now()).await.unwrap());
        let stored = store.get_number(&tenant, &number).await.unwrap().unwrap();
        assert_eq!(stored.warmup_state, WarmupState::WarmingUp);
        assert_eq!(stored.sent_today, 0);
        assert_eq!(stored.throttle_strikes, 0);
    }
}
