//! Sending-number warm-up state.

use super::identifiers::{PhoneNumber, TenantId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Warm-up reputation state of an outbound phone number.
///
/// Providers watch new numbers closely; the governor keeps volume inside a
/// ladder that grows only while the number stays clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupState {
    /// Fresh number under a low fixed daily cap.
    WarmingUp,
    /// Cap grows each clean day up to the active ceiling.
    Ramping,
    /// Ceiling cap, normal operation.
    Active,
    /// Cap cut after a failure spike or provider warning.
    Throttled,
    /// Sends rejected until a manual reset.
    Suspended,
}

impl WarmupState {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            WarmupState::WarmingUp => "warming_up",
            WarmupState::Ramping => "ramping",
            WarmupState::Active => "active",
            WarmupState::Throttled => "throttled",
            WarmupState::Suspended => "suspended",
        }
    }

    /// Parse from the storage string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warming_up" => Some(WarmupState::WarmingUp),
            "ramping" => Some(WarmupState::Ramping),
            "active" => Some(WarmupState::Active),
            "throttled" => Some(WarmupState::Throttled),
            "suspended" => Some(WarmupState::Suspended),
            _ => None,
        }
    }
}

/// Per-number sending quota and reputation record.
///
/// Owned exclusively by the rate governor; `sent_today` is only ever
/// incremented through its atomic reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingNumber {
    pub from_number: PhoneNumber,
    pub tenant_id: TenantId,
    pub warmup_state: WarmupState,

    /// Today's message ceiling.
    pub daily_limit: i64,

    /// Messages reserved today; never exceeds `daily_limit`.
    pub sent_today: i64,

    /// Provider-reported failures today, feeding the throttle decision.
    pub failures_today: i64,

    /// Consecutive clean days, driving warm-up advancement.
    pub clean_days: i64,

    /// Throttle strikes; too many suspends the number.
    pub throttle_strikes: i64,

    pub state_entered_at: DateTime<Utc>,

    /// Calendar day of the last rollover, making rollover idempotent.
    pub last_rollover_day: Option<NaiveDate>,
}

impl SendingNumber {
    /// Remaining allowance for today.
    pub fn remaining_today(&self) -> i64 {
        (self.daily_limit - self.sent_today).max(0)
    }

    /// Failure rate over today's sends, if there is a sample at all.
    pub fn failure_rate_today(&self) -> Option<f64> {
        if self.sent_today == 0 {
            None
        } else {
            Some(self.failures_today as f64 / self.sent_today as f64)
        }
    }
}
