//! Retry backoff schedule.

use leadflow_core::config::QueueConfig;
use rand::Rng;
use std::time::Duration;

/// Delay before the next attempt after `attempt` failed tries.
///
/// Exponential in the attempt number and capped, with full jitter over the
/// upper half of the window so racing retries spread out without ever
/// exceeding the cap.
pub fn retry_delay(config: &QueueConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = config.base_backoff_secs as f64 * config.backoff_factor.powi(exponent as i32);
    let capped_ms = (raw.min(config.max_backoff_secs as f64) * 1000.0) as u64;

    let half = capped_ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=half)
    };

    Duration::from_millis(half + jitter)
}
