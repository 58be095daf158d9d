//! Retry delay calculation.

use std::time::Duration;

use leasehold_core::config::RetryPolicy;
use rand::Rng;

/// Delay before retry number `attempt + 1`, given a jitter sample in `[0, 1)`.
///
/// `min(backoff_cap, base_backoff * 2^attempt)` spread by `±jitter_ratio`.
/// A sample of `0.5` yields the un-jittered value; `jitter_ratio = 1.0`
/// spreads delays over `[0, 2 * capped)`.
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy, jitter_sample: f64) -> Duration {
    let growth = 2u32.saturating_pow(attempt);
    let capped = policy
        .base_backoff
        .saturating_mul(growth)
        .min(policy.backoff_cap);

    let sample = if jitter_sample.is_finite() {
        jitter_sample.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let factor = (1.0 + policy.jitter_ratio * (2.0 * sample - 1.0)).max(0.0);
    if factor == 1.0 {
        return capped;
    }

    Duration::try_from_secs_f64(capped.as_secs_f64() * factor).unwrap_or(capped)
}

/// [`backoff_delay`] with a fresh random sample.
pub fn next_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    let sample: f64 = rand::thread_rng().r#gen();
    backoff_delay(attempt, policy, sample)
}
