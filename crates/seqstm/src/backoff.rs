//! Inter-attempt delay computation.
//!
//! [`delay`] is a pure function of `(strategy, attempt, base, max)`. The
//! exponential curve is computed in 128-bit arithmetic with the shift
//! exponent capped, so no attempt number can overflow. Jitter draws from
//! the thread-local RNG to avoid contention on a shared generator.

use std::time::Duration;

use rand::Rng;
use seqstm_types::BackoffStrategy;

/// Largest shift applied by the exponential curves.
const MAX_EXPONENT: u32 = 30;

/// Compute the delay before retry number `attempt`.
///
/// `base` and `max` are clamped to at least 1ms; `attempt` is 0-based.
/// Constant returns the clamped base; Linear and Exponential are capped at
/// `max`; ExponentialWithJitter returns a uniform duration in
/// `[0, exponential]`.
#[must_use]
pub fn delay(
    strategy: BackoffStrategy,
    attempt: u32,
    base: Duration,
    max: Duration,
) -> Duration {
    let base_ms = clamp_ms(base);
    let max_ms = clamp_ms(max);

    let millis = match strategy {
        BackoffStrategy::Constant => base_ms,
        BackoffStrategy::Linear => {
            let scaled = u128::from(base_ms).saturating_mul(u128::from(attempt) + 1);
            narrow(scaled.min(u128::from(max_ms)))
        }
        BackoffStrategy::Exponential => exponential_ms(attempt, base_ms, max_ms),
        BackoffStrategy::ExponentialWithJitter => {
            let cap = exponential_ms(attempt, base_ms, max_ms);
            rand::thread_rng().gen_range(0..=cap)
        }
    };

    Duration::from_millis(millis)
}

/// `min(base << min(attempt, 30), max)` computed wide to avoid overflow.
fn exponential_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let shifted = u128::from(base_ms) << attempt.min(MAX_EXPONENT);
    narrow(shifted.min(u128::from(max_ms)))
}

fn clamp_ms(duration: Duration) -> u64 {
    narrow(duration.as_millis()).max(1)
}

fn narrow(ms: u128) -> u64 {
    u64::try_from(ms).unwrap_or(u64::MAX)
}
