//! Capped exponential backoff shared by the HTTP adapters and the job poll loop.

use std::time::Duration;

const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Delay for the given retry exponent: `base * 2^exponent`, capped at `cap_ms`.
pub fn backoff_delay_ms(base_ms: u64, exponent: u32, cap_ms: u64) -> u64 {
    let shift = exponent.min(MAX_BACKOFF_EXPONENT);
    let factor = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(cap_ms)
}

/// Same as [`backoff_delay_ms`] but as a `Duration`.
pub fn backoff_delay(base_ms: u64, exponent: u32, cap_ms: u64) -> Duration {
    Duration::from_millis(backoff_delay_ms(base_ms, exponent, cap_ms))
}
