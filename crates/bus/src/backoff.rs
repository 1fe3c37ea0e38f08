//! Retry backoff
//!
//! `base_delay * 2^retry_count`, clamped to `max_backoff`, with up to 10%
//! additive jitter so synchronized failures do not retry in lockstep.

use chrono::Duration;
use rand::Rng;

/// Delay before the next attempt after `retry_count` prior failures.
pub fn backoff_delay(base_delay_ms: u64, max_backoff_ms: u64, retry_count: u32) -> Duration {
    let exp = retry_count.min(20);
    let raw = base_delay_ms.saturating_mul(1u64 << exp);
    let clamped = raw.min(max_backoff_ms);
    let jitter = rand::thread_rng().gen_range(0..=clamped / 10);
    Duration::milliseconds((clamped + jitter).min(max_backoff_ms.saturating_mul(2)) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_per_attempt() {
        for _ in 0..32 {
            let d0 = backoff_delay(1_000, 60_000, 0).num_milliseconds();
            let d1 = backoff_delay(1_000, 60_000, 1).num_milliseconds();
            let d2 = backoff_delay(1_000, 60_000, 2).num_milliseconds();
            assert!((1_000..=1_100).contains(&d0));
            assert!((2_000..=2_200).contains(&d1));
            assert!((4_000..=4_400).contains(&d2));
        }
    }

    #[test]
    fn test_clamped_to_max() {
        let d = backoff_delay(1_000, 8_000, 10).num_milliseconds();
        assert!(d >= 8_000);
        assert!(d <= 8_800);
    }

    #[test]
    fn test_huge_retry_count_does_not_overflow() {
        let d = backoff_delay(1_000, 60_000, u32::MAX).num_milliseconds();
        assert!(d >= 60_000);
    }
}
