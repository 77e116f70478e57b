// Property-based tests for the retry strategy

use common::retry::{ExponentialBackoff, RetryStrategy};
use proptest::prelude::*;

/// No delay is offered once the attempt budget is spent
#[test]
fn property_attempt_limit() {
    proptest!(|(max_attempts in 1u32..10, attempt in 0u32..20)| {
        let strategy = ExponentialBackoff::with_config(max_attempts, 10, 1000, 0.0);
        let delay = strategy.next_delay(attempt);
        if strategy.should_retry(attempt) {
            prop_assert!(delay.is_some());
        } else {
            prop_assert!(delay.is_none());
        }
    });
}

/// Delays stay between the capped base and base plus jitter
#[test]
fn property_delay_bounds() {
    proptest!(|(
        attempt in 0u32..8,
        base_delay_ms in 1u64..500,
        max_delay_ms in 500u64..10_000,
        jitter_factor in 0.0f64..1.0
    )| {
        let strategy = ExponentialBackoff::with_config(10, base_delay_ms, max_delay_ms, jitter_factor);
        let delay = strategy.next_delay(attempt).unwrap().as_millis() as u64;

        let capped = (base_delay_ms * 2u64.pow(attempt)).min(max_delay_ms);
        let ceiling = capped + (capped as f64 * jitter_factor) as u64;
        prop_assert!(delay >= capped, "delay {} below base {}", delay, capped);
        prop_assert!(delay <= ceiling, "delay {} above ceiling {}", delay, ceiling);
    });
}
