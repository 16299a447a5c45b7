use rand::{Rng, RngCore};
use std::time::Duration;

/// Ceiling for a single retry delay during a bulk draw.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

pub(crate) fn jittered_backoff(rng: &mut impl RngCore, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }

    // "Equal jitter": delay is in [backoff/2, backoff].
    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}

/// Next base delay: doubled, capped at [`MAX_RETRY_DELAY`].
pub(crate) fn next_backoff(backoff: Duration) -> Duration {
    backoff.saturating_mul(2).min(MAX_RETRY_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn jitter_stays_in_upper_half() {
        let base = Duration::from_millis(100);
        for _ in 0..200 {
            let delay = jittered_backoff(&mut OsRng, base);
            assert!(delay >= Duration::from_millis(50), "{delay:?}");
            assert!(delay <= base, "{delay:?}");
        }
    }

    #[test]
    fn tiny_backoff_is_returned_unchanged() {
        assert_eq!(jittered_backoff(&mut OsRng, Duration::ZERO), Duration::ZERO);
        assert_eq!(
            jittered_backoff(&mut OsRng, Duration::from_millis(1)),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn growth_is_capped() {
        assert_eq!(
            next_backoff(Duration::from_millis(25)),
            Duration::from_millis(50)
        );
        assert_eq!(next_backoff(Duration::from_secs(5)), MAX_RETRY_DELAY);
    }
}
