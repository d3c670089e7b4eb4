//! Randomized delays that make the accounts look less like a cron job.
use rand::Rng;
use std::time::Duration;

/// Uniformly distributed duration between `min` and `max` seconds (inclusive).
pub fn uniform_secs(min: f64, max: f64) -> Duration {
    if min >= max {
        return Duration::from_secs_f64(min.max(0.0));
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(min..=max))
}

/// Sleeps for a random amount of seconds in the given range.
pub async fn sleep_uniform(min: f64, max: f64) {
    tokio::time::sleep(uniform_secs(min, max)).await;
}

/// Returns `true` with the given probability in the range `[0; 1]`.
pub fn chance(probability: f64) -> bool {
    rand::thread_rng().gen_bool(probability.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_secs_stays_in_bounds() {
        for _ in 0..1000 {
            let duration = uniform_secs(60.0, 120.0);
            assert!(duration >= Duration::from_secs(60), "{duration:?}");
            assert!(duration <= Duration::from_secs(120), "{duration:?}");
        }
    }

    #[test]
    fn degenerate_range() {
        assert_eq!(uniform_secs(15.0, 15.0), Duration::from_secs(15));
    }
}
