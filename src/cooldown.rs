use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Idle buckets are swept once every this many checks.
const SWEEP_EVERY: u64 = 256;

/// Per-user token bucket for commands with a cooldown.
pub struct Cooldown {
    buckets: Mutex<HashMap<u64, Bucket>>,
    capacity: u32,
    refill_rate: f64, // tokens per second
    checks: AtomicU64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Cooldown {
    /// `rate` uses every `per`, refilled continuously.
    pub fn new(rate: u32, per: Duration) -> Self {
        let capacity = rate.max(1);
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity,
            refill_rate: f64::from(capacity) / per.as_secs_f64().max(f64::EPSILON),
            checks: AtomicU64::new(0),
        }
    }

    /// Takes a token for `user_id`. On refusal returns how long until one is available.
    pub fn check(&self, user_id: u64) -> Result<(), Duration> {
        self.check_at(user_id, Instant::now())
    }

    fn check_at(&self, user_id: u64, now: Instant) -> Result<(), Duration> {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // A bucket idle for a full refill is indistinguishable from a new one.
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let full_after = self.full_refill();
            buckets.retain(|_, b| now.saturating_duration_since(b.last_refill) < full_after);
        }
        let bucket = buckets.entry(user_id).or_insert(Bucket {
            tokens: f64::from(self.capacity),
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    fn full_refill(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.capacity) / self.refill_rate)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        match self.buckets.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_join_within_window_is_refused() {
        let cooldown = Cooldown::new(1, Duration::from_secs(5));
        let now = Instant::now();
        assert!(cooldown.check_at(1, now).is_ok());

        let retry = cooldown.check_at(1, now + Duration::from_secs(2)).unwrap_err();
        assert!((retry.as_secs_f64() - 3.0).abs() < 1e-6);
        assert!(cooldown.check_at(1, now + Duration::from_secs(6)).is_ok());
    }

    #[test]
    fn users_are_independent() {
        let cooldown = Cooldown::new(1, Duration::from_secs(5));
        let now = Instant::now();
        assert!(cooldown.check_at(1, now).is_ok());
        assert!(cooldown.check_at(2, now).is_ok());
        assert!(cooldown.check_at(1, now).is_err());
    }

    #[test]
    fn burst_is_capped_at_rate() {
        let cooldown = Cooldown::new(3, Duration::from_secs(30));
        let now = Instant::now();
        let allowed = (0..10).filter(|_| cooldown.check_at(7, now).is_ok()).count();
        assert_eq!(allowed, 3);

        // An hour of idling still only refills to capacity.
        let later = now + Duration::from_secs(3600);
        let allowed = (0..10).filter(|_| cooldown.check_at(7, later).is_ok()).count();
        assert_eq!(allowed, 3);
    }

    #[test]
    fn idle_buckets_are_swept() {
        let cooldown = Cooldown::new(1, Duration::from_secs(5));
        let start = Instant::now();
        for user in 0..100 {
            cooldown.check_at(user, start).unwrap();
        }
        assert_eq!(cooldown.tracked(), 100);

        // Long after every bucket refilled, one active user keeps checking.
        let later = start + Duration::from_secs(60);
        for _ in 0..SWEEP_EVERY {
            let _ = cooldown.check_at(1_000, later);
        }
        assert_eq!(cooldown.tracked(), 1);
    }

    #[test]
    fn sweep_keeps_buckets_still_cooling_down() {
        let cooldown = Cooldown::new(1, Duration::from_secs(5));
        let start = Instant::now();
        cooldown.check_at(1, start).unwrap();

        let soon = start + Duration::from_secs(1);
        for _ in 0..SWEEP_EVERY {
            let _ = cooldown.check_at(2, soon);
        }
        assert_eq!(cooldown.tracked(), 2);
        assert!(cooldown.check_at(1, soon).is_err());
    }
}
