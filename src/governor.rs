//! Sliding-window admission control for outbound model requests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::RATE_LIMIT_WAITS;

/// Process-wide request log shared by every model call.
///
/// `admit` never rejects. When more than `max_requests` admissions fall
/// inside the trailing `window`, the caller is told how long to back off, and
/// the request is recorded at the instant it will actually go out. Callers
/// that honour the returned wait therefore never exceed `max_requests`
/// within any window of length `window`.
pub struct RateGovernor {
    log: Mutex<VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateGovernor {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            log: Mutex::new(VecDeque::new()),
            max_requests: max_requests.max(1),
            window,
        }
    }

    /// Records a request attempt and returns how long the caller must wait.
    pub fn admit(&self) -> Duration {
        self.admit_at(Instant::now())
    }

    /// Same as [`admit`](Self::admit) with an explicit clock reading.
    pub fn admit_at(&self, now: Instant) -> Duration {
        let mut log = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        while log
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) >= self.window)
        {
            log.pop_front();
        }

        // The log is sorted, so the entry `max_requests` places from the end
        // is the one that has to age out before this request may go.
        let mut admitted_at = now;
        if log.len() >= self.max_requests {
            let blocking = log[log.len() - self.max_requests];
            admitted_at = admitted_at.max(blocking + self.window);
        }
        if let Some(last) = log.back() {
            admitted_at = admitted_at.max(*last);
        }
        log.push_back(admitted_at);

        admitted_at.saturating_duration_since(now)
    }

    /// Admits a request and sleeps for the required back-off, if any.
    pub async fn throttle(&self) {
        let wait = self.admit();
        if wait.is_zero() {
            debug!("request admitted without delay");
            return;
        }
        RATE_LIMIT_WAITS.inc();
        warn!(wait_ms = wait.as_millis() as u64, "request rate over threshold, backing off");
        tokio::time::sleep(wait).await;
    }

    /// Number of admissions still inside the window at `now`.
    pub fn in_flight_at(&self, now: Instant) -> usize {
        let log = match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        log.iter()
            .filter(|ts| **ts <= now && now.saturating_duration_since(**ts) < self.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_threshold_without_waiting() {
        let governor = RateGovernor::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert_eq!(governor.admit_at(now), Duration::ZERO);
        }
    }

    #[test]
    fn first_overflow_waits_for_oldest_to_expire() {
        let governor = RateGovernor::new(2, Duration::from_secs(60));
        let start = Instant::now();
        governor.admit_at(start);
        governor.admit_at(start + Duration::from_secs(10));

        let wait = governor.admit_at(start + Duration::from_secs(20));
        // W - (now - oldest) = 60 - 20
        assert_eq!(wait, Duration::from_secs(40));
    }

    #[test]
    fn expired_entries_are_pruned() {
        let governor = RateGovernor::new(1, Duration::from_secs(5));
        let start = Instant::now();
        governor.admit_at(start);
        assert_eq!(governor.admit_at(start + Duration::from_secs(5)), Duration::ZERO);
        assert_eq!(governor.in_flight_at(start + Duration::from_secs(5)), 1);
    }

    #[test]
    fn burst_waits_stack_up() {
        let governor = RateGovernor::new(2, Duration::from_secs(10));
        let now = Instant::now();
        let waits: Vec<u64> = (0..6).map(|_| governor.admit_at(now).as_secs()).collect();
        assert_eq!(waits, vec![0, 0, 10, 10, 20, 20]);
    }

    #[test]
    fn honoured_waits_never_exceed_threshold_in_any_window() {
        let max = 3;
        let window = Duration::from_secs(10);
        let governor = RateGovernor::new(max, window);
        let start = Instant::now();

        // Irregular arrivals, some bunched, some spread out.
        let offsets_ms = [0, 0, 100, 200, 250, 4_000, 4_000, 9_999, 10_500, 11_000, 25_000, 25_001];
        let mut admitted = Vec::new();
        for offset in offsets_ms {
            let arrival = start + Duration::from_millis(offset);
            admitted.push(arrival + governor.admit_at(arrival));
        }

        for anchor in &admitted {
            let in_window = admitted
                .iter()
                .filter(|t| **t >= *anchor && t.saturating_duration_since(*anchor) < window)
                .count();
            assert!(in_window <= max, "{in_window} admissions inside one window");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_sleeps_for_backoff() {
        let governor = RateGovernor::new(1, Duration::from_secs(30));
        let start = Instant::now();
        governor.throttle().await;
        governor.throttle().await;
        assert!(Instant::now() - start >= Duration::from_secs(30));
    }
}
