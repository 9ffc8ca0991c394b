//! Global child-order submission throttle.

use std::collections::VecDeque;
use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use governor::clock::FakeRelativeClock;
use governor::middleware::NoOpMiddleware;
use governor::nanos::Nanos;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use kestrel_core::{AlgoId, OrderRequest};

/// Longest single clock step, far past a full quota refill.
const MAX_STEP: std::time::Duration = std::time::Duration::from_secs(86_400);

/// A submission held back by the throttle.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedSubmission {
    pub algo_id: AlgoId,
    pub request: OrderRequest,
}

/// Caps submissions per second across every algo and queues the excess FIFO.
///
/// The quota runs on engine time: the limiter's clock only moves when a
/// caller hands in a later `now`.
pub struct SubmissionThrottle {
    limiter: RateLimiter<NotKeyed, InMemoryState, FakeRelativeClock, NoOpMiddleware<Nanos>>,
    clock: FakeRelativeClock,
    last: Option<DateTime<Utc>>,
    queue: VecDeque<QueuedSubmission>,
}

impl SubmissionThrottle {
    pub fn new(max_per_sec: u32) -> Self {
        let rate = NonZeroU32::new(max_per_sec).unwrap_or(NonZeroU32::MIN);
        let clock = FakeRelativeClock::default();
        Self {
            limiter: RateLimiter::direct_with_clock(Quota::per_second(rate), &clock),
            clock,
            last: None,
            queue: VecDeque::new(),
        }
    }

    /// Move the limiter clock forward to `now`. Earlier times are ignored.
    fn advance_to(&mut self, now: DateTime<Utc>) {
        match self.last {
            Some(last) if now > last => {
                if let Ok(step) = (now - last).to_std() {
                    self.clock.advance(step.min(MAX_STEP));
                }
                self.last = Some(now);
            }
            Some(_) => {}
            None => self.last = Some(now),
        }
    }

    /// Take a permit for an immediate submission. Never jumps ahead of queued work.
    pub fn admit(&mut self, now: DateTime<Utc>) -> bool {
        self.advance_to(now);
        self.queue.is_empty() && self.limiter.check().is_ok()
    }

    pub fn enqueue(&mut self, submission: QueuedSubmission) {
        self.queue.push_back(submission);
    }

    /// Pop as many queued submissions as the quota allows at `now`.
    pub fn release(&mut self, now: DateTime<Utc>) -> Vec<QueuedSubmission> {
        self.advance_to(now);
        let mut released = Vec::new();
        while !self.queue.is_empty() && self.limiter.check().is_ok() {
            if let Some(next) = self.queue.pop_front() {
                released.push(next);
            }
        }
        released
    }

    /// Withdraw a queued submission before it reaches the gateway.
    pub fn remove(&mut self, client_order_id: &str) -> bool {
        let before = self.queue.len();
        self.queue
            .retain(|queued| queued.request.client_order_id != client_order_id);
        self.queue.len() != before
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use kestrel_core::Side;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn submission(client_order_id: &str) -> QueuedSubmission {
        QueuedSubmission {
            algo_id: Uuid::nil(),
            request: OrderRequest {
                symbol: "BTCUSDT".into(),
                side: Side::Buy,
                price: Decimal::ONE,
                quantity: Decimal::ONE,
                client_order_id: client_order_id.into(),
            },
        }
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap() + Duration::milliseconds(ms)
    }

    #[test]
    fn excess_submissions_wait_in_order() {
        let mut throttle = SubmissionThrottle::new(2);
        assert!(throttle.admit(at_ms(0)));
        assert!(throttle.admit(at_ms(0)));
        assert!(!throttle.admit(at_ms(0)));

        throttle.enqueue(submission("a"));
        throttle.enqueue(submission("b"));
        throttle.enqueue(submission("c"));
        assert!(throttle.release(at_ms(0)).is_empty());
        assert!(throttle.remove("b"));
        assert!(!throttle.remove("b"));

        let released: Vec<_> = throttle
            .release(at_ms(1_000))
            .into_iter()
            .map(|queued| queued.request.client_order_id)
            .collect();
        assert_eq!(released, vec!["a".to_string(), "c".to_string()]);
        assert!(throttle.is_empty());
    }

    #[test]
    fn quota_refills_with_engine_time_only() {
        let mut throttle = SubmissionThrottle::new(1);
        assert!(throttle.admit(at_ms(0)));
        throttle.enqueue(submission("a"));
        throttle.enqueue(submission("b"));

        assert!(throttle.release(at_ms(500)).is_empty());
        // stale timestamps never rewind the limiter
        assert!(throttle.release(at_ms(100)).is_empty());
        assert_eq!(throttle.release(at_ms(1_000)).len(), 1);
        assert!(throttle.release(at_ms(1_000)).is_empty());
        assert_eq!(throttle.release(at_ms(2_000)).len(), 1);
        assert!(throttle.is_empty());
    }

    #[test]
    fn zero_rate_falls_back_to_one_per_second() {
        let mut throttle = SubmissionThrottle::new(0);
        assert!(throttle.admit(at_ms(0)));
        assert!(!throttle.admit(at_ms(0)));
        assert!(throttle.admit(at_ms(1_000)));
    }
}
