//! Explicit-wait primitive standing in for "UI is ready" signals.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Wait at least `floor`, then poll a readiness condition every `every` until
/// it holds or `ceiling` has elapsed since the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settle {
    pub floor: Duration,
    pub ceiling: Duration,
    pub every: Duration,
}

impl Settle {
    pub fn new(floor: Duration, ceiling: Duration, every: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            every,
        }
    }

    /// Returns whether the condition held before the ceiling.
    /// The condition is always checked at least once.
    pub async fn until<F, Fut>(&self, mut ready: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = Instant::now();
        if !self.floor.is_zero() {
            sleep(self.floor).await;
        }

        loop {
            if ready().await {
                return true;
            }
            let elapsed = start.elapsed();
            if elapsed >= self.ceiling {
                return false;
            }
            sleep(self.every.min(self.ceiling - elapsed)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test]
    async fn ready_immediately_still_waits_the_floor() {
        let settle = Settle::new(ms(30), ms(200), ms(5));
        let start = std::time::Instant::now();
        assert!(settle.until(|| async { true }).await);
        assert!(start.elapsed() >= ms(30));
    }

    #[tokio::test]
    async fn polls_until_condition_holds() {
        let checks = AtomicUsize::new(0);
        let settle = Settle::new(Duration::ZERO, ms(2_000), ms(1));
        let checks_ref = &checks;
        let ok = settle
            .until(move || async move { checks_ref.fetch_add(1, Ordering::SeqCst) >= 3 })
            .await;
        assert!(ok);
        assert_eq!(checks.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn gives_up_at_the_ceiling() {
        let settle = Settle::new(Duration::ZERO, ms(40), ms(5));
        let start = std::time::Instant::now();
        assert!(!settle.until(|| async { false }).await);
        assert!(start.elapsed() >= ms(40));
        assert!(start.elapsed() < ms(2_000));
    }

    #[tokio::test]
    async fn zero_budget_checks_once() {
        let checks = AtomicUsize::new(0);
        let checks_ref = &checks;
        let settle = Settle::new(Duration::ZERO, Duration::ZERO, ms(1));
        let ok = settle
            .until(move || async move {
                checks_ref.fetch_add(1, Ordering::SeqCst);
                false
            })
            .await;
        assert!(!ok);
        assert_eq!(checks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ceiling_never_below_floor() {
        let settle = Settle::new(ms(50), ms(10), ms(1));
        assert_eq!(settle.ceiling, ms(50));
    }
}
