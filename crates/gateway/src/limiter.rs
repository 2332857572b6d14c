use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Rolling-window call limiter: at most `calls` within any `window`. Callers
/// block (asynchronously) until a slot opens. One limiter per adapter; never
/// shared across venues.
pub struct RateLimiter {
    calls: usize,
    window: Duration,
    history: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(calls: usize, window: Duration) -> Self {
        assert!(calls > 0);
        RateLimiter {
            calls,
            window,
            history: Mutex::new(VecDeque::with_capacity(calls + 1)),
        }
    }

    /// Take a slot, sleeping until the window has room.
    pub async fn acquire(&self) {
        loop {
            match self.try_take(Instant::now()) {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Non-blocking variant; true when the call may proceed now.
    pub fn try_acquire(&self) -> bool {
        self.try_take(Instant::now()).is_none()
    }

    /// Returns how long to wait, or None if a slot was taken.
    fn try_take(&self, now: Instant) -> Option<Duration> {
        let mut history = self.history.lock();
        while let Some(front) = history.front()
            && now.duration_since(*front) > self.window
        {
            history.pop_front();
        }
        if history.len() < self.calls {
            history.push_back(now);
            None
        } else {
            let oldest = *history.front().expect("history non-empty");
            Some((oldest + self.window).saturating_duration_since(now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_window_expiry_frees_slots() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        let start = Instant::now();
        assert!(limiter.try_take(start).is_none());
        assert!(limiter.try_take(start).is_some());
        // Past the window, the old call no longer counts.
        assert!(limiter.try_take(start + Duration::from_millis(11)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        limiter.acquire().await;
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
