//! Token-bucket rate limiter.
//!
//! Capacity equals the configured requests-per-minute; tokens refill
//! continuously at capacity/60 per second. Under sustained load the
//! bucket stays drained, so admission converges on the refill rate and
//! no sliding 60-second window admits more than the configured limit.
//!
//! Time is read through `tokio::time::Instant` so tests can drive the
//! clock with `tokio::time::pause`.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A bucket admitting `requests_per_minute` requests at capacity,
    /// starting full.
    #[must_use]
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = f64::from(requests_per_minute.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(state: &mut BucketState, capacity: f64, refill_per_sec: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * refill_per_sec).min(capacity);
        state.last_refill = now;
    }

    /// Takes one token, or reports how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.refill_per_sec);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    /// Waits for a token, up to `max_wait`. Returns the wait that would
    /// still be needed when the bound is exceeded.
    pub async fn acquire(&self, max_wait: Duration) -> Result<(), Duration> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    if Instant::now() + wait > deadline {
                        return Err(wait);
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Current token level, for health reporting.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        Self::refill(&mut state, self.capacity, self.refill_per_sec);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_then_empty() {
        let bucket = TokenBucket::new(10);
        for _ in 0..10 {
            assert!(bucket.try_acquire().is_ok());
        }
        assert!(bucket.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn refills_continuously() {
        let bucket = TokenBucket::new(60);
        while bucket.try_acquire().is_ok() {}

        // 60 rpm refills one token per second.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.try_acquire().is_err());
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bucket.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_load_stays_within_rpm_per_window() {
        let bucket = TokenBucket::new(60);
        while bucket.try_acquire().is_ok() {}

        // Sustained load: attempt every 100ms over a full 60s window and
        // count admissions.
        let mut admitted = 0;
        for _ in 0..600 {
            tokio::time::advance(Duration::from_millis(100)).await;
            if bucket.try_acquire().is_ok() {
                admitted += 1;
            }
        }
        assert!(admitted <= 60, "admitted {admitted} in a 60s window");
        // The refill rate should also be fully utilized.
        assert!(admitted >= 59, "admitted only {admitted} in a 60s window");
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_blocks_until_token_available() {
        let bucket = TokenBucket::new(60);
        while bucket.try_acquire().is_ok() {}

        let before = Instant::now();
        bucket.acquire(Duration::from_secs(5)).await.unwrap();
        let waited = Instant::now().duration_since(before);
        assert!(waited >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_fails_past_the_wait_bound() {
        let bucket = TokenBucket::new(60);
        while bucket.try_acquire().is_ok() {}

        let result = bucket.acquire(Duration::from_millis(100)).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn available_reports_refilled_level() {
        let bucket = TokenBucket::new(60);
        while bucket.try_acquire().is_ok() {}
        assert!(bucket.available() < 1.0);

        tokio::time::advance(Duration::from_secs(30)).await;
        let level = bucket.available();
        assert!((29.0..=31.0).contains(&level));
    }
}
