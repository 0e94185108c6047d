//! Token-bucket rate limiter shared by all outbound observability calls
//! (spec §4.1 "Rate-limit discipline").
//!
//! Grounded on `route_quality`-adjacent `RateLimiter` shape: a fixed
//! window counter generalized here to a refilling token bucket so bursts
//! within a minute smooth out rather than reset sharply at the boundary.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

pub struct TokenBucket {
    capacity: f64,
    tokens: Mutex<f64>,
    refill_per_sec: f64,
    last_refill: Mutex<Instant>,
}

impl TokenBucket {
    /// `requests_per_minute` tokens refill continuously over 60s.
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self {
            capacity,
            tokens: Mutex::new(capacity),
            refill_per_sec: capacity / 60.0,
            last_refill: Mutex::new(Instant::now()),
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.lock();
        let elapsed = last.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let mut tokens = self.tokens.lock();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
        *last = Instant::now();
    }

    /// Blocks (cooperatively) until a token is available, then consumes one.
    pub async fn acquire(&self) {
        loop {
            self.refill();
            {
                let mut tokens = self.tokens.lock();
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    return;
                }
            }
            let wait = Duration::from_secs_f64((1.0 / self.refill_per_sec).max(0.01));
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_does_not_exceed_capacity_instantly() {
        let bucket = TokenBucket::new(60);
        for _ in 0..60 {
            bucket.acquire().await;
        }
        // The 61st acquire must wait (refill rate 1/sec) rather than proceed instantly.
        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
