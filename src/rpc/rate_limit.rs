// src/rpc/rate_limit.rs

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Seau à jetons asynchrone : au plus `per_second` acquisitions par seconde,
/// le surplus attend. Le Mutex tokio sert de file FIFO : les appels en excès
/// sont servis dans l'ordre d'arrivée.
pub struct RateLimiter {
    state: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(per_second: u32) -> Self {
        let capacity = per_second.max(1) as f64;
        Self {
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity,
        }
    }

    /// Bloque jusqu'à obtention d'un jeton. Le verrou est conservé pendant
    /// l'attente : c'est ce qui garantit l'ordre FIFO.
    pub async fn acquire(&self) {
        let mut bucket = self.state.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return;
        }

        let deficit = 1.0 - bucket.tokens;
        let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
        bucket.tokens = 0.0;
        bucket.last_refill = now + wait;
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_within_capacity_is_immediate() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn excess_calls_are_throttled() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();
        for _ in 0..20 {
            limiter.acquire().await;
        }
        // 10 immédiats, puis 10 à 100 ms d'intervalle.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "elapsed = {:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(1_200), "elapsed = {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            limiter.acquire().await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
