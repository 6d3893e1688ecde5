//! Request pacing for the Telegram API.
//!
//! Flood bans are cheap to earn and expensive to serve, so every background
//! fetch goes through this gate. `acquire` suspends the calling task until
//! the next slot; `try_acquire` never waits.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Copy, Debug)]
pub struct RateLimiterConfig {
    /// Soft cap on request starts per second.
    pub max_requests_per_second: u32,
    /// Minimum spacing between consecutive requests.
    pub min_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 2,
            min_interval: Duration::from_millis(500),
        }
    }
}

struct RateLimiterState {
    config: RateLimiterConfig,
    last_request: Instant,
    window_start: Instant,
    window_count: u32,
}

pub struct RateLimiter {
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(RateLimiterState {
                config,
                last_request: now - config.min_interval,
                window_start: now,
                window_count: 0,
            }),
        }
    }

    /// Wait until a request slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                match Self::slot_delay(&mut state) {
                    None => {
                        Self::claim(&mut state);
                        return;
                    }
                    Some(delay) => delay,
                }
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter pacing request");
            tokio::time::sleep(wait).await;
        }
    }

    /// Claim a slot if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        if Self::slot_delay(&mut state).is_some() {
            return false;
        }
        Self::claim(&mut state);
        true
    }

    pub async fn config(&self) -> RateLimiterConfig {
        self.state.lock().await.config
    }

    pub async fn set_config(&self, config: RateLimiterConfig) {
        self.state.lock().await.config = config;
    }

    /// Time until the next slot, or None when a request may start now.
    fn slot_delay(state: &mut RateLimiterState) -> Option<Duration> {
        let now = Instant::now();

        let since_last = now.duration_since(state.last_request);
        if since_last < state.config.min_interval {
            return Some(state.config.min_interval - since_last);
        }

        // Per-second soft cap: reset the window lazily once it has elapsed.
        let window = Duration::from_secs(1);
        if now.duration_since(state.window_start) >= window {
            state.window_start = now;
            state.window_count = 0;
        }
        if state.config.max_requests_per_second > 0
            && state.window_count >= state.config.max_requests_per_second
        {
            return Some(window - now.duration_since(state.window_start));
        }

        None
    }

    fn claim(state: &mut RateLimiterState) {
        state.last_request = Instant::now();
        state.window_count += 1;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::default();
        assert!(limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn try_acquire_respects_min_interval() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests_per_second: 100,
            min_interval: Duration::from_secs(60),
        });
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn acquire_waits_for_the_interval() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests_per_second: 100,
            min_interval: Duration::from_millis(40),
        });
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn config_update_takes_effect() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_requests_per_second: 100,
            min_interval: Duration::from_secs(60),
        });
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        limiter
            .set_config(RateLimiterConfig {
                max_requests_per_second: 100,
                min_interval: Duration::ZERO,
            })
            .await;
        assert!(limiter.try_acquire().await);
    }
}
