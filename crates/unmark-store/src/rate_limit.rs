//! Token bucket rate limiter for remote store calls.
//!
//! [`RateLimiter`] bounds the number of calls per second issued to the store
//! across every worker of every pool. Each token is one call.

use std::sync::Arc;

use tokio::time::{Duration, Instant};
use tracing::debug;

/// Calls per second used when no explicit rate is configured.
pub const DEFAULT_CALLS_PER_SEC: u64 = 256;

/// Bucket capacity for every enabled rate set from the command line.
pub const DEFAULT_BURST: u64 = 512;

/// Token bucket limiting store calls.
///
/// The bucket refills at `calls_per_sec` up to `burst` tokens. A disabled
/// limiter never waits.
pub struct RateLimiter {
    calls_per_sec: u64,
    /// `None` when limiting is disabled.
    tokens: Option<tokio::sync::Mutex<BucketState>>,
}

struct BucketState {
    available: f64,
    last_refill: Instant,
    capacity: f64,
    rate: f64,
}

impl RateLimiter {
    /// Create a limiter allowing `calls_per_sec` with a bucket of `burst`.
    pub fn new(calls_per_sec: u64, burst: u64) -> Arc<Self> {
        let rate = calls_per_sec as f64;
        let capacity = burst.max(1) as f64;
        Arc::new(Self {
            calls_per_sec,
            tokens: Some(tokio::sync::Mutex::new(BucketState {
                available: capacity,
                last_refill: Instant::now(),
                capacity,
                rate,
            })),
        })
    }

    /// A limiter that lets every call through immediately.
    pub fn disabled() -> Arc<Self> {
        Arc::new(Self {
            calls_per_sec: 0,
            tokens: None,
        })
    }

    /// Build a limiter from the user-facing setting.
    ///
    /// Negative disables limiting, zero selects the default rate, positive
    /// sets calls per second. The burst is [`DEFAULT_BURST`] either way.
    pub fn from_setting(calls_per_sec: i64) -> Arc<Self> {
        match calls_per_sec {
            n if n < 0 => Self::disabled(),
            0 => Self::new(DEFAULT_CALLS_PER_SEC, DEFAULT_BURST),
            n => Self::new(n as u64, DEFAULT_BURST),
        }
    }

    /// Whether calls are limited at all.
    pub fn is_enabled(&self) -> bool {
        self.tokens.is_some()
    }

    /// Wait until one call may be issued, then consume its token.
    pub async fn acquire(&self) {
        let Some(tokens) = &self.tokens else {
            return;
        };

        loop {
            let wait_time = {
                let mut state = tokens.lock().await;
                refill(&mut state);

                if state.available >= 1.0 {
                    state.available -= 1.0;
                    return;
                }

                let deficit = 1.0 - state.available;
                if state.rate > 0.0 {
                    Duration::from_secs_f64(deficit / state.rate)
                } else {
                    Duration::from_millis(100)
                }
            };

            debug!(
                wait_ms = wait_time.as_millis(),
                "rate limiter: waiting for token"
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    /// Try to consume a token without waiting. Returns `true` if acquired.
    #[cfg(test)]
    pub(crate) async fn try_acquire(&self) -> bool {
        let Some(tokens) = &self.tokens else {
            return true;
        };
        let mut state = tokens.lock().await;
        refill(&mut state);

        if state.available >= 1.0 {
            state.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current configured rate; zero when disabled.
    pub fn rate(&self) -> u64 {
        self.calls_per_sec
    }
}

fn refill(state: &mut BucketState) {
    let now = Instant::now();
    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
    if elapsed > 0.0 {
        state.available = (state.available + elapsed * state.rate).min(state.capacity);
        state.last_refill = now;
    }
}
