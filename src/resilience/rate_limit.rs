//! Token bucket rate limiter shared by concurrent capability calls.

use crate::error::{Result, VoxflowError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        // tokio's Instant is monotonic, so this never goes backwards.
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }
}

/// A capped pool of permits refilled continuously over time.
///
/// All callers of one limiter serialize on a single lock, so a waiting
/// acquirer holds its place in line while tokens accrue.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// A full bucket of `capacity` tokens refilled at `refill_rate` per second.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self> {
        if capacity.is_nan() || capacity <= 0.0 {
            return Err(invalid("rate_limit.bucket_capacity", "must be positive"));
        }
        if refill_rate.is_nan() || refill_rate <= 0.0 {
            return Err(invalid("rate_limit.tokens_per_second", "must be positive"));
        }
        Ok(Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Waits until `tokens` are available, then takes them.
    ///
    /// Requests larger than the capacity can never be satisfied and are rejected.
    pub async fn acquire(&self, tokens: f64) -> Result<()> {
        self.check_request(tokens)?;
        let mut state = self.state.lock().await;
        loop {
            state.refill(self.capacity, self.refill_rate);
            if state.tokens >= tokens {
                state.tokens -= tokens;
                return Ok(());
            }
            let wait = Duration::from_secs_f64((tokens - state.tokens) / self.refill_rate);
            debug!(
                requested = tokens,
                available = state.tokens,
                wait_ms = wait.as_millis() as u64,
                "rate limiter waiting for tokens"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Takes `tokens` if they are available right now.
    pub async fn try_acquire(&self, tokens: f64) -> Result<bool> {
        self.check_request(tokens)?;
        let mut state = self.state.lock().await;
        state.refill(self.capacity, self.refill_rate);
        if state.tokens >= tokens {
            state.tokens -= tokens;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Tokens currently in the bucket after refilling.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill(self.capacity, self.refill_rate);
        state.tokens
    }

    fn check_request(&self, tokens: f64) -> Result<()> {
        if tokens.is_nan() || tokens <= 0.0 {
            return Err(invalid("tokens", "must request a positive number of tokens"));
        }
        if tokens > self.capacity {
            return Err(invalid(
                "tokens",
                &format!(
                    "request of {} exceeds bucket capacity {}",
                    tokens, self.capacity
                ),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> VoxflowError {
    VoxflowError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
