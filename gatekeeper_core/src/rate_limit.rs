//! Token bucket limiter. Every upstream owns one so a slow or noisy source
//! cannot use up another source's budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone)]
pub struct TokenBucket {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    state: Arc<Mutex<BucketState>>,
}

impl TokenBucket {
    /// Allows `max_rate` acquisitions per `period`, bursting up to `max_rate`.
    pub fn new(name: &str, max_rate: u32, period: Duration) -> Self {
        let capacity = max_rate.max(1) as f64;
        let period_secs = period.as_secs_f64().max(f64::EPSILON);

        Self {
            name: name.to_string(),
            capacity,
            refill_per_sec: capacity / period_secs,
            state: Arc::new(Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Takes a token if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits until a token is available, then takes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }

                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };

            log::debug!("Rate limiter {} waiting {:?}", self.name, wait);
            tokio::time::sleep(wait).await;
        }
    }
}
