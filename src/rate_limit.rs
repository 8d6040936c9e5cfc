//! Process-wide gate in front of the upstream model.
//!
//! Two limits: a minimum spacing between permitted calls, and a maximum
//! number of calls in a rolling window. State is only mutated when a call is
//! permitted, so a denied caller can retry without skewing the bookkeeping.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::InsightConfig;
use crate::errors::AppError;

#[derive(Debug, Default)]
struct RateLimiterState {
    /// Permitted calls inside the current window, oldest first.
    request_timestamps: VecDeque<Instant>,
    last_request_time: Option<Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    max_requests: usize,
    window: Duration,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, max_requests: usize, window: Duration) -> Self {
        Self {
            min_interval,
            max_requests: max_requests.max(1),
            window,
            state: Mutex::new(RateLimiterState::default()),
        }
    }

    pub fn from_config(cfg: &InsightConfig) -> Self {
        Self::new(cfg.min_interval, cfg.max_requests, cfg.window)
    }

    /// Admit one upstream call or report how long to wait.
    ///
    /// Check and record happen under one lock, so two callers can never both
    /// take the last slot.
    pub fn check_rate_limit(&self) -> Result<(), AppError> {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        // Pruning expired timestamps is not a recording; it is safe on denial.
        while let Some(&oldest) = state.request_timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                state.request_timestamps.pop_front();
            } else {
                break;
            }
        }

        if let Some(last) = state.last_request_time {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.min_interval {
                return Err(exceeded(self.min_interval - elapsed));
            }
        }

        if state.request_timestamps.len() >= self.max_requests {
            // Non-empty: max_requests >= 1.
            let oldest = state.request_timestamps[0];
            let wait = self
                .window
                .saturating_sub(now.saturating_duration_since(oldest));
            return Err(exceeded(wait));
        }

        state.last_request_time = Some(now);
        state.request_timestamps.push_back(now);
        Ok(())
    }
}

fn exceeded(wait: Duration) -> AppError {
    AppError::RateLimitExceeded {
        retry_after_secs: retry_after_secs(wait),
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}
