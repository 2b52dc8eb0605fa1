//! Client-side request throttling for the course API
//!
//! The API allows a burst of requests per sliding window plus a daily cap.
//! All API calls share one [`RateLimiter`] and await [`RateLimiter::acquire`]
//! before sending, so requests queue up instead of tripping HTTP 429.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Sliding-window log of recent requests
struct WindowState {
    /// Send times of requests inside the current window
    recent: VecDeque<Instant>,
    /// Start of the current daily period
    day_started: Instant,
    /// Requests sent in the current daily period
    day_count: u32,
}

/// Shared request throttle (cloning shares the same window)
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<WindowState>>,
    burst: usize,
    window: Duration,
    daily_limit: Option<u32>,
}

impl RateLimiter {
    /// Create a limiter from configuration
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(WindowState {
                recent: VecDeque::with_capacity(config.burst as usize),
                day_started: Instant::now(),
                day_count: 0,
            })),
            burst: config.burst.max(1) as usize,
            window: config.window,
            daily_limit: config.daily_limit,
        }
    }

    /// Record a request if one is allowed now, otherwise return how long to wait
    pub async fn try_acquire(&self) -> Option<Duration> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if now.duration_since(state.day_started) >= DAY {
            tracing::info!("daily request counter reset");
            state.day_started = now;
            state.day_count = 0;
        }

        if let Some(limit) = self.daily_limit
            && state.day_count >= limit
        {
            return Some((state.day_started + DAY).saturating_duration_since(now));
        }

        while let Some(&oldest) = state.recent.front() {
            if now.duration_since(oldest) >= self.window {
                state.recent.pop_front();
            } else {
                break;
            }
        }

        if state.recent.len() < self.burst {
            state.recent.push_back(now);
            state.day_count += 1;
            None
        } else {
            let oldest = state.recent.front().copied().unwrap_or(now);
            Some((oldest + self.window).saturating_duration_since(now))
        }
    }

    /// Wait until a request may be sent, then record it
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire().await {
                None => return,
                Some(wait) => {
                    // A zero wait can happen when the oldest entry expires exactly now
                    let wait = wait.max(Duration::from_millis(1));
                    tracing::debug!(
                        wait_ms = wait.as_millis() as u64,
                        "rate limit reached, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
