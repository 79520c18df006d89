//! Per-user submission rate limiting.
//!
//! Sliding-window limiter kept in process memory. The window is pruned on
//! every check, so idle users cost nothing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window rate limiter keyed by user.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    events: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` events per `window` per user.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for submissions: `per_minute` events per 60-second window.
    pub fn per_minute(per_minute: u32) -> Self {
        Self::new(per_minute, Duration::from_secs(60))
    }

    /// Records an event for the user if the limit allows it.
    ///
    /// # Returns
    ///
    /// `true` when the event was admitted, `false` when the user is over
    /// the limit.
    pub fn allow(&self, user_id: &str) -> bool {
        let now = Instant::now();
        let mut events = self.events.lock().expect("rate limiter lock poisoned");
        let window = events.entry(user_id.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.limit as usize {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Configured limit per window.
    pub fn limit(&self) -> u32 {
        self.limit
    }
}
