use crate::error::TrellisError;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Per-key fixed-window rate limiter.
///
/// An expired window resets the count on the next request; exhaustion
/// surfaces as `RateLimited` with the window's reset time. State lives in
/// process memory only and does not survive restarts.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: std::time::Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window: Duration::milliseconds(window.as_millis() as i64),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Result<(), TrellisError> {
        self.check_at(key, Utc::now())
    }

    /// Clock-injected variant backing `check`.
    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> Result<(), TrellisError> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match windows.get_mut(key) {
            Some(state) if now < state.reset_at => {
                if state.count >= self.max_requests {
                    return Err(TrellisError::RateLimited {
                        key: key.to_string(),
                        reset_at: state.reset_at.to_rfc3339(),
                    });
                }
                state.count += 1;
                Ok(())
            }
            _ => {
                windows.insert(
                    key.to_string(),
                    WindowState {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                Ok(())
            }
        }
    }

    /// Drop a key's window, re-opening it immediately.
    pub fn reset(&self, key: &str) {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        windows.remove(key);
    }
}
