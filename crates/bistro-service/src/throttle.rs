use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct WindowState {
    started: Instant,
    count: u32,
}

/// Fixed-window request throttle keyed by username.
///
/// Mutation-class menu and order actions pass through here before they reach
/// the engine; a throttled request never touches the core. Windows reset
/// wholesale on expiry; the default allows 5 requests per user per minute.
pub struct FixedWindowThrottle {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl FixedWindowThrottle {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `key`. Returns false once the current window's limit
    /// is exhausted.
    pub fn allow(&self, key: &str) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let state = windows.entry(key.to_string()).or_insert(WindowState {
            started: now,
            count: 0,
        });
        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 0;
        }
        if state.count >= self.limit {
            return false;
        }
        state.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_and_resets_per_window() {
        let throttle = FixedWindowThrottle::new(2, Duration::from_millis(20));

        assert!(throttle.allow("alice"));
        assert!(throttle.allow("alice"));
        assert!(!throttle.allow("alice"));
        // Other users have their own window.
        assert!(throttle.allow("bob"));

        std::thread::sleep(Duration::from_millis(25));
        assert!(throttle.allow("alice"));
    }
}
