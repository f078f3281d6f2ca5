use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

pub mod middleware;

/// Fixed-window request counting.
///
/// State is process-local: a multi-replica deployment must externalize it.
#[derive(Clone, Debug)]
pub struct RateLimiterConfig {
    /// Max requests allowed per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
    /// Optional key prefix, keeps independent limiters from colliding
    pub key_prefix: String,
}

impl RateLimiterConfig {
    pub fn new(limit: u32, window: Duration, key_prefix: impl Into<String>) -> Self {
        Self {
            limit,
            window,
            key_prefix: key_prefix.into(),
        }
    }
}

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiterInner {
    config: RateLimiterConfig,
    windows: Mutex<HashMap<String, Window>>,
}

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

impl Deref for RateLimiter {
    type Target = RateLimiterInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                config,
                windows: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns true if the request is allowed, false if limited.
    ///
    /// A window starts at the first request for its key and counts until
    /// `window` has elapsed, then resets.
    pub fn check(&self, key: &str) -> bool {
        let full_key = format!("{}{}", self.config.key_prefix, key);
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("rate limiter lock poisoned");

        // Keep the map from accumulating dead windows
        if windows.len() > 4096 {
            let window = self.config.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows.entry(full_key).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.config.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.config.limit {
            return false;
        }
        entry.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig::new(limit, window, "test:"))
    }

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let rl = limiter(3, Duration::from_secs(60));
        assert!(rl.check("1.2.3.4"));
        assert!(rl.check("1.2.3.4"));
        assert!(rl.check("1.2.3.4"));
        assert!(!rl.check("1.2.3.4"));
        assert!(!rl.check("1.2.3.4"));
    }

    #[test]
    fn keys_are_independent() {
        let rl = limiter(1, Duration::from_secs(60));
        assert!(rl.check("1.2.3.4"));
        assert!(!rl.check("1.2.3.4"));
        assert!(rl.check("5.6.7.8"));
    }

    #[test]
    fn window_resets_after_elapse() {
        let rl = limiter(1, Duration::ZERO);
        assert!(rl.check("1.2.3.4"));
        // Zero-length window: every request starts a fresh window
        assert!(rl.check("1.2.3.4"));
    }
}
