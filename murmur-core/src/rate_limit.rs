// ABOUTME: Per-key sliding-window rate limiter with a cooldown after the window fills.
// ABOUTME: Cooldown wins over window expiry: a key stays denied until its cooldown elapses.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_requests() -> usize {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests_per_window: default_max_requests(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Requests left in the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    /// Limiter disabled
    Unlimited,
    Limited(usize),
}

#[derive(Debug, Default)]
struct Bucket {
    timestamps: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
}

impl Bucket {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit or deny one request for `key`
    pub fn is_allowed(&self, key: &str) -> bool {
        self.is_allowed_at(key, Instant::now())
    }

    pub fn is_allowed_at(&self, key: &str, now: Instant) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut buckets = self.lock();
        let bucket = buckets.entry(key.to_string()).or_default();
        bucket.prune(now, self.config.window());

        if bucket.in_cooldown(now) {
            tracing::debug!(key = %key, "Rate limit cooldown active");
            return false;
        }

        if bucket.timestamps.len() >= self.config.max_requests_per_window {
            bucket.cooldown_until = Some(now + self.config.cooldown());
            tracing::info!(
                key = %key,
                cooldown_secs = self.config.cooldown_secs,
                "Rate limit exceeded, entering cooldown"
            );
            return false;
        }

        bucket.timestamps.push_back(now);
        true
    }

    pub fn remaining_requests(&self, key: &str) -> Remaining {
        self.remaining_requests_at(key, Instant::now())
    }

    pub fn remaining_requests_at(&self, key: &str, now: Instant) -> Remaining {
        if !self.config.enabled {
            return Remaining::Unlimited;
        }

        let mut buckets = self.lock();
        let Some(bucket) = buckets.get_mut(key) else {
            return Remaining::Limited(self.config.max_requests_per_window);
        };
        bucket.prune(now, self.config.window());
        if bucket.in_cooldown(now) {
            return Remaining::Limited(0);
        }
        Remaining::Limited(
            self.config
                .max_requests_per_window
                .saturating_sub(bucket.timestamps.len()),
        )
    }

    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn reset_all(&self) {
        self.lock().clear();
    }

    /// Drop buckets with nothing inside the window and no active cooldown
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    pub fn cleanup_at(&self, now: Instant) {
        let window = self.config.window();
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket.prune(now, window);
            !bucket.timestamps.is_empty() || bucket.in_cooldown(now)
        });
        let removed = before - buckets.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = buckets.len(), "Rate limiter cleanup");
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }
}
