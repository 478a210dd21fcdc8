// ABOUTME: Single-flight and rate-limit gate in front of the session orchestrator.
// ABOUTME: Each (platform, message id) is processed at most once at a time; accounts on the whitelist skip limits.

use crate::config::WhitelistConfig;
use crate::flags::InteractionFlags;
use crate::metrics;
use crate::orchestrator::{SessionOrchestrator, SessionResponse};
use crate::rate_limit::RateLimiter;
use crate::traits::{NormalizedEvent, PlatformAdapter};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const CLEANUP_EVERY: u64 = 100;

pub struct MessageHandler {
    orchestrator: Arc<SessionOrchestrator>,
    rate_limiter: RateLimiter,
    whitelist: WhitelistConfig,
    flags: Arc<InteractionFlags>,
    active: Arc<Mutex<HashSet<String>>>,
    admitted: AtomicU64,
}

/// Releases the active key when dropped, including on cancellation or panic
struct ActiveGuard {
    active: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

impl MessageHandler {
    pub fn new(
        orchestrator: Arc<SessionOrchestrator>,
        rate_limiter: RateLimiter,
        whitelist: WhitelistConfig,
    ) -> Self {
        let flags = Arc::clone(orchestrator.flags());
        Self {
            orchestrator,
            rate_limiter,
            whitelist,
            flags,
            active: Arc::new(Mutex::new(HashSet::new())),
            admitted: AtomicU64::new(0),
        }
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn handle_event(
        &self,
        event: &NormalizedEvent,
        adapter: Arc<dyn PlatformAdapter>,
    ) -> SessionResponse {
        let key = event.work_key();

        // Check and insert under one lock so two racing events cannot both pass
        let guard = {
            let mut active = self.active();
            if active.contains(&key) {
                drop(active);
                tracing::debug!(work_key = %key, "Duplicate event dropped");
                metrics::record_duplicate_event(&event.platform);
                return SessionResponse::already_processing(&key);
            }

            let account = self
                .whitelist
                .is_account_whitelisted(&event.platform, &event.user_id);
            if self.whitelist.enforce
                && !account
                && !self
                    .whitelist
                    .is_channel_whitelisted(&event.platform, &event.channel_id)
            {
                tracing::info!(
                    platform = %event.platform,
                    user_id = %event.user_id,
                    channel_id = %event.channel_id,
                    "Event refused, not whitelisted"
                );
                return SessionResponse::failed("Not whitelisted");
            }

            if !account {
                let limiter_key = format!("{}:{}", event.platform, event.user_id);
                if !self.rate_limiter.is_allowed(&limiter_key) {
                    tracing::info!(key = %limiter_key, "Rate limited");
                    metrics::record_rate_limited(&event.platform);
                    return SessionResponse::failed("Rate limited");
                }
            }

            active.insert(key.clone());
            ActiveGuard {
                active: Arc::clone(&self.active),
                key,
            }
        };

        if self.admitted.fetch_add(1, Ordering::Relaxed) % CLEANUP_EVERY == CLEANUP_EVERY - 1 {
            self.rate_limiter.cleanup();
            self.flags.cleanup(self.orchestrator.sessions().timeout());
        }

        self.flags
            .clear(&event.workspace_key(), &event.channel_id);

        let response = self.orchestrator.process_message(event, adapter).await;
        drop(guard);
        response
    }

    pub fn is_processing(&self, platform: &str, message_id: &str) -> bool {
        self.active()
            .contains(&format!("{}:{}", platform, message_id))
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    /// Forget in-flight keys and rate-limit state
    pub fn dispose(&self) {
        self.active().clear();
        self.rate_limiter.reset_all();
    }
}
