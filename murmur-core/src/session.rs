// ABOUTME: TTL-backed registry of in-flight agent sessions, keyed by session id.
// ABOUTME: Provides the atomic reply claim the skill server uses to reject duplicate replies.

use crate::traits::{NormalizedEvent, PlatformAdapter, Workspace};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Read-only snapshot of one interaction, handed to skill handlers
pub struct Session {
    pub id: String,
    pub workspace: Workspace,
    pub channel_id: String,
    pub user_id: String,
    pub adapter: Arc<dyn PlatformAdapter>,
    /// Triggering event; absent for spontaneous and maintenance sessions
    pub event: Option<NormalizedEvent>,
    pub created_at: Instant,
}

impl Session {
    pub fn workspace_key(&self) -> &str {
        &self.workspace.key
    }

    pub fn agent_dir(&self) -> &Path {
        &self.workspace.agent_dir
    }

    pub fn trigger_message_id(&self) -> Option<&str> {
        self.event.as_ref().map(|e| e.message_id.as_str())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("workspace", &self.workspace.key)
            .field("channel_id", &self.channel_id)
            .field("user_id", &self.user_id)
            .field("platform", &self.adapter.platform_id())
            .field("trigger", &self.trigger_message_id())
            .finish()
    }
}

/// Fields for a new registry entry
pub struct NewSession {
    pub workspace: Workspace,
    pub channel_id: String,
    pub user_id: String,
    pub adapter: Arc<dyn PlatformAdapter>,
    pub event: Option<NormalizedEvent>,
}

struct Entry {
    session: Arc<Session>,
    reply_claimed: bool,
}

#[derive(Default)]
struct Sweeper {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    timeout: Duration,
    entries: Mutex<HashMap<String, Entry>>,
    sweeper: Mutex<Sweeper>,
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                timeout,
                entries: Mutex::new(HashMap::new()),
                sweeper: Mutex::new(Sweeper::default()),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.session.created_at) >= self.inner.timeout
    }

    pub fn register(&self, new: NewSession) -> Arc<Session> {
        let session = Arc::new(Session {
            id: uuid::Uuid::new_v4().to_string(),
            workspace: new.workspace,
            channel_id: new.channel_id,
            user_id: new.user_id,
            adapter: new.adapter,
            event: new.event,
            created_at: Instant::now(),
        });
        self.entries().insert(
            session.id.clone(),
            Entry {
                session: Arc::clone(&session),
                reply_claimed: false,
            },
        );
        tracing::debug!(
            session_id = %session.id,
            workspace = %session.workspace.key,
            channel_id = %session.channel_id,
            "Session registered"
        );
        session
    }

    /// Live session by id; expired entries are unreachable even before the sweep runs
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(session_id) {
            Some(entry) if self.is_expired(entry, now) => {
                entries.remove(session_id);
                tracing::debug!(session_id = %session_id, "Session expired");
                None
            }
            Some(entry) => Some(Arc::clone(&entry.session)),
            None => None,
        }
    }

    /// Claim the reply slot. `true` on the first claim for a live session,
    /// `false` when already claimed or the session is unknown.
    pub fn mark_reply_sent(&self, session_id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(session_id) else {
            return false;
        };
        if now.saturating_duration_since(entry.session.created_at) >= self.inner.timeout {
            return false;
        }
        if entry.reply_claimed {
            return false;
        }
        entry.reply_claimed = true;
        true
    }

    /// Release a claim after the reply failed downstream
    pub fn unmark_reply_sent(&self, session_id: &str) {
        if let Some(entry) = self.entries().get_mut(session_id) {
            entry.reply_claimed = false;
        }
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.entries().remove(session_id).map(|e| e.session)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries, returning how many were evicted
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let timeout = self.inner.timeout;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.session.created_at) < timeout);
        before - entries.len()
    }

    /// Start the background eviction sweep. Calling it while a sweep is
    /// already running is a no-op.
    pub fn start_cleanup(&self, interval: Duration) {
        let mut sweeper = self.inner.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if sweeper.handle.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let registry = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = registry.sweep();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = registry.len(), "Session sweep");
                        }
                    }
                }
            }
        });
        sweeper.cancel = Some(cancel);
        sweeper.handle = Some(handle);
        tracing::debug!(interval_secs = interval.as_secs(), "Session cleanup started");
    }

    /// Halt the sweep. Idempotent.
    pub fn stop(&self) {
        let mut sweeper = self.inner.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cancel) = sweeper.cancel.take() {
            cancel.cancel();
            tracing::debug!("Session cleanup stopped");
        }
        sweeper.handle.take();
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .handle
            .is_some()
    }
}
