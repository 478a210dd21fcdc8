// ABOUTME: One-shot reply and reaction flags per (workspace key, channel) interaction.
// ABOUTME: Set by skill handlers, read by the orchestrator, cleared when a new interaction begins.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagState {
    pub reply_sent: bool,
    pub reaction_sent: bool,
}

#[derive(Debug)]
struct Entry {
    state: FlagState,
    touched: Instant,
}

/// Shared keyed flag table. Entries appear on first write and disappear
/// once both flags are clear or the entry goes idle past `cleanup`'s limit.
#[derive(Debug, Default)]
pub struct InteractionFlags {
    flags: Mutex<HashMap<String, Entry>>,
}

fn key(workspace_key: &str, channel_id: &str) -> String {
    format!("{}:{}", workspace_key, channel_id)
}

impl InteractionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mark(
        &self,
        workspace_key: &str,
        channel_id: &str,
        pick: fn(&mut FlagState) -> &mut bool,
    ) -> bool {
        let mut flags = self.lock();
        let entry = flags
            .entry(key(workspace_key, channel_id))
            .or_insert_with(|| Entry {
                state: FlagState::default(),
                touched: Instant::now(),
            });
        entry.touched = Instant::now();
        !std::mem::replace(pick(&mut entry.state), true)
    }

    fn unmark(
        &self,
        workspace_key: &str,
        channel_id: &str,
        pick: fn(&mut FlagState) -> &mut bool,
    ) {
        let mut flags = self.lock();
        let key = key(workspace_key, channel_id);
        if let Some(entry) = flags.get_mut(&key) {
            *pick(&mut entry.state) = false;
            if entry.state == FlagState::default() {
                flags.remove(&key);
            }
        }
    }

    pub fn state(&self, workspace_key: &str, channel_id: &str) -> FlagState {
        self.lock()
            .get(&key(workspace_key, channel_id))
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    pub fn reply_sent(&self, workspace_key: &str, channel_id: &str) -> bool {
        self.state(workspace_key, channel_id).reply_sent
    }

    pub fn reaction_sent(&self, workspace_key: &str, channel_id: &str) -> bool {
        self.state(workspace_key, channel_id).reaction_sent
    }

    /// Set the reply flag; `false` if it was already set
    pub fn try_mark_reply(&self, workspace_key: &str, channel_id: &str) -> bool {
        self.mark(workspace_key, channel_id, |s| &mut s.reply_sent)
    }

    /// Set the reaction flag; `false` if it was already set
    pub fn try_mark_reaction(&self, workspace_key: &str, channel_id: &str) -> bool {
        self.mark(workspace_key, channel_id, |s| &mut s.reaction_sent)
    }

    pub fn clear_reply(&self, workspace_key: &str, channel_id: &str) {
        self.unmark(workspace_key, channel_id, |s| &mut s.reply_sent)
    }

    pub fn clear_reaction(&self, workspace_key: &str, channel_id: &str) {
        self.unmark(workspace_key, channel_id, |s| &mut s.reaction_sent)
    }

    /// Reset both flags for a new interaction
    pub fn clear(&self, workspace_key: &str, channel_id: &str) {
        self.lock().remove(&key(workspace_key, channel_id));
    }

    /// Drop entries not marked within `max_idle`
    pub fn cleanup(&self, max_idle: Duration) {
        self.cleanup_at(Instant::now(), max_idle);
    }

    pub fn cleanup_at(&self, now: Instant, max_idle: Duration) {
        let mut flags = self.lock();
        let before = flags.len();
        flags.retain(|_, entry| now.saturating_duration_since(entry.touched) < max_idle);
        let removed = before - flags.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = flags.len(), "Pruned idle interaction flags");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
