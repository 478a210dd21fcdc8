// ABOUTME: In-memory platform adapter that records every outbound call for tests and local runs.
// ABOUTME: Sends, edits and reactions are captured; history and failures can be scripted.

use crate::traits::{ChannelMessage, PlatformAdapter, PlatformCapabilities};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A message posted through the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: String,
    pub channel_id: String,
    pub content: String,
    pub attachments: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEdit {
    pub channel_id: String,
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReaction {
    pub channel_id: String,
    pub message_id: String,
    pub emoji: String,
}

#[derive(Default)]
struct Recorded {
    sent: Vec<SentMessage>,
    edits: Vec<RecordedEdit>,
    reactions: Vec<RecordedReaction>,
    history: HashMap<String, Vec<ChannelMessage>>,
    usernames: HashMap<String, String>,
    fail_sends: Option<String>,
    fail_history: Option<String>,
}

/// Clones share recordings, so a test can keep one and hand another out
#[derive(Clone)]
pub struct RecordingAdapter {
    platform: String,
    capabilities: PlatformCapabilities,
    send_delay: Option<Duration>,
    next_id: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingAdapter {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            capabilities: PlatformCapabilities::default(),
            send_delay: None,
            next_id: Arc::new(AtomicUsize::new(1)),
            recorded: Arc::new(Mutex::new(Recorded::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_capabilities(mut self, capabilities: PlatformCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Hold every send for `delay`, widening race windows in concurrency tests
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub fn with_history(self, channel_id: &str, messages: Vec<ChannelMessage>) -> Self {
        self.lock().history.insert(channel_id.to_string(), messages);
        self
    }

    pub fn with_username(self, user_id: &str, username: &str) -> Self {
        self.lock()
            .usernames
            .insert(user_id.to_string(), username.to_string());
        self
    }

    pub fn fail_sends(self, message: &str) -> Self {
        self.lock().fail_sends = Some(message.to_string());
        self
    }

    pub fn fail_history(self, message: &str) -> Self {
        self.lock().fail_history = Some(message.to_string());
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn edits(&self) -> Vec<RecordedEdit> {
        self.lock().edits.clone()
    }

    pub fn reactions(&self) -> Vec<RecordedReaction> {
        self.lock().reactions.clone()
    }
}

#[async_trait]
impl PlatformAdapter for RecordingAdapter {
    fn platform_id(&self) -> &str {
        &self.platform
    }

    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    async fn send_reply(
        &self,
        channel_id: &str,
        message: &str,
        attachments: &[PathBuf],
    ) -> Result<String> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        let mut recorded = self.lock();
        if let Some(error) = &recorded.fail_sends {
            anyhow::bail!("{}", error);
        }
        let message_id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        recorded.sent.push(SentMessage {
            message_id: message_id.clone(),
            channel_id: channel_id.to_string(),
            content: message.to_string(),
            attachments: attachments.to_vec(),
        });
        Ok(message_id)
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, message: &str) -> Result<()> {
        self.lock().edits.push(RecordedEdit {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            content: message.to_string(),
        });
        Ok(())
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        self.lock().reactions.push(RecordedReaction {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>> {
        let recorded = self.lock();
        if let Some(error) = &recorded.fail_history {
            anyhow::bail!("{}", error);
        }
        let history = recorded.history.get(channel_id).cloned().unwrap_or_default();
        let skip = history.len().saturating_sub(limit);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn get_username(&self, user_id: &str) -> Result<String> {
        Ok(self
            .lock()
            .usernames
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string()))
    }
}
