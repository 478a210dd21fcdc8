// ABOUTME: Line-oriented console platform: stdin lines become events, replies are printed to stdout.
// ABOUTME: Keeps an in-memory channel history so fetch-context and recent-message context work offline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use murmur_core::traits::{ChannelMessage, NormalizedEvent, PlatformAdapter, PlatformCapabilities};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub const PLATFORM_ID: &str = "console";
pub const CHANNEL_ID: &str = "console";

const HISTORY_LIMIT: usize = 200;

pub struct ConsoleAdapter {
    user_id: String,
    bot_id: String,
    next_id: AtomicU64,
    history: Mutex<HashMap<String, Vec<ChannelMessage>>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleAdapter {
    pub fn new(user_id: impl Into<String>, bot_id: impl Into<String>) -> Self {
        Self::with_output(user_id, bot_id, Box::new(std::io::stdout()))
    }

    pub fn with_output(
        user_id: impl Into<String>,
        bot_id: impl Into<String>,
        output: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            bot_id: bot_id.into(),
            next_id: AtomicU64::new(1),
            history: Mutex::new(HashMap::new()),
            output: Mutex::new(output),
        }
    }

    fn next_message_id(&self) -> String {
        format!("console-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, channel_id: &str, message: ChannelMessage) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let channel = history.entry(channel_id.to_string()).or_default();
        channel.push(message);
        if channel.len() > HISTORY_LIMIT {
            let excess = channel.len() - HISTORY_LIMIT;
            channel.drain(..excess);
        }
    }

    fn print(&self, line: &str) -> Result<()> {
        let mut out = self.output.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{}", line).context("Failed to write to console")?;
        out.flush().context("Failed to flush console")
    }

    /// Turn one input line into an event, recording it in the channel history
    pub fn ingest(&self, line: &str) -> Option<NormalizedEvent> {
        let content = line.trim();
        if content.is_empty() {
            return None;
        }
        let message_id = self.next_message_id();
        let timestamp = Utc::now();
        self.record(
            CHANNEL_ID,
            ChannelMessage {
                message_id: message_id.clone(),
                user_id: self.user_id.clone(),
                username: Some(self.user_id.clone()),
                content: content.to_string(),
                timestamp,
                is_bot: false,
            },
        );
        Some(NormalizedEvent {
            platform: PLATFORM_ID.to_string(),
            channel_id: CHANNEL_ID.to_string(),
            user_id: self.user_id.clone(),
            message_id,
            is_dm: true,
            content: content.to_string(),
            timestamp,
            attachments: Vec::new(),
        })
    }

    /// Read stdin until EOF, forwarding one event per non-empty line
    pub fn spawn_reader(self: &Arc<Self>) -> mpsc::Receiver<NormalizedEvent> {
        let (tx, rx) = mpsc::channel(32);
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = adapter.ingest(&line) {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read console input");
                        break;
                    }
                }
            }
        });
        rx
    }
}

#[async_trait]
impl PlatformAdapter for ConsoleAdapter {
    fn platform_id(&self) -> &str {
        PLATFORM_ID
    }

    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            supports_reactions: true,
            supports_edit: true,
            supports_attachments: true,
            max_message_length: 4000,
        }
    }

    async fn send_reply(
        &self,
        channel_id: &str,
        message: &str,
        attachments: &[PathBuf],
    ) -> Result<String> {
        let message_id = self.next_message_id();
        self.print(&format!("{}: {}", self.bot_id, message))?;
        for path in attachments {
            self.print(&format!("  [attachment {}]", path.display()))?;
        }
        self.record(
            channel_id,
            ChannelMessage {
                message_id: message_id.clone(),
                user_id: self.bot_id.clone(),
                username: Some(self.bot_id.clone()),
                content: message.to_string(),
                timestamp: Utc::now(),
                is_bot: true,
            },
        );
        Ok(message_id)
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, message: &str) -> Result<()> {
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            let found = history
                .get_mut(channel_id)
                .and_then(|msgs| msgs.iter_mut().find(|m| m.message_id == message_id));
            match found {
                Some(existing) => existing.content = message.to_string(),
                None => anyhow::bail!("Message not found: {}", message_id),
            }
        }
        self.print(&format!("{} (edited): {}", self.bot_id, message))
    }

    async fn add_reaction(&self, _channel_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        self.print(&format!("  [{} reacted {} to {}]", self.bot_id, emoji, message_id))
    }

    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let messages = history.get(channel_id).map(Vec::as_slice).unwrap_or(&[]);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages[skip..].to_vec())
    }

    async fn get_username(&self, user_id: &str) -> Result<String> {
        Ok(user_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn adapter() -> (ConsoleAdapter, Buffer) {
        let buffer = Buffer::default();
        let adapter = ConsoleAdapter::with_output("alice", "murmur", Box::new(buffer.clone()));
        (adapter, buffer)
    }

    #[test]
    fn test_ingest_skips_blank_lines() {
        let (adapter, _) = adapter();
        assert!(adapter.ingest("   ").is_none());

        let event = adapter.ingest("  hello  ").unwrap();
        assert_eq!(event.content, "hello");
        assert_eq!(event.workspace_key(), "console/alice");
        assert_ne!(adapter.ingest("again").unwrap().message_id, event.message_id);
    }

    #[tokio::test]
    async fn test_reply_and_edit_are_printed_and_recorded() {
        let (adapter, buffer) = adapter();
        adapter.ingest("hi");

        let id = adapter.send_reply(CHANNEL_ID, "hey there", &[]).await.unwrap();
        adapter.edit_message(CHANNEL_ID, &id, "hey!").await.unwrap();

        let text = buffer.text();
        assert!(text.contains("murmur: hey there"));
        assert!(text.contains("murmur (edited): hey!"));

        let history = adapter.fetch_recent_messages(CHANNEL_ID, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "hey!");
        assert!(history[1].is_bot);
    }

    #[tokio::test]
    async fn test_edit_unknown_message_fails() {
        let (adapter, _) = adapter();
        assert!(adapter.edit_message(CHANNEL_ID, "nope", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_recent_messages_limit_keeps_newest() {
        let (adapter, _) = adapter();
        for i in 0..5 {
            adapter.ingest(&format!("line {}", i));
        }
        let recent = adapter.fetch_recent_messages(CHANNEL_ID, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].content, "line 4");
    }
}
