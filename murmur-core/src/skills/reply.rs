// ABOUTME: send-reply and edit-reply skills with the one-reply-per-interaction invariant.
// ABOUTME: The reply flag is claimed before posting and released if the platform call fails.

use super::{required_str, SkillContext, SkillHandler, SkillResult, EDIT_REPLY, SEND_REPLY};
use crate::flags::InteractionFlags;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

pub struct ReplyHandler {
    flags: Arc<InteractionFlags>,
}

impl ReplyHandler {
    pub fn new(flags: Arc<InteractionFlags>) -> Self {
        Self { flags }
    }

    /// Reset the reply flag for a new interaction
    pub fn clear_reply_state(&self, workspace_key: &str, channel_id: &str) {
        self.flags.clear_reply(workspace_key, channel_id);
    }

    async fn send_reply(&self, params: &Value, ctx: &SkillContext) -> Result<SkillResult> {
        let session = &ctx.session;
        let key = session.workspace_key();

        if self.flags.reply_sent(key, &session.channel_id) {
            return Ok(SkillResult::fail("Reply can only be sent once per interaction"));
        }

        let message = required_str(params, "message")?;
        let caps = session.adapter.capabilities();
        check_length(message, caps.max_message_length)?;

        let attachments = attachment_paths(params)?;
        if !attachments.is_empty() && !caps.supports_attachments {
            return Ok(SkillResult::fail("Platform does not support attachments"));
        }
        let mut resolved = Vec::with_capacity(attachments.len());
        for raw in &attachments {
            resolved.push(resolve_attachment(session.agent_dir(), raw).await?);
        }

        if !self.flags.try_mark_reply(key, &session.channel_id) {
            return Ok(SkillResult::fail("Reply can only be sent once per interaction"));
        }

        match session
            .adapter
            .send_reply(&session.channel_id, message, &resolved)
            .await
        {
            Ok(message_id) => {
                tracing::info!(
                    session_id = %session.id,
                    channel_id = %session.channel_id,
                    message_id = %message_id,
                    attachments = resolved.len(),
                    "Reply sent"
                );
                Ok(SkillResult::ok(json!({ "messageId": message_id })))
            }
            Err(e) => {
                self.flags.clear_reply(key, &session.channel_id);
                Err(e.context("Failed to send reply"))
            }
        }
    }

    async fn edit_reply(&self, params: &Value, ctx: &SkillContext) -> Result<SkillResult> {
        let session = &ctx.session;
        if !self.flags.reply_sent(session.workspace_key(), &session.channel_id) {
            return Ok(SkillResult::fail(
                "No reply has been sent yet. Use send-reply first.",
            ));
        }

        let message_id = required_str(params, "messageId")?;
        let message = required_str(params, "message")?;
        let caps = session.adapter.capabilities();
        if !caps.supports_edit {
            return Ok(SkillResult::fail("Platform does not support editing messages"));
        }
        check_length(message, caps.max_message_length)?;

        session
            .adapter
            .edit_message(&session.channel_id, message_id, message)
            .await
            .context("Failed to edit reply")?;

        tracing::debug!(session_id = %session.id, message_id = %message_id, "Reply edited");
        Ok(SkillResult::ok(json!({ "messageId": message_id })))
    }
}

#[async_trait]
impl SkillHandler for ReplyHandler {
    fn skills(&self) -> &'static [&'static str] {
        &[SEND_REPLY, EDIT_REPLY]
    }

    async fn handle(&self, skill: &str, params: &Value, ctx: &SkillContext) -> Result<SkillResult> {
        match skill {
            SEND_REPLY => self.send_reply(params, ctx).await,
            EDIT_REPLY => self.edit_reply(params, ctx).await,
            other => Ok(SkillResult::fail(format!("Unknown skill: {}", other))),
        }
    }
}

fn check_length(message: &str, max: usize) -> Result<()> {
    let len = message.chars().count();
    if len > max {
        anyhow::bail!(
            "Message exceeds platform limit of {} characters (got {})",
            max,
            len
        );
    }
    Ok(())
}

fn attachment_paths(params: &Value) -> Result<Vec<String>> {
    match params.get("attachments") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
                _ => anyhow::bail!("Attachments must be non-empty path strings"),
            })
            .collect(),
        Some(_) => anyhow::bail!("Parameter attachments must be an array"),
    }
}

/// Attachments are files inside the agent workspace, addressed relatively
async fn resolve_attachment(agent_dir: &Path, raw: &str) -> Result<PathBuf> {
    let relative = Path::new(raw);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        anyhow::bail!("Invalid attachment path: {}", raw);
    }
    let path = agent_dir.join(relative);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(path),
        _ => anyhow::bail!("Attachment not found: {}", raw),
    }
}
