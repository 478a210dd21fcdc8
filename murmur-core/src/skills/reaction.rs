// ABOUTME: react-message skill: at most one reaction per interaction, on the triggering message.
// ABOUTME: Independent of the reply flag; sessions without a trigger message cannot react.

use super::{required_str, SkillContext, SkillHandler, SkillResult, REACT_MESSAGE};
use crate::flags::InteractionFlags;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct ReactionHandler {
    flags: Arc<InteractionFlags>,
}

impl ReactionHandler {
    pub fn new(flags: Arc<InteractionFlags>) -> Self {
        Self { flags }
    }

    pub fn clear_reaction_state(&self, workspace_key: &str, channel_id: &str) {
        self.flags.clear_reaction(workspace_key, channel_id);
    }
}

#[async_trait]
impl SkillHandler for ReactionHandler {
    fn skills(&self) -> &'static [&'static str] {
        &[REACT_MESSAGE]
    }

    async fn handle(&self, _skill: &str, params: &Value, ctx: &SkillContext) -> Result<SkillResult> {
        let session = &ctx.session;
        let emoji = required_str(params, "emoji")?;

        let message_id = match session.trigger_message_id() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => return Ok(SkillResult::fail("No trigger message to react to")),
        };

        if !session.adapter.capabilities().supports_reactions {
            return Ok(SkillResult::fail("Platform does not support reactions"));
        }

        let key = session.workspace_key();
        if !self.flags.try_mark_reaction(key, &session.channel_id) {
            return Ok(SkillResult::fail(
                "Reaction can only be sent once per interaction",
            ));
        }

        if let Err(e) = session
            .adapter
            .add_reaction(&session.channel_id, &message_id, emoji)
            .await
        {
            self.flags.clear_reaction(key, &session.channel_id);
            return Err(e.context("Failed to add reaction"));
        }

        tracing::info!(
            session_id = %session.id,
            message_id = %message_id,
            emoji = %emoji,
            "Reaction added"
        );
        Ok(SkillResult::ok(json!({ "messageId": message_id, "emoji": emoji })))
    }
}
