// ABOUTME: fetch-context skill: recent channel history, history search, and user lookups.
// ABOUTME: Reads through the session's platform adapter.

use super::{clamped_limit, optional_str, required_str, SkillContext, SkillHandler, SkillResult, FETCH_CONTEXT};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Default)]
pub struct ContextHandler;

impl ContextHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SkillHandler for ContextHandler {
    fn skills(&self) -> &'static [&'static str] {
        &[FETCH_CONTEXT]
    }

    async fn handle(&self, _skill: &str, params: &Value, ctx: &SkillContext) -> Result<SkillResult> {
        let session = &ctx.session;
        let kind = required_str(params, "type")?;
        let limit = clamped_limit(params, "limit", DEFAULT_LIMIT, 1, MAX_LIMIT)?;

        match kind {
            "recent_messages" => {
                let messages = session
                    .adapter
                    .fetch_recent_messages(&session.channel_id, limit)
                    .await
                    .context("Failed to fetch recent messages")?;
                Ok(SkillResult::ok(json!({
                    "count": messages.len(),
                    "messages": messages,
                })))
            }
            "search_messages" => {
                let query = required_str(params, "query")?.to_lowercase();
                let messages: Vec<_> = session
                    .adapter
                    .fetch_recent_messages(&session.channel_id, MAX_LIMIT)
                    .await
                    .context("Failed to fetch messages for search")?
                    .into_iter()
                    .filter(|m| m.content.to_lowercase().contains(&query))
                    .rev()
                    .take(limit)
                    .collect();
                Ok(SkillResult::ok(json!({
                    "count": messages.len(),
                    "messages": messages,
                })))
            }
            "user_info" => {
                let user_id = optional_str(params, "query")?
                    .filter(|q| !q.trim().is_empty())
                    .unwrap_or(&session.user_id);
                let username = session
                    .adapter
                    .get_username(user_id)
                    .await
                    .context("Failed to look up user")?;
                Ok(SkillResult::ok(json!({
                    "userId": user_id,
                    "username": username,
                    "platform": session.adapter.platform_id(),
                })))
            }
            other => Ok(SkillResult::fail(format!(
                "Unknown context type: {} (expected recent_messages, search_messages or user_info)",
                other
            ))),
        }
    }
}
