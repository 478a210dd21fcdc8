// ABOUTME: Default ContextAssembler: renders the message template with memories and channel history.
// ABOUTME: Token estimate is a chars/4 approximation.

use crate::prompts::{PromptTemplates, TemplateKind};
use crate::traits::{
    AssembledContext, ChannelMessage, ContextAssembler, ContextRequest, Memory, MemoryStore,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

const IMPORTANT_MEMORY_LIMIT: usize = 20;

pub fn format_memories(memories: &[Memory]) -> String {
    if memories.is_empty() {
        return "(none)".to_string();
    }
    memories
        .iter()
        .map(|m| format!("- [{}] {} (id: {})", m.importance.as_str(), m.content, m.id))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_messages(messages: &[ChannelMessage]) -> String {
    if messages.is_empty() {
        return "(no recent messages)".to_string();
    }
    messages
        .iter()
        .map(|m| {
            let who = m.username.as_deref().unwrap_or(&m.user_id);
            let bot = if m.is_bot { " (bot)" } else { "" };
            format!(
                "[{}] {}{}: {}",
                m.timestamp.format("%Y-%m-%d %H:%M"),
                who,
                bot,
                m.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub struct TemplateContextAssembler {
    templates: Arc<PromptTemplates>,
    memory: Arc<dyn MemoryStore>,
    bot_name: String,
}

impl TemplateContextAssembler {
    pub fn new(
        templates: Arc<PromptTemplates>,
        memory: Arc<dyn MemoryStore>,
        bot_name: impl Into<String>,
    ) -> Self {
        Self {
            templates,
            memory,
            bot_name: bot_name.into(),
        }
    }
}

#[async_trait]
impl ContextAssembler for TemplateContextAssembler {
    async fn assemble(&self, request: ContextRequest<'_>) -> Result<AssembledContext> {
        let memories = match self
            .memory
            .get_important_memories(&request.workspace.key, IMPORTANT_MEMORY_LIMIT)
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                tracing::warn!(workspace = %request.workspace.key, error = %e, "Failed to load memories");
                Vec::new()
            }
        };

        let vars: HashMap<&str, String> = HashMap::from([
            ("bot_name", self.bot_name.clone()),
            ("platform", request.event.platform.clone()),
            ("session_id", request.session_id.to_string()),
            ("skill_api_url", request.skill_api_url.to_string()),
            ("workspace_key", request.workspace.key.clone()),
            ("memories", format_memories(&memories)),
            ("recent_messages", format_messages(request.recent_messages)),
        ]);
        let system_prompt = self.templates.render(TemplateKind::Message, &vars);

        let mut user_prompt = format!(
            "Message from {} (user id {}):\n{}",
            request
                .recent_messages
                .iter()
                .rev()
                .find(|m| m.user_id == request.event.user_id)
                .and_then(|m| m.username.clone())
                .unwrap_or_else(|| request.event.user_id.clone()),
            request.event.user_id,
            request.event.content.trim()
        );
        for attachment in &request.event.attachments {
            user_prompt.push_str(&format!(
                "\n[attachment: {} {}]",
                attachment.filename, attachment.url
            ));
        }

        let estimated_tokens = estimate_tokens(&system_prompt) + estimate_tokens(&user_prompt);
        Ok(AssembledContext {
            system_prompt,
            user_prompt,
            estimated_tokens,
        })
    }
}
