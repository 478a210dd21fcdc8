// ABOUTME: memory-save, memory-search and memory-patch skills over the MemoryStore.
// ABOUTME: Memories are scoped to the calling session's workspace key.

use super::{
    clamped_limit, optional_bool, optional_str, required_str, SkillContext, SkillHandler,
    SkillResult, MEMORY_PATCH, MEMORY_SAVE, MEMORY_SEARCH,
};
use crate::traits::{Importance, MemoryPatch, MemoryStore, Visibility};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const SEARCH_DEFAULT_LIMIT: usize = 10;
const SEARCH_MAX_LIMIT: usize = 50;

pub struct MemoryHandler {
    store: Arc<dyn MemoryStore>,
}

impl MemoryHandler {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }

    async fn save(&self, params: &Value, ctx: &SkillContext) -> Result<SkillResult> {
        let content = required_str(params, "content")?;
        let importance = match optional_str(params, "importance")? {
            Some(raw) => raw.parse::<Importance>()?,
            None => Importance::default(),
        };

        let memory = self
            .store
            .save(ctx.session.workspace_key(), content.trim(), importance)
            .await?;
        tracing::debug!(
            session_id = %ctx.session.id,
            memory_id = %memory.id,
            importance = importance.as_str(),
            "Memory saved"
        );
        Ok(SkillResult::ok(json!({
            "id": memory.id,
            "importance": memory.importance,
        })))
    }

    async fn search(&self, params: &Value, ctx: &SkillContext) -> Result<SkillResult> {
        let query = required_str(params, "query")?;
        let limit = clamped_limit(params, "limit", SEARCH_DEFAULT_LIMIT, 1, SEARCH_MAX_LIMIT)?;

        let memories = self
            .store
            .search(ctx.session.workspace_key(), query, limit)
            .await?;
        Ok(SkillResult::ok(json!({
            "count": memories.len(),
            "memories": memories,
        })))
    }

    async fn patch(&self, params: &Value, ctx: &SkillContext) -> Result<SkillResult> {
        let memory_id = required_str(params, "memory_id")?;
        let patch = MemoryPatch {
            enabled: optional_bool(params, "enabled")?,
            visibility: optional_str(params, "visibility")?
                .map(str::parse::<Visibility>)
                .transpose()?,
            importance: optional_str(params, "importance")?
                .map(str::parse::<Importance>)
                .transpose()?,
        };
        if patch.is_empty() {
            return Ok(SkillResult::fail(
                "At least one of enabled, visibility or importance is required",
            ));
        }

        match self
            .store
            .patch(ctx.session.workspace_key(), memory_id, patch)
            .await?
        {
            Some(memory) => Ok(SkillResult::ok(json!({ "memory": memory }))),
            None => Ok(SkillResult::fail(format!("Memory not found: {}", memory_id))),
        }
    }
}

#[async_trait]
impl SkillHandler for MemoryHandler {
    fn skills(&self) -> &'static [&'static str] {
        &[MEMORY_SAVE, MEMORY_SEARCH, MEMORY_PATCH]
    }

    async fn handle(&self, skill: &str, params: &Value, ctx: &SkillContext) -> Result<SkillResult> {
        match skill {
            MEMORY_SAVE => self.save(params, ctx).await,
            MEMORY_SEARCH => self.search(params, ctx).await,
            MEMORY_PATCH => self.patch(params, ctx).await,
            other => Ok(SkillResult::fail(format!("Unknown skill: {}", other))),
        }
    }
}
