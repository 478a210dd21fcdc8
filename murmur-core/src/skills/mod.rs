// ABOUTME: Skill dispatch table: named callback operations the agent invokes against the host.
// ABOUTME: Handlers never propagate errors outward; failures come back as SkillResult values.

pub mod context;
pub mod memory;
pub mod reaction;
pub mod reply;

use crate::session::Session;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use context::ContextHandler;
pub use memory::MemoryHandler;
pub use reaction::ReactionHandler;
pub use reply::ReplyHandler;

pub const SEND_REPLY: &str = "send-reply";
pub const EDIT_REPLY: &str = "edit-reply";
pub const REACT_MESSAGE: &str = "react-message";
pub const MEMORY_SAVE: &str = "memory-save";
pub const MEMORY_SEARCH: &str = "memory-search";
pub const MEMORY_PATCH: &str = "memory-patch";
pub const FETCH_CONTEXT: &str = "fetch-context";

/// Outcome of one skill call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// HTTP status override; otherwise derived from `success`
    #[serde(skip)]
    pub status_code: Option<u16>,
}

impl SkillResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            status_code: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            status_code: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn status(&self) -> u16 {
        self.status_code
            .unwrap_or(if self.success { 200 } else { 400 })
    }
}

/// What a handler sees about the calling session
#[derive(Debug, Clone)]
pub struct SkillContext {
    pub session: Arc<Session>,
}

impl SkillContext {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
pub trait SkillHandler: Send + Sync {
    /// Skill names this handler serves
    fn skills(&self) -> &'static [&'static str];

    async fn handle(&self, skill: &str, params: &Value, ctx: &SkillContext) -> Result<SkillResult>;
}

#[derive(Clone, Default)]
pub struct SkillRegistry {
    handlers: HashMap<&'static str, Arc<dyn SkillHandler>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn SkillHandler>) -> Self {
        for name in handler.skills() {
            self.handlers.insert(name, Arc::clone(&handler));
        }
        self
    }

    pub fn has_skill(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn skill_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run a skill. Errors from the handler become `{success: false, error}`.
    pub async fn execute_skill(&self, name: &str, params: &Value, ctx: &SkillContext) -> SkillResult {
        let Some(handler) = self.handlers.get(name) else {
            return SkillResult::fail(format!("Unknown skill: {}", name));
        };

        match handler.handle(name, params, ctx).await {
            Ok(result) => {
                if !result.success {
                    tracing::debug!(
                        skill = %name,
                        session_id = %ctx.session.id,
                        error = ?result.error,
                        "Skill reported failure"
                    );
                }
                result
            }
            Err(e) => {
                tracing::warn!(
                    skill = %name,
                    session_id = %ctx.session.id,
                    error = %e,
                    "Skill handler failed"
                );
                SkillResult::fail(format!("{:#}", e))
            }
        }
    }
}

// =============================================================================
// Parameter helpers
// =============================================================================

pub(crate) fn required_str<'a>(params: &'a Value, name: &str) -> Result<&'a str> {
    match params.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            anyhow::bail!("Missing required parameter: {}", name)
        }
        Some(_) => anyhow::bail!("Parameter {} must be a string", name),
    }
}

pub(crate) fn optional_str<'a>(params: &'a Value, name: &str) -> Result<Option<&'a str>> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => anyhow::bail!("Parameter {} must be a string", name),
    }
}

pub(crate) fn optional_bool(params: &Value, name: &str) -> Result<Option<bool>> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => anyhow::bail!("Parameter {} must be a boolean", name),
    }
}

/// Optional positive integer, defaulted then clamped into `min..=max`
pub(crate) fn clamped_limit(
    params: &Value,
    name: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize> {
    let value = match params.get(name) {
        None | Some(Value::Null) => default,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) if v < 0 => min,
            Some(v) => usize::try_from(v).unwrap_or(max),
            None => anyhow::bail!("Parameter {} must be an integer", name),
        },
        Some(_) => anyhow::bail!("Parameter {} must be an integer", name),
    };
    Ok(value.clamp(min, max))
}
