// ABOUTME: Collaborator traits and data types the orchestration layer consumes.
// ABOUTME: Platform adapters, normalized events, workspaces, context assembly and memory storage.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// Events
// =============================================================================

/// Attachment on an incoming message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("image/"))
    }
}

/// Platform-independent inbound message. A unit of work is identified by
/// `(platform, message_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub platform: String,
    pub channel_id: String,
    pub user_id: String,
    pub message_id: String,
    pub is_dm: bool,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl NormalizedEvent {
    /// `{platform}/{userId}`, the key scoping memory and one-shot state
    pub fn workspace_key(&self) -> String {
        workspace_key(&self.platform, &self.user_id)
    }

    pub fn work_key(&self) -> String {
        format!("{}:{}", self.platform, self.message_id)
    }

    pub fn image_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|a| a.is_image())
    }
}

pub fn workspace_key(platform: &str, user_id: &str) -> String {
    format!("{}/{}", platform, user_id)
}

/// A message from channel history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub message_id: String,
    pub user_id: String,
    pub username: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_bot: bool,
}

// =============================================================================
// Platform adapter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlatformCapabilities {
    pub supports_reactions: bool,
    pub supports_edit: bool,
    pub supports_attachments: bool,
    pub max_message_length: usize,
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self {
            supports_reactions: true,
            supports_edit: true,
            supports_attachments: false,
            max_message_length: 2000,
        }
    }
}

/// Outbound side of one chat platform
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Platform identifier (e.g., "discord", "misskey", "console")
    fn platform_id(&self) -> &str;

    fn capabilities(&self) -> PlatformCapabilities;

    /// Post a message, returning the platform message id
    async fn send_reply(
        &self,
        channel_id: &str,
        message: &str,
        attachments: &[PathBuf],
    ) -> Result<String>;

    async fn edit_message(&self, channel_id: &str, message_id: &str, message: &str) -> Result<()>;

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    /// Most recent messages, oldest first
    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>>;

    async fn get_username(&self, user_id: &str) -> Result<String>;
}

// =============================================================================
// Workspaces and context
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// `{platform}/{userId}`
    pub key: String,
    pub root: PathBuf,
    /// Working directory handed to the agent process
    pub agent_dir: PathBuf,
}

impl Workspace {
    pub fn agent_dir(&self) -> &Path {
        &self.agent_dir
    }
}

#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    async fn get_or_create_workspace(&self, event: &NormalizedEvent) -> Result<Workspace>;

    /// Workspace for a key with no triggering event (spontaneous, maintenance)
    async fn workspace_for_key(&self, key: &str) -> Result<Workspace>;

    /// All known workspace keys
    async fn list_workspace_keys(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub user_prompt: String,
    pub estimated_tokens: usize,
}

impl AssembledContext {
    /// System and user prompt as one prompt turn
    pub fn combined(&self) -> String {
        if self.system_prompt.is_empty() {
            return self.user_prompt.clone();
        }
        format!("{}\n\n---\n\n{}", self.system_prompt, self.user_prompt)
    }
}

/// Everything the assembler needs for one interaction
#[derive(Debug, Clone)]
pub struct ContextRequest<'a> {
    pub event: &'a NormalizedEvent,
    pub workspace: &'a Workspace,
    pub session_id: &'a str,
    pub skill_api_url: &'a str,
    pub recent_messages: &'a [ChannelMessage],
}

#[async_trait]
pub trait ContextAssembler: Send + Sync {
    async fn assemble(&self, request: ContextRequest<'_>) -> Result<AssembledContext>;
}

// =============================================================================
// Memory
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
}

impl Importance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for Importance {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => anyhow::bail!("Invalid importance: {} (expected low, medium or high)", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            _ => anyhow::bail!("Invalid visibility: {} (expected public or private)", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub workspace_key: String,
    pub content: String,
    pub importance: Importance,
    pub visibility: Visibility,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for one memory; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryPatch {
    pub enabled: Option<bool>,
    pub visibility: Option<Visibility>,
    pub importance: Option<Importance>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.visibility.is_none() && self.importance.is_none()
    }
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save(
        &self,
        workspace_key: &str,
        content: &str,
        importance: Importance,
    ) -> Result<Memory>;

    async fn search(&self, workspace_key: &str, query: &str, limit: usize) -> Result<Vec<Memory>>;

    /// Returns the updated memory, or `None` when no such memory exists in the workspace
    async fn patch(
        &self,
        workspace_key: &str,
        memory_id: &str,
        patch: MemoryPatch,
    ) -> Result<Option<Memory>>;

    /// Enabled high-importance memories, newest first
    async fn get_important_memories(&self, workspace_key: &str, limit: usize)
        -> Result<Vec<Memory>>;

    /// All enabled memories, oldest first
    async fn dump_enabled_memories(&self, workspace_key: &str) -> Result<Vec<Memory>>;
}
