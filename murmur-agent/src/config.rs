// ABOUTME: Agent launch configuration: which transport, which binary, which agent kind.
// ABOUTME: Agent kinds carry their default reply-retry bound and model environment variable.

use crate::mcp::McpServerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which agent implementation sits behind the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    #[default]
    ClaudeCode,
    Codex,
    Gemini,
    Custom,
}

impl AgentKind {
    /// How many times a turn that ended without a reply is re-prompted.
    pub fn default_reply_retries(self) -> u32 {
        match self {
            Self::ClaudeCode => 1,
            Self::Codex => 2,
            Self::Gemini => 2,
            Self::Custom => 1,
        }
    }

    /// Environment variable the agent reads its model from at launch
    pub fn model_env_var(self) -> Option<&'static str> {
        match self {
            Self::ClaudeCode => Some("ANTHROPIC_MODEL"),
            Self::Codex => Some("CODEX_MODEL"),
            Self::Gemini => Some("GEMINI_MODEL"),
            Self::Custom => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Custom => "custom",
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-code" | "claude" => Ok(Self::ClaudeCode),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            "custom" => Ok(Self::Custom),
            _ => anyhow::bail!("Unknown agent kind: {}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Transport name resolved through the registry ("acp", "mock")
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default)]
    pub kind: AgentKind,
    /// Agent binary (e.g. claude-code-acp, codex-acp)
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the agent process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Model id applied through `set_session_model` and the kind's model env var
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Override for the kind's default reply-retry bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

fn default_transport() -> String {
    "acp".to_string()
}

fn default_binary() -> String {
    "claude-code-acp".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            kind: AgentKind::default(),
            binary: default_binary(),
            args: Vec::new(),
            env: BTreeMap::new(),
            model: None,
            max_retries: None,
            mcp_servers: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn reply_retry_limit(&self) -> u32 {
        self.max_retries
            .unwrap_or_else(|| self.kind.default_reply_retries())
    }

    /// Environment for the spawned agent: configured vars plus the model var.
    pub fn launch_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if let (Some(model), Some(var)) = (&self.model, self.kind.model_env_var()) {
            env.entry(var.to_string()).or_insert_with(|| model.clone());
        }
        env
    }
}
