// ABOUTME: AgentTransport trait - the wire seam between the connector and an agent process.
// ABOUTME: Implemented by the ACP subprocess transport and the scripted mock transport.

use crate::capabilities::AgentCapabilities;
use crate::config::AgentConfig;
use crate::mcp::McpServerWire;
use crate::prompt::{ContentBlock, PromptResponse};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Raw protocol operations against one agent process.
///
/// Implementations must be `Send` so a connector can be driven from any
/// tokio task; transports with `!Send` internals (ACP) run them on a
/// dedicated worker thread and talk to it over channels.
#[async_trait]
pub trait AgentTransport: Send {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Start the agent and perform the initialize handshake.
    ///
    /// Returns the advertised capabilities, or `None` when the agent sent
    /// no capabilities object at all.
    async fn initialize(&mut self) -> Result<Option<AgentCapabilities>>;

    /// Create a protocol session rooted at `cwd`
    async fn new_session(&mut self, cwd: &Path, mcp_servers: &[McpServerWire]) -> Result<String>;

    /// Whether `set_session_model` can succeed. Transports that apply the
    /// model at launch return `false` so callers skip the request.
    fn supports_session_model(&self) -> bool {
        true
    }

    async fn set_session_model(&mut self, session_id: &str, model_id: &str) -> Result<()>;

    /// Run one prompt turn to completion
    async fn prompt(&mut self, session_id: &str, content: Vec<ContentBlock>)
        -> Result<PromptResponse>;

    /// Stop the agent process. Must tolerate repeated calls.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Creates a fresh transport for one interaction, given the agent config
/// and the working directory the agent should run in.
pub type TransportFactory =
    Arc<dyn Fn(&AgentConfig, &Path) -> Result<Box<dyn AgentTransport>> + Send + Sync>;
