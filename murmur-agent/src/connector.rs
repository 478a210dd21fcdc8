// ABOUTME: AgentConnector - protocol client for one agent process.
// ABOUTME: Handshake, capability queries, MCP transport validation, sessions, prompting, disconnect.

use crate::capabilities::AgentCapabilities;
use crate::mcp::{self, McpServerConfig, McpServerWire};
use crate::prompt::{PromptContent, PromptResponse};
use crate::transport::AgentTransport;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Connected,
    Disconnected,
}

/// Client side of one agent process.
///
/// The connector is single-owner: the orchestrator drives it sequentially,
/// so there is never more than one outstanding prompt per connector.
pub struct AgentConnector {
    transport: Box<dyn AgentTransport>,
    capabilities: Option<AgentCapabilities>,
    working_dir: PathBuf,
    mcp_servers: Vec<McpServerConfig>,
    state: State,
}

impl AgentConnector {
    pub fn new(
        transport: Box<dyn AgentTransport>,
        working_dir: impl Into<PathBuf>,
        mcp_servers: Vec<McpServerConfig>,
    ) -> Self {
        Self {
            transport,
            capabilities: None,
            working_dir: working_dir.into(),
            mcp_servers,
            state: State::Idle,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    /// Negotiated capabilities; `None` before `connect` or when the agent
    /// advertised nothing.
    pub fn capabilities(&self) -> Option<&AgentCapabilities> {
        self.capabilities.as_ref()
    }

    /// Start the agent and run the initialize handshake
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == State::Connected {
            return Ok(());
        }
        if self.state == State::Disconnected {
            anyhow::bail!("Connector has already been disconnected");
        }

        tracing::info!(
            transport = self.transport.name(),
            cwd = %self.working_dir.display(),
            "Connecting to agent"
        );
        let capabilities = self
            .transport
            .initialize()
            .await
            .context("Agent initialization failed")?;

        tracing::debug!(?capabilities, "Agent capabilities negotiated");
        self.capabilities = capabilities;
        self.state = State::Connected;
        Ok(())
    }

    /// Stop the agent. Safe to call in any state, any number of times.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == State::Disconnected {
            return Ok(());
        }
        self.state = State::Disconnected;
        tracing::debug!(transport = self.transport.name(), "Disconnecting agent");
        self.transport
            .shutdown()
            .await
            .context("Failed to shut down agent transport")
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            State::Connected => Ok(()),
            State::Idle => anyhow::bail!("Agent is not connected"),
            State::Disconnected => anyhow::bail!("Agent has been disconnected"),
        }
    }

    /// Create a session with the configured MCP servers.
    ///
    /// Transport validation runs first; an unsupported server fails the
    /// call before anything is sent to the agent.
    pub async fn create_session(&mut self) -> Result<String> {
        self.ensure_connected()?;
        self.validate_mcp_server_transports(&self.mcp_servers)?;

        let servers: Vec<McpServerWire> = self
            .mcp_servers
            .iter()
            .map(|s| self.convert_mcp_server_config(s))
            .collect();

        let session_id = self
            .transport
            .new_session(&self.working_dir, &servers)
            .await
            .context("Failed to create agent session")?;

        tracing::info!(session_id = %session_id, mcp_servers = servers.len(), "Agent session created");
        Ok(session_id)
    }

    pub async fn set_session_model(&mut self, session_id: &str, model_id: &str) -> Result<()> {
        self.ensure_connected()?;
        self.transport
            .set_session_model(session_id, model_id)
            .await
            .with_context(|| format!("Failed to set session model to {}", model_id))
    }

    pub async fn prompt(&mut self, session_id: &str, content: PromptContent) -> Result<PromptResponse> {
        self.ensure_connected()?;
        tracing::debug!(session_id = %session_id, prompt_len = content.text().len(), "Sending prompt");
        let response = self
            .transport
            .prompt(session_id, content.into_blocks())
            .await
            .context("Agent prompt failed")?;
        tracing::debug!(
            session_id = %session_id,
            stop_reason = %response.stop_reason,
            "Prompt turn finished"
        );
        Ok(response)
    }

    pub fn supports_http_transport(&self) -> bool {
        self.capabilities.as_ref().is_some_and(|c| c.http_mcp())
    }

    pub fn supports_sse_transport(&self) -> bool {
        self.capabilities.as_ref().is_some_and(|c| c.sse_mcp())
    }

    pub fn supports_load_session(&self) -> bool {
        self.capabilities.as_ref().is_some_and(|c| c.load_session())
    }

    /// Per-session model selection, a property of the transport rather than
    /// of the negotiated capabilities
    pub fn supports_session_model(&self) -> bool {
        self.transport.supports_session_model()
    }

    pub fn supports_image_content(&self) -> bool {
        self.capabilities.as_ref().is_some_and(|c| c.image_prompts())
    }

    pub fn validate_mcp_server_transports(&self, servers: &[McpServerConfig]) -> Result<()> {
        let empty = AgentCapabilities::default();
        mcp::validate_server_transports(self.capabilities.as_ref().unwrap_or(&empty), servers)
    }

    pub fn convert_mcp_server_config(&self, server: &McpServerConfig) -> McpServerWire {
        mcp::convert_server_config(server)
    }
}
