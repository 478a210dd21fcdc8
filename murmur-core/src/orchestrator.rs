// ABOUTME: Session orchestration: turns one event into a supervised agent session with bounded retries.
// ABOUTME: Message, spontaneous, self-research and maintenance flows share one connect/prompt/disconnect core.

use crate::context::format_messages;
use crate::flags::InteractionFlags;
use crate::metrics;
use crate::prompts::{PromptTemplates, TemplateKind};
use crate::session::{NewSession, Session, SessionRegistry};
use crate::traits::{
    workspace_key, ChannelMessage, ContextAssembler, ContextRequest, MemoryStore,
    NormalizedEvent, PlatformAdapter, WorkspaceManager,
};
use crate::workspace::parse_workspace_key;
use anyhow::Result;
use murmur_agent::{
    AgentConfig, AgentConnector, ContentBlock, PromptContent, StopReason, TransportFactory,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub const CLEAR_COMMAND: &str = "/clear";
pub const NO_MEMORIES_PLACEHOLDER: &str = "(No enabled memories found)";

/// Outcome of one orchestrated interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    pub reply_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Repeated delivery of an event that is still in flight; the first
    /// delivery owns the reply and any error notice.
    #[serde(skip)]
    pub duplicate: bool,
}

impl SessionResponse {
    pub fn succeeded(reply_sent: bool) -> Self {
        Self {
            success: true,
            reply_sent,
            reaction_sent: None,
            error: None,
            duplicate: false,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            reply_sent: false,
            reaction_sent: None,
            error: Some(error.into()),
            duplicate: false,
        }
    }

    pub fn already_processing(work_key: &str) -> Self {
        Self {
            duplicate: true,
            ..Self::failed(format!("Message {} is already being processed", work_key))
        }
    }

    fn with_flags(mut self, reply_sent: bool, reaction_sent: Option<bool>) -> Self {
        self.reply_sent = reply_sent;
        self.reaction_sent = reaction_sent;
        self
    }

    /// The bootstrap layer posts an error notice only in this case
    pub fn needs_error_notice(&self) -> bool {
        !self.success && !self.reply_sent && !self.duplicate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Message,
    Spontaneous,
    SelfResearch,
    Maintenance,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Spontaneous => "spontaneous",
            Self::SelfResearch => "self_research",
            Self::Maintenance => "maintenance",
        }
    }
}

/// How a finished `end_turn` is judged
#[derive(Debug, Clone, Copy)]
enum Completion {
    /// A reply or reaction must exist, else re-prompt up to the retry bound
    RequireReply { failure: &'static str },
    /// `end_turn` alone is success
    StopReason,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub agent: AgentConfig,
    pub bot_name: String,
    pub bot_id: String,
    /// Base URL of the skill API, e.g. http://127.0.0.1:3939
    pub skill_api_url: String,
    pub recent_message_limit: usize,
}

impl OrchestratorConfig {
    pub fn new(agent: AgentConfig, skill_api_url: impl Into<String>) -> Self {
        Self {
            agent,
            bot_name: "murmur".to_string(),
            bot_id: "murmur".to_string(),
            skill_api_url: skill_api_url.into(),
            recent_message_limit: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpontaneousOptions {
    pub bot_id: String,
    pub fetch_recent_messages: bool,
}

/// A topic queued for a self-research session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

fn render_research_items(items: &[ResearchItem]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n## Research items\n");
    for item in items {
        out.push_str("- ");
        out.push_str(&item.title);
        if let Some(url) = &item.url {
            out.push_str(&format!(" <{}>", url));
        }
        if let Some(summary) = &item.summary {
            out.push_str(&format!(": {}", summary));
        }
        out.push('\n');
    }
    out
}

/// External collaborators the orchestrator consumes
#[derive(Clone)]
pub struct Collaborators {
    pub workspaces: Arc<dyn WorkspaceManager>,
    pub context: Arc<dyn ContextAssembler>,
    pub memory: Arc<dyn MemoryStore>,
    pub templates: Arc<PromptTemplates>,
}

pub struct SessionOrchestrator {
    config: OrchestratorConfig,
    transport: TransportFactory,
    sessions: SessionRegistry,
    flags: Arc<InteractionFlags>,
    collaborators: Collaborators,
}

impl SessionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        transport: TransportFactory,
        sessions: SessionRegistry,
        flags: Arc<InteractionFlags>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            transport,
            sessions,
            flags,
            collaborators,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn flags(&self) -> &Arc<InteractionFlags> {
        &self.flags
    }

    // =========================================================================
    // Flows
    // =========================================================================

    /// Handle one user message end to end
    pub async fn process_message(
        &self,
        event: &NormalizedEvent,
        adapter: Arc<dyn PlatformAdapter>,
    ) -> SessionResponse {
        if event.content.trim() == CLEAR_COMMAND {
            tracing::info!(
                platform = %event.platform,
                channel_id = %event.channel_id,
                "Clear command received"
            );
            return SessionResponse::succeeded(false);
        }

        let started = Instant::now();
        let kind = SessionKind::Message;
        let response = match self.prepare_message(event, Arc::clone(&adapter)).await {
            Ok((session, context)) => {
                self.run(
                    kind,
                    &session,
                    context,
                    Completion::RequireReply {
                        failure: "Agent did not generate a reply",
                    },
                )
                .await
            }
            Err(e) => {
                tracing::error!(
                    platform = %event.platform,
                    message_id = %event.message_id,
                    error = %e,
                    "Failed to prepare session"
                );
                metrics::record_error("session_prepare");
                SessionResponse::failed(format!("{:#}", e))
            }
        };
        self.finish(kind, started, response)
    }

    async fn prepare_message(
        &self,
        event: &NormalizedEvent,
        adapter: Arc<dyn PlatformAdapter>,
    ) -> Result<(Arc<Session>, PromptContent)> {
        let workspace = self
            .collaborators
            .workspaces
            .get_or_create_workspace(event)
            .await?;

        let recent = self
            .recent_messages(adapter.as_ref(), &event.channel_id)
            .await;

        let session = self.sessions.register(NewSession {
            workspace,
            channel_id: event.channel_id.clone(),
            user_id: event.user_id.clone(),
            adapter,
            event: Some(event.clone()),
        });

        let context = self
            .collaborators
            .context
            .assemble(ContextRequest {
                event,
                workspace: &session.workspace,
                session_id: &session.id,
                skill_api_url: &self.config.skill_api_url,
                recent_messages: &recent,
            })
            .await?;
        tracing::debug!(
            session_id = %session.id,
            estimated_tokens = context.estimated_tokens,
            "Context assembled"
        );

        Ok((session, PromptContent::Text(context.combined())))
    }

    /// Unprompted post into a channel
    pub async fn process_spontaneous_post(
        &self,
        platform: &str,
        channel_id: &str,
        adapter: Arc<dyn PlatformAdapter>,
        options: SpontaneousOptions,
    ) -> SessionResponse {
        let started = Instant::now();
        let kind = SessionKind::Spontaneous;
        let key = workspace_key(platform, &options.bot_id);

        let prepared = async {
            let workspace = self.collaborators.workspaces.workspace_for_key(&key).await?;
            let recent = if options.fetch_recent_messages {
                self.recent_messages(adapter.as_ref(), channel_id).await
            } else {
                Vec::new()
            };
            let session = self.sessions.register(NewSession {
                workspace,
                channel_id: channel_id.to_string(),
                user_id: options.bot_id.clone(),
                adapter: Arc::clone(&adapter),
                event: None,
            });

            let mut vars = self.base_vars(&session, platform);
            vars.insert(
                "recent_messages",
                if options.fetch_recent_messages {
                    format_messages(&recent)
                } else {
                    "(not available)".to_string()
                },
            );
            let prompt = self
                .collaborators
                .templates
                .render(TemplateKind::Spontaneous, &vars);
            anyhow::Ok((session, PromptContent::Text(prompt)))
        }
        .await;

        let response = match prepared {
            Ok((session, prompt)) => {
                self.run(
                    kind,
                    &session,
                    prompt,
                    Completion::RequireReply {
                        failure: "Agent did not send a reply",
                    },
                )
                .await
            }
            Err(e) => SessionResponse::failed(format!("{:#}", e)),
        };
        self.finish(kind, started, response)
    }

    /// Research session over queued items; side effects are memory writes
    pub async fn process_self_research(
        &self,
        items: &[ResearchItem],
        adapter: Arc<dyn PlatformAdapter>,
    ) -> SessionResponse {
        let started = Instant::now();
        let kind = SessionKind::SelfResearch;
        let platform = adapter.platform_id().to_string();
        let key = workspace_key(&platform, &self.config.bot_id);

        let prepared = async {
            let workspace = self.collaborators.workspaces.workspace_for_key(&key).await?;
            let session = self.sessions.register(NewSession {
                workspace,
                channel_id: "self-research".to_string(),
                user_id: self.config.bot_id.clone(),
                adapter: Arc::clone(&adapter),
                event: None,
            });
            let mut vars = self.base_vars(&session, &platform);
            vars.insert("research_items", render_research_items(items));
            let prompt = self
                .collaborators
                .templates
                .render(TemplateKind::SelfResearch, &vars);
            anyhow::Ok((session, PromptContent::Text(prompt)))
        }
        .await;

        let response = match prepared {
            Ok((session, prompt)) => {
                self.run(kind, &session, prompt, Completion::StopReason).await
            }
            Err(e) => SessionResponse::failed(format!("{:#}", e)),
        };
        self.finish(kind, started, response)
    }

    /// Let the agent tidy one user's memories
    pub async fn process_memory_maintenance(
        &self,
        workspace_key: &str,
        adapter: Arc<dyn PlatformAdapter>,
    ) -> SessionResponse {
        let Some((platform, user_id)) = parse_workspace_key(workspace_key) else {
            tracing::warn!(workspace = %workspace_key, "Rejected maintenance for invalid workspace key");
            return SessionResponse::failed(format!("Invalid workspace key: {}", workspace_key));
        };

        let started = Instant::now();
        let kind = SessionKind::Maintenance;

        let prepared = async {
            let workspace = self
                .collaborators
                .workspaces
                .workspace_for_key(workspace_key)
                .await?;
            let memories = self
                .collaborators
                .memory
                .dump_enabled_memories(workspace_key)
                .await?;
            let session = self.sessions.register(NewSession {
                workspace,
                channel_id: "maintenance".to_string(),
                user_id: user_id.to_string(),
                adapter: Arc::clone(&adapter),
                event: None,
            });

            let mut vars = self.base_vars(&session, platform);
            vars.insert(
                "memories",
                if memories.is_empty() {
                    NO_MEMORIES_PLACEHOLDER.to_string()
                } else {
                    crate::context::format_memories(&memories)
                },
            );
            let prompt = self
                .collaborators
                .templates
                .render(TemplateKind::Maintenance, &vars);
            anyhow::Ok((session, PromptContent::Text(prompt)))
        }
        .await;

        let response = match prepared {
            Ok((session, prompt)) => {
                self.run(kind, &session, prompt, Completion::StopReason).await
            }
            Err(e) => SessionResponse::failed(format!("{:#}", e)),
        };
        self.finish(kind, started, response)
    }

    // =========================================================================
    // Shared core
    // =========================================================================

    fn base_vars(&self, session: &Session, platform: &str) -> HashMap<&'static str, String> {
        HashMap::from([
            ("bot_name", self.config.bot_name.clone()),
            ("platform", platform.to_string()),
            ("session_id", session.id.clone()),
            ("skill_api_url", self.config.skill_api_url.clone()),
            ("workspace_key", session.workspace.key.clone()),
        ])
    }

    async fn recent_messages(
        &self,
        adapter: &dyn PlatformAdapter,
        channel_id: &str,
    ) -> Vec<ChannelMessage> {
        match adapter
            .fetch_recent_messages(channel_id, self.config.recent_message_limit)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, error = %e, "Failed to fetch recent messages");
                Vec::new()
            }
        }
    }

    fn finish(&self, kind: SessionKind, started: Instant, response: SessionResponse) -> SessionResponse {
        let outcome = if response.success { "success" } else { "failure" };
        metrics::record_session(kind.as_str(), outcome);
        metrics::record_session_duration(kind.as_str(), started.elapsed());
        tracing::info!(
            kind = kind.as_str(),
            success = response.success,
            reply_sent = response.reply_sent,
            error = ?response.error,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Session finished"
        );
        response
    }

    fn flag_response(&self, kind: SessionKind, session: &Session, base: SessionResponse) -> SessionResponse {
        let state = self.flags.state(session.workspace_key(), &session.channel_id);
        let reaction = match kind {
            SessionKind::Message => Some(state.reaction_sent),
            _ => None,
        };
        base.with_flags(state.reply_sent, reaction)
    }

    /// Spawn the agent, drive it, and always disconnect
    async fn run(
        &self,
        kind: SessionKind,
        session: &Arc<Session>,
        initial: PromptContent,
        completion: Completion,
    ) -> SessionResponse {
        let transport = match (self.transport)(&self.config.agent, session.agent_dir()) {
            Ok(transport) => transport,
            Err(e) => {
                metrics::record_error("transport_create");
                return self.flag_response(
                    kind,
                    session,
                    SessionResponse::failed(format!("Failed to start agent: {:#}", e)),
                );
            }
        };
        let mut connector = AgentConnector::new(
            transport,
            session.agent_dir(),
            self.config.agent.mcp_servers.clone(),
        );

        tracing::info!(
            kind = kind.as_str(),
            session_id = %session.id,
            workspace = %session.workspace.key,
            channel_id = %session.channel_id,
            "Starting agent session"
        );

        let result = self
            .drive(kind, session, &mut connector, initial, completion)
            .await;

        if let Err(e) = connector.disconnect().await {
            tracing::warn!(session_id = %session.id, error = %e, "Agent disconnect failed");
        }

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    kind = kind.as_str(),
                    session_id = %session.id,
                    error = %format!("{:#}", e),
                    "Agent session failed"
                );
                metrics::record_error("agent");
                self.flag_response(kind, session, SessionResponse::failed(format!("{:#}", e)))
            }
        }
    }

    async fn drive(
        &self,
        kind: SessionKind,
        session: &Arc<Session>,
        connector: &mut AgentConnector,
        initial: PromptContent,
        completion: Completion,
    ) -> Result<SessionResponse> {
        connector.connect().await?;
        let agent_session = connector.create_session().await?;

        if let Some(model) = &self.config.agent.model {
            if !connector.supports_session_model() {
                tracing::debug!(model = %model, "Model applied at agent launch");
            } else if let Err(e) = connector.set_session_model(&agent_session, model).await {
                tracing::warn!(model = %model, error = %e, "Could not set session model, continuing");
            }
        }

        let mut content = self.with_images(connector, session, initial);
        let retry_limit = self.config.agent.reply_retry_limit();
        let mut retries = 0;

        loop {
            metrics::record_prompt(kind.as_str());
            let response = connector.prompt(&agent_session, content).await?;

            match &response.stop_reason {
                StopReason::EndTurn => {}
                StopReason::Cancelled => {
                    return Ok(self.flag_response(
                        kind,
                        session,
                        SessionResponse::failed("Session was cancelled"),
                    ));
                }
                other => {
                    return Ok(self.flag_response(
                        kind,
                        session,
                        SessionResponse::failed(format!("Unexpected stop reason: {}", other)),
                    ));
                }
            }

            let Completion::RequireReply { failure } = completion else {
                return Ok(self.flag_response(kind, session, SessionResponse::succeeded(false)));
            };

            let state = self.flags.state(session.workspace_key(), &session.channel_id);
            if state.reply_sent || state.reaction_sent {
                return Ok(self.flag_response(kind, session, SessionResponse::succeeded(false)));
            }

            if retries >= retry_limit {
                tracing::warn!(
                    session_id = %session.id,
                    attempts = retries + 1,
                    "Agent ended its turns without replying"
                );
                return Ok(self.flag_response(kind, session, SessionResponse::failed(failure)));
            }

            retries += 1;
            metrics::record_retry(kind.as_str());
            tracing::info!(
                session_id = %session.id,
                retry = retries,
                limit = retry_limit,
                "Turn ended without a reply, nudging agent"
            );
            let vars = self.base_vars(session, session.adapter.platform_id());
            content = PromptContent::Text(
                self.collaborators
                    .templates
                    .render(TemplateKind::RetryNudge, &vars),
            );
        }
    }

    /// Attach image links as structured blocks when the agent accepts images
    fn with_images(
        &self,
        connector: &AgentConnector,
        session: &Session,
        content: PromptContent,
    ) -> PromptContent {
        let Some(event) = &session.event else {
            return content;
        };
        if !connector.supports_image_content() {
            return content;
        }
        let images: Vec<ContentBlock> = event
            .image_attachments()
            .map(|a| ContentBlock::ResourceLink {
                uri: a.url.clone(),
                name: a.filename.clone(),
                mime_type: a.mime_type.clone(),
            })
            .collect();
        if images.is_empty() {
            return content;
        }
        let mut blocks = content.into_blocks();
        blocks.extend(images);
        PromptContent::Blocks(blocks)
    }
}
