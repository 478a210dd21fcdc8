// ABOUTME: Wires config into the running services: registry, skills, orchestrator, handler, skill API.
// ABOUTME: Shared by the binary and the end-to-end tests.

use crate::skill_api::{SkillApiServer, SkillApiSettings};
use anyhow::{Context, Result};
use murmur_agent::{TransportFactory, TransportRegistry};
use murmur_core::config::Config;
use murmur_core::context::TemplateContextAssembler;
use murmur_core::flags::InteractionFlags;
use murmur_core::memory::SqliteMemoryStore;
use murmur_core::orchestrator::{Collaborators, OrchestratorConfig, SessionOrchestrator};
use murmur_core::prompts::PromptTemplates;
use murmur_core::rate_limit::RateLimiter;
use murmur_core::session::SessionRegistry;
use murmur_core::skills::{ContextHandler, MemoryHandler, ReactionHandler, ReplyHandler, SkillRegistry};
use murmur_core::traits::{MemoryStore, WorkspaceManager};
use murmur_core::workspace::FsWorkspaceManager;
use murmur_core::MessageHandler;
use std::sync::Arc;

pub struct Services {
    pub sessions: SessionRegistry,
    pub flags: Arc<InteractionFlags>,
    pub skills: SkillRegistry,
    pub workspaces: Arc<dyn WorkspaceManager>,
    pub memory: Arc<dyn MemoryStore>,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub handler: Arc<MessageHandler>,
    pub skill_api: SkillApiServer,
}

/// Resolve `agent.transport` against the built-in transports
pub fn transport_for(config: &Config) -> Result<TransportFactory> {
    TransportRegistry::default().resolve(&config.agent.transport)
}

/// Build every service from `config` and start the skill API. The agent is
/// told the bound listener address, so port 0 works end to end.
pub async fn start_services(config: &Config, transport: TransportFactory) -> Result<Services> {
    let root = config.workspace.root();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create workspace root {}", root.display()))?;

    let sessions = SessionRegistry::new(config.session.timeout());
    let flags = Arc::new(InteractionFlags::new());
    let memory: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::open(config.workspace.memory_db())?);
    let templates = Arc::new(PromptTemplates::load(&config.workspace.prompts_dir())?);
    let workspaces: Arc<dyn WorkspaceManager> = Arc::new(FsWorkspaceManager::new(root));

    let skills = SkillRegistry::new()
        .register(Arc::new(ReplyHandler::new(Arc::clone(&flags))))
        .register(Arc::new(ReactionHandler::new(Arc::clone(&flags))))
        .register(Arc::new(MemoryHandler::new(Arc::clone(&memory))))
        .register(Arc::new(ContextHandler::new()));

    let skill_api = SkillApiServer::new(
        sessions.clone(),
        skills.clone(),
        SkillApiSettings {
            dedup_ttl: config.skill_api.dedup_ttl(),
            cache_cleanup_interval: config.skill_api.cache_cleanup_interval(),
        },
    );
    let addr = skill_api.start(&config.skill_api_addr()).await?;
    let skill_api_url = format!("http://{}", addr);

    let collaborators = Collaborators {
        workspaces: Arc::clone(&workspaces),
        context: Arc::new(TemplateContextAssembler::new(
            Arc::clone(&templates),
            Arc::clone(&memory),
            config.bot.name.clone(),
        )),
        memory: Arc::clone(&memory),
        templates,
    };

    let mut orchestrator_config = OrchestratorConfig::new(config.agent.clone(), skill_api_url.as_str());
    orchestrator_config.bot_name = config.bot.name.clone();
    orchestrator_config.bot_id = config.bot.id.clone();

    let orchestrator = Arc::new(SessionOrchestrator::new(
        orchestrator_config,
        transport,
        sessions.clone(),
        Arc::clone(&flags),
        collaborators,
    ));
    let handler = Arc::new(MessageHandler::new(
        Arc::clone(&orchestrator),
        RateLimiter::new(config.rate_limit.clone()),
        config.whitelist.clone(),
    ));
    tracing::info!(
        workspace = %config.workspace.path,
        transport = %config.agent.transport,
        agent_kind = config.agent.kind.as_str(),
        skill_api = %skill_api_url,
        skills = skills.skill_names().len(),
        "Services initialized"
    );

    Ok(Services {
        sessions,
        flags,
        skills,
        workspaces,
        memory,
        orchestrator,
        handler,
        skill_api,
    })
}

impl Services {
    /// Stop background work. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.skill_api.stop().await;
        self.sessions.stop();
        self.handler.dispose();
        tracing::info!("Services stopped");
    }
}
