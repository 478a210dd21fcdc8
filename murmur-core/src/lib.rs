// ABOUTME: Session orchestration and skill protocol layer for the murmur chat bot.
// ABOUTME: Rate limiting, session registry, one-shot skills, the orchestrator and its collaborators.

pub mod config;
pub mod context;
pub mod flags;
pub mod memory;
pub mod message_handler;
pub mod metrics;
pub mod orchestrator;
pub mod paths;
pub mod prompts;
pub mod rate_limit;
pub mod session;
pub mod skills;
pub mod testing;
pub mod traits;
pub mod workspace;

pub use config::Config;
pub use flags::InteractionFlags;
pub use message_handler::MessageHandler;
pub use orchestrator::{
    Collaborators, OrchestratorConfig, ResearchItem, SessionOrchestrator, SessionResponse,
    SpontaneousOptions,
};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use session::{Session, SessionRegistry};
pub use skills::{SkillContext, SkillRegistry, SkillResult};

// Re-export traits and data types for adapter implementors
pub use traits::{
    Attachment, ChannelMessage, ContextAssembler, MemoryStore, NormalizedEvent,
    PlatformAdapter, PlatformCapabilities, Workspace, WorkspaceManager,
};
