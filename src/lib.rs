// ABOUTME: Root library for the murmur bot binary: skill API server, platforms, schedulers.
// ABOUTME: Orchestration lives in murmur-core; agent transports live in murmur-agent.

pub mod app;
pub mod platform;
pub mod scheduler;
pub mod skill_api;

// Re-export core modules
pub use murmur_core::config;
pub use murmur_core::metrics;
pub use murmur_core::orchestrator;
pub use murmur_core::paths;
pub use murmur_core::traits;
