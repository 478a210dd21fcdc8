// ABOUTME: Transport implementations (ACP subprocess, scripted mock).
// ABOUTME: Each transport implements the AgentTransport trait.

pub mod mock;

#[cfg(feature = "acp")]
pub mod acp;
