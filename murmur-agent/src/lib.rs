// ABOUTME: Agent connector for murmur: drives one external agent process per interaction.
// ABOUTME: Capability negotiation, MCP transport validation, and pluggable transports (ACP, mock).

pub mod capabilities;
pub mod config;
pub mod connector;
pub mod mcp;
pub mod prompt;
pub mod registry;
pub mod transport;

pub mod backends;

pub use capabilities::AgentCapabilities;
pub use config::{AgentConfig, AgentKind};
pub use connector::AgentConnector;
pub use mcp::{McpServerConfig, McpServerWire};
pub use prompt::{ContentBlock, PromptContent, PromptResponse, StopReason};
pub use registry::TransportRegistry;
pub use transport::{AgentTransport, TransportFactory};
