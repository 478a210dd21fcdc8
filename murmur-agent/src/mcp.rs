// ABOUTME: MCP server configuration (stdio/http/sse) and its ACP wire shape.
// ABOUTME: Validates each server's transport against the agent's negotiated capabilities.

use crate::capabilities::AgentCapabilities;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An MCP server the agent should connect to for the session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerConfig {
    Stdio {
        name: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env: Option<BTreeMap<String, String>>,
    },
    Http {
        name: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
    },
    Sse {
        name: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
    },
}

impl McpServerConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Stdio { name, .. } | Self::Http { name, .. } | Self::Sse { name, .. } => name,
        }
    }

    pub fn transport(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
            Self::Sse { .. } => "sse",
        }
    }
}

// Env values and headers routinely carry tokens
impl std::fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redacted(map: &Option<BTreeMap<String, String>>) -> Option<Vec<(&str, &str)>> {
            map.as_ref()
                .map(|m| m.keys().map(|k| (k.as_str(), "[REDACTED]")).collect())
        }
        match self {
            Self::Stdio {
                name,
                command,
                args,
                env,
            } => f
                .debug_struct("Stdio")
                .field("name", name)
                .field("command", command)
                .field("args", args)
                .field("env", &redacted(env))
                .finish(),
            Self::Http { name, url, headers } => f
                .debug_struct("Http")
                .field("name", name)
                .field("url", url)
                .field("headers", &redacted(headers))
                .finish(),
            Self::Sse { name, url, headers } => f
                .debug_struct("Sse")
                .field("name", name)
                .field("url", url)
                .field("headers", &redacted(headers))
                .finish(),
        }
    }
}

/// `{name, value}` pair used by ACP for env vars and HTTP headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

/// Stdio servers are untagged on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioServerWire {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<NameValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServerWire {
    #[serde(rename = "type")]
    pub transport: String,
    pub name: String,
    pub url: String,
    pub headers: Vec<NameValue>,
}

/// Wire shape sent in `session/new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerWire {
    Remote(RemoteServerWire),
    Stdio(StdioServerWire),
}

fn pairs(map: &Option<BTreeMap<String, String>>) -> Vec<NameValue> {
    map.iter()
        .flatten()
        .map(|(name, value)| NameValue {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

/// Normalize a config entry to its wire shape. Absent `args`, `env` and
/// `headers` become empty lists, never omitted fields.
pub fn convert_server_config(server: &McpServerConfig) -> McpServerWire {
    match server {
        McpServerConfig::Stdio {
            name,
            command,
            args,
            env,
        } => McpServerWire::Stdio(StdioServerWire {
            name: name.clone(),
            command: command.clone(),
            args: args.clone().unwrap_or_default(),
            env: pairs(env),
        }),
        McpServerConfig::Http { name, url, headers } => McpServerWire::Remote(RemoteServerWire {
            transport: "http".to_string(),
            name: name.clone(),
            url: url.clone(),
            headers: pairs(headers),
        }),
        McpServerConfig::Sse { name, url, headers } => McpServerWire::Remote(RemoteServerWire {
            transport: "sse".to_string(),
            name: name.clone(),
            url: url.clone(),
            headers: pairs(headers),
        }),
    }
}

/// All-or-nothing transport check; the first unsupported server fails the call.
pub fn validate_server_transports(
    capabilities: &AgentCapabilities,
    servers: &[McpServerConfig],
) -> Result<()> {
    for server in servers {
        match server {
            McpServerConfig::Stdio { .. } => {}
            McpServerConfig::Http { name, .. } => {
                if !capabilities.http_mcp() {
                    anyhow::bail!(
                        "Agent does not support HTTP transport for MCP servers (server: {})",
                        name
                    );
                }
            }
            McpServerConfig::Sse { name, .. } => {
                if !capabilities.sse_mcp() {
                    anyhow::bail!(
                        "Agent does not support SSE transport for MCP servers (server: {})",
                        name
                    );
                }
            }
        }
    }
    Ok(())
}
