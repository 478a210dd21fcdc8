// ABOUTME: Agent capability flags reported during the initialize handshake.
// ABOUTME: Every flag is optional; a missing flag is read as unsupported, never as true.

use serde::{Deserialize, Serialize};

/// Capabilities advertised by the agent in its initialize response.
///
/// Mirrors the wire object (`loadSession`, `promptCapabilities`,
/// `mcpCapabilities`) with every leaf kept as `Option<bool>` so that
/// "absent" survives deserialization. Read flags through the accessor
/// methods, which fold `None` and `Some(false)` together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_session: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_capabilities: Option<PromptCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_capabilities: Option<McpCapabilities>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_context: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse: Option<bool>,
}

/// Only an explicit `true` enables a capability.
pub fn enabled(flag: Option<bool>) -> bool {
    flag == Some(true)
}

impl AgentCapabilities {
    /// Parse the `agentCapabilities` object of an initialize response.
    ///
    /// Anything that is not an object (including `null`) yields the empty
    /// capability set rather than an error.
    pub fn from_wire(value: &serde_json::Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        match serde_json::from_value(value.clone()) {
            Ok(caps) => caps,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed agent capabilities, treating all as unsupported");
                Self::default()
            }
        }
    }

    pub fn load_session(&self) -> bool {
        enabled(self.load_session)
    }

    pub fn image_prompts(&self) -> bool {
        enabled(self.prompt_capabilities.as_ref().and_then(|p| p.image))
    }

    pub fn http_mcp(&self) -> bool {
        enabled(self.mcp_capabilities.as_ref().and_then(|m| m.http))
    }

    pub fn sse_mcp(&self) -> bool {
        enabled(self.mcp_capabilities.as_ref().and_then(|m| m.sse))
    }

    /// Builder used by tests and the mock transport.
    pub fn with_http_mcp(mut self, value: bool) -> Self {
        self.mcp_capabilities.get_or_insert_with(Default::default).http = Some(value);
        self
    }

    pub fn with_sse_mcp(mut self, value: bool) -> Self {
        self.mcp_capabilities.get_or_insert_with(Default::default).sse = Some(value);
        self
    }

    pub fn with_image_prompts(mut self, value: bool) -> Self {
        self.prompt_capabilities
            .get_or_insert_with(Default::default)
            .image = Some(value);
        self
    }

    pub fn with_load_session(mut self, value: bool) -> Self {
        self.load_session = Some(value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_object_means_unsupported() {
        let caps = AgentCapabilities::from_wire(&serde_json::Value::Null);
        assert!(!caps.load_session());
        assert!(!caps.image_prompts());
        assert!(!caps.http_mcp());
        assert!(!caps.sse_mcp());
    }

    #[test]
    fn test_partial_object_keeps_absent_fields_false() {
        let caps = AgentCapabilities::from_wire(&json!({
            "mcpCapabilities": { "http": true }
        }));
        assert!(caps.http_mcp());
        assert!(!caps.sse_mcp());
        assert!(!caps.image_prompts());
        assert_eq!(caps.mcp_capabilities.as_ref().unwrap().sse, None);
    }

    #[test]
    fn test_explicit_false_matches_absent() {
        let explicit = AgentCapabilities::from_wire(&json!({ "loadSession": false }));
        let absent = AgentCapabilities::from_wire(&json!({}));
        assert_eq!(explicit.load_session(), absent.load_session());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let caps = AgentCapabilities::from_wire(&json!({
            "loadSession": true,
            "promptCapabilities": { "image": true, "embeddedContext": false },
            "_meta": { "vendor": "x" }
        }));
        assert!(caps.load_session());
        assert!(caps.image_prompts());
    }

    #[test]
    fn test_malformed_field_falls_back_to_empty() {
        let caps = AgentCapabilities::from_wire(&json!({ "loadSession": "yes" }));
        assert_eq!(caps, AgentCapabilities::default());
    }
}
