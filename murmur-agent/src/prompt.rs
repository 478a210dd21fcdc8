// ABOUTME: Prompt content sent to the agent and the stop reason it answers with.
// ABOUTME: Content blocks serialize to the ACP wire shape; stop reasons parse from snake_case strings.

use serde::{Deserialize, Serialize};

/// One content block of a prompt turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Inline image, base64 encoded
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Reference to a resource the agent can fetch itself (e.g. an attachment URL)
    ResourceLink {
        uri: String,
        name: String,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Prompt payload: plain text for agents without image support,
/// structured blocks otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl PromptContent {
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::text(text)],
            Self::Blocks(blocks) => blocks,
        }
    }

    /// Concatenated text of all text blocks
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Why a prompt turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    Cancelled,
    MaxTokens,
    MaxTurnRequests,
    Refusal,
    Other(String),
}

impl StopReason {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "end_turn" => Self::EndTurn,
            "cancelled" => Self::Cancelled,
            "max_tokens" => Self::MaxTokens,
            "max_turn_requests" => Self::MaxTurnRequests,
            "refusal" => Self::Refusal,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::EndTurn => "end_turn",
            Self::Cancelled => "cancelled",
            Self::MaxTokens => "max_tokens",
            Self::MaxTurnRequests => "max_turn_requests",
            Self::Refusal => "refusal",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one prompt turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptResponse {
    pub stop_reason: StopReason,
    /// Agent message text streamed during the turn (diagnostics only; user
    /// visible output goes through skills)
    pub agent_text: String,
}

impl PromptResponse {
    pub fn new(stop_reason: StopReason) -> Self {
        Self {
            stop_reason,
            agent_text: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_block_wire_shape() {
        let block = ContentBlock::Image {
            data: "aGVsbG8=".to_string(),
            mime_type: "image/png".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({"type": "image", "data": "aGVsbG8=", "mimeType": "image/png"})
        );
    }

    #[test]
    fn test_resource_link_wire_shape() {
        let block = ContentBlock::ResourceLink {
            uri: "https://cdn.example.com/a.jpg".to_string(),
            name: "a.jpg".to_string(),
            mime_type: None,
        };
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({"type": "resource_link", "uri": "https://cdn.example.com/a.jpg", "name": "a.jpg"})
        );
    }

    #[test]
    fn test_stop_reason_round_trips_unknown_values() {
        let reason = StopReason::from_wire("context_overflow");
        assert_eq!(reason, StopReason::Other("context_overflow".to_string()));
        assert_eq!(reason.to_string(), "context_overflow");
        assert_eq!(StopReason::from_wire("end_turn"), StopReason::EndTurn);
    }

    #[test]
    fn test_text_content_becomes_single_block() {
        let blocks = PromptContent::Text("hi".to_string()).into_blocks();
        assert_eq!(blocks, vec![ContentBlock::text("hi")]);
    }
}
