// ABOUTME: Prompt templates for each session kind with {{placeholder}} substitution.
// ABOUTME: Built-in defaults, optionally overridden by <name>.md files in a templates directory.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Message,
    Spontaneous,
    SelfResearch,
    Maintenance,
    RetryNudge,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 5] = [
        Self::Message,
        Self::Spontaneous,
        Self::SelfResearch,
        Self::Maintenance,
        Self::RetryNudge,
    ];

    /// File stem used for overrides
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Spontaneous => "spontaneous",
            Self::SelfResearch => "self-research",
            Self::Maintenance => "maintenance",
            Self::RetryNudge => "retry-nudge",
        }
    }

    fn default_text(self) -> &'static str {
        match self {
            Self::Message => DEFAULT_MESSAGE,
            Self::Spontaneous => DEFAULT_SPONTANEOUS,
            Self::SelfResearch => DEFAULT_SELF_RESEARCH,
            Self::Maintenance => DEFAULT_MAINTENANCE,
            Self::RetryNudge => DEFAULT_RETRY_NUDGE,
        }
    }
}

const SKILL_USAGE: &str = r#"## Skills

Every user-visible action goes through the skill API. Call it with an HTTP POST:

    curl -s -X POST {{skill_api_url}}/api/skill/<skill-name> \
      -H 'Content-Type: application/json' \
      -d '{"sessionId": "{{session_id}}", "parameters": { ... }}'

Available skills: send-reply {message, attachments?}, edit-reply {messageId, message},
react-message {emoji}, memory-save {content, importance?}, memory-search {query, limit?},
memory-patch {memory_id, enabled?, visibility?, importance?},
fetch-context {type: recent_messages|search_messages|user_info, query?, limit?}.
"#;

const DEFAULT_MESSAGE: &str = r#"You are {{bot_name}}, chatting on {{platform}}.

{{skills}}
Reply exactly once with send-reply. You may react once with react-message instead of, or in
addition to, replying. Text you print outside the skill API is never shown to anyone.

## What you remember about this user
{{memories}}

## Recent conversation
{{recent_messages}}
"#;

const DEFAULT_SPONTANEOUS: &str = r#"You are {{bot_name}}, chatting on {{platform}}.

{{skills}}
Nobody has addressed you. This is a spontaneous post: you are not responding to any user
message. Start a new topic or add something to the ongoing conversation, then post it once
with send-reply.

## Recent conversation
{{recent_messages}}
"#;

const DEFAULT_SELF_RESEARCH: &str = r#"You are {{bot_name}}. This is a quiet research session.
No one is waiting for a reply; do not send messages.

{{skills}}
Read about the topics below and save what you learn with memory-save.
{{research_items}}
"#;

const DEFAULT_MAINTENANCE: &str = r#"You are {{bot_name}}. This is a memory maintenance session for {{workspace_key}}.
No one is waiting for a reply; do not send messages.

{{skills}}
Review the memories below. Disable duplicates and stale entries with memory-patch, adjust
importance where it is wrong, and save consolidated summaries with memory-save.

## Enabled memories
{{memories}}
"#;

const DEFAULT_RETRY_NUDGE: &str = r#"Your turn ended without a reply. The user has not seen anything yet.
Send your answer now with the send-reply skill (sessionId {{session_id}})."#;

fn placeholder_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([a-zA-Z0-9_]+)\s*\}\}").ok())
        .as_ref()
}

/// Substitute `{{name}}` placeholders. Unknown placeholders render empty.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    let Some(re) = placeholder_re() else {
        return template.to_string();
    };
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match name {
            "skills" => render(SKILL_USAGE, vars),
            _ => vars.get(name).cloned().unwrap_or_else(|| {
                tracing::debug!(placeholder = %name, "Unbound template placeholder");
                String::new()
            }),
        }
    })
    .into_owned()
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    templates: HashMap<TemplateKind, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            templates: TemplateKind::ALL
                .iter()
                .map(|k| (*k, k.default_text().to_string()))
                .collect(),
        }
    }
}

impl PromptTemplates {
    /// Defaults, with any `<name>.md` in `dir` replacing the matching template
    pub fn load(dir: &Path) -> Result<Self> {
        let mut templates = Self::default();
        if !dir.is_dir() {
            return Ok(templates);
        }
        for kind in TemplateKind::ALL {
            let path = dir.join(format!("{}.md", kind.file_name()));
            if path.is_file() {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read template {}", path.display()))?;
                tracing::info!(template = kind.file_name(), path = %path.display(), "Loaded prompt template override");
                templates.templates.insert(kind, text);
            }
        }
        Ok(templates)
    }

    pub fn with_template(mut self, kind: TemplateKind, text: impl Into<String>) -> Self {
        self.templates.insert(kind, text.into());
        self
    }

    pub fn get(&self, kind: TemplateKind) -> &str {
        self.templates
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_text())
    }

    pub fn render(&self, kind: TemplateKind, vars: &HashMap<&str, String>) -> String {
        render(self.get(kind), vars)
    }
}
