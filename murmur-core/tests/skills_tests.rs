// ABOUTME: Tests for skill dispatch and the reply, reaction, memory and context handlers.
// ABOUTME: Drives handlers through SkillRegistry against a RecordingAdapter.

use chrono::Utc;
use murmur_core::flags::InteractionFlags;
use murmur_core::memory::SqliteMemoryStore;
use murmur_core::session::{NewSession, Session, SessionRegistry};
use murmur_core::skills::{
    ContextHandler, MemoryHandler, ReactionHandler, ReplyHandler, SkillContext, SkillRegistry,
};
use murmur_core::testing::RecordingAdapter;
use murmur_core::traits::{
    ChannelMessage, MemoryStore, NormalizedEvent, PlatformCapabilities, Workspace,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    skills: SkillRegistry,
    flags: Arc<InteractionFlags>,
    sessions: SessionRegistry,
    adapter: RecordingAdapter,
    dir: TempDir,
}

fn event(content: &str) -> NormalizedEvent {
    NormalizedEvent {
        platform: "test".to_string(),
        channel_id: "c1".to_string(),
        user_id: "u1".to_string(),
        message_id: "m1".to_string(),
        is_dm: false,
        content: content.to_string(),
        timestamp: Utc::now(),
        attachments: Vec::new(),
    }
}

fn harness_with(adapter: RecordingAdapter) -> Harness {
    let flags = Arc::new(InteractionFlags::new());
    let store: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::in_memory().unwrap());
    let skills = SkillRegistry::new()
        .register(Arc::new(ReplyHandler::new(Arc::clone(&flags))))
        .register(Arc::new(ReactionHandler::new(Arc::clone(&flags))))
        .register(Arc::new(MemoryHandler::new(store)))
        .register(Arc::new(ContextHandler::new()));
    Harness {
        skills,
        flags,
        sessions: SessionRegistry::new(Duration::from_secs(600)),
        adapter,
        dir: TempDir::new().unwrap(),
    }
}

fn harness() -> Harness {
    harness_with(RecordingAdapter::new("test"))
}

impl Harness {
    fn session(&self, event: Option<NormalizedEvent>) -> Arc<Session> {
        let agent_dir = self.dir.path().join("agent");
        std::fs::create_dir_all(&agent_dir).unwrap();
        self.sessions.register(NewSession {
            workspace: Workspace {
                key: "test/u1".to_string(),
                root: self.dir.path().to_path_buf(),
                agent_dir,
            },
            channel_id: "c1".to_string(),
            user_id: "u1".to_string(),
            adapter: Arc::new(self.adapter.clone()),
            event,
        })
    }

    fn ctx(&self) -> SkillContext {
        SkillContext::new(self.session(Some(event("hi"))))
    }
}

// =============================================================================
// Registry
// =============================================================================

#[tokio::test]
async fn test_registry_lists_all_skills() {
    let h = harness();
    assert_eq!(
        h.skills.skill_names(),
        vec![
            "edit-reply",
            "fetch-context",
            "memory-patch",
            "memory-save",
            "memory-search",
            "react-message",
            "send-reply",
        ]
    );
}

#[tokio::test]
async fn test_unknown_skill_fails() {
    let h = harness();
    let result = h.skills.execute_skill("teleport", &json!({}), &h.ctx()).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Unknown skill: teleport"));
}

// =============================================================================
// send-reply / edit-reply
// =============================================================================

#[tokio::test]
async fn test_send_reply_only_once_per_interaction() {
    let h = harness();
    let ctx = h.ctx();

    let first = h
        .skills
        .execute_skill("send-reply", &json!({ "message": "hello" }), &ctx)
        .await;
    assert!(first.success, "{:?}", first.error);
    assert_eq!(first.data.unwrap()["messageId"], "msg-1");

    let second = h
        .skills
        .execute_skill("send-reply", &json!({ "message": "again" }), &ctx)
        .await;
    assert!(!second.success);
    assert_eq!(
        second.error.as_deref(),
        Some("Reply can only be sent once per interaction")
    );

    assert_eq!(h.adapter.sent().len(), 1);
    assert!(h.flags.reply_sent("test/u1", "c1"));
}

#[tokio::test]
async fn test_send_reply_requires_message() {
    let h = harness();
    let result = h.skills.execute_skill("send-reply", &json!({}), &h.ctx()).await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Missing required parameter: message")
    );
    assert!(!h.flags.reply_sent("test/u1", "c1"));
}

#[tokio::test]
async fn test_send_reply_enforces_length() {
    let h = harness_with(RecordingAdapter::new("test").with_capabilities(PlatformCapabilities {
        max_message_length: 5,
        ..Default::default()
    }));
    let result = h
        .skills
        .execute_skill("send-reply", &json!({ "message": "too long" }), &h.ctx())
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("limit of 5"));
    assert!(h.adapter.sent().is_empty());
}

#[tokio::test]
async fn test_failed_send_releases_reply_flag() {
    let h = harness_with(RecordingAdapter::new("test").fail_sends("network down"));
    let ctx = h.ctx();
    let result = h
        .skills
        .execute_skill("send-reply", &json!({ "message": "hi" }), &ctx)
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("network down"));
    assert!(!h.flags.reply_sent("test/u1", "c1"));
}

#[tokio::test]
async fn test_attachments_rejected_when_unsupported() {
    let h = harness();
    let result = h
        .skills
        .execute_skill(
            "send-reply",
            &json!({ "message": "see file", "attachments": ["out.png"] }),
            &h.ctx(),
        )
        .await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Platform does not support attachments")
    );
}

#[tokio::test]
async fn test_attachment_paths_stay_inside_agent_dir() {
    let h = harness_with(RecordingAdapter::new("test").with_capabilities(PlatformCapabilities {
        supports_attachments: true,
        ..Default::default()
    }));
    let ctx = h.ctx();

    let escape = h
        .skills
        .execute_skill(
            "send-reply",
            &json!({ "message": "x", "attachments": ["../secrets.txt"] }),
            &ctx,
        )
        .await;
    assert!(escape.error.unwrap().contains("Invalid attachment path"));

    let missing = h
        .skills
        .execute_skill(
            "send-reply",
            &json!({ "message": "x", "attachments": ["nope.png"] }),
            &ctx,
        )
        .await;
    assert!(missing.error.unwrap().contains("Attachment not found"));

    std::fs::write(ctx.session.agent_dir().join("chart.png"), b"png").unwrap();
    let ok = h
        .skills
        .execute_skill(
            "send-reply",
            &json!({ "message": "chart", "attachments": ["chart.png"] }),
            &ctx,
        )
        .await;
    assert!(ok.success, "{:?}", ok.error);
    let sent = h.adapter.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].attachments[0].ends_with("chart.png"));
}

#[tokio::test]
async fn test_edit_requires_prior_reply() {
    let h = harness();
    let ctx = h.ctx();

    let early = h
        .skills
        .execute_skill(
            "edit-reply",
            &json!({ "messageId": "msg-1", "message": "fixed" }),
            &ctx,
        )
        .await;
    assert!(!early.success);
    assert_eq!(
        early.error.as_deref(),
        Some("No reply has been sent yet. Use send-reply first.")
    );

    h.skills
        .execute_skill("send-reply", &json!({ "message": "tpyo" }), &ctx)
        .await;
    let edit = h
        .skills
        .execute_skill(
            "edit-reply",
            &json!({ "messageId": "msg-1", "message": "typo" }),
            &ctx,
        )
        .await;
    assert!(edit.success, "{:?}", edit.error);
    assert_eq!(h.adapter.edits()[0].content, "typo");
}

// =============================================================================
// react-message
// =============================================================================

#[tokio::test]
async fn test_reaction_once_and_independent_of_reply() {
    let h = harness();
    let ctx = h.ctx();

    h.skills
        .execute_skill("send-reply", &json!({ "message": "hi" }), &ctx)
        .await;
    let first = h
        .skills
        .execute_skill("react-message", &json!({ "emoji": "👍" }), &ctx)
        .await;
    assert!(first.success, "{:?}", first.error);

    let second = h
        .skills
        .execute_skill("react-message", &json!({ "emoji": "🎉" }), &ctx)
        .await;
    assert_eq!(
        second.error.as_deref(),
        Some("Reaction can only be sent once per interaction")
    );

    let reactions = h.adapter.reactions();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].message_id, "m1");
}

#[tokio::test]
async fn test_reaction_needs_trigger_message() {
    let h = harness();
    let ctx = SkillContext::new(h.session(None));
    let result = h
        .skills
        .execute_skill("react-message", &json!({ "emoji": "👍" }), &ctx)
        .await;
    assert_eq!(
        result.error.as_deref(),
        Some("No trigger message to react to")
    );
    assert!(!h.flags.reaction_sent("test/u1", "c1"));
}

#[tokio::test]
async fn test_reaction_unsupported_platform() {
    let h = harness_with(RecordingAdapter::new("test").with_capabilities(PlatformCapabilities {
        supports_reactions: false,
        ..Default::default()
    }));
    let result = h
        .skills
        .execute_skill("react-message", &json!({ "emoji": "👍" }), &h.ctx())
        .await;
    assert!(!result.success);
    assert!(!h.flags.reaction_sent("test/u1", "c1"));
}

// =============================================================================
// memory-*
// =============================================================================

#[tokio::test]
async fn test_memory_save_search_patch() {
    let h = harness();
    let ctx = h.ctx();

    let saved = h
        .skills
        .execute_skill(
            "memory-save",
            &json!({ "content": "Likes green tea", "importance": "high" }),
            &ctx,
        )
        .await;
    assert!(saved.success, "{:?}", saved.error);
    let id = saved.data.unwrap()["id"].as_str().unwrap().to_string();

    let found = h
        .skills
        .execute_skill("memory-search", &json!({ "query": "tea" }), &ctx)
        .await;
    assert_eq!(found.data.unwrap()["count"], 1);

    let patched = h
        .skills
        .execute_skill(
            "memory-patch",
            &json!({ "memory_id": id, "enabled": false }),
            &ctx,
        )
        .await;
    assert!(patched.success, "{:?}", patched.error);
    assert_eq!(patched.data.unwrap()["memory"]["enabled"], false);
}

#[tokio::test]
async fn test_memory_save_rejects_bad_importance() {
    let h = harness();
    let result = h
        .skills
        .execute_skill(
            "memory-save",
            &json!({ "content": "x", "importance": "urgent" }),
            &h.ctx(),
        )
        .await;
    assert!(!result.success);
}

#[tokio::test]
async fn test_memory_patch_validation() {
    let h = harness();
    let ctx = h.ctx();

    let empty = h
        .skills
        .execute_skill("memory-patch", &json!({ "memory_id": "abc" }), &ctx)
        .await;
    assert_eq!(
        empty.error.as_deref(),
        Some("At least one of enabled, visibility or importance is required")
    );

    let missing = h
        .skills
        .execute_skill(
            "memory-patch",
            &json!({ "memory_id": "abc", "visibility": "private" }),
            &ctx,
        )
        .await;
    assert_eq!(missing.error.as_deref(), Some("Memory not found: abc"));
}

// =============================================================================
// fetch-context
// =============================================================================

fn history() -> Vec<ChannelMessage> {
    ["good morning", "Rust is neat", "lunch?", "more rust talk"]
        .iter()
        .enumerate()
        .map(|(i, text)| ChannelMessage {
            message_id: format!("h{}", i),
            user_id: "u2".to_string(),
            username: Some("alice".to_string()),
            content: text.to_string(),
            timestamp: Utc::now(),
            is_bot: false,
        })
        .collect()
}

#[tokio::test]
async fn test_fetch_recent_messages_respects_limit() {
    let h = harness_with(RecordingAdapter::new("test").with_history("c1", history()));
    let result = h
        .skills
        .execute_skill(
            "fetch-context",
            &json!({ "type": "recent_messages", "limit": 2 }),
            &h.ctx(),
        )
        .await;
    let data = result.data.unwrap();
    assert_eq!(data["count"], 2);
    assert_eq!(data["messages"][1]["content"], "more rust talk");
}

#[tokio::test]
async fn test_search_messages_newest_first() {
    let h = harness_with(RecordingAdapter::new("test").with_history("c1", history()));
    let result = h
        .skills
        .execute_skill(
            "fetch-context",
            &json!({ "type": "search_messages", "query": "RUST" }),
            &h.ctx(),
        )
        .await;
    let data = result.data.unwrap();
    assert_eq!(data["count"], 2);
    assert_eq!(data["messages"][0]["content"], "more rust talk");
}

#[tokio::test]
async fn test_user_info_defaults_to_session_user() {
    let h = harness_with(RecordingAdapter::new("test").with_username("u1", "bob"));
    let result = h
        .skills
        .execute_skill("fetch-context", &json!({ "type": "user_info" }), &h.ctx())
        .await;
    let data = result.data.unwrap();
    assert_eq!(data["userId"], "u1");
    assert_eq!(data["username"], "bob");
}

#[tokio::test]
async fn test_unknown_context_type() {
    let h = harness();
    let result = h
        .skills
        .execute_skill("fetch-context", &json!({ "type": "weather" }), &h.ctx())
        .await;
    assert!(result.error.unwrap().starts_with("Unknown context type: weather"));
}
