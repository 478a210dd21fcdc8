// ABOUTME: Tests for AgentConnector lifecycle against the scripted mock transport.
// ABOUTME: Covers handshake, capability queries, session creation, prompting and disconnect.

use murmur_agent::backends::mock::MockTransport;
use murmur_agent::{
    AgentCapabilities, AgentConnector, McpServerConfig, McpServerWire, PromptContent, StopReason,
};
use std::collections::BTreeMap;

fn http_server() -> McpServerConfig {
    McpServerConfig::Http {
        name: "search".to_string(),
        url: "https://mcp.example.com".to_string(),
        headers: None,
    }
}

fn connector(mock: &MockTransport, servers: Vec<McpServerConfig>) -> AgentConnector {
    AgentConnector::new(Box::new(mock.clone()), "/tmp/workspace", servers)
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_connect_is_idempotent() {
    let mock = MockTransport::new();
    let mut conn = connector(&mock, vec![]);

    assert!(!conn.is_connected());
    conn.connect().await.unwrap();
    conn.connect().await.unwrap();

    assert!(conn.is_connected());
    assert_eq!(mock.initialize_count(), 1);
}

#[tokio::test]
async fn test_connect_failure_surfaces_error() {
    let mock = MockTransport::new().fail_initialize("binary not found");
    let mut conn = connector(&mock, vec![]);

    let err = conn.connect().await.unwrap_err();
    assert!(format!("{:#}", err).contains("binary not found"));
    assert!(!conn.is_connected());
}

#[tokio::test]
async fn test_capabilities_default_to_false_when_absent() {
    let mock = MockTransport::new();
    let mut conn = connector(&mock, vec![]);
    conn.connect().await.unwrap();

    assert!(conn.capabilities().is_none());
    assert!(!conn.supports_http_transport());
    assert!(!conn.supports_sse_transport());
    assert!(!conn.supports_load_session());
    assert!(!conn.supports_image_content());
}

#[tokio::test]
async fn test_capabilities_reflect_handshake() {
    let caps = AgentCapabilities::default()
        .with_http_mcp(true)
        .with_load_session(true)
        .with_image_prompts(false);
    let mock = MockTransport::new().with_capabilities(caps);
    let mut conn = connector(&mock, vec![]);
    conn.connect().await.unwrap();

    assert!(conn.supports_http_transport());
    assert!(!conn.supports_sse_transport());
    assert!(conn.supports_load_session());
    assert!(!conn.supports_image_content());
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn test_create_session_requires_connect() {
    let mock = MockTransport::new();
    let mut conn = connector(&mock, vec![]);

    assert!(conn.create_session().await.is_err());
    assert_eq!(mock.session_count(), 0);
}

#[tokio::test]
async fn test_create_session_rejects_unsupported_transport_before_sending() {
    let mock = MockTransport::new();
    let mut conn = connector(&mock, vec![http_server()]);
    conn.connect().await.unwrap();

    let err = conn.create_session().await.unwrap_err();
    assert!(err
        .to_string()
        .contains("Agent does not support HTTP transport for MCP servers (server: search)"));
    assert_eq!(mock.session_count(), 0);
}

#[tokio::test]
async fn test_create_session_sends_converted_servers() {
    let mock =
        MockTransport::new().with_capabilities(AgentCapabilities::default().with_http_mcp(true));
    let stdio = McpServerConfig::Stdio {
        name: "fs".to_string(),
        command: "mcp-fs".to_string(),
        args: None,
        env: Some(BTreeMap::from([("ROOT".to_string(), "/".to_string())])),
    };
    let mut conn = connector(&mock, vec![stdio, http_server()]);
    conn.connect().await.unwrap();

    let session_id = conn.create_session().await.unwrap();
    assert_eq!(session_id, "mock-session-1");

    let sent = mock.mcp_servers();
    assert_eq!(sent.len(), 2);
    match &sent[0] {
        McpServerWire::Stdio(server) => {
            assert_eq!(server.name, "fs");
            assert!(server.args.is_empty());
            assert_eq!(server.env.len(), 1);
        }
        other => panic!("expected stdio server, got {:?}", other),
    }
    match &sent[1] {
        McpServerWire::Remote(server) => {
            assert_eq!(server.transport, "http");
            assert!(server.headers.is_empty());
        }
        other => panic!("expected remote server, got {:?}", other),
    }
}

#[tokio::test]
async fn test_set_session_model_forwards_to_transport() {
    let mock = MockTransport::new();
    let mut conn = connector(&mock, vec![]);
    conn.connect().await.unwrap();
    let session_id = conn.create_session().await.unwrap();

    conn.set_session_model(&session_id, "sonnet").await.unwrap();
    assert_eq!(mock.models(), vec!["sonnet".to_string()]);
}

#[test]
fn test_session_model_support_comes_from_transport() {
    let mock = MockTransport::new();
    assert!(connector(&mock, vec![]).supports_session_model());

    let launch_only = MockTransport::new().without_session_model();
    assert!(!connector(&launch_only, vec![]).supports_session_model());
}

// =============================================================================
// Prompting
// =============================================================================

#[tokio::test]
async fn test_prompt_returns_scripted_stop_reasons() {
    let mock = MockTransport::new()
        .respond(StopReason::EndTurn)
        .respond(StopReason::MaxTokens);
    let mut conn = connector(&mock, vec![]);
    conn.connect().await.unwrap();
    let session_id = conn.create_session().await.unwrap();

    let first = conn
        .prompt(&session_id, PromptContent::Text("hello".to_string()))
        .await
        .unwrap();
    let second = conn
        .prompt(&session_id, PromptContent::Text("again".to_string()))
        .await
        .unwrap();

    assert_eq!(first.stop_reason, StopReason::EndTurn);
    assert_eq!(second.stop_reason, StopReason::MaxTokens);

    let prompts = mock.prompts();
    assert_eq!(prompts[0].text, "hello");
    assert_eq!(prompts[1].turn, 2);
    assert_eq!(prompts[1].session_id, session_id);
}

#[tokio::test]
async fn test_prompt_transport_error_propagates() {
    let mock = MockTransport::new().respond_error("connection reset");
    let mut conn = connector(&mock, vec![]);
    conn.connect().await.unwrap();

    let err = conn
        .prompt("s", PromptContent::Text("hi".to_string()))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("connection reset"));
}

// =============================================================================
// Disconnect
// =============================================================================

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let mock = MockTransport::new();
    let mut conn = connector(&mock, vec![]);
    conn.connect().await.unwrap();

    conn.disconnect().await.unwrap();
    conn.disconnect().await.unwrap();

    assert!(!conn.is_connected());
    assert_eq!(mock.shutdown_count(), 1);
}

#[tokio::test]
async fn test_disconnect_without_connect_is_safe() {
    let mock = MockTransport::new();
    let mut conn = connector(&mock, vec![]);
    conn.disconnect().await.unwrap();
    assert!(conn.connect().await.is_err());
}

#[tokio::test]
async fn test_prompt_after_disconnect_fails() {
    let mock = MockTransport::new();
    let mut conn = connector(&mock, vec![]);
    conn.connect().await.unwrap();
    conn.disconnect().await.unwrap();

    assert!(conn
        .prompt("s", PromptContent::Text("late".to_string()))
        .await
        .is_err());
    assert_eq!(mock.prompt_count(), 0);
}
