// ABOUTME: Tests for the skill API: status codes, reply pre-claim, dedup of concurrent identical calls.
// ABOUTME: Requests go through the axum router with tower's oneshot; lifecycle tests use a real socket.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use murmur::skill_api::{SkillApiServer, SkillApiSettings};
use murmur_core::flags::InteractionFlags;
use murmur_core::memory::SqliteMemoryStore;
use murmur_core::session::{NewSession, Session, SessionRegistry};
use murmur_core::skills::{
    MemoryHandler, ReactionHandler, ReplyHandler, SkillContext, SkillHandler, SkillRegistry,
    SkillResult,
};
use murmur_core::testing::RecordingAdapter;
use murmur_core::traits::{MemoryStore, NormalizedEvent, Workspace};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

struct Explode;

#[async_trait]
impl SkillHandler for Explode {
    fn skills(&self) -> &'static [&'static str] {
        &["explode"]
    }

    async fn handle(&self, _skill: &str, _params: &Value, _ctx: &SkillContext) -> Result<SkillResult> {
        panic!("handler blew up");
    }
}

struct Fixture {
    server: SkillApiServer,
    router: Router,
    sessions: SessionRegistry,
    adapter: RecordingAdapter,
    memory: Arc<dyn MemoryStore>,
    dir: TempDir,
}

fn fixture_with(adapter: RecordingAdapter, session_timeout: Duration) -> Fixture {
    let flags = Arc::new(InteractionFlags::new());
    let memory: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::in_memory().unwrap());
    let sessions = SessionRegistry::new(session_timeout);
    let skills = SkillRegistry::new()
        .register(Arc::new(ReplyHandler::new(Arc::clone(&flags))))
        .register(Arc::new(ReactionHandler::new(Arc::clone(&flags))))
        .register(Arc::new(MemoryHandler::new(Arc::clone(&memory))))
        .register(Arc::new(Explode));
    let server = SkillApiServer::new(sessions.clone(), skills, SkillApiSettings::default());
    let router = server.router();
    Fixture {
        server,
        router,
        sessions,
        adapter,
        memory,
        dir: TempDir::new().unwrap(),
    }
}

fn fixture() -> Fixture {
    fixture_with(RecordingAdapter::new("test"), Duration::from_secs(600))
}

impl Fixture {
    fn session(&self) -> Arc<Session> {
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
            event: Some(NormalizedEvent {
                platform: "test".to_string(),
                channel_id: "c1".to_string(),
                user_id: "u1".to_string(),
                message_id: "m1".to_string(),
                is_dm: false,
                content: "hi".to_string(),
                timestamp: chrono::Utc::now(),
                attachments: Vec::new(),
            }),
        })
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn call(router: &Router, skill: &str, session_id: &str, parameters: Value) -> (StatusCode, Value) {
    let body = json!({ "sessionId": session_id, "parameters": parameters });
    send(
        router,
        "POST",
        &format!("/api/skill/{}", skill),
        Body::from(body.to_string()),
    )
    .await
}

// =============================================================================
// Request validation
// =============================================================================

#[tokio::test]
async fn test_non_post_is_405() {
    let f = fixture();
    let (status, body) = send(&f.router, "GET", "/api/skill/send-reply", Body::empty()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["statusCode"], 405);
}

#[tokio::test]
async fn test_unmatched_path_is_404() {
    let f = fixture();
    let (status, _) = send(&f.router, "POST", "/api/other", Body::from("{}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_post_to_unmatched_path_is_405() {
    let f = fixture();
    let (status, body) = send(&f.router, "GET", "/api/whatever", Body::empty()).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"], "Method not allowed");
}

#[tokio::test]
async fn test_missing_session_id_is_400() {
    let f = fixture();
    let (status, body) = send(
        &f.router,
        "POST",
        "/api/skill/send-reply",
        Body::from(r#"{"parameters":{"message":"hi"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing sessionId");
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let f = fixture();
    let (status, body) = send(&f.router, "POST", "/api/skill/send-reply", Body::from("{nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_unknown_session_is_401() {
    let f = fixture();
    let (status, body) = call(&f.router, "send-reply", "ghost", json!({ "message": "hi" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["statusCode"], 401);
    assert!(f.adapter.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_expired_session_is_401() {
    let f = fixture_with(RecordingAdapter::new("test"), Duration::from_secs(5));
    let session = f.session();

    tokio::time::advance(Duration::from_secs(6)).await;

    let (status, _) = call(&f.router, "send-reply", &session.id, json!({ "message": "late" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_skill_is_404() {
    let f = fixture();
    let session = f.session();
    let (status, body) = call(&f.router, "teleport", &session.id, json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Unknown skill: teleport");
}

// =============================================================================
// Skill execution
// =============================================================================

#[tokio::test]
async fn test_send_reply_then_second_reply_is_409() {
    let f = fixture();
    let session = f.session();

    let (status, body) = call(&f.router, "send-reply", &session.id, json!({ "message": "one" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["statusCode"], 200);
    assert_eq!(body["data"]["messageId"], "msg-1");

    let (status, body) = call(&f.router, "send-reply", &session.id, json!({ "message": "two" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Reply already sent for this session");
    assert_eq!(f.adapter.sent().len(), 1);
}

#[tokio::test]
async fn test_failed_reply_releases_claim() {
    let f = fixture();
    let session = f.session();

    let (status, body) = call(&f.router, "send-reply", &session.id, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required parameter: message");

    let (status, _) = call(&f.router, "send-reply", &session.id, json!({ "message": "fixed" })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_replies_post_once() {
    let f = fixture_with(
        RecordingAdapter::new("test").with_send_delay(Duration::from_millis(50)),
        Duration::from_secs(600),
    );
    let session = f.session();

    let mut handles = Vec::new();
    for i in 0..8 {
        let router = f.router.clone();
        let id = session.id.clone();
        handles.push(tokio::spawn(async move {
            call(&router, "send-reply", &id, json!({ "message": format!("reply {}", i) })).await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap().0 {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {}", other),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(f.adapter.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_concurrent_calls_share_one_execution() {
    let f = fixture_with(
        RecordingAdapter::new("test").with_send_delay(Duration::from_millis(50)),
        Duration::from_secs(600),
    );
    let session = f.session();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let router = f.router.clone();
        let id = session.id.clone();
        handles.push(tokio::spawn(async move {
            call(&router, "send-reply", &id, json!({ "message": "same" })).await
        }));
    }

    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["messageId"], "msg-1");
    }
    assert_eq!(f.adapter.sent().len(), 1);
    assert_eq!(f.server.cache_len(), 1);
}

#[tokio::test]
async fn test_dedup_key_ignores_parameter_order() {
    let f = fixture();
    let session = f.session();

    let first = call(
        &f.router,
        "memory-save",
        &session.id,
        json!({ "content": "Likes jazz", "importance": "low" }),
    )
    .await;
    let second = call(
        &f.router,
        "memory-save",
        &session.id,
        json!({ "importance": "low", "content": "Likes jazz" }),
    )
    .await;

    assert_eq!(first.1["data"]["id"], second.1["data"]["id"]);
    assert_eq!(
        f.memory.dump_enabled_memories("test/u1").await.unwrap().len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_dedup_entries_expire() {
    let f = fixture();
    let session = f.session();

    call(&f.router, "memory-save", &session.id, json!({ "content": "note" })).await;
    tokio::time::advance(Duration::from_secs(31)).await;
    call(&f.router, "memory-save", &session.id, json!({ "content": "note" })).await;

    assert_eq!(
        f.memory.dump_enabled_memories("test/u1").await.unwrap().len(),
        2
    );
    assert_eq!(f.server.sweep_cache(), 0);
    assert_eq!(f.server.cache_len(), 1);
}

#[tokio::test]
async fn test_panicking_handler_is_500_and_server_survives() {
    let f = fixture();
    let session = f.session();

    let (status, body) = call(&f.router, "explode", &session.id, json!({})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");

    let (status, _) = call(&f.router, "react-message", &session.id, json!({ "emoji": "👋" })).await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// Lifecycle
// =============================================================================

async fn raw_post(addr: std::net::SocketAddr, path: &str, body: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        path,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_start_on_port_zero_and_stop() {
    let f = fixture();
    let session = f.session();

    let addr = f.server.start("127.0.0.1:0").await.unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(f.server.start("127.0.0.1:0").await.unwrap(), addr);
    assert_eq!(f.server.local_addr(), Some(addr));

    let body = json!({ "sessionId": session.id, "parameters": { "message": "over tcp" } }).to_string();
    let response = raw_post(addr, "/api/skill/send-reply", &body).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert_eq!(f.adapter.sent()[0].content, "over tcp");

    f.server.stop().await;
    f.server.stop().await;
    assert!(!f.server.is_running());
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
