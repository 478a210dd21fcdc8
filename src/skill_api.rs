// ABOUTME: Local HTTP endpoint the agent calls back into: POST /api/skill/{name}.
// ABOUTME: Validates sessions, pre-claims the reply slot, and shares one execution among identical concurrent calls.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use murmur_core::metrics;
use murmur_core::session::SessionRegistry;
use murmur_core::skills::{SkillContext, SkillRegistry, SkillResult, SEND_REPLY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// A skill result together with the HTTP status it is served with
#[derive(Debug, Clone, PartialEq)]
pub struct SkillResponse {
    pub status: u16,
    pub result: SkillResult,
}

impl SkillResponse {
    fn from_result(result: SkillResult) -> Self {
        Self {
            status: result.status(),
            result,
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            result: SkillResult::fail(message).with_status(status),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBody<'a> {
    #[serde(flatten)]
    result: &'a SkillResult,
    status_code: u16,
}

impl IntoResponse for SkillResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ResponseBody {
            result: &self.result,
            status_code: self.status,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkillRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
}

type SharedResponse = Shared<BoxFuture<'static, SkillResponse>>;

struct CacheEntry {
    created: Instant,
    response: SharedResponse,
}

#[derive(Debug, Clone)]
pub struct SkillApiSettings {
    pub dedup_ttl: Duration,
    pub cache_cleanup_interval: Duration,
}

impl Default for SkillApiSettings {
    fn default() -> Self {
        Self {
            dedup_ttl: Duration::from_secs(30),
            cache_cleanup_interval: Duration::from_secs(60),
        }
    }
}

struct ApiState {
    sessions: SessionRegistry,
    skills: SkillRegistry,
    settings: SkillApiSettings,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl ApiState {
    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

pub struct SkillApiServer {
    state: Arc<ApiState>,
    running: Mutex<Option<Running>>,
}

impl SkillApiServer {
    pub fn new(sessions: SessionRegistry, skills: SkillRegistry, settings: SkillApiSettings) -> Self {
        Self {
            state: Arc::new(ApiState {
                sessions,
                skills,
                settings,
                cache: Mutex::new(HashMap::new()),
            }),
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/skill/{name}", any(skill_handler))
            .fallback(not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Bind and serve. Port 0 picks a free port; the bound address is returned.
    /// Calling it while already running returns the existing address.
    pub async fn start(&self, addr: &str) -> Result<SocketAddr> {
        if let Some(running) = self.running().as_ref() {
            return Ok(running.addr);
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind skill API on {}", addr))?;
        let local = listener
            .local_addr()
            .context("Failed to read skill API address")?;

        let shutdown = CancellationToken::new();
        let app = self.router();
        let token = shutdown.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Skill API server failed");
            }
        });
        let sweeper = spawn_cache_sweeper(Arc::clone(&self.state), shutdown.clone());

        let mut running = self.running();
        if let Some(existing) = running.as_ref() {
            // Lost a start race; keep the first server
            shutdown.cancel();
            return Ok(existing.addr);
        }
        *running = Some(Running {
            addr: local,
            shutdown,
            server,
            sweeper,
        });
        tracing::info!(addr = %local, "Skill API listening");
        Ok(local)
    }

    /// Graceful shutdown of the listener and the cache sweep. Idempotent.
    pub async fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        running.shutdown.cancel();
        if let Err(e) = running.server.await {
            tracing::warn!(error = %e, "Skill API server task ended abnormally");
        }
        let _ = running.sweeper.await;
        tracing::info!(addr = %running.addr, "Skill API stopped");
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running().as_ref().map(|r| r.addr)
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    pub fn cache_len(&self) -> usize {
        self.state.cache().len()
    }

    /// Drop cache entries older than the dedup TTL
    pub fn sweep_cache(&self) -> usize {
        sweep(&self.state)
    }
}

fn sweep(state: &ApiState) -> usize {
    let now = Instant::now();
    let ttl = state.settings.dedup_ttl;
    let mut cache = state.cache();
    let before = cache.len();
    cache.retain(|_, e| now.saturating_duration_since(e.created) < ttl);
    before - cache.len()
}

fn spawn_cache_sweeper(state: Arc<ApiState>, shutdown: CancellationToken) -> JoinHandle<()> {
    let interval = state.settings.cache_cleanup_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = sweep(&state);
                    if evicted > 0 {
                        tracing::debug!(evicted, "Skill dedup cache sweep");
                    }
                }
            }
        }
    })
}

/// Canonical JSON with object keys sorted at every level.
/// Sorted explicitly: any crate in the graph can turn on serde_json's `preserve_order`.
fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String(key.clone()).to_string());
                    out.push(':');
                    write(&map[key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }
    let mut out = String::new();
    write(value, &mut out);
    out
}

pub fn dedup_key(skill: &str, session_id: &str, parameters: &Value) -> String {
    format!("{}:{}:{}", skill, session_id, canonical_json(parameters))
}

async fn not_found(method: Method) -> SkillResponse {
    if method != Method::POST {
        return SkillResponse::error(405, "Method not allowed");
    }
    SkillResponse::error(404, "Not found")
}

async fn skill_handler(
    State(state): State<Arc<ApiState>>,
    method: Method,
    Path(name): Path<String>,
    body: Bytes,
) -> SkillResponse {
    if method != Method::POST {
        return SkillResponse::error(405, "Method not allowed");
    }

    let request: SkillRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(skill = %name, error = %e, "Malformed skill request");
            return SkillResponse::error(400, format!("Invalid JSON body: {}", e));
        }
    };
    let Some(session_id) = request.session_id.filter(|s| !s.trim().is_empty()) else {
        return SkillResponse::error(400, "Missing sessionId");
    };
    let parameters = request
        .parameters
        .unwrap_or_else(|| Value::Object(Default::default()));

    let key = dedup_key(&name, &session_id, &parameters);
    let shared = {
        let mut cache = state.cache();
        let now = Instant::now();
        let fresh = cache
            .get(&key)
            .filter(|e| now.saturating_duration_since(e.created) < state.settings.dedup_ttl)
            .map(|e| e.response.clone());
        match fresh {
            Some(response) => {
                metrics::record_dedup_hit(&name);
                tracing::debug!(skill = %name, session_id = %session_id, "Serving deduplicated skill call");
                response
            }
            None => {
                // Spawned so the work finishes even if this caller goes away
                let task = tokio::spawn(execute(
                    Arc::clone(&state),
                    name.clone(),
                    session_id.clone(),
                    parameters,
                ));
                let skill = name.clone();
                let response: SharedResponse = async move {
                    match task.await {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::error!(skill = %skill, error = %e, "Skill execution panicked");
                            metrics::record_error("skill_panic");
                            SkillResponse::error(500, "Internal server error")
                        }
                    }
                }
                .boxed()
                .shared();
                cache.insert(
                    key,
                    CacheEntry {
                        created: now,
                        response: response.clone(),
                    },
                );
                response
            }
        }
    };

    let response = shared.await;
    metrics::record_skill_call(&name, response.status);
    response
}

async fn execute(
    state: Arc<ApiState>,
    name: String,
    session_id: String,
    parameters: Value,
) -> SkillResponse {
    let Some(session) = state.sessions.get(&session_id) else {
        tracing::warn!(skill = %name, session_id = %session_id, "Skill call for unknown or expired session");
        return SkillResponse::error(401, "Session not found or expired");
    };
    if !state.skills.has_skill(&name) {
        return SkillResponse::error(404, format!("Unknown skill: {}", name));
    }

    let is_reply = name == SEND_REPLY;
    if is_reply && !state.sessions.mark_reply_sent(&session_id) {
        tracing::info!(session_id = %session_id, "Rejected second reply for session");
        return SkillResponse::error(409, "Reply already sent for this session");
    }

    let ctx = SkillContext::new(session);
    let result = state.skills.execute_skill(&name, &parameters, &ctx).await;
    if is_reply && !result.success {
        state.sessions.unmark_reply_sent(&session_id);
    }

    tracing::debug!(
        skill = %name,
        session_id = %session_id,
        success = result.success,
        "Skill executed"
    );
    SkillResponse::from_result(result)
}
