// ABOUTME: Scripted mock transport for testing - returns pre-configured stop reasons.
// ABOUTME: Allows deterministic connector and orchestrator tests without spawning agent processes.
//!
//! # Example
//!
//! ```no_run
//! use murmur_agent::backends::mock::MockTransport;
//! use murmur_agent::StopReason;
//!
//! # fn example() {
//! let mock = MockTransport::new()
//!     .respond(StopReason::EndTurn)
//!     .respond_with(StopReason::EndTurn, |turn| async move {
//!         println!("agent would call send-reply during turn {}", turn.turn);
//!     });
//!
//! let observer = mock.clone();
//! let factory = mock.factory();
//! // hand `factory` to the orchestrator, then inspect `observer.prompt_count()`
//! # let _ = (observer, factory);
//! # }
//! ```

use crate::capabilities::AgentCapabilities;
use crate::mcp::McpServerWire;
use crate::prompt::{ContentBlock, PromptContent, PromptResponse, StopReason};
use crate::transport::{AgentTransport, TransportFactory};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// What the mock saw for one prompt turn
#[derive(Debug, Clone, PartialEq)]
pub struct PromptInvocation {
    pub session_id: String,
    pub text: String,
    pub blocks: Vec<ContentBlock>,
    /// 1-based turn number across the whole mock
    pub turn: usize,
}

type PromptHook = Arc<dyn Fn(PromptInvocation) -> BoxFuture<'static, ()> + Send + Sync>;

enum Step {
    Respond {
        stop_reason: StopReason,
        hook: Option<PromptHook>,
    },
    Fail(String),
}

#[derive(Default)]
struct MockState {
    capabilities: Option<AgentCapabilities>,
    script: VecDeque<Step>,
    fail_initialize: Option<String>,
    fail_new_session: Option<String>,
    fail_set_model: Option<String>,
    launch_model_only: bool,
    set_model_calls: usize,
    prompts: Vec<PromptInvocation>,
    initialize_calls: usize,
    shutdown_calls: usize,
    sessions: usize,
    models: Vec<String>,
    mcp_servers: Vec<McpServerWire>,
}

/// Scripted transport. Clones share the same script and recordings, so a
/// clone kept by the test observes everything the orchestrator's copy did.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A mock with no capabilities that answers every prompt with `end_turn`
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_capabilities(self, capabilities: AgentCapabilities) -> Self {
        self.lock().capabilities = Some(capabilities);
        self
    }

    /// Queue a plain stop reason for the next unscripted turn
    pub fn respond(self, stop_reason: StopReason) -> Self {
        self.lock().script.push_back(Step::Respond {
            stop_reason,
            hook: None,
        });
        self
    }

    /// Queue a stop reason whose turn first runs `hook`, standing in for the
    /// skill calls a real agent makes before its turn ends.
    pub fn respond_with<F, Fut>(self, stop_reason: StopReason, hook: F) -> Self
    where
        F: Fn(PromptInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: PromptHook = Arc::new(move |inv| hook(inv).boxed());
        self.lock().script.push_back(Step::Respond {
            stop_reason,
            hook: Some(hook),
        });
        self
    }

    /// Queue a transport-level prompt failure
    pub fn respond_error(self, message: &str) -> Self {
        self.lock().script.push_back(Step::Fail(message.to_string()));
        self
    }

    pub fn fail_initialize(self, message: &str) -> Self {
        self.lock().fail_initialize = Some(message.to_string());
        self
    }

    pub fn fail_new_session(self, message: &str) -> Self {
        self.lock().fail_new_session = Some(message.to_string());
        self
    }

    pub fn fail_set_model(self, message: &str) -> Self {
        self.lock().fail_set_model = Some(message.to_string());
        self
    }

    /// Behave like a transport that can only apply the model at launch
    pub fn without_session_model(self) -> Self {
        self.lock().launch_model_only = true;
        self
    }

    pub fn prompt_count(&self) -> usize {
        self.lock().prompts.len()
    }

    pub fn prompts(&self) -> Vec<PromptInvocation> {
        self.lock().prompts.clone()
    }

    pub fn initialize_count(&self) -> usize {
        self.lock().initialize_calls
    }

    pub fn shutdown_count(&self) -> usize {
        self.lock().shutdown_calls
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions
    }

    /// Every `set_session_model` call, including failed ones
    pub fn set_model_calls(&self) -> usize {
        self.lock().set_model_calls
    }

    pub fn models(&self) -> Vec<String> {
        self.lock().models.clone()
    }

    pub fn mcp_servers(&self) -> Vec<McpServerWire> {
        self.lock().mcp_servers.clone()
    }

    /// Factory handing out clones of this mock
    pub fn factory(&self) -> TransportFactory {
        let mock = self.clone();
        Arc::new(move |_config, _cwd| Ok(Box::new(mock.clone()) as Box<dyn AgentTransport>))
    }
}

#[async_trait]
impl AgentTransport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn initialize(&mut self) -> Result<Option<AgentCapabilities>> {
        let mut state = self.lock();
        state.initialize_calls += 1;
        if let Some(message) = &state.fail_initialize {
            anyhow::bail!("{}", message);
        }
        Ok(state.capabilities.clone())
    }

    async fn new_session(&mut self, _cwd: &Path, mcp_servers: &[McpServerWire]) -> Result<String> {
        let mut state = self.lock();
        if let Some(message) = &state.fail_new_session {
            anyhow::bail!("{}", message);
        }
        state.sessions += 1;
        state.mcp_servers = mcp_servers.to_vec();
        Ok(format!("mock-session-{}", state.sessions))
    }

    fn supports_session_model(&self) -> bool {
        !self.lock().launch_model_only
    }

    async fn set_session_model(&mut self, _session_id: &str, model_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.set_model_calls += 1;
        if state.launch_model_only {
            anyhow::bail!("Mock transport cannot set a session model");
        }
        if let Some(message) = &state.fail_set_model {
            anyhow::bail!("{}", message);
        }
        state.models.push(model_id.to_string());
        Ok(())
    }

    async fn prompt(
        &mut self,
        session_id: &str,
        content: Vec<ContentBlock>,
    ) -> Result<PromptResponse> {
        let (invocation, step) = {
            let mut state = self.lock();
            let invocation = PromptInvocation {
                session_id: session_id.to_string(),
                text: PromptContent::Blocks(content.clone()).text(),
                blocks: content,
                turn: state.prompts.len() + 1,
            };
            state.prompts.push(invocation.clone());
            (invocation, state.script.pop_front())
        };

        match step {
            None => Ok(PromptResponse::new(StopReason::EndTurn)),
            Some(Step::Fail(message)) => anyhow::bail!("{}", message),
            Some(Step::Respond { stop_reason, hook }) => {
                if let Some(hook) = hook {
                    hook(invocation).await;
                }
                Ok(PromptResponse::new(stop_reason))
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.lock().shutdown_calls += 1;
        Ok(())
    }
}
