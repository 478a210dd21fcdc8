// ABOUTME: ACP transport - drives claude-code-acp, codex-acp or gemini over the Agent Client Protocol.
// ABOUTME: The !Send ACP connection lives on a dedicated worker thread; the transport talks to it over channels.

use crate::capabilities::AgentCapabilities;
use crate::config::AgentConfig;
use crate::mcp::McpServerWire;
use crate::prompt::{ContentBlock, PromptResponse, StopReason};
use crate::transport::{AgentTransport, TransportFactory};
use acp::Agent as _;
use agent_client_protocol as acp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How to launch the agent process
#[derive(Debug, Clone)]
pub struct AcpLaunch {
    pub binary: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
}

impl AcpLaunch {
    pub fn from_config(config: &AgentConfig, working_dir: &Path) -> Self {
        Self {
            binary: config.binary.clone(),
            args: config.args.clone(),
            env: config.launch_env(),
            working_dir: working_dir.to_path_buf(),
        }
    }
}

/// Commands sent to the ACP worker thread
enum WorkerCommand {
    Initialize {
        reply: oneshot::Sender<Result<Option<AgentCapabilities>, String>>,
    },
    NewSession {
        cwd: PathBuf,
        mcp_servers: Vec<McpServerWire>,
        reply: oneshot::Sender<Result<String, String>>,
    },
    Prompt {
        session_id: String,
        blocks: Vec<ContentBlock>,
        reply: oneshot::Sender<Result<PromptResponse, String>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Client-side callbacks for the ACP connection.
///
/// Agent message chunks are accumulated for the current turn; user-visible
/// output goes through the skill API, so the text is only kept for logs.
#[derive(Clone)]
struct AcpClientHandler {
    turn_text: Arc<Mutex<String>>,
}

impl AcpClientHandler {
    fn new() -> Self {
        Self {
            turn_text: Arc::new(Mutex::new(String::new())),
        }
    }

    fn take_turn_text(&self) -> String {
        std::mem::take(&mut *self.turn_text.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait::async_trait(?Send)]
impl acp::Client for AcpClientHandler {
    async fn request_permission(
        &self,
        args: acp::RequestPermissionRequest,
    ) -> acp::Result<acp::RequestPermissionResponse> {
        tracing::debug!(
            session_id = %args.session_id,
            tool_call_id = %args.tool_call.tool_call_id,
            "Auto-approving permission request"
        );

        let allow_option = args
            .options
            .iter()
            .find(|opt| matches!(opt.kind, acp::PermissionOptionKind::AllowOnce))
            .or_else(|| args.options.first());

        match allow_option {
            Some(option) => Ok(acp::RequestPermissionResponse::new(
                acp::RequestPermissionOutcome::Selected(acp::SelectedPermissionOutcome::new(
                    option.option_id.clone(),
                )),
            )),
            None => Ok(acp::RequestPermissionResponse::new(
                acp::RequestPermissionOutcome::Cancelled,
            )),
        }
    }

    async fn session_notification(&self, args: acp::SessionNotification) -> acp::Result<()> {
        match args.update {
            acp::SessionUpdate::AgentMessageChunk(chunk) => {
                if let acp::ContentBlock::Text(t) = chunk.content {
                    self.turn_text
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push_str(&t.text);
                }
            }
            acp::SessionUpdate::ToolCall(tool_call) => {
                tracing::debug!(
                    session_id = %args.session_id,
                    tool = %tool_call.title,
                    "Agent started tool call"
                );
            }
            other => {
                tracing::trace!(?other, "Ignoring session update");
            }
        }
        Ok(())
    }

    async fn write_text_file(
        &self,
        _args: acp::WriteTextFileRequest,
    ) -> acp::Result<acp::WriteTextFileResponse> {
        Err(acp::Error::method_not_found())
    }

    async fn read_text_file(
        &self,
        _args: acp::ReadTextFileRequest,
    ) -> acp::Result<acp::ReadTextFileResponse> {
        Err(acp::Error::method_not_found())
    }

    async fn create_terminal(
        &self,
        _args: acp::CreateTerminalRequest,
    ) -> acp::Result<acp::CreateTerminalResponse> {
        Err(acp::Error::method_not_found())
    }

    async fn terminal_output(
        &self,
        _args: acp::TerminalOutputRequest,
    ) -> acp::Result<acp::TerminalOutputResponse> {
        Err(acp::Error::method_not_found())
    }

    async fn release_terminal(
        &self,
        _args: acp::ReleaseTerminalRequest,
    ) -> acp::Result<acp::ReleaseTerminalResponse> {
        Err(acp::Error::method_not_found())
    }

    async fn wait_for_terminal_exit(
        &self,
        _args: acp::WaitForTerminalExitRequest,
    ) -> acp::Result<acp::WaitForTerminalExitResponse> {
        Err(acp::Error::method_not_found())
    }

    async fn kill_terminal_command(
        &self,
        _args: acp::KillTerminalCommandRequest,
    ) -> acp::Result<acp::KillTerminalCommandResponse> {
        Err(acp::Error::method_not_found())
    }

    async fn ext_method(&self, _args: acp::ExtRequest) -> acp::Result<acp::ExtResponse> {
        Err(acp::Error::method_not_found())
    }

    async fn ext_notification(&self, _args: acp::ExtNotification) -> acp::Result<()> {
        Ok(())
    }
}

/// Live ACP connection, only ever touched from the worker thread
struct AcpConnection {
    child: Child,
    conn: acp::ClientSideConnection,
    handler: AcpClientHandler,
}

impl Drop for AcpConnection {
    fn drop(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "Agent process already exited");
        }
    }
}

impl AcpConnection {
    fn spawn(launch: &AcpLaunch) -> Result<Self> {
        if launch.binary.contains("..") || launch.binary.contains('\0') {
            anyhow::bail!("Invalid agent binary path");
        }
        if !launch.working_dir.exists() {
            anyhow::bail!(
                "Working directory does not exist: {}",
                launch.working_dir.display()
            );
        }

        tracing::info!(
            binary = %launch.binary,
            args = ?launch.args,
            cwd = %launch.working_dir.display(),
            "Spawning ACP agent"
        );

        let mut child = ProcessCommand::new(&launch.binary)
            .args(&launch.args)
            .current_dir(&launch.working_dir)
            .envs(&launch.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn ACP agent {}", launch.binary))?;

        let stdin = child.stdin.take().context("Failed to get agent stdin")?;
        let stdout = child.stdout.take().context("Failed to get agent stdout")?;

        let handler = AcpClientHandler::new();
        let (conn, handle_io) = acp::ClientSideConnection::new(
            handler.clone(),
            stdin.compat_write(),
            stdout.compat(),
            |fut| {
                tokio::task::spawn_local(fut);
            },
        );
        tokio::task::spawn_local(handle_io);

        Ok(Self {
            child,
            conn,
            handler,
        })
    }

    async fn initialize(&self) -> Result<Option<AgentCapabilities>> {
        let response = self
            .conn
            .initialize(
                acp::InitializeRequest::new(acp::ProtocolVersion::V1)
                    .client_capabilities(acp::ClientCapabilities::default())
                    .client_info(
                        acp::Implementation::new("murmur", env!("CARGO_PKG_VERSION"))
                            .title("murmur chat bot"),
                    ),
            )
            .await
            .context("ACP initialization failed")?;

        // Read capabilities from the wire form so absent fields stay absent
        let wire = serde_json::to_value(&response).context("Failed to encode initialize response")?;
        let capabilities = wire
            .get("agentCapabilities")
            .filter(|v| !v.is_null())
            .map(AgentCapabilities::from_wire);

        tracing::info!(?capabilities, "ACP connection initialized");
        Ok(capabilities)
    }

    async fn new_session(&self, cwd: &Path, mcp_servers: &[McpServerWire]) -> Result<String> {
        let request: acp::NewSessionRequest = serde_json::from_value(serde_json::json!({
            "cwd": cwd,
            "mcpServers": mcp_servers,
        }))
        .context("Failed to build session/new request")?;

        let response = self
            .conn
            .new_session(request)
            .await
            .context("Failed to create new ACP session")?;
        Ok(response.session_id.to_string())
    }

    async fn prompt(&self, session_id: &str, blocks: Vec<ContentBlock>) -> Result<PromptResponse> {
        let blocks: Vec<acp::ContentBlock> = serde_json::from_value(serde_json::to_value(&blocks)?)
            .context("Failed to encode prompt content")?;

        // Drop text left over from an earlier turn
        self.handler.take_turn_text();

        let response = self
            .conn
            .prompt(acp::PromptRequest::new(
                acp::SessionId::new(session_id.to_string()),
                blocks,
            ))
            .await
            .context("ACP prompt failed")?;

        let stop_reason = match serde_json::to_value(&response.stop_reason)? {
            serde_json::Value::String(s) => StopReason::from_wire(&s),
            other => StopReason::Other(other.to_string()),
        };

        Ok(PromptResponse {
            stop_reason,
            agent_text: self.handler.take_turn_text(),
        })
    }
}

/// Run the ACP worker on its own thread with a single-threaded runtime
fn run_worker(launch: AcpLaunch, mut cmd_rx: mpsc::Receiver<WorkerCommand>) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create tokio runtime for ACP worker");
            return;
        }
    };

    rt.block_on(async {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let mut connection: Option<AcpConnection> = None;

                while let Some(cmd) = cmd_rx.recv().await {
                    match cmd {
                        WorkerCommand::Initialize { mut reply } => {
                            let conn = match AcpConnection::spawn(&launch) {
                                Ok(conn) => conn,
                                Err(e) => {
                                    let _ = reply.send(Err(format!("{:#}", e)));
                                    continue;
                                }
                            };
                            let Some(result) = unless_abandoned(&mut reply, conn.initialize()).await
                            else {
                                tracing::debug!("Initialize abandoned, stopping ACP agent");
                                break;
                            };
                            connection = Some(conn);
                            let _ = reply.send(result);
                        }
                        WorkerCommand::NewSession {
                            cwd,
                            mcp_servers,
                            mut reply,
                        } => {
                            let Some(conn) = &connection else {
                                let _ = reply.send(Err("ACP agent is not initialized".to_string()));
                                continue;
                            };
                            let Some(result) =
                                unless_abandoned(&mut reply, conn.new_session(&cwd, &mcp_servers))
                                    .await
                            else {
                                tracing::debug!("Session request abandoned, stopping ACP agent");
                                break;
                            };
                            let _ = reply.send(result);
                        }
                        WorkerCommand::Prompt {
                            session_id,
                            blocks,
                            mut reply,
                        } => {
                            let Some(conn) = &connection else {
                                let _ = reply.send(Err("ACP agent is not initialized".to_string()));
                                continue;
                            };
                            let Some(result) =
                                unless_abandoned(&mut reply, conn.prompt(&session_id, blocks)).await
                            else {
                                tracing::debug!(session_id = %session_id, "Prompt abandoned, stopping ACP agent");
                                break;
                            };
                            let _ = reply.send(result);
                        }
                        WorkerCommand::Shutdown { ack } => {
                            tracing::debug!("ACP worker shutting down");
                            drop(connection.take());
                            let _ = ack.send(());
                            break;
                        }
                    }
                }
                // Dropping the connection kills the agent process
                drop(connection);
            })
            .await;
    });
}

/// Run `work` unless the requester stops waiting for the reply first.
/// `None` means the requester timed out or was dropped mid-request.
async fn unless_abandoned<T>(
    reply: &mut oneshot::Sender<Result<T, String>>,
    work: impl Future<Output = Result<T>>,
) -> Option<Result<T, String>> {
    tokio::select! {
        result = work => Some(result.map_err(|e| format!("{:#}", e))),
        _ = reply.closed() => None,
    }
}

/// Transport backed by an ACP agent subprocess
pub struct AcpTransport {
    worker_tx: Option<mpsc::Sender<WorkerCommand>>,
}

impl AcpTransport {
    /// Start the worker thread. The agent process itself is spawned on
    /// `initialize`.
    pub fn start(launch: AcpLaunch) -> Result<Self> {
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerCommand>(8);
        thread::Builder::new()
            .name("murmur-acp".to_string())
            .spawn(move || run_worker(launch, worker_rx))
            .context("Failed to start ACP worker thread")?;
        Ok(Self {
            worker_tx: Some(worker_tx),
        })
    }

    /// Factory function for the registry
    pub fn factory() -> TransportFactory {
        Arc::new(|config, working_dir| {
            let transport = AcpTransport::start(AcpLaunch::from_config(config, working_dir))?;
            Ok(Box::new(transport) as Box<dyn AgentTransport>)
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, String>>) -> WorkerCommand,
    ) -> Result<T> {
        let tx = self
            .worker_tx
            .as_ref()
            .context("ACP transport has been shut down")?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(build(reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("ACP worker closed"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("ACP worker dropped reply channel"))?
            .map_err(|e| anyhow::anyhow!(e))
    }
}

#[async_trait]
impl AgentTransport for AcpTransport {
    fn name(&self) -> &'static str {
        "acp"
    }

    async fn initialize(&mut self) -> Result<Option<AgentCapabilities>> {
        self.request(|reply| WorkerCommand::Initialize { reply }).await
    }

    async fn new_session(&mut self, cwd: &Path, mcp_servers: &[McpServerWire]) -> Result<String> {
        let cwd = cwd.to_path_buf();
        let mcp_servers = mcp_servers.to_vec();
        self.request(|reply| WorkerCommand::NewSession {
            cwd,
            mcp_servers,
            reply,
        })
        .await
    }

    // ACP v1 has no stable model-selection method; the model reaches the
    // agent through its launch environment instead.
    fn supports_session_model(&self) -> bool {
        false
    }

    async fn set_session_model(&mut self, session_id: &str, model_id: &str) -> Result<()> {
        tracing::debug!(
            session_id = %session_id,
            model = %model_id,
            "Per-session model selection not negotiated over ACP"
        );
        anyhow::bail!("Agent does not support per-session model selection over ACP")
    }

    async fn prompt(
        &mut self,
        session_id: &str,
        content: Vec<ContentBlock>,
    ) -> Result<PromptResponse> {
        let session_id = session_id.to_string();
        self.request(|reply| WorkerCommand::Prompt {
            session_id,
            blocks: content,
            reply,
        })
        .await
    }

    async fn shutdown(&mut self) -> Result<()> {
        let Some(tx) = self.worker_tx.take() else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(WorkerCommand::Shutdown { ack: ack_tx }).await.is_err() {
            // Worker already gone, nothing left to stop
            return Ok(());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, ack_rx).await.is_err() {
            tracing::warn!("ACP worker did not acknowledge shutdown in time");
        }
        Ok(())
    }
}

impl Drop for AcpTransport {
    fn drop(&mut self) {
        if let Some(tx) = self.worker_tx.take() {
            let (ack_tx, _ack_rx) = oneshot::channel();
            let _ = tx.try_send(WorkerCommand::Shutdown { ack: ack_tx });
        }
    }
}
