// ABOUTME: Periodic background runs: spontaneous posts, self-research and memory maintenance.
// ABOUTME: Each tick is fire-and-forget; outcomes are logged and never escalated.

use anyhow::{Context, Result};
use murmur_core::config::{IntervalConfig, SchedulerConfig, SpontaneousConfig};
use murmur_core::flags::InteractionFlags;
use murmur_core::orchestrator::{ResearchItem, SessionOrchestrator, SpontaneousOptions};
use murmur_core::traits::{workspace_key, PlatformAdapter, WorkspaceManager};
use murmur_core::workspace::parse_workspace_key;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Relative to the bot workspace's agent directory
pub const RESEARCH_INBOX: &str = "research/inbox.json";

/// Everything a scheduled run needs
#[derive(Clone)]
pub struct SchedulerContext {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub adapter: Arc<dyn PlatformAdapter>,
    pub workspaces: Arc<dyn WorkspaceManager>,
    pub flags: Arc<InteractionFlags>,
    pub bot_id: String,
}

impl SchedulerContext {
    fn bot_workspace_key(&self) -> String {
        workspace_key(self.adapter.platform_id(), &self.bot_id)
    }
}

pub struct Schedulers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Schedulers {
    /// Start every scheduler present in `config`
    pub fn start(ctx: SchedulerContext, config: &SchedulerConfig) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        if let Some(spontaneous) = config.spontaneous.clone() {
            handles.push(spawn_loop(
                "spontaneous",
                Duration::from_secs(spontaneous.interval_secs),
                cancel.clone(),
                {
                    let ctx = ctx.clone();
                    move || {
                        let ctx = ctx.clone();
                        let spontaneous = spontaneous.clone();
                        async move { run_spontaneous(&ctx, &spontaneous).await }
                    }
                },
            ));
        }
        if let Some(IntervalConfig { interval_secs }) = config.self_research {
            handles.push(spawn_loop(
                "self_research",
                Duration::from_secs(interval_secs),
                cancel.clone(),
                {
                    let ctx = ctx.clone();
                    move || {
                        let ctx = ctx.clone();
                        async move { run_self_research(&ctx).await }
                    }
                },
            ));
        }
        if let Some(IntervalConfig { interval_secs }) = config.maintenance {
            handles.push(spawn_loop(
                "maintenance",
                Duration::from_secs(interval_secs),
                cancel.clone(),
                move || {
                    let ctx = ctx.clone();
                    async move { run_maintenance(&ctx).await }
                },
            ));
        }

        Self { cancel, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel all loops and wait for in-progress runs to end
    pub async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tracing::info!(scheduler = name, interval_secs = period.as_secs(), "Starting scheduler");
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; wait a full period before the first run
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = tick().await {
                        tracing::warn!(scheduler = name, error = %format!("{:#}", e), "Scheduled run failed");
                    }
                }
            }
        }
        tracing::debug!(scheduler = name, "Scheduler stopped");
    })
}

/// One spontaneous post per configured channel
pub async fn run_spontaneous(ctx: &SchedulerContext, config: &SpontaneousConfig) -> Result<()> {
    let platform = ctx.adapter.platform_id().to_string();
    let key = ctx.bot_workspace_key();
    for channel in &config.channels {
        // A scheduled post is a new interaction
        ctx.flags.clear(&key, channel);
        let response = ctx
            .orchestrator
            .process_spontaneous_post(
                &platform,
                channel,
                Arc::clone(&ctx.adapter),
                SpontaneousOptions {
                    bot_id: ctx.bot_id.clone(),
                    fetch_recent_messages: config.fetch_recent_messages,
                },
            )
            .await;
        tracing::info!(
            channel_id = %channel,
            success = response.success,
            error = ?response.error,
            "Spontaneous post finished"
        );
    }
    Ok(())
}

pub fn research_inbox_path(agent_dir: &Path) -> PathBuf {
    agent_dir.join(RESEARCH_INBOX)
}

/// Queued research items; a missing inbox is empty
pub async fn read_research_inbox(agent_dir: &Path) -> Result<Vec<ResearchItem>> {
    let path = research_inbox_path(agent_dir);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub async fn run_self_research(ctx: &SchedulerContext) -> Result<()> {
    let workspace = ctx
        .workspaces
        .workspace_for_key(&ctx.bot_workspace_key())
        .await?;
    let items = read_research_inbox(&workspace.agent_dir).await?;
    if items.is_empty() {
        tracing::debug!("Research inbox empty, skipping");
        return Ok(());
    }

    let response = ctx
        .orchestrator
        .process_self_research(&items, Arc::clone(&ctx.adapter))
        .await;
    tracing::info!(
        items = items.len(),
        success = response.success,
        error = ?response.error,
        "Self-research finished"
    );

    if response.success {
        let path = research_inbox_path(&workspace.agent_dir);
        tokio::fs::write(&path, "[]\n")
            .await
            .with_context(|| format!("Failed to clear {}", path.display()))?;
    }
    Ok(())
}

/// Maintain every user workspace on this platform, one at a time
pub async fn run_maintenance(ctx: &SchedulerContext) -> Result<()> {
    let platform = ctx.adapter.platform_id().to_string();
    let bot_key = ctx.bot_workspace_key();
    let keys: Vec<String> = ctx
        .workspaces
        .list_workspace_keys()
        .await?
        .into_iter()
        .filter(|k| k != &bot_key)
        .filter(|k| parse_workspace_key(k).is_some_and(|(p, _)| p == platform))
        .collect();

    for key in keys {
        let response = ctx
            .orchestrator
            .process_memory_maintenance(&key, Arc::clone(&ctx.adapter))
            .await;
        tracing::info!(
            workspace = %key,
            success = response.success,
            error = ?response.error,
            "Memory maintenance finished"
        );
    }
    Ok(())
}
