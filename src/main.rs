// ABOUTME: Entry point for the murmur bot: config, logging, services, console loop.
// ABOUTME: Runs until stdin closes or Ctrl-C, then shuts every service down.

use anyhow::Result;
use murmur::app::{start_services, transport_for};
use murmur::config::Config;
use murmur::platform::ConsoleAdapter;
use murmur::scheduler::{SchedulerContext, Schedulers};
use murmur_core::traits::PlatformAdapter;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const ERROR_NOTICE: &str = "Sorry, something went wrong while answering. Please try again.";

fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_filter = config.logging.filter.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(murmur::paths::expand_tilde(dir), "murmur.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("murmur panicked: {}", panic_info);
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    dotenvy::dotenv().ok();
    let config = Config::load()?;
    let _log_guard = init_logging(&config);

    tracing::info!(
        bot = %config.bot.name,
        platform = %config.bot.platform,
        workspace = %config.workspace.path,
        agent_binary = %config.agent.binary,
        "Starting murmur"
    );

    if config.bot.platform != murmur::platform::console::PLATFORM_ID {
        anyhow::bail!(
            "Unsupported platform: {} (this binary ships the console adapter only)",
            config.bot.platform
        );
    }

    let services = start_services(&config, transport_for(&config)?).await?;
    services
        .sessions
        .start_cleanup(config.session.cleanup_interval());

    let user = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
    let console = Arc::new(ConsoleAdapter::new(user, config.bot.name.clone()));
    let adapter: Arc<dyn PlatformAdapter> = console.clone();

    let schedulers = Schedulers::start(
        SchedulerContext {
            orchestrator: Arc::clone(&services.orchestrator),
            adapter: Arc::clone(&adapter),
            workspaces: Arc::clone(&services.workspaces),
            flags: Arc::clone(&services.flags),
            bot_id: config.bot.id.clone(),
        },
        &config.scheduler,
    );
    if !schedulers.is_empty() {
        tracing::info!(count = schedulers.len(), "Schedulers running");
    }

    let mut events = console.spawn_reader();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let handler = Arc::clone(&services.handler);
                let adapter = Arc::clone(&adapter);
                tokio::spawn(async move {
                    let response = handler.handle_event(&event, Arc::clone(&adapter)).await;
                    if response.needs_error_notice() {
                        tracing::warn!(
                            message_id = %event.message_id,
                            error = ?response.error,
                            "Interaction failed without a reply, sending notice"
                        );
                        if let Err(e) = adapter.send_reply(&event.channel_id, ERROR_NOTICE, &[]).await {
                            tracing::error!(error = %e, "Failed to send error notice");
                        }
                    }
                });
            }
        }
    }

    schedulers.stop().await;
    services.shutdown().await;
    Ok(())
}
