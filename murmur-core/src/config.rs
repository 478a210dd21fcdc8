// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones
use crate::paths;
use crate::rate_limit::RateLimitConfig;
use anyhow::{Context, Result};
use murmur_agent::AgentConfig;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub whitelist: WhitelistConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub skill_api: SkillApiConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Name the agent is told it goes by
    #[serde(default = "default_bot_name")]
    pub name: String,
    /// The bot's own user id; spontaneous sessions use `{platform}/{id}`
    #[serde(default = "default_bot_name")]
    pub id: String,
    /// Platform adapter to run ("console")
    #[serde(default = "default_platform")]
    pub platform: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            id: default_bot_name(),
            platform: default_platform(),
        }
    }
}

fn default_bot_name() -> String {
    "murmur".to_string()
}

fn default_platform() -> String {
    "console".to_string()
}

/// A trusted account or channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WhitelistEntry {
    Account { platform: String, user_id: String },
    Channel { platform: String, channel_id: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhitelistConfig {
    /// Refuse events matching no entry at all
    #[serde(default)]
    pub enforce: bool,
    #[serde(default)]
    pub entries: Vec<WhitelistEntry>,
}

impl WhitelistConfig {
    /// Account entries bypass rate limiting
    pub fn is_account_whitelisted(&self, platform: &str, user_id: &str) -> bool {
        self.entries.iter().any(|e| {
            matches!(e, WhitelistEntry::Account { platform: p, user_id: u } if p == platform && u == user_id)
        })
    }

    /// Channel entries admit events under `enforce` but never bypass rate limiting
    pub fn is_channel_whitelisted(&self, platform: &str, channel_id: &str) -> bool {
        self.entries.iter().any(|e| {
            matches!(e, WhitelistEntry::Channel { platform: p, channel_id: c } if p == platform && c == channel_id)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_session_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

fn default_session_timeout_secs() -> u64 {
    1800 // 30 minutes
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillApiConfig {
    #[serde(default = "default_skill_api_host")]
    pub host: String,
    /// 0 picks a free port
    #[serde(default = "default_skill_api_port")]
    pub port: u16,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cache_cleanup_interval_secs: u64,
}

impl Default for SkillApiConfig {
    fn default() -> Self {
        Self {
            host: default_skill_api_host(),
            port: default_skill_api_port(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            cache_cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl SkillApiConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn cache_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_secs.max(1))
    }
}

fn default_skill_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_skill_api_port() -> u16 {
    3939
}

fn default_dedup_ttl_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_path")]
    pub path: String,
    /// Directory of `<template>.md` prompt overrides; defaults to `{path}/prompts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts_dir: Option<String>,
    /// SQLite memory database; defaults to `{path}/memory.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_db: Option<String>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: default_workspace_path(),
            prompts_dir: None,
            memory_db: None,
        }
    }
}

impl WorkspaceConfig {
    pub fn root(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.prompts_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.root().join("prompts"))
    }

    pub fn memory_db(&self) -> PathBuf {
        self.memory_db
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.root().join("memory.db"))
    }
}

fn default_workspace_path() -> String {
    "./workspace".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spontaneous: Option<SpontaneousConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_research: Option<IntervalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<IntervalConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpontaneousConfig {
    pub interval_secs: u64,
    pub channels: Vec<String>,
    #[serde(default = "default_true")]
    pub fetch_recent_messages: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Daily-rolling log files are written here when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// EnvFilter directive used when RUST_LOG is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{} must be valid, got {:?}: {}", name, value, e))
}

impl Config {
    /// Find the config file, checking in order:
    /// 1. MURMUR_CONFIG env var (if set)
    /// 2. ./config.toml
    /// 3. ~/.config/murmur/config.toml
    fn find_config_file() -> Option<PathBuf> {
        if let Some(env_path) = env_var("MURMUR_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            tracing::warn!(path = %env_path, "MURMUR_CONFIG points at a missing file");
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    /// Load configuration from file (if any), apply environment overrides, validate
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(path = %config_path.display(), "Loading configuration from file");
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.apply_env_overrides()?;
        config.workspace.path = paths::expand_tilde(&config.workspace.path);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(val) = env_var("MURMUR_WORKSPACE_PATH") {
            self.workspace.path = val;
        }
        if let Some(val) = env_var("MURMUR_AGENT_BINARY") {
            self.agent.binary = val;
        }
        if let Some(val) = env_var("MURMUR_AGENT_KIND") {
            self.agent.kind = val.parse()?;
        }
        if let Some(val) = env_var("MURMUR_AGENT_MODEL") {
            self.agent.model = Some(val);
        }
        if let Some(val) = env_var("MURMUR_SKILL_API_PORT") {
            self.skill_api.port = parse_env("MURMUR_SKILL_API_PORT", &val)?;
        }
        if let Some(val) = env_var("MURMUR_SKILL_API_HOST") {
            self.skill_api.host = val;
        }
        if let Some(val) = env_var("MURMUR_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_env("MURMUR_RATE_LIMIT_ENABLED", &val)?;
        }
        if let Some(val) = env_var("MURMUR_SESSION_TIMEOUT_SECS") {
            self.session.timeout_secs = parse_env("MURMUR_SESSION_TIMEOUT_SECS", &val)?;
        }
        if let Some(val) = env_var("MURMUR_BOT_ID") {
            self.bot.id = val;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.transport == "acp" && self.agent.binary.trim().is_empty() {
            anyhow::bail!(
                "agent.binary is required for the acp transport (set in config.toml or MURMUR_AGENT_BINARY)"
            );
        }
        if self.rate_limit.enabled && self.rate_limit.window_secs == 0 {
            anyhow::bail!("rate_limit.window_secs must be greater than zero");
        }
        if self.session.timeout_secs == 0 {
            anyhow::bail!("session.timeout_secs must be greater than zero");
        }
        if self.skill_api.host != "localhost" && self.skill_api.host.parse::<IpAddr>().is_err() {
            anyhow::bail!(
                "skill_api.host must be an IP address or localhost, got: {}",
                self.skill_api.host
            );
        }
        if self.bot.id.trim().is_empty() || self.bot.id.contains('/') {
            anyhow::bail!("bot.id must be non-empty and must not contain '/'");
        }
        if let Some(spontaneous) = &self.scheduler.spontaneous {
            if spontaneous.interval_secs == 0 {
                anyhow::bail!("scheduler.spontaneous.interval_secs must be greater than zero");
            }
        }
        for (name, interval) in [
            ("self_research", &self.scheduler.self_research),
            ("maintenance", &self.scheduler.maintenance),
        ] {
            if interval.as_ref().is_some_and(|i| i.interval_secs == 0) {
                anyhow::bail!("scheduler.{}.interval_secs must be greater than zero", name);
            }
        }
        Ok(())
    }

    /// Bind address for the skill API
    pub fn skill_api_addr(&self) -> String {
        format!("{}:{}", self.skill_api.host, self.skill_api.port)
    }
}
