// ABOUTME: Filesystem workspaces at {root}/{platform}/{userId}, each with an agent/ working directory.
// ABOUTME: New agent directories are seeded from {root}/template when it exists.

use crate::traits::{workspace_key, NormalizedEvent, Workspace, WorkspaceManager};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Split a `{platform}/{userId}` key. `None` for any other shape.
pub fn parse_workspace_key(key: &str) -> Option<(&str, &str)> {
    let (platform, user) = key.split_once('/')?;
    let valid = |s: &str| {
        !s.is_empty()
            && s != "."
            && s != ".."
            && !s.contains('/')
            && !s.contains('\\')
            && !s.chars().any(char::is_whitespace)
    };
    if valid(platform) && valid(user) {
        Some((platform, user))
    } else {
        None
    }
}

/// Recursively copy all contents from source directory to destination
fn copy_dir_contents(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src).context("Failed to read template directory")? {
        let entry = entry.context("Failed to read directory entry")?;
        let file_type = entry.file_type().context("Failed to get file type")?;
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            std::fs::create_dir_all(&dst_path)
                .with_context(|| format!("Failed to create directory: {}", dst_path.display()))?;
            copy_dir_contents(&entry.path(), &dst_path)?;
        } else {
            std::fs::copy(entry.path(), &dst_path)
                .with_context(|| format!("Failed to copy {}", dst_path.display()))?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct FsWorkspaceManager {
    root: PathBuf,
}

impl FsWorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open(&self, key: &str) -> Result<Workspace> {
        let (platform, user) = parse_workspace_key(key)
            .ok_or_else(|| anyhow::anyhow!("Invalid workspace key: {}", key))?;
        let root = self.root.join(platform).join(user);
        let agent_dir = root.join("agent");

        if !agent_dir.exists() {
            std::fs::create_dir_all(&agent_dir).with_context(|| {
                format!("Failed to create workspace directory {}", agent_dir.display())
            })?;
            let template = self.root.join("template");
            if template.is_dir() {
                copy_dir_contents(&template, &agent_dir)
                    .context("Failed to copy template directory contents")?;
            }
            tracing::info!(workspace = %key, path = %root.display(), "Workspace created");
        }

        Ok(Workspace {
            key: key.to_string(),
            root,
            agent_dir,
        })
    }
}

#[async_trait]
impl WorkspaceManager for FsWorkspaceManager {
    async fn get_or_create_workspace(&self, event: &NormalizedEvent) -> Result<Workspace> {
        self.open(&workspace_key(&event.platform, &event.user_id))
    }

    async fn workspace_for_key(&self, key: &str) -> Result<Workspace> {
        self.open(key)
    }

    async fn list_workspace_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let platforms = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e).context("Failed to read workspace root"),
        };
        for platform in platforms {
            let platform = platform.context("Failed to read directory entry")?;
            let name = platform.file_name().to_string_lossy().to_string();
            if !platform.file_type()?.is_dir() || name == "template" {
                continue;
            }
            for user in std::fs::read_dir(platform.path())? {
                let user = user?;
                if user.path().join("agent").is_dir() {
                    keys.push(workspace_key(&name, &user.file_name().to_string_lossy()));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workspace_key() {
        assert_eq!(parse_workspace_key("discord/123"), Some(("discord", "123")));
        assert_eq!(parse_workspace_key("discord"), None);
        assert_eq!(parse_workspace_key("discord/"), None);
        assert_eq!(parse_workspace_key("/123"), None);
        assert_eq!(parse_workspace_key("discord/a/b"), None);
        assert_eq!(parse_workspace_key("discord/.."), None);
        assert_eq!(parse_workspace_key("discord/a b"), None);
    }

    #[tokio::test]
    async fn test_workspace_created_with_template() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("template/notes")).unwrap();
        std::fs::write(dir.path().join("template/notes/README.md"), "hi").unwrap();

        let manager = FsWorkspaceManager::new(dir.path());
        let ws = manager.workspace_for_key("misskey/alice").await.unwrap();

        assert_eq!(ws.key, "misskey/alice");
        assert!(ws.agent_dir.join("notes/README.md").is_file());
        assert_eq!(
            manager.list_workspace_keys().await.unwrap(),
            vec!["misskey/alice".to_string()]
        );
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FsWorkspaceManager::new(dir.path());
        let err = manager.workspace_for_key("../etc").await.unwrap_err();
        assert!(err.to_string().contains("Invalid workspace key"));
    }

    #[tokio::test]
    async fn test_list_on_missing_root_is_empty() {
        let manager = FsWorkspaceManager::new("/nonexistent/murmur/workspaces");
        assert!(manager.list_workspace_keys().await.unwrap().is_empty());
    }
}
