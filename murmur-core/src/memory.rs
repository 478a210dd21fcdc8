// ABOUTME: SQLite-backed MemoryStore: per-workspace memories with importance, visibility and enabled flag.
// ABOUTME: One shared connection behind a mutex, schema created on open.

use crate::traits::{Importance, Memory, MemoryPatch, MemoryStore, Visibility};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const COLUMNS: &str =
    "id, workspace_key, content, importance, visibility, enabled, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteMemoryStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open memory database {}", path.display()))?;
        let store = Self::init(conn)?;
        tracing::info!(db = %path.display(), "Memory store initialized");
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                workspace_key TEXT NOT NULL,
                content TEXT NOT NULL,
                importance TEXT NOT NULL DEFAULT 'medium',
                visibility TEXT NOT NULL DEFAULT 'public',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create memories table")?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_workspace ON memories (workspace_key, enabled)",
            [],
        )
        .context("Failed to create memories index")?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))
    }

    fn get(conn: &Connection, workspace_key: &str, id: &str) -> Result<Option<Memory>> {
        let sql = format!(
            "SELECT {} FROM memories WHERE workspace_key = ?1 AND id = ?2",
            COLUMNS
        );
        conn.query_row(&sql, params![workspace_key, id], row_to_memory)
            .optional()
            .context("Failed to load memory")
    }

    fn query(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Memory>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, row_to_memory)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read memories")
    }
}

fn parse_time(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let importance: String = row.get(3)?;
    let visibility: String = row.get(4)?;
    Ok(Memory {
        id: row.get(0)?,
        workspace_key: row.get(1)?,
        content: row.get(2)?,
        importance: importance.parse().unwrap_or_default(),
        visibility: visibility.parse().unwrap_or_default(),
        enabled: row.get::<_, i32>(5)? != 0,
        created_at: parse_time(row.get(6)?),
        updated_at: parse_time(row.get(7)?),
    })
}

/// Escape LIKE wildcards so the query matches literally
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn save(
        &self,
        workspace_key: &str,
        content: &str,
        importance: Importance,
    ) -> Result<Memory> {
        let now = Utc::now();
        let memory = Memory {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_key: workspace_key.to_string(),
            content: content.to_string(),
            importance,
            visibility: Visibility::default(),
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        self.conn()?
            .execute(
                "INSERT INTO memories (id, workspace_key, content, importance, visibility, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                params![
                    &memory.id,
                    &memory.workspace_key,
                    &memory.content,
                    importance.as_str(),
                    memory.visibility.as_str(),
                    now.to_rfc3339(),
                ],
            )
            .context("Failed to insert memory")?;
        Ok(memory)
    }

    async fn search(&self, workspace_key: &str, query: &str, limit: usize) -> Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {} FROM memories
             WHERE workspace_key = ?1 AND enabled = 1 AND content LIKE ?2 ESCAPE '\\'
             ORDER BY created_at DESC LIMIT ?3",
            COLUMNS
        );
        let conn = self.conn()?;
        Self::query(
            &conn,
            &sql,
            params![workspace_key, like_pattern(query), limit as i64],
        )
    }

    async fn patch(
        &self,
        workspace_key: &str,
        memory_id: &str,
        patch: MemoryPatch,
    ) -> Result<Option<Memory>> {
        let conn = self.conn()?;
        let Some(mut memory) = Self::get(&conn, workspace_key, memory_id)? else {
            return Ok(None);
        };

        if let Some(enabled) = patch.enabled {
            memory.enabled = enabled;
        }
        if let Some(visibility) = patch.visibility {
            memory.visibility = visibility;
        }
        if let Some(importance) = patch.importance {
            memory.importance = importance;
        }
        memory.updated_at = Utc::now();

        conn.execute(
            "UPDATE memories SET enabled = ?1, visibility = ?2, importance = ?3, updated_at = ?4
             WHERE workspace_key = ?5 AND id = ?6",
            params![
                memory.enabled as i32,
                memory.visibility.as_str(),
                memory.importance.as_str(),
                memory.updated_at.to_rfc3339(),
                workspace_key,
                memory_id,
            ],
        )
        .context("Failed to update memory")?;
        Ok(Some(memory))
    }

    async fn get_important_memories(
        &self,
        workspace_key: &str,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {} FROM memories
             WHERE workspace_key = ?1 AND enabled = 1 AND importance = 'high'
             ORDER BY created_at DESC LIMIT ?2",
            COLUMNS
        );
        let conn = self.conn()?;
        Self::query(&conn, &sql, params![workspace_key, limit as i64])
    }

    async fn dump_enabled_memories(&self, workspace_key: &str) -> Result<Vec<Memory>> {
        let sql = format!(
            "SELECT {} FROM memories
             WHERE workspace_key = ?1 AND enabled = 1
             ORDER BY created_at ASC",
            COLUMNS
        );
        let conn = self.conn()?;
        Self::query(&conn, &sql, params![workspace_key])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_search_scoped_by_workspace() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store
            .save("discord/u1", "likes green tea", Importance::High)
            .await
            .unwrap();
        store
            .save("discord/u2", "likes black tea", Importance::Low)
            .await
            .unwrap();

        let found = store.search("discord/u1", "TEA", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "likes green tea");
        assert_eq!(found[0].importance, Importance::High);
        assert!(found[0].enabled);
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store.save("k", "100% sure", Importance::Medium).await.unwrap();
        store.save("k", "1000 sure", Importance::Medium).await.unwrap();

        let found = store.search("k", "0%", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "100% sure");
    }

    #[tokio::test]
    async fn test_patch_disables_and_hides_from_dump() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let keep = store.save("k", "keep", Importance::High).await.unwrap();
        let drop = store.save("k", "drop", Importance::High).await.unwrap();

        let patched = store
            .patch(
                "k",
                &drop.id,
                MemoryPatch {
                    enabled: Some(false),
                    visibility: Some(Visibility::Private),
                    importance: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!patched.enabled);
        assert_eq!(patched.visibility, Visibility::Private);
        assert_eq!(patched.importance, Importance::High);

        let dumped = store.dump_enabled_memories("k").await.unwrap();
        assert_eq!(dumped.len(), 1);
        assert_eq!(dumped[0].id, keep.id);
    }

    #[tokio::test]
    async fn test_patch_other_workspace_is_not_found() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        let memory = store.save("a", "secret", Importance::Low).await.unwrap();
        let result = store
            .patch(
                "b",
                &memory.id,
                MemoryPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_important_memories_only_high() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store.save("k", "minor", Importance::Low).await.unwrap();
        store.save("k", "major", Importance::High).await.unwrap();

        let important = store.get_important_memories("k", 5).await.unwrap();
        assert_eq!(important.len(), 1);
        assert_eq!(important[0].content, "major");
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        let store = SqliteMemoryStore::open(&path).unwrap();
        store.save("k", "persisted", Importance::Medium).await.unwrap();
        assert!(path.exists());

        let reopened = SqliteMemoryStore::open(&path).unwrap();
        assert_eq!(reopened.dump_enabled_memories("k").await.unwrap().len(), 1);
    }
}
