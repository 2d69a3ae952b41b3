//! 最近命令的持久化：内存实现与 SQLite 实现
//!
//! 每个会话一行，写入即覆盖（last-write-wins）。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::OrchestratorError;
use crate::retry::LastCommand;

#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn get_last_command(
        &self,
        conversation_id: &str,
    ) -> Result<Option<LastCommand>, OrchestratorError>;

    async fn record_command(
        &self,
        conversation_id: &str,
        command: &LastCommand,
    ) -> Result<(), OrchestratorError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCommandStore {
    commands: Mutex<HashMap<String, LastCommand>>,
}

impl InMemoryCommandStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandStore for InMemoryCommandStore {
    async fn get_last_command(
        &self,
        conversation_id: &str,
    ) -> Result<Option<LastCommand>, OrchestratorError> {
        Ok(self
            .commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(conversation_id)
            .cloned())
    }

    async fn record_command(
        &self,
        conversation_id: &str,
        command: &LastCommand,
    ) -> Result<(), OrchestratorError> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conversation_id.to_string(), command.clone());
        Ok(())
    }
}

/// SQLite 存储；连接为同步 API，放在 spawn_blocking 中执行
#[derive(Clone)]
pub struct SqliteCommandStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCommandStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| OrchestratorError::Persistence(e.to_string()))?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, OrchestratorError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, OrchestratorError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS last_commands (
                conversation_id TEXT PRIMARY KEY,
                tool TEXT,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 直接写入原始载荷（迁移旧数据用）
    pub fn insert_raw(
        &self,
        conversation_id: &str,
        tool: Option<&str>,
        payload: &str,
    ) -> Result<(), OrchestratorError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO last_commands (conversation_id, tool, payload, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, tool, payload, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, OrchestratorError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, OrchestratorError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| OrchestratorError::Persistence(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn get_last_command(
        &self,
        conversation_id: &str,
    ) -> Result<Option<LastCommand>, OrchestratorError> {
        let conversation_id = conversation_id.to_string();
        let row = self
            .blocking(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT tool, payload FROM last_commands WHERE conversation_id = ?1",
                        params![conversation_id],
                        |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?)
            })
            .await?;
        match row {
            Some((tool, payload)) => Ok(Some(LastCommand::from_stored(tool.as_deref(), &payload)?)),
            None => Ok(None),
        }
    }

    async fn record_command(
        &self,
        conversation_id: &str,
        command: &LastCommand,
    ) -> Result<(), OrchestratorError> {
        let payload = command.to_json()?;
        let tool = match command {
            LastCommand::SingleStep { tool, .. } => Some(tool.clone()),
            LastCommand::MultiStep { .. } => None,
        };
        let conversation_id = conversation_id.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO last_commands (conversation_id, tool, payload, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, tool, payload, chrono::Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }
}
