//! Persistent store for sessions, messages, tasks, artifacts, context
//! rows, and settings
//!
//! The store opens a short-lived SQLite connection per public operation;
//! writes run inside per-operation transactions and callers never hold a
//! connection across an await point. Schema changes are ordered
//! migrations recorded in `schema_migrations`; embedded migrations ship
//! with the binary and an optional `migrations/NNN_*.sql` directory can
//! layer site-local ones on top, applied in lexicographic order.

use crate::error::{CampfireError, Result};
use anyhow::Context;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod types;
pub use types::{
    Artifact, ArtifactKind, ChatMessage, ContextRow, ContextSource, Role, Session, Task,
    TaskPatch, TaskStatus,
};

/// Embedded migrations, applied in order of their version string.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_sessions",
        "CREATE TABLE IF NOT EXISTS chat_sessions (
            session_id TEXT PRIMARY KEY,
            title TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS chat_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES chat_sessions(session_id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK (role IN ('user','assistant','system')),
            content TEXT NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chat_messages_session
            ON chat_messages(session_id, created_at, id);",
    ),
    (
        "002_todos",
        "CREATE TABLE IF NOT EXISTS todos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT REFERENCES chat_sessions(session_id) ON DELETE CASCADE,
            item TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending','in_progress','done')),
            priority INTEGER NOT NULL DEFAULT 3 CHECK (priority BETWEEN 1 AND 5),
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_todos_session ON todos(session_id, sort_order, id);",
    ),
    (
        "003_artifacts",
        "CREATE TABLE IF NOT EXISTS project_artifacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL REFERENCES chat_sessions(session_id) ON DELETE CASCADE,
            artifact_type TEXT NOT NULL
                CHECK (artifact_type IN ('project_idea','tech_stack','submission_summary')),
            content TEXT NOT NULL,
            metadata TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(session_id, artifact_type)
        );",
    ),
    (
        "004_rule_context",
        "CREATE TABLE IF NOT EXISTS rule_context (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT REFERENCES chat_sessions(session_id) ON DELETE CASCADE,
            source TEXT NOT NULL CHECK (source IN ('initial','file','text','url')),
            filename TEXT,
            content TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rule_context_session ON rule_context(session_id, id);",
    ),
    (
        "005_settings",
        "CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    ),
];

/// Storage backend for all persistent entities
///
/// Cheaply cloneable; clones share the database path. Connections are
/// opened per call, so a `Store` can be used from any thread.
#[derive(Clone)]
pub struct Store {
    db_path: Arc<PathBuf>,
}

impl Store {
    /// Open (or create) the store at the given path and apply pending
    /// embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns `CampfireError::Migration` when a migration fails; this is
    /// fatal at startup.
    pub fn open<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| CampfireError::Storage(e.to_string()))?;
        }

        let store = Self {
            db_path: Arc::new(db_path),
        };
        store.migrate(None)?;
        Ok(store)
    }

    /// Apply pending migrations: the embedded set, then any `*.sql` files
    /// in `extra_dir`, all ordered lexicographically by version.
    pub fn migrate(&self, extra_dir: Option<&Path>) -> Result<()> {
        let mut conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )
        .map_err(|e| CampfireError::Migration(e.to_string()))?;

        let mut pending: Vec<(String, String)> = MIGRATIONS
            .iter()
            .map(|(version, sql)| (version.to_string(), sql.to_string()))
            .collect();
        if let Some(dir) = extra_dir {
            pending.extend(read_migration_dir(dir)?);
        }
        pending.sort_by(|a, b| a.0.cmp(&b.0));

        for (version, sql) in pending {
            let applied: bool = conn
                .query_row(
                    "SELECT 1 FROM schema_migrations WHERE version = ?",
                    params![version],
                    |_| Ok(true),
                )
                .optional()
                .map_err(|e| CampfireError::Migration(e.to_string()))?
                .unwrap_or(false);
            if applied {
                continue;
            }

            let tx = conn
                .transaction()
                .map_err(|e| CampfireError::Migration(e.to_string()))?;
            tx.execute_batch(&sql)
                .map_err(|e| CampfireError::Migration(format!("{}: {}", version, e)))?;
            tx.execute(
                "INSERT INTO schema_migrations(version) VALUES (?)",
                params![version],
            )
            .map_err(|e| CampfireError::Migration(e.to_string()))?;
            tx.commit()
                .map_err(|e| CampfireError::Migration(e.to_string()))?;
            tracing::info!("Applied migration {}", version);
        }

        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(self.db_path.as_ref())
            .context("Failed to open database")
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        Ok(conn)
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }

    // ---- sessions -------------------------------------------------------

    /// Create the session if absent; update its title when one is given.
    /// Idempotent.
    pub fn upsert_session(&self, session_id: &str, title: Option<&str>) -> Result<Session> {
        if session_id.trim().is_empty() {
            return Err(CampfireError::Validation("session_id must not be empty".into()).into());
        }
        let conn = self.conn()?;
        let now = Self::now();
        conn.execute(
            "INSERT OR IGNORE INTO chat_sessions(session_id, title, created_at, updated_at)
             VALUES (?, ?, ?, ?)",
            params![session_id, title, now, now],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        if let Some(title) = title {
            conn.execute(
                "UPDATE chat_sessions SET title = ?, updated_at = ? WHERE session_id = ?",
                params![title, now, session_id],
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        }
        drop(conn);
        self.get_session(session_id)
    }

    /// Fetch a session; missing rows are a typed not-found.
    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.find_session(session_id)?
            .ok_or_else(|| CampfireError::NotFound(format!("session {}", session_id)).into())
    }

    /// Fetch a session, returning `None` when absent.
    pub fn find_session(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT session_id, title, created_at, updated_at
             FROM chat_sessions WHERE session_id = ?",
            params![session_id],
            |row| {
                Ok(Session {
                    session_id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| CampfireError::Storage(e.to_string()).into())
    }

    /// List sessions ordered by most recent activity.
    pub fn list_recent_sessions(&self, limit: usize, offset: usize) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, title, created_at, updated_at
                 FROM chat_sessions ORDER BY updated_at DESC, session_id LIMIT ? OFFSET ?",
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Ok(Session {
                    session_id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        Ok(rows.flatten().collect())
    }

    /// Set a session title; not-found when the session does not exist.
    pub fn update_session_title(&self, session_id: &str, title: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE chat_sessions SET title = ?, updated_at = ? WHERE session_id = ?",
                params![title, Self::now(), session_id],
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        if changed == 0 {
            return Err(CampfireError::NotFound(format!("session {}", session_id)).into());
        }
        Ok(())
    }

    /// Delete a session; cascades to messages, tasks, artifacts, and
    /// context rows via foreign keys.
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM chat_sessions WHERE session_id = ?",
                params![session_id],
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        if changed == 0 {
            return Err(CampfireError::NotFound(format!("session {}", session_id)).into());
        }
        Ok(())
    }

    // ---- messages -------------------------------------------------------

    /// Append a message, creating the session on first write.
    pub fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<ChatMessage> {
        if session_id.trim().is_empty() {
            return Err(CampfireError::Validation("session_id must not be empty".into()).into());
        }
        let metadata_json = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(CampfireError::Serialization)?;

        let mut conn = self.conn()?;
        let now = Self::now();
        let tx = conn
            .transaction()
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        tx.execute(
            "INSERT OR IGNORE INTO chat_sessions(session_id, title, created_at, updated_at)
             VALUES (?, NULL, ?, ?)",
            params![session_id, now, now],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        tx.execute(
            "INSERT INTO chat_messages(session_id, role, content, metadata, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![session_id, role.as_str(), content, metadata_json, now],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE chat_sessions SET updated_at = ? WHERE session_id = ?",
            params![now, session_id],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        tx.commit()
            .map_err(|e| CampfireError::Storage(e.to_string()))?;

        Ok(ChatMessage {
            id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            metadata: metadata.cloned(),
            created_at: now,
        })
    }

    /// List messages for a session in conversation order.
    pub fn list_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, role, content, metadata, created_at
                 FROM chat_messages WHERE session_id = ?
                 ORDER BY created_at, id LIMIT ? OFFSET ?",
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(params![session_id, limit, offset as i64], message_from_row)
            .map_err(|e| CampfireError::Storage(e.to_string()))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(|e| CampfireError::Storage(e.to_string()))?);
        }
        Ok(messages)
    }

    /// Number of messages stored for a session.
    pub fn count_messages(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chat_messages WHERE session_id = ?",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        Ok(count as usize)
    }

    // ---- tasks ----------------------------------------------------------

    /// Append a task at the end of the session's sort order.
    pub fn add_task(&self, item: &str, session_id: Option<&str>) -> Result<Task> {
        let item = item.trim();
        if item.is_empty() {
            return Err(CampfireError::Validation("task item must not be empty".into()).into());
        }

        let mut conn = self.conn()?;
        let now = Self::now();
        let tx = conn
            .transaction()
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        if let Some(session_id) = session_id {
            tx.execute(
                "INSERT OR IGNORE INTO chat_sessions(session_id, title, created_at, updated_at)
                 VALUES (?, NULL, ?, ?)",
                params![session_id, now, now],
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        }
        let next_order: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM todos
                 WHERE session_id IS ?",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        tx.execute(
            "INSERT INTO todos(session_id, item, status, sort_order, created_at, updated_at)
             VALUES (?, ?, 'pending', ?, ?, ?)",
            params![session_id, item, next_order, now, now],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|e| CampfireError::Storage(e.to_string()))?;

        self.get_task(id)
    }

    /// Fetch a task by id.
    pub fn get_task(&self, id: i64) -> Result<Task> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, session_id, item, status, priority, sort_order,
                    created_at, updated_at, completed_at
             FROM todos WHERE id = ?",
            params![id],
            task_from_row,
        )
        .optional()
        .map_err(|e| CampfireError::Storage(e.to_string()))?
        .ok_or_else(|| CampfireError::NotFound(format!("todo {}", id)).into())
    }

    /// List tasks; `session_id = Some` scopes to one session,
    /// `None` lists shared (unscoped) tasks only.
    pub fn list_tasks(&self, session_id: Option<&str>) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, item, status, priority, sort_order,
                        created_at, updated_at, completed_at
                 FROM todos WHERE session_id IS ?
                 ORDER BY sort_order, id",
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![session_id], task_from_row)
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        Ok(rows.flatten().collect())
    }

    /// Apply a partial update; transitions into `done` stamp
    /// `completed_at`, transitions out of it clear the stamp.
    pub fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<Task> {
        if let Some(priority) = patch.priority {
            if !(1..=5).contains(&priority) {
                return Err(
                    CampfireError::Validation("priority must be between 1 and 5".into()).into(),
                );
            }
        }

        let current = self.get_task(id)?;
        let conn = self.conn()?;
        let now = Self::now();
        let status = patch.status.unwrap_or(current.status);
        let completed_at = match (current.status, status) {
            (TaskStatus::Done, TaskStatus::Done) => current.completed_at.clone(),
            (_, TaskStatus::Done) => Some(now.clone()),
            _ => None,
        };
        conn.execute(
            "UPDATE todos SET item = ?, status = ?, priority = ?, sort_order = ?,
                              updated_at = ?, completed_at = ?
             WHERE id = ?",
            params![
                patch.item.as_deref().unwrap_or(&current.item),
                status.as_str(),
                patch.priority.unwrap_or(current.priority),
                patch.sort_order.unwrap_or(current.sort_order),
                now,
                completed_at,
                id
            ],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        drop(conn);
        self.get_task(id)
    }

    /// Delete a task; not-found when missing or scoped to another session.
    pub fn delete_task(&self, id: i64, session_id: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let changed = match session_id {
            Some(sid) => conn
                .execute(
                    "DELETE FROM todos WHERE id = ? AND session_id = ?",
                    params![id, sid],
                )
                .map_err(|e| CampfireError::Storage(e.to_string()))?,
            None => conn
                .execute("DELETE FROM todos WHERE id = ?", params![id])
                .map_err(|e| CampfireError::Storage(e.to_string()))?,
        };
        if changed == 0 {
            return Err(CampfireError::NotFound(format!("todo {}", id)).into());
        }
        Ok(())
    }

    /// Clear all tasks for one session. Callers must supply a session id;
    /// there is deliberately no unscoped clear.
    pub fn clear_tasks(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM todos WHERE session_id = ?",
                params![session_id],
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        Ok(deleted)
    }

    // ---- artifacts ------------------------------------------------------

    /// Insert or replace the artifact for `(session, type)`.
    pub fn put_artifact(
        &self,
        session_id: &str,
        kind: ArtifactKind,
        content: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<Artifact> {
        let metadata_json = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(CampfireError::Serialization)?;

        let mut conn = self.conn()?;
        let now = Self::now();
        let tx = conn
            .transaction()
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        tx.execute(
            "INSERT OR IGNORE INTO chat_sessions(session_id, title, created_at, updated_at)
             VALUES (?, NULL, ?, ?)",
            params![session_id, now, now],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        tx.execute(
            "INSERT INTO project_artifacts(session_id, artifact_type, content, metadata,
                                           created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, artifact_type) DO UPDATE SET
                 content = excluded.content,
                 metadata = excluded.metadata,
                 updated_at = excluded.updated_at",
            params![session_id, kind.as_str(), content, metadata_json, now, now],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        tx.commit()
            .map_err(|e| CampfireError::Storage(e.to_string()))?;

        self.get_artifact(session_id, kind)?
            .ok_or_else(|| CampfireError::Internal("artifact upsert lost".into()).into())
    }

    /// Fetch one artifact, `None` when absent.
    pub fn get_artifact(&self, session_id: &str, kind: ArtifactKind) -> Result<Option<Artifact>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, session_id, artifact_type, content, metadata, created_at, updated_at
             FROM project_artifacts WHERE session_id = ? AND artifact_type = ?",
            params![session_id, kind.as_str()],
            artifact_from_row,
        )
        .optional()
        .map_err(|e| CampfireError::Storage(e.to_string()).into())
    }

    /// All artifacts for a session, in the canonical type order.
    pub fn list_artifacts(&self, session_id: &str) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for kind in ArtifactKind::ALL {
            if let Some(artifact) = self.get_artifact(session_id, kind)? {
                artifacts.push(artifact);
            }
        }
        Ok(artifacts)
    }

    // ---- context rows ---------------------------------------------------

    /// Insert an active context row.
    pub fn insert_context(
        &self,
        source: ContextSource,
        content: &str,
        filename: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<ContextRow> {
        let mut conn = self.conn()?;
        let now = Self::now();
        let tx = conn
            .transaction()
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        if let Some(session_id) = session_id {
            tx.execute(
                "INSERT OR IGNORE INTO chat_sessions(session_id, title, created_at, updated_at)
                 VALUES (?, NULL, ?, ?)",
                params![session_id, now, now],
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        }
        tx.execute(
            "INSERT INTO rule_context(session_id, source, filename, content, active, created_at)
             VALUES (?, ?, ?, ?, 1, ?)",
            params![session_id, source.as_str(), filename, content, now],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|e| CampfireError::Storage(e.to_string()))?;

        Ok(ContextRow {
            id,
            session_id: session_id.map(String::from),
            source,
            filename: filename.map(String::from),
            content: content.to_string(),
            active: true,
            created_at: now,
        })
    }

    /// Active context rows in insertion order. A `Some` session id scopes
    /// to that session; `None` returns the shared rows used when no
    /// session is active.
    pub fn list_active_context(&self, session_id: Option<&str>) -> Result<Vec<ContextRow>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, source, filename, content, active, created_at
                 FROM rule_context WHERE active = 1 AND session_id IS ?
                 ORDER BY id",
            )
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![session_id], context_from_row)
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        Ok(rows.flatten().collect())
    }

    /// Mark a context row inactive; not-found when missing.
    pub fn deactivate_context(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute("UPDATE rule_context SET active = 0 WHERE id = ?", params![id])
            .map_err(|e| CampfireError::Storage(e.to_string()))?;
        if changed == 0 {
            return Err(CampfireError::NotFound(format!("context row {}", id)).into());
        }
        Ok(())
    }

    // ---- settings -------------------------------------------------------

    pub fn setting_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM app_settings WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CampfireError::Storage(e.to_string()).into())
    }

    pub fn setting_put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO app_settings(key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| CampfireError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn read_migration_dir(dir: &Path) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir).map_err(|e| CampfireError::Migration(e.to_string()))? {
        let entry = entry.map_err(|e| CampfireError::Migration(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let version = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let sql =
            std::fs::read_to_string(&path).map_err(|e| CampfireError::Migration(e.to_string()))?;
        out.push((version, sql));
    }
    Ok(out)
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role_raw: String = row.get(2)?;
    let metadata_raw: Option<String> = row.get(4)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: Role::parse(&role_raw).unwrap_or(Role::User),
        content: row.get(3)?,
        metadata: metadata_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row.get(5)?,
    })
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status_raw: String = row.get(3)?;
    Ok(Task {
        id: row.get(0)?,
        session_id: row.get(1)?,
        item: row.get(2)?,
        status: TaskStatus::parse(&status_raw).unwrap_or(TaskStatus::Pending),
        priority: row.get(4)?,
        sort_order: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn artifact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Artifact> {
    let kind_raw: String = row.get(2)?;
    let metadata_raw: Option<String> = row.get(4)?;
    Ok(Artifact {
        id: row.get(0)?,
        session_id: row.get(1)?,
        artifact_type: ArtifactKind::parse(&kind_raw).unwrap_or(ArtifactKind::ProjectIdea),
        content: row.get(3)?,
        metadata: metadata_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn context_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextRow> {
    let source_raw: String = row.get(2)?;
    let active: i64 = row.get(5)?;
    Ok(ContextRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        source: ContextSource::parse(&source_raw).unwrap_or(ContextSource::Text),
        filename: row.get(3)?,
        content: row.get(4)?,
        active: active != 0,
        created_at: row.get(6)?,
    })
}
