use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

const BUSY_TIMEOUT_MS: u64 = 5_000;

/// The single shared database. Every hook process opens its own connection;
/// cross-process coordination is WAL + busy timeout, nothing else.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("creating database directory")?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database: {}", db_path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;"
        ))
        .context("pragma init failed")?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn init_schema(&self) -> Result<()> {
        let current_version: i32 =
            self.conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                summary TEXT
            );

            CREATE TABLE IF NOT EXISTS observations (
                id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                session_id TEXT,
                kind TEXT,
                title TEXT,
                content TEXT NOT NULL CHECK (length(content) > 0),
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS obs_fts USING fts5(
                content,
                title,
                observation_id UNINDEXED
            );

            CREATE TABLE IF NOT EXISTS obs_vectors (
                observation_id TEXT PRIMARY KEY,
                vector BLOB NOT NULL,
                dim INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tool_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tool TEXT NOT NULL,
                project TEXT,
                session_id TEXT NOT NULL,
                success INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tool_registry (
                name TEXT NOT NULL,
                project TEXT,
                tool_type TEXT NOT NULL,
                scope TEXT NOT NULL,
                origin TEXT NOT NULL,
                description TEXT,
                server TEXT,
                hints TEXT,
                usage_count INTEGER NOT NULL DEFAULT 0,
                last_used_at TEXT,
                discovered_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                PRIMARY KEY (name, project)
            );

            CREATE TABLE IF NOT EXISTS research_buffer (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                tool TEXT NOT NULL,
                target TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS routing_patterns (
                project TEXT NOT NULL,
                target TEXT NOT NULL,
                preceding TEXT NOT NULL,
                frequency INTEGER NOT NULL,
                UNIQUE (project, target, preceding)
            );

            CREATE TABLE IF NOT EXISTS routing_state (
                session_id TEXT NOT NULL,
                project TEXT NOT NULL,
                suggestions_made INTEGER NOT NULL DEFAULT 0,
                last_suggestion_at TEXT,
                tool_calls_since_suggestion INTEGER NOT NULL DEFAULT 0,
                tool_calls_total INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (session_id, project)
            );

            CREATE TABLE IF NOT EXISTS stashes (
                id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                session_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                summary TEXT NOT NULL,
                snapshots TEXT NOT NULL,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'stashed'
            );

            CREATE TABLE IF NOT EXISTS shift_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                session_id TEXT NOT NULL,
                observation_id TEXT NOT NULL,
                distance REAL NOT NULL,
                threshold REAL NOT NULL,
                ewma_mean REAL NOT NULL,
                ewma_var REAL NOT NULL,
                shifted INTEGER NOT NULL,
                confidence REAL NOT NULL,
                stash_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS topic_state (
                session_id TEXT PRIMARY KEY,
                project TEXT NOT NULL,
                prev_embedding BLOB,
                ewma_mean REAL NOT NULL DEFAULT 0,
                ewma_var REAL NOT NULL DEFAULT 0,
                samples INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS graph_entities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS graph_edges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                relation TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (source_id) REFERENCES graph_entities(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES graph_entities(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_obs_project ON observations(project, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_obs_session ON observations(session_id);
            CREATE INDEX IF NOT EXISTS idx_events_session ON tool_events(session_id, id);
            CREATE INDEX IF NOT EXISTS idx_events_project ON tool_events(project, id DESC);
            CREATE INDEX IF NOT EXISTS idx_events_tool ON tool_events(tool, id DESC);
            CREATE INDEX IF NOT EXISTS idx_research_session ON research_buffer(session_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_project ON notifications(project, id);
            CREATE INDEX IF NOT EXISTS idx_stashes_project ON stashes(project, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_entities_name ON graph_entities(project, name);
            "#,
        )?;

        self.create_sync_triggers()?;

        if current_version != SCHEMA_VERSION {
            self.conn
                .execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
        }

        Ok(())
    }

    /// Row triggers keeping `obs_fts` and `obs_vectors` aligned with live
    /// observation rows. Soft delete removes index entries immediately; the
    /// observation row itself stays for audit.
    fn create_sync_triggers(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TRIGGER IF NOT EXISTS obs_fts_insert
            AFTER INSERT ON observations
            WHEN NEW.deleted_at IS NULL
            BEGIN
                INSERT INTO obs_fts (content, title, observation_id)
                VALUES (NEW.content, COALESCE(NEW.title, ''), NEW.id);
            END;

            CREATE TRIGGER IF NOT EXISTS obs_fts_soft_delete
            AFTER UPDATE OF deleted_at ON observations
            WHEN NEW.deleted_at IS NOT NULL
            BEGIN
                DELETE FROM obs_fts WHERE observation_id = NEW.id;
                DELETE FROM obs_vectors WHERE observation_id = NEW.id;
            END;

            CREATE TRIGGER IF NOT EXISTS obs_fts_hard_delete
            AFTER DELETE ON observations
            BEGIN
                DELETE FROM obs_fts WHERE observation_id = OLD.id;
                DELETE FROM obs_vectors WHERE observation_id = OLD.id;
            END;
            "#,
        )?;
        Ok(())
    }

    fn drop_sync_triggers(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            DROP TRIGGER IF EXISTS obs_fts_insert;
            DROP TRIGGER IF EXISTS obs_fts_soft_delete;
            DROP TRIGGER IF EXISTS obs_fts_hard_delete;
            "#,
        )?;
        Ok(())
    }

    /// Bulk reset of a project's observations. Firing the sync triggers per
    /// row would dominate the delete, so the triggers are dropped first, the
    /// indexes rebuilt wholesale, and the triggers recreated, one transaction.
    pub fn reset_observations(&mut self, project: &str) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        self.drop_sync_triggers()?;
        let removed = tx.execute("DELETE FROM observations WHERE project = ?1", [project])?;
        tx.execute_batch(
            r#"
            DELETE FROM obs_fts;
            INSERT INTO obs_fts (content, title, observation_id)
                SELECT content, COALESCE(title, ''), id
                FROM observations WHERE deleted_at IS NULL;
            DELETE FROM obs_vectors
                WHERE observation_id NOT IN (SELECT id FROM observations WHERE deleted_at IS NULL);
            "#,
        )?;
        self.create_sync_triggers()?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn journal_mode(&self) -> Result<String> {
        Ok(self
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))?)
    }
}
