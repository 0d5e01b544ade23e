pub mod reminders;
pub mod users;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::remind::{Reminder, SceneRef, User, UserField};

/// Persistence of users and reminders as seen by the dispatcher.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Look the user up by openid, creating an unsubscribed record on first contact.
    async fn get_or_create_user(&self, openid: &str) -> Result<User>;

    /// Write the given columns of the user row. An empty list writes them all.
    async fn save_user(&self, user: &User, fields: &[UserField]) -> Result<()>;

    async fn delete_user(&self, openid: &str) -> Result<()>;

    /// Insert or update the reminder, participants included.
    async fn save_reminder(&self, reminder: &Reminder) -> Result<()>;

    async fn has_time_reminders(&self, owner_id: &str) -> Result<bool>;

    /// Reminders of `owner_id` in `[from, to)`, ordered by time.
    async fn find_reminders(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reminder>>;

    async fn find_reminder_by_scene(&self, scene: &SceneRef) -> Result<Option<Reminder>>;
}

/// SQLite-backed store shared between concurrent requests
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("Store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                openid TEXT PRIMARY KEY,
                nickname TEXT NOT NULL DEFAULT '',
                subscribed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                event TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                time TEXT NOT NULL,
                repeat TEXT,
                participants TEXT NOT NULL DEFAULT '[]',
                media_id TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_reminders_owner_time
                ON reminders(owner_id, time);
            ",
        )
        .context("Failed to run migrations")?;
        Ok(())
    }

    /// Row counts of (users, reminders)
    pub async fn stats(&self) -> Result<(i64, i64)> {
        let conn = self.conn.lock().await;
        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let reminders: i64 =
            conn.query_row("SELECT COUNT(*) FROM reminders", [], |row| row.get(0))?;
        Ok((users, reminders))
    }
}

#[async_trait]
impl ReminderStore for SqliteStore {
    async fn get_or_create_user(&self, openid: &str) -> Result<User> {
        self.get_or_create_user_row(openid).await
    }

    async fn save_user(&self, user: &User, fields: &[UserField]) -> Result<()> {
        self.update_user_row(user, fields).await
    }

    async fn delete_user(&self, openid: &str) -> Result<()> {
        self.delete_user_row(openid).await
    }

    async fn save_reminder(&self, reminder: &Reminder) -> Result<()> {
        self.upsert_reminder(reminder).await
    }

    async fn has_time_reminders(&self, owner_id: &str) -> Result<bool> {
        Ok(self.count_owned(owner_id).await? > 0)
    }

    async fn find_reminders(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reminder>> {
        self.list_owned_between(owner_id, from, to).await
    }

    async fn find_reminder_by_scene(&self, scene: &SceneRef) -> Result<Option<Reminder>> {
        match scene {
            SceneRef::Id(id) => self.get_by_id(id).await,
            SceneRef::LegacyLowerBound(key) => self.first_at_or_after(key).await,
        }
    }
}
