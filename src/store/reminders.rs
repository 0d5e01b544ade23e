use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Connection;

use super::SqliteStore;
use crate::remind::{Reminder, RepeatRule};

const REMINDER_COLUMNS: &str =
    "id, owner_id, event, description, time, repeat, participants, media_id";

/// Fixed-width UTC timestamps, so string order in SQL matches time order
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_reminder_row(row: &rusqlite::Row) -> rusqlite::Result<Reminder> {
    let time: String = row.get(4)?;
    let time = DateTime::parse_from_rfc3339(&time)
        .map_err(|e| conversion_error(4, e))?
        .with_timezone(&Utc);

    let repeat_json: Option<String> = row.get(5)?;
    let repeat = repeat_json
        .map(|json| serde_json::from_str::<RepeatRule>(&json))
        .transpose()
        .map_err(|e| conversion_error(5, e))?;

    let participants_json: String = row.get(6)?;
    let participants =
        serde_json::from_str(&participants_json).map_err(|e| conversion_error(6, e))?;

    Ok(Reminder {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        event: row.get(2)?,
        description: row.get(3)?,
        time,
        repeat,
        participants,
        media_id: row.get(7)?,
    })
}

impl SqliteStore {
    pub(crate) async fn upsert_reminder(&self, reminder: &Reminder) -> Result<()> {
        let repeat_json = reminder
            .repeat
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode repeat rule")?;
        let participants_json =
            serde_json::to_string(&reminder.participants).context("Failed to encode participants")?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO reminders
             (id, owner_id, event, description, time, repeat, participants, media_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                event = excluded.event,
                description = excluded.description,
                time = excluded.time,
                repeat = excluded.repeat,
                participants = excluded.participants,
                media_id = excluded.media_id",
            rusqlite::params![
                reminder.id,
                reminder.owner_id,
                reminder.event,
                reminder.description,
                format_time(&reminder.time),
                repeat_json,
                participants_json,
                reminder.media_id,
            ],
        )
        .context("Failed to save reminder")?;
        Ok(())
    }

    pub(crate) async fn count_owned(&self, owner_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM reminders WHERE owner_id = ?1",
            rusqlite::params![owner_id],
            |row| row.get(0),
        )
        .context("Failed to count reminders")
    }

    pub(crate) async fn list_owned_between(
        &self,
        owner_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reminder>> {
        let conn = self.conn.lock().await;
        self.query_reminders(
            &conn,
            "WHERE owner_id = ?1 AND time >= ?2 AND time < ?3 ORDER BY time ASC",
            rusqlite::params![owner_id, format_time(&from), format_time(&to)],
        )
    }

    pub(crate) async fn get_by_id(&self, id: &str) -> Result<Option<Reminder>> {
        let conn = self.conn.lock().await;
        let mut found = self.query_reminders(
            &conn,
            "WHERE id = ?1 LIMIT 1",
            rusqlite::params![id],
        )?;
        Ok(found.pop())
    }

    /// First reminder, by id order, whose id is not below `key`
    pub(crate) async fn first_at_or_after(&self, key: &str) -> Result<Option<Reminder>> {
        let conn = self.conn.lock().await;
        let mut found = self.query_reminders(
            &conn,
            "WHERE id >= ?1 ORDER BY id ASC LIMIT 1",
            rusqlite::params![key],
        )?;
        Ok(found.pop())
    }

    // Takes &Connection directly (caller already holds the lock).
    fn query_reminders(
        &self,
        conn: &Connection,
        tail: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Reminder>> {
        let sql = format!("SELECT {} FROM reminders {}", REMINDER_COLUMNS, tail);
        let mut stmt = conn.prepare(&sql).context("Failed to prepare query")?;
        let reminders = stmt
            .query_map(params, parse_reminder_row)
            .context("Failed to map rows")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect rows")?;
        Ok(reminders)
    }
}
