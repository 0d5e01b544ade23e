use anyhow::{Context, Result};

use super::SqliteStore;
use crate::remind::{User, UserField};

const ALL_FIELDS: &[UserField] = &[UserField::Nickname, UserField::Subscribed];

impl SqliteStore {
    pub(crate) async fn get_or_create_user_row(&self, openid: &str) -> Result<User> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT OR IGNORE INTO users (openid) VALUES (?1)",
            rusqlite::params![openid],
        )
        .context("Failed to create user")?;

        conn.query_row(
            "SELECT openid, nickname, subscribed FROM users WHERE openid = ?1",
            rusqlite::params![openid],
            |row| {
                Ok(User {
                    openid: row.get(0)?,
                    nickname: row.get(1)?,
                    subscribed: row.get(2)?,
                })
            },
        )
        .context("Failed to load user")
    }

    pub(crate) async fn update_user_row(&self, user: &User, fields: &[UserField]) -> Result<()> {
        let fields = if fields.is_empty() {
            ALL_FIELDS
        } else {
            fields
        };

        let conn = self.conn.lock().await;
        for field in fields {
            let updated = match field {
                UserField::Nickname => conn.execute(
                    "UPDATE users SET nickname = ?1 WHERE openid = ?2",
                    rusqlite::params![user.nickname, user.openid],
                ),
                UserField::Subscribed => conn.execute(
                    "UPDATE users SET subscribed = ?1 WHERE openid = ?2",
                    rusqlite::params![user.subscribed, user.openid],
                ),
            };
            updated
                .with_context(|| format!("Failed to update {:?} of user {}", field, user.openid))?;
        }
        Ok(())
    }

    pub(crate) async fn delete_user_row(&self, openid: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM users WHERE openid = ?1",
            rusqlite::params![openid],
        )
        .context("Failed to delete user")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::remind::UserField;
    use crate::store::{ReminderStore, SqliteStore};

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = SqliteStore::open_in_memory().unwrap();

        let user = store.get_or_create_user("oUser").await.unwrap();
        assert_eq!(user.openid, "oUser");
        assert!(!user.subscribed);

        let again = store.get_or_create_user("oUser").await.unwrap();
        assert_eq!(user, again);
        assert_eq!(store.stats().await.unwrap().0, 1);
    }

    #[tokio::test]
    async fn test_save_only_requested_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut user = store.get_or_create_user("oUser").await.unwrap().subscribe();
        user.nickname = "Alice".into();

        store
            .save_user(&user, &[UserField::Subscribed])
            .await
            .unwrap();
        let loaded = store.get_or_create_user("oUser").await.unwrap();
        assert!(loaded.subscribed);
        assert_eq!(loaded.nickname, "");

        store.save_user(&user, &[]).await.unwrap();
        let loaded = store.get_or_create_user("oUser").await.unwrap();
        assert_eq!(loaded.nickname, "Alice");
    }

    #[tokio::test]
    async fn test_delete_user() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.get_or_create_user("oUser").await.unwrap();
        store.delete_user("oUser").await.unwrap();
        assert_eq!(store.stats().await.unwrap().0, 0);
    }
}
