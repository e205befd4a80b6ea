use async_trait::async_trait;
use reminder_core::{models::User, traits::UserRepository, ReminderResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &SqliteRow) -> ReminderResult<User> {
        Ok(User {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            user_key: row.try_get("user_key")?,
        })
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_user_key(&self, user_key: &str) -> ReminderResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE user_key = ?")
            .bind(user_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn save(&self, user: &User) -> ReminderResult<()> {
        sqlx::query("INSERT OR REPLACE INTO users (id, username, user_key) VALUES (?, ?, ?)")
            .bind(user.id)
            .bind(&user.username)
            .bind(&user.user_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::test_pool;

    #[tokio::test]
    async fn test_lookup_by_key() {
        let repo = SqliteUserRepository::new(test_pool().await);
        repo.save(&User::new(100, "alice", "uk-alice")).await.unwrap();

        let found = repo.find_by_user_key("uk-alice").await.unwrap().unwrap();
        assert_eq!(found.id, 100);
        assert!(repo.find_by_user_key("missing").await.unwrap().is_none());
        assert_eq!(repo.get_by_id(100).await.unwrap().unwrap().username, "alice");
    }
}
