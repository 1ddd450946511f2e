use chrono::Utc;
use uuid::Uuid;

use super::schema::Database;
use super::types::{to_millis, DatabaseError, User, UserDbRow};

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Create a user. Fails with `UniqueViolation` if the email is taken.
    pub async fn create_user(&self, name: &str, email: &str) -> Result<User, DatabaseError> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO users (id, name, email, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    /// Get a user by id
    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, DatabaseError> {
        let row = sqlx::query_as::<_, UserDbRow>(
            "SELECT id, name, email, created_at, updated_at FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserDbRow::into_user))
    }

    /// Change a user's name and email.
    ///
    /// # Errors
    ///
    /// - `NotFound("User")` if no user has this id
    /// - `UniqueViolation` if the email belongs to another user
    pub async fn update_user(
        &self,
        user_id: Uuid,
        name: &str,
        email: &str,
    ) -> Result<User, DatabaseError> {
        let row = sqlx::query_as::<_, UserDbRow>(
            r#"
            UPDATE users SET name = ?, email = ?, updated_at = ?
            WHERE id = ?
            RETURNING id, name, email, created_at, updated_at
        "#,
        )
        .bind(name)
        .bind(email)
        .bind(to_millis(Utc::now()))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserDbRow::into_user)
            .ok_or(DatabaseError::NotFound("User"))
    }

    /// Delete a user together with their feeds, follows and those feeds' posts.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("User"));
        }
        tracing::debug!(user_id = %user_id, "User deleted");
        Ok(())
    }

    /// Returns true if a user with this id exists
    pub async fn user_exists(&self, user_id: Uuid) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, DatabaseError};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_user() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("Ada", "ada@example.com").await.unwrap();

        assert_eq!(user.name, "Ada");
        assert!(db.user_exists(user.id).await.unwrap());
        assert!(!db.user_exists(uuid::Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_user_duplicate_email() {
        let db = Database::open(":memory:").await.unwrap();
        db.create_user("Ada", "ada@example.com").await.unwrap();

        let err = db.create_user("Other", "ada@example.com").await.unwrap_err();
        assert!(matches!(err, DatabaseError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_get_user() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("Ada", "ada@example.com").await.unwrap();

        let stored = db.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.id, user.id);
        assert_eq!(stored.name, "Ada");
        assert_eq!(stored.email, "ada@example.com");
        assert_eq!(
            stored.created_at.timestamp_millis(),
            user.created_at.timestamp_millis()
        );
        assert_eq!(db.get_user(uuid::Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_user() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("Ada", "ada@example.com").await.unwrap();

        let updated = db
            .update_user(user.id, "Ada L.", "lovelace@example.com")
            .await
            .unwrap();
        assert_eq!(updated.id, user.id);
        assert_eq!(updated.name, "Ada L.");
        assert_eq!(updated.email, "lovelace@example.com");
        assert_eq!(
            updated.created_at.timestamp_millis(),
            user.created_at.timestamp_millis()
        );
        assert!(updated.updated_at >= updated.created_at);
        assert_eq!(db.get_user(user.id).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_update_user_conflicts() {
        let db = Database::open(":memory:").await.unwrap();
        let ada = db.create_user("Ada", "ada@example.com").await.unwrap();
        db.create_user("Grace", "grace@example.com").await.unwrap();

        let err = db
            .update_user(ada.id, "Ada", "grace@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::UniqueViolation(_)));

        let err = db
            .update_user(uuid::Uuid::new_v4(), "Nobody", "nobody@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound("User")));
    }

    #[tokio::test]
    async fn test_delete_user_cascades() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("Ada", "ada@example.com").await.unwrap();
        db.create_feed(user.id, "Blog", "https://example.com/feed.xml")
            .await
            .unwrap();

        db.delete_user(user.id).await.unwrap();

        assert!(!db.user_exists(user.id).await.unwrap());
        assert!(db.get_feeds().await.unwrap().is_empty());
        assert!(matches!(
            db.delete_user(user.id).await,
            Err(DatabaseError::NotFound("User"))
        ));
    }
}
