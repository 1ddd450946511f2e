use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::schema::Database;
use super::types::{to_millis, DatabaseError, Feed, FeedDbRow, FeedFollow, FeedFollowDbRow};
use crate::util::validate_feed_url;

const FEED_COLUMNS: &str = "id, name, url, user_id, created_at, updated_at, last_fetched_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Create a feed owned by `user_id` and follow it on the owner's behalf.
    ///
    /// Both rows are written in one transaction.
    ///
    /// # Errors
    ///
    /// - `InvalidUrl` if `url` is not a well-formed http(s) URL
    /// - `NotFound("User")` if the owner does not exist
    /// - `UniqueViolation` if another feed already uses this URL
    pub async fn create_feed(
        &self,
        user_id: Uuid,
        name: &str,
        url: &str,
    ) -> Result<Feed, DatabaseError> {
        let url = validate_feed_url(url)?;

        if !self.user_exists(user_id).await? {
            return Err(DatabaseError::NotFound("User"));
        }

        let now = Utc::now();
        let feed = Feed {
            id: Uuid::new_v4(),
            name: name.to_string(),
            url: url.to_string(),
            user_id,
            created_at: now,
            updated_at: now,
            last_fetched_at: None,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO feeds (id, name, url, user_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(feed.id)
        .bind(&feed.name)
        .bind(&feed.url)
        .bind(feed.user_id)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO feed_follows (id, user_id, feed_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(feed.id)
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(feed_id = %feed.id, url = %feed.url, "Feed created");
        Ok(feed)
    }

    /// Get all feeds ordered by name
    pub async fn get_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY name, created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// Get a single feed by id
    pub async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    /// Follow a feed. Following twice fails with `UniqueViolation`.
    pub async fn follow_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<(), DatabaseError> {
        if !self.user_exists(user_id).await? {
            return Err(DatabaseError::NotFound("User"));
        }
        if self.get_feed(feed_id).await?.is_none() {
            return Err(DatabaseError::NotFound("Feed"));
        }

        sqlx::query(
            "INSERT INTO feed_follows (id, user_id, feed_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(feed_id)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rename a feed or point it at a new URL. Only the owner may do this.
    ///
    /// # Errors
    ///
    /// - `InvalidUrl` if `url` is not a well-formed http(s) URL
    /// - `NotFound("Feed")` if no feed has this id
    /// - `NotOwner` if the feed belongs to someone else
    /// - `UniqueViolation` if another feed already uses this URL
    pub async fn update_feed(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
        name: &str,
        url: &str,
    ) -> Result<Feed, DatabaseError> {
        let url = validate_feed_url(url)?;
        self.owned_feed(user_id, feed_id).await?;

        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "UPDATE feeds SET name = ?, url = ?, updated_at = ? WHERE id = ? RETURNING {FEED_COLUMNS}"
        ))
        .bind(name)
        .bind(url.as_str())
        .bind(to_millis(Utc::now()))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedDbRow::into_feed)
            .ok_or(DatabaseError::NotFound("Feed"))
    }

    /// Delete a feed owned by `user_id`. Its posts and follows go with it.
    pub async fn delete_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<(), DatabaseError> {
        self.owned_feed(user_id, feed_id).await?;

        let result = sqlx::query("DELETE FROM feeds WHERE id = ? AND user_id = ?")
            .bind(feed_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("Feed"));
        }
        tracing::debug!(feed_id = %feed_id, "Feed deleted");
        Ok(())
    }

    async fn owned_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<Feed, DatabaseError> {
        let feed = self
            .get_feed(feed_id)
            .await?
            .ok_or(DatabaseError::NotFound("Feed"))?;
        if feed.user_id != user_id {
            return Err(DatabaseError::NotOwner);
        }
        Ok(feed)
    }

    // ========================================================================
    // Follows
    // ========================================================================

    /// Get a user's follows, oldest first
    pub async fn get_follows(&self, user_id: Uuid) -> Result<Vec<FeedFollow>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedFollowDbRow>(
            r#"
            SELECT id, user_id, feed_id, created_at
            FROM feed_follows
            WHERE user_id = ?
            ORDER BY created_at ASC, id ASC
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedFollowDbRow::into_follow).collect())
    }

    /// Stop following a feed.
    ///
    /// # Errors
    ///
    /// - `NotFound("Feed")` if no feed has this id
    /// - `NotFound("Follow")` if the user does not follow it
    pub async fn unfollow_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<(), DatabaseError> {
        if self.get_feed(feed_id).await?.is_none() {
            return Err(DatabaseError::NotFound("Feed"));
        }

        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("Follow"));
        }
        Ok(())
    }

    // ========================================================================
    // Scrape Scheduling
    // ========================================================================

    /// Get up to `limit` feeds, least recently fetched first.
    ///
    /// Feeds that were never fetched (`last_fetched_at IS NULL`) come before
    /// all others. Ties are broken by creation time.
    pub async fn get_next_feeds_to_fetch(&self, limit: usize) -> Result<Vec<Feed>, DatabaseError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, FeedDbRow>(&format!(
            r#"
            SELECT {FEED_COLUMNS}
            FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, created_at ASC
            LIMIT ?
        "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedDbRow::into_feed).collect())
    }

    /// Set `last_fetched_at` (and `updated_at`) to `at`, returning the updated feed.
    ///
    /// # Errors
    ///
    /// `NotFound("Feed")` if no feed has this id.
    pub async fn mark_feed_fetched_at(
        &self,
        feed_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Feed, DatabaseError> {
        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "UPDATE feeds SET last_fetched_at = ?, updated_at = ? WHERE id = ? RETURNING {FEED_COLUMNS}"
        ))
        .bind(to_millis(at))
        .bind(to_millis(at))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(FeedDbRow::into_feed)
            .ok_or(DatabaseError::NotFound("Feed"))
    }
}
