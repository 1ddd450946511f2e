use chrono::Utc;
use uuid::Uuid;

use super::schema::Database;
use super::types::{to_millis, DatabaseError, NewPost, Post, PostDbRow};

/// Maximum number of posts to return from any single query
const MAX_POSTS: i64 = 1000;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Insert a post.
    ///
    /// Posts are never updated: re-inserting a URL already stored for the
    /// same feed fails with `DatabaseError::UniqueViolation` and leaves the
    /// existing row untouched.
    pub async fn create_post(&self, post: &NewPost) -> Result<Post, DatabaseError> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO posts (id, feed_id, title, url, description, published_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(post.id)
        .bind(post.feed_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(to_millis(post.published_at))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        Ok(Post {
            id: post.id,
            feed_id: post.feed_id,
            title: post.title.clone(),
            url: post.url.clone(),
            description: post.description.clone(),
            published_at: post.published_at,
            created_at: now,
        })
    }

    /// Get all posts of a feed, newest first
    pub async fn get_posts_for_feed(&self, feed_id: Uuid) -> Result<Vec<Post>, DatabaseError> {
        let rows = sqlx::query_as::<_, PostDbRow>(
            r#"
            SELECT id, feed_id, title, url, description, published_at, created_at
            FROM posts
            WHERE feed_id = ?
            ORDER BY published_at DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_POSTS)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostDbRow::into_post).collect())
    }

    /// Get the newest posts across every feed the user follows.
    ///
    /// `limit` is capped at 1000.
    pub async fn get_posts_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Post>, DatabaseError> {
        let limit = limit.clamp(0, MAX_POSTS);
        let rows = sqlx::query_as::<_, PostDbRow>(
            r#"
            SELECT p.id, p.feed_id, p.title, p.url, p.description, p.published_at, p.created_at
            FROM posts p
            JOIN feed_follows ff ON ff.feed_id = p.feed_id
            WHERE ff.user_id = ?
            ORDER BY p.published_at DESC
            LIMIT ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostDbRow::into_post).collect())
    }
}
