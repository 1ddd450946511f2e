use chrono::Utc;
use std::future::Future;
use uuid::Uuid;

use super::schema::Database;
use super::types::{DatabaseError, Feed, NewPost, Post};

/// Storage operations the scrape pipeline depends on.
///
/// Implementations must tolerate concurrent calls from every worker of a
/// batch; the pipeline never holds a lock across these calls.
pub trait FeedStore: Sync {
    /// Up to `limit` feeds, least recently fetched first, never-fetched feeds first of all.
    fn select_feeds_to_fetch(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Feed>, DatabaseError>> + Send;

    /// Stamp the feed's `last_fetched_at` with the current time.
    fn mark_feed_fetched(
        &self,
        feed_id: Uuid,
    ) -> impl Future<Output = Result<Feed, DatabaseError>> + Send;

    /// Insert a post; a duplicate (feed, url) fails with `DatabaseError::UniqueViolation`.
    fn insert_post(
        &self,
        post: NewPost,
    ) -> impl Future<Output = Result<Post, DatabaseError>> + Send;
}

impl FeedStore for Database {
    async fn select_feeds_to_fetch(&self, limit: usize) -> Result<Vec<Feed>, DatabaseError> {
        self.get_next_feeds_to_fetch(limit).await
    }

    async fn mark_feed_fetched(&self, feed_id: Uuid) -> Result<Feed, DatabaseError> {
        self.mark_feed_fetched_at(feed_id, Utc::now()).await
    }

    async fn insert_post(&self, post: NewPost) -> Result<Post, DatabaseError> {
        self.create_post(&post).await
    }
}
