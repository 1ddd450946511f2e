use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::parser::Item;
use crate::storage::{DatabaseError, FeedStore, NewPost};

/// `pubDate` layout: RFC 1123 with a numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 -0700`
pub const PUB_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// [`PUB_DATE_FORMAT`] after the `"Mon, "` prefix
const PUB_DATE_BODY_FORMAT: &str = "%d %b %Y %H:%M:%S %z";

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// A `pubDate` that does not follow [`PUB_DATE_FORMAT`].
#[derive(Debug, Error)]
pub enum PubDateError {
    #[error("missing weekday prefix")]
    MissingWeekday,
    #[error("unknown weekday {0:?}")]
    UnknownWeekday(String),
    #[error(transparent)]
    Invalid(#[from] chrono::ParseError),
}

/// What happened to a single feed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new post was stored
    Inserted,
    /// The (feed, url) pair was stored by an earlier cycle
    Duplicate,
    /// `pubDate` did not match [`PUB_DATE_FORMAT`]; the item was dropped
    InvalidDate,
    /// Storage rejected the insert for a reason other than a duplicate
    Failed,
}

/// Parse an item's `pubDate` into UTC.
///
/// The weekday must be one of the English abbreviations but is not checked
/// against the date: `Mon, 03 Jan 2006 ...` is read as 3 January.
pub fn parse_pub_date(raw: &str) -> Result<DateTime<Utc>, PubDateError> {
    let (weekday, rest) = raw
        .trim()
        .split_once(", ")
        .ok_or(PubDateError::MissingWeekday)?;
    if !WEEKDAYS.iter().any(|day| day.eq_ignore_ascii_case(weekday)) {
        return Err(PubDateError::UnknownWeekday(weekday.to_string()));
    }

    let parsed = DateTime::parse_from_str(rest, PUB_DATE_BODY_FORMAT)?;
    Ok(parsed.with_timezone(&Utc))
}

/// Convert an item into a post insert. Empty descriptions are stored as absent.
fn to_new_post(feed_id: Uuid, item: &Item, published_at: DateTime<Utc>) -> NewPost {
    let description = if item.description.is_empty() {
        None
    } else {
        Some(item.description.clone())
    };

    NewPost {
        id: Uuid::new_v4(),
        feed_id,
        title: item.title.clone(),
        url: item.link.clone(),
        description,
        published_at,
    }
}

/// Store one item as a post of `feed_id`.
///
/// Never fails: every outcome, including storage errors, is logged here and
/// reported as an [`IngestOutcome`] so sibling items carry on.
pub async fn ingest_item<S: FeedStore>(store: &S, feed_id: Uuid, item: &Item) -> IngestOutcome {
    let published_at = match parse_pub_date(&item.pub_date) {
        Ok(at) => at,
        Err(e) => {
            tracing::warn!(
                feed_id = %feed_id,
                link = %item.link,
                pub_date = %item.pub_date,
                error = %e,
                "Skipping item with unparsable pubDate"
            );
            return IngestOutcome::InvalidDate;
        }
    };

    match store.insert_post(to_new_post(feed_id, item, published_at)).await {
        Ok(post) => {
            tracing::debug!(feed_id = %feed_id, post_id = %post.id, url = %post.url, "Post stored");
            IngestOutcome::Inserted
        }
        Err(DatabaseError::UniqueViolation(_)) => {
            tracing::debug!(feed_id = %feed_id, url = %item.link, "Post already stored");
            IngestOutcome::Duplicate
        }
        Err(e) => {
            tracing::warn!(
                feed_id = %feed_id,
                url = %item.link,
                error = %e,
                "Failed to store post"
            );
            IngestOutcome::Failed
        }
    }
}
