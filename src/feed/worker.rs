use thiserror::Error;
use uuid::Uuid;

use super::fetcher::{FetchError, Fetcher};
use super::ingest::{ingest_item, IngestOutcome};
use super::parser::{parse_feed, ParseError};
use crate::storage::{DatabaseError, Feed, FeedStore};

/// Reasons a feed was abandoned for the current cycle.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The fetch was not attempted because the feed could not be stamped
    #[error("Failed to mark feed as fetched: {0}")]
    MarkFetched(#[source] DatabaseError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Per-item tally of one successful scrape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    /// Items present in the document
    pub items: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid_dates: usize,
    pub failed: usize,
}

impl ScrapeSummary {
    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Inserted => self.inserted += 1,
            IngestOutcome::Duplicate => self.duplicates += 1,
            IngestOutcome::InvalidDate => self.invalid_dates += 1,
            IngestOutcome::Failed => self.failed += 1,
        }
    }
}

/// Outcome of one feed worker.
#[derive(Debug)]
pub struct FeedReport {
    /// ID of the feed that was scraped
    pub feed_id: Uuid,
    /// Item tally, or the error that ended the scrape early
    pub result: Result<ScrapeSummary, ScrapeError>,
}

/// Scrape a single feed: stamp it, fetch, parse, and store every item.
///
/// Failures stay inside this feed. They are logged here and returned in the
/// [`FeedReport`]; nothing is propagated to the caller as an error.
///
/// The feed is stamped *before* fetching, whatever the fetch outcome. If
/// stamping fails the fetch is skipped entirely.
pub async fn scrape_feed<S: FeedStore>(store: &S, fetcher: &Fetcher, feed: Feed) -> FeedReport {
    let result = scrape(store, fetcher, &feed).await;

    match &result {
        Ok(summary) => {
            tracing::info!(feed = %feed.name, items = summary.items, "Feed fetched");
            tracing::debug!(
                feed = %feed.name,
                inserted = summary.inserted,
                duplicates = summary.duplicates,
                invalid_dates = summary.invalid_dates,
                failed = summary.failed,
                "Feed ingestion breakdown"
            );
        }
        Err(e) => {
            tracing::warn!(feed = %feed.name, url = %feed.url, error = %e, "Feed scrape failed");
        }
    }

    FeedReport {
        feed_id: feed.id,
        result,
    }
}

async fn scrape<S: FeedStore>(
    store: &S,
    fetcher: &Fetcher,
    feed: &Feed,
) -> Result<ScrapeSummary, ScrapeError> {
    store
        .mark_feed_fetched(feed.id)
        .await
        .map_err(ScrapeError::MarkFetched)?;

    let bytes = fetcher.fetch(&feed.url).await?;
    let channel = parse_feed(&bytes)?;

    let mut summary = ScrapeSummary {
        items: channel.items.len(),
        ..ScrapeSummary::default()
    };
    for item in &channel.items {
        summary.record(ingest_item(store, feed.id, item).await);
    }

    Ok(summary)
}
