//! Periodic scrape loop.
//!
//! Every tick the scheduler asks the store for the `concurrency` least
//! recently fetched feeds and runs one worker per feed, all at once. The
//! next tick is only awaited after every worker of the batch has finished.

use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio::time::MissedTickBehavior;

use crate::config::ScraperConfig;
use crate::feed::{scrape_feed, FeedReport, Fetcher};
use crate::storage::{DatabaseError, FeedStore};

pub struct Scheduler<S> {
    store: S,
    fetcher: Fetcher,
    config: ScraperConfig,
}

impl<S: FeedStore> Scheduler<S> {
    pub fn new(store: S, fetcher: Fetcher, config: ScraperConfig) -> Self {
        Self {
            store,
            fetcher,
            config,
        }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Run one batch: select feeds, scrape them concurrently, wait for all.
    ///
    /// Returns the per-feed reports in completion order. Only a failure to
    /// select feeds is returned as an error; in that case nothing was scraped.
    pub async fn run_tick(&self) -> Result<Vec<FeedReport>, DatabaseError> {
        let limit = self.config.concurrency.get();
        let feeds = self.store.select_feeds_to_fetch(limit).await?;

        tracing::debug!(selected = feeds.len(), limit, "Scrape tick");

        if feeds.is_empty() {
            return Ok(Vec::new());
        }

        let reports = stream::iter(feeds)
            .map(|feed| scrape_feed(&self.store, &self.fetcher, feed))
            .buffer_unordered(limit)
            .collect()
            .await;

        Ok(reports)
    }

    /// Tick every `interval` until `shutdown` resolves.
    ///
    /// The first tick fires immediately. `shutdown` is only observed between
    /// batches, so a batch in progress always runs to completion. A batch
    /// that overruns the interval is followed straight away by the next one,
    /// without catching up on the ticks it missed.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            concurrency = self.config.concurrency.get(),
            interval = ?self.config.interval,
            "Starting scraper"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping scraper");
                    break;
                }

                _ = ticker.tick() => {}
            }

            match self.run_tick().await {
                Ok(reports) => {
                    let failed = reports.iter().filter(|r| r.result.is_err()).count();
                    tracing::debug!(feeds = reports.len(), failed, "Scrape tick finished");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to select feeds, skipping tick");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ScrapeError;
    use crate::storage::{Database, Feed, NewPost, Post};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ONE_ITEM_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Feed</title>
    <item>
        <title>Only</title>
        <link>http://x/only</link>
        <pubDate>Mon, 02 Jan 2006 15:04:05 +0000</pubDate>
    </item>
</channel></rss>"#;

    /// Records which feeds workers pick, and how many workers are between
    /// stamping their feed and storing its post at any one time.
    struct TrackingStore {
        db: Database,
        ignore_limit: bool,
        picked: Mutex<Vec<Uuid>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TrackingStore {
        fn new(db: Database, ignore_limit: bool) -> Self {
            Self {
                db,
                ignore_limit,
                picked: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl FeedStore for TrackingStore {
        async fn select_feeds_to_fetch(&self, limit: usize) -> Result<Vec<Feed>, DatabaseError> {
            let limit = if self.ignore_limit { usize::MAX } else { limit };
            self.db.get_next_feeds_to_fetch(limit).await
        }

        async fn mark_feed_fetched(&self, feed_id: Uuid) -> Result<Feed, DatabaseError> {
            self.picked.lock().unwrap().push(feed_id);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.db.mark_feed_fetched(feed_id).await
        }

        async fn insert_post(&self, post: NewPost) -> Result<Post, DatabaseError> {
            let result = self.db.insert_post(post).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn config(concurrency: usize, interval: Duration) -> ScraperConfig {
        ScraperConfig::new(concurrency, interval).unwrap()
    }

    async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    async fn add_feeds(db: &Database, base: &str, routes: &[&str]) -> Vec<Feed> {
        let user = db.create_user("Owner", "owner@example.com").await.unwrap();
        let mut feeds = Vec::new();
        for route in routes {
            let feed = db
                .create_feed(user.id, route, &format!("{base}{route}"))
                .await
                .unwrap();
            feeds.push(feed);
        }
        feeds
    }

    async fn fetched_ids(db: &Database) -> Vec<Uuid> {
        db.get_feeds()
            .await
            .unwrap()
            .into_iter()
            .filter(|f| f.last_fetched_at.is_some())
            .map(|f| f.id)
            .collect()
    }

    #[tokio::test]
    async fn test_tick_selects_at_most_concurrency_feeds() {
        let server = MockServer::start().await;
        for route in ["/a", "/b", "/c"] {
            mount(
                &server,
                route,
                ResponseTemplate::new(200).set_body_string(ONE_ITEM_RSS),
            )
            .await;
        }
        let db = Database::open(":memory:").await.unwrap();
        add_feeds(&db, &server.uri(), &["/a", "/b", "/c"]).await;

        let scheduler = Scheduler::new(
            db.clone(),
            Fetcher::new().unwrap(),
            config(2, Duration::from_secs(60)),
        );
        let reports = scheduler.run_tick().await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(fetched_ids(&db).await.len(), 2);
    }

    #[tokio::test]
    async fn test_tick_isolates_failing_feeds() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/good",
            ResponseTemplate::new(200).set_body_string(ONE_ITEM_RSS),
        )
        .await;
        mount(&server, "/missing", ResponseTemplate::new(404)).await;
        mount(
            &server,
            "/broken",
            ResponseTemplate::new(200).set_body_string("<rss><channel><item>"),
        )
        .await;

        let db = Database::open(":memory:").await.unwrap();
        let feeds = add_feeds(&db, &server.uri(), &["/good", "/missing", "/broken"]).await;

        let scheduler = Scheduler::new(
            db.clone(),
            Fetcher::new().unwrap(),
            config(3, Duration::from_secs(60)),
        );
        let reports = scheduler.run_tick().await.unwrap();
        assert_eq!(reports.len(), 3);

        let report_for = |id: Uuid| reports.iter().find(|r| r.feed_id == id).unwrap();
        assert_eq!(report_for(feeds[0].id).result.as_ref().unwrap().inserted, 1);
        assert!(matches!(
            report_for(feeds[1].id).result,
            Err(ScrapeError::Fetch(_))
        ));
        assert!(matches!(
            report_for(feeds[2].id).result,
            Err(ScrapeError::Parse(_))
        ));

        // Every selected feed is stamped, including the failures
        assert_eq!(fetched_ids(&db).await.len(), 3);
        assert_eq!(db.get_posts_for_feed(feeds[0].id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tick_runs_batch_concurrently() {
        let server = MockServer::start().await;
        let slow = ResponseTemplate::new(200)
            .set_body_string(ONE_ITEM_RSS)
            .set_delay(Duration::from_millis(600));
        for route in ["/a", "/b", "/c"] {
            mount(&server, route, slow.clone()).await;
        }
        let db = Database::open(":memory:").await.unwrap();
        add_feeds(&db, &server.uri(), &["/a", "/b", "/c"]).await;

        let scheduler = Scheduler::new(
            db,
            Fetcher::new().unwrap(),
            config(3, Duration::from_secs(60)),
        );
        let started = Instant::now();
        let reports = scheduler.run_tick().await.unwrap();
        let elapsed = started.elapsed();

        assert!(reports.iter().all(|r| r.result.is_ok()));
        // Sequential would take at least 1.8s
        assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
    }

    async fn peak_workers(
        feed_count: usize,
        concurrency: usize,
        ignore_limit: bool,
    ) -> (usize, usize) {
        let server = MockServer::start().await;
        let slow = ResponseTemplate::new(200)
            .set_body_string(ONE_ITEM_RSS)
            .set_delay(Duration::from_millis(300));
        let routes: Vec<String> = (0..feed_count).map(|i| format!("/{i}")).collect();
        for route in &routes {
            mount(&server, route, slow.clone()).await;
        }
        let db = Database::open(":memory:").await.unwrap();
        let routes: Vec<&str> = routes.iter().map(String::as_str).collect();
        add_feeds(&db, &server.uri(), &routes).await;

        let scheduler = Scheduler::new(
            TrackingStore::new(db, ignore_limit),
            Fetcher::new().unwrap(),
            config(concurrency, Duration::from_secs(60)),
        );
        let reports = scheduler.run_tick().await.unwrap();
        assert!(reports.iter().all(|r| r.result.is_ok()));
        assert_eq!(scheduler.store.in_flight.load(Ordering::SeqCst), 0);

        (reports.len(), scheduler.store.peak.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_tick_never_exceeds_concurrency_workers() {
        let (scraped, peak) = peak_workers(5, 3, false).await;
        assert_eq!(scraped, 3);
        assert!(peak <= 3, "{peak} workers in flight");
        assert!(peak > 1, "batch ran sequentially");
    }

    #[tokio::test]
    async fn test_oversized_selection_still_bounded_by_concurrency() {
        // Store hands back every feed; the worker fan-out alone keeps the cap
        let (scraped, peak) = peak_workers(6, 2, true).await;
        assert_eq!(scraped, 6);
        assert_eq!(peak, 2);
    }

    #[tokio::test]
    async fn test_tick_with_no_feeds() {
        let db = Database::open(":memory:").await.unwrap();
        let scheduler = Scheduler::new(
            db,
            Fetcher::new().unwrap(),
            config(5, Duration::from_secs(60)),
        );
        assert!(scheduler.run_tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tick_selection_failure() {
        let db = Database::open(":memory:").await.unwrap();
        db.close().await;

        let scheduler = Scheduler::new(
            db,
            Fetcher::new().unwrap(),
            config(5, Duration::from_secs(60)),
        );
        assert!(scheduler.run_tick().await.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_before_first_tick_when_already_shut_down() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/a",
            ResponseTemplate::new(200).set_body_string(ONE_ITEM_RSS),
        )
        .await;
        let db = Database::open(":memory:").await.unwrap();
        add_feeds(&db, &server.uri(), &["/a"]).await;

        let scheduler = Scheduler::new(
            db.clone(),
            Fetcher::new().unwrap(),
            config(1, Duration::from_secs(60)),
        );
        scheduler.run(std::future::ready(())).await;

        assert!(fetched_ids(&db).await.is_empty());
    }

    #[tokio::test]
    async fn test_run_first_tick_immediate_then_stops_on_shutdown() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/a",
            ResponseTemplate::new(200).set_body_string(ONE_ITEM_RSS),
        )
        .await;
        let db = Database::open(":memory:").await.unwrap();
        add_feeds(&db, &server.uri(), &["/a"]).await;

        let scheduler = Scheduler::new(
            db.clone(),
            Fetcher::new().unwrap(),
            config(1, Duration::from_secs(3600)),
        );
        let finished = tokio::time::timeout(
            Duration::from_secs(5),
            scheduler.run(tokio::time::sleep(Duration::from_millis(300))),
        )
        .await;

        assert!(finished.is_ok(), "scheduler ignored shutdown");
        assert_eq!(fetched_ids(&db).await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_batch_before_stopping() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/slow",
            ResponseTemplate::new(200)
                .set_body_string(ONE_ITEM_RSS)
                .set_delay(Duration::from_millis(800)),
        )
        .await;
        let db = Database::open(":memory:").await.unwrap();
        let feeds = add_feeds(&db, &server.uri(), &["/slow"]).await;

        let scheduler = Scheduler::new(
            db.clone(),
            Fetcher::new().unwrap(),
            config(1, Duration::from_secs(3600)),
        );
        // Shutdown fires while the first batch is still fetching
        scheduler
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert_eq!(db.get_posts_for_feed(feeds[0].id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_rotates_through_feeds() {
        let server = MockServer::start().await;
        for route in ["/a", "/b", "/c"] {
            mount(
                &server,
                route,
                ResponseTemplate::new(200).set_body_string(ONE_ITEM_RSS),
            )
            .await;
        }
        let db = Database::open(":memory:").await.unwrap();
        let feeds = add_feeds(&db, &server.uri(), &["/a", "/b", "/c"]).await;

        // Stalest first: c, then a, then b
        let now = Utc::now();
        for (feed, hours) in [(&feeds[2], 3), (&feeds[0], 2), (&feeds[1], 1)] {
            db.mark_feed_fetched_at(feed.id, now - chrono::Duration::hours(hours))
                .await
                .unwrap();
        }

        let scheduler = Scheduler::new(
            TrackingStore::new(db, false),
            Fetcher::new().unwrap(),
            config(1, Duration::from_millis(100)),
        );
        scheduler
            .run(tokio::time::sleep(Duration::from_millis(450)))
            .await;

        // One feed per tick, cycling in freshness order
        let picked = scheduler.store.picked.lock().unwrap().clone();
        assert!(picked.len() >= 3, "only {} ticks ran", picked.len());
        let expected = [feeds[2].id, feeds[0].id, feeds[1].id];
        for (tick, id) in picked.iter().enumerate() {
            assert_eq!(*id, expected[tick % 3], "tick {tick}");
        }
    }
}
