//! Feed ingestion: fetching, parsing and storing RSS feeds.
//!
//! - **Fetching**: single-attempt HTTP GET under a fixed deadline
//! - **Parsing**: RSS 2.0 documents into a [`Channel`] of [`Item`]s
//! - **Ingesting**: items into posts, absorbing duplicates
//! - **Worker**: the per-feed pipeline, with failures contained to one feed
//!
//! # Architecture
//!
//! - [`fetcher`] - HTTP retrieval with timeout and size limit
//! - [`parser`] - RSS decoding using `quick-xml`'s serde support
//! - [`ingest`] - `pubDate` parsing and duplicate-safe insertion
//! - [`worker`] - mark fetched, fetch, parse, ingest, report
//!
//! The [`crate::scheduler`] drives workers in batches.

pub mod fetcher;
pub mod ingest;
pub mod parser;
pub mod worker;

pub use fetcher::{FetchError, Fetcher, FETCH_TIMEOUT};
pub use ingest::{ingest_item, parse_pub_date, IngestOutcome, PubDateError};
pub use parser::{parse_feed, Channel, Item, ParseError};
pub use worker::{scrape_feed, FeedReport, ScrapeError, ScrapeSummary};
