//! RSS aggregation backend.
//!
//! Users register feeds and follow them. A long-running [`scheduler`] keeps
//! every feed's posts up to date by periodically fetching the least recently
//! fetched feeds in concurrent batches and storing each new item as a post.
//!
//! - [`config`] - TOML config file and validated scraper settings
//! - [`feed`] - fetch, parse and ingest a single feed
//! - [`scheduler`] - the periodic batch loop
//! - [`storage`] - SQLite persistence for users, feeds, follows and posts
//! - [`util`] - feed URL validation

pub mod config;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod util;
