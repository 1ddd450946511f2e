//! Utility functions shared by the storage layer and the CLI.

mod url_validator;

pub use url_validator::{validate_feed_url, UrlValidationError};
