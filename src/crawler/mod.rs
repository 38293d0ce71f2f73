//! Crawl engine: rate-limited fetching, HTML extraction, and the
//! category/pagination walk over the catalog.

mod engine;
mod extract;
mod fetcher;

pub use engine::{CrawlEngine, CHECKPOINT_CATEGORY, CHECKPOINT_PAGE};
pub use extract::{extract_categories, extract_item_links, extract_record, next_page_url};
pub use fetcher::{Fetcher, FetchResponse};

use thiserror::Error;

/// Errors from fetching a single URL
#[derive(Debug, Error)]
pub enum FetchError {
    /// 4xx responses are permanent for a catalog page and never retried
    #[error("HTTP {status} fetching {url}")]
    ClientStatus { url: String, status: u16 },

    #[error("gave up fetching {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Errors from extracting structured data out of a fetched page
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("missing expected element: {0}")]
    MissingElement(&'static str),

    #[error("unparseable price for {field}: {value:?}")]
    InvalidPrice { field: &'static str, value: String },

    #[error("invalid selector: {0}")]
    Selector(&'static str),
}
