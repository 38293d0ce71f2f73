//! Shelfwatch: a catalog harvest and change-monitoring daemon
//!
//! This crate continuously harvests structured records from a paginated web
//! catalog, detects field-level changes across repeated harvests, and runs
//! the harvest/change-detection/maintenance work on a recurring schedule
//! with singleton-execution and misfire-grace guarantees.

pub mod changes;
pub mod config;
pub mod crawler;
pub mod model;
pub mod notify;
pub mod sched;
pub mod store;

use thiserror::Error;

/// Main error type for shelfwatch operations
#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Extraction error: {0}")]
    Extract(#[from] crawler::ExtractError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Trigger spec error: {0}")]
    Trigger(#[from] sched::TriggerParseError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crawl error: {0}")]
    Crawl(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for shelfwatch operations
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{CatalogRecord, ChangeRecord, ChangeSet, Checkpoint, JobRun, RunStats};
