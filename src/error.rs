//! Error taxonomy for the ingestion pipeline.
//!
//! Each variant maps to the narrowest scope it is allowed to abort:
//! a tick, a source or a single listing. Nothing here is ever allowed to
//! escape the scheduler loop.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The browser process could not be started. Fatal to the current tick.
    #[error("failed to launch browser: {0}")]
    BrowserInit(String),

    /// Navigation to a career page failed or timed out. Fatal to one source.
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// No listing container appeared in time. Treated as an empty page.
    #[error("no element matched `{selector}` within {timeout:?}")]
    SelectorTimeout { selector: String, timeout: Duration },

    /// The configured CSS selector does not parse. Fatal to one source.
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// A single listing could not be read from the page.
    #[error("listing {index}: {message}")]
    ListingExtraction { index: usize, message: String },

    /// A raw listing could not be turned into a storable job.
    #[error("cannot normalize listing: {0}")]
    Normalization(String),

    /// The source did not finish within its wall-clock budget.
    #[error("source {source_name} exceeded its {budget:?} budget")]
    SourceBudget { source_name: String, budget: Duration },

    #[error("source registry unavailable: {0}")]
    Registry(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// A job with this apply URL already exists. Expected on re-scrapes.
    #[error("job with apply url {0} already exists")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("cannot read sources file {path}: {reason}")]
    SourcesFile { path: String, reason: String },
}

impl ScrapeError {
    /// Navigation errors are the only ones worth retrying within a source.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Navigation { .. })
    }
}
