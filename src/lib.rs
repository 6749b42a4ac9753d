//! Scheduled job-listing ingestion.
//!
//! A pass walks the source registry, renders each career page in headless
//! Chrome, extracts and normalizes the listings, and stores the ones whose
//! apply URL has not been seen before.

pub mod browser;
pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod normalize;
pub mod persist;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use error::{ConfigError, ScrapeError, StoreError};
pub use models::{ExtractionResult, JobType, NormalizedJob, RawListing, Source};
pub use pipeline::{PassRunner, Pipeline};
pub use scheduler::{Scheduler, SchedulerState};
