//! Dedup-and-persist gateway: normalize each raw listing and insert the
//! ones the store has not seen, keyed by canonical apply URL.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{ScrapeError, StoreError};
use crate::models::{ExtractionResult, ListingError, RawListing, StoredJob};
use crate::normalize::normalize_listing;
use crate::store::JobStore;

enum SaveOutcome {
    Inserted(StoredJob),
    AlreadyKnown,
}

/// Save a batch of listings for one source. A failing listing is recorded
/// in `errors` and the rest of the batch carries on.
pub async fn save_all<S>(
    store: &S,
    listings: &[RawListing],
    source_name: &str,
    ingested_at: DateTime<Utc>,
) -> ExtractionResult
where
    S: JobStore + ?Sized,
{
    let mut result = ExtractionResult::empty(source_name);
    result.raw_count = listings.len();

    for listing in listings {
        match save_one(store, listing, source_name, ingested_at).await {
            Ok(SaveOutcome::Inserted(stored)) => {
                result.saved_count += 1;
                debug!("Saved job: {} at {} ({})", stored.job.title, stored.job.company, stored.id);
            }
            Ok(SaveOutcome::AlreadyKnown) => result.skipped_count += 1,
            Err(e) => result.errors.push(ListingError {
                listing_index: listing.index,
                message: e.to_string(),
            }),
        }
    }

    result
}

async fn save_one<S>(
    store: &S,
    listing: &RawListing,
    source_name: &str,
    ingested_at: DateTime<Utc>,
) -> Result<SaveOutcome, ScrapeError>
where
    S: JobStore + ?Sized,
{
    let job = normalize_listing(listing, source_name, ingested_at)?;

    if store.find_job_by_apply_url(&job.apply_url).await?.is_some() {
        return Ok(SaveOutcome::AlreadyKnown);
    }

    match store.insert_job(&job).await {
        Ok(stored) => Ok(SaveOutcome::Inserted(stored)),
        // Lost a race with another writer; the posting is known either way.
        Err(StoreError::Duplicate(url)) => {
            debug!("Job {} was inserted concurrently", url);
            Ok(SaveOutcome::AlreadyKnown)
        }
        Err(e) => Err(e.into()),
    }
}
