use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Source configuration
// ============================================================================

/// One external career site and the selectors used to read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub name: String,
    /// Site root, used to resolve relative apply links
    pub website: String,
    pub career_page: String,
    pub selectors: SelectorMap,
}

/// CSS selectors for a listing page. Sub-field selectors are evaluated
/// relative to each `list_container` match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorMap {
    #[serde(alias = "jobList")]
    pub list_container: String,
    #[serde(alias = "jobTitle")]
    pub title: String,
    #[serde(alias = "jobLink")]
    pub link: String,
    #[serde(alias = "companyName", default)]
    pub company: Option<String>,
    pub location: String,
    pub description: String,
    #[serde(default)]
    pub salary: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
}

// ============================================================================
// Pipeline records
// ============================================================================

/// A listing as read off the page, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawListing {
    /// Position of the container element on the page
    pub index: usize,
    pub title: String,
    pub company: Option<String>,
    pub location: String,
    pub description: String,
    /// Absolute URL, already resolved against the source website
    pub apply_url: String,
    pub salary_text: Option<String>,
    pub posted_date_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    FullTime,
    PartTime,
    Contract,
    Internship,
    Freelance,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FullTime => "full-time",
            JobType::PartTime => "part-time",
            JobType::Contract => "contract",
            JobType::Internship => "internship",
            JobType::Freelance => "freelance",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full-time" => Ok(JobType::FullTime),
            "part-time" => Ok(JobType::PartTime),
            "contract" => Ok(JobType::Contract),
            "internship" => Ok(JobType::Internship),
            "freelance" => Ok(JobType::Freelance),
            other => Err(format!("unknown job type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: i64,
    pub max: i64,
    pub currency: String,
}

/// The persisted job posting. `apply_url` is the unique dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub job_type: JobType,
    pub is_remote: bool,
    pub salary: Option<SalaryRange>,
    pub description: String,
    pub tags: Vec<String>,
    pub apply_url: String,
    pub source_name: String,
    pub posted_date: DateTime<Utc>,
    pub is_active: bool,
}

/// A job as the store returns it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub id: String,
    pub job: NormalizedJob,
}

// ============================================================================
// Per-source outcome
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingError {
    pub listing_index: usize,
    pub message: String,
}

/// Outcome of one source within a pass. Used for logging only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionResult {
    pub source_name: String,
    /// Listing containers attempted
    pub raw_count: usize,
    /// New jobs inserted
    pub saved_count: usize,
    /// Listings already known to the store
    pub skipped_count: usize,
    pub errors: Vec<ListingError>,
    /// Set when the whole source failed (navigation, bad selector, budget)
    pub failure: Option<String>,
}

impl ExtractionResult {
    pub fn empty(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            ..Default::default()
        }
    }

    pub fn failed(source_name: &str, reason: impl Into<String>) -> Self {
        Self {
            source_name: source_name.to_string(),
            failure: Some(reason.into()),
            ..Default::default()
        }
    }

    /// One-line operator summary: `name: scraped N, saved M, errors E`.
    pub fn summary(&self) -> String {
        format!(
            "{}: scraped {}, saved {}, errors {}",
            self.source_name,
            self.raw_count,
            self.saved_count,
            self.errors.len()
        )
    }
}
