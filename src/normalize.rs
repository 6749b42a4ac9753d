//! Field normalization: pure functions turning scraped text into typed values.
//!
//! Nothing in here does I/O. The ingestion timestamp is passed in so that
//! date fallbacks are deterministic under test.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ScrapeError;
use crate::models::{JobType, NormalizedJob, RawListing, SalaryRange};

// Column widths of the `jobs` table.
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_COMPANY_LEN: usize = 100;
pub const MAX_LOCATION_LEN: usize = 100;
pub const MAX_APPLY_URL_LEN: usize = 500;

pub const DEFAULT_CURRENCY: &str = "USD";

/// Technology and seniority keywords recognised as tags, in output order.
pub const TAG_VOCABULARY: &[&str] = &[
    "javascript", "typescript", "react", "vue", "angular", "node.js", "python", "java", "c#", "php",
    "aws", "azure", "gcp", "docker", "kubernetes", "sql", "mongodb", "redis", "git", "agile",
    "scrum", "devops", "frontend", "backend", "fullstack", "mobile", "ios", "android", "flutter",
    "react native", "machine learning", "ai", "data science", "blockchain", "cybersecurity",
    "remote", "hybrid", "onsite", "senior", "junior", "lead", "manager", "architect",
];

const REMOTE_MARKERS: &[&str] = &["remote", "work from home", "wfh"];

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

static POSTED_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*posted(\s+on)?\s*:?\s*").unwrap());

static RELATIVE_AGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+)\+?\s*(minute|min|hour|hr|day|week|month)s?\s+ago").unwrap()
});

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y"];

/// Classify by keyword; first match wins, so internships are never
/// reported as contracts.
pub fn classify_job_type(title: &str, description: &str) -> JobType {
    let text = format!("{} {}", title, description).to_lowercase();

    if text.contains("intern") {
        JobType::Internship
    } else if text.contains("part-time") || text.contains("part time") {
        JobType::PartTime
    } else if text.contains("contract") {
        JobType::Contract
    } else if text.contains("freelance") {
        JobType::Freelance
    } else {
        JobType::FullTime
    }
}

pub fn infer_remote(title: &str, description: &str, location: &str) -> bool {
    let text = format!("{} {} {}", title, description, location).to_lowercase();
    REMOTE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// First digit run is the minimum, second is the maximum. A single number
/// is never turned into a one-sided range. Runs too long for an `i64` are
/// skipped.
pub fn parse_salary(text: Option<&str>) -> Option<SalaryRange> {
    let text = text?;
    let mut runs = DIGIT_RUN
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<i64>().ok());

    let min = runs.next()?;
    let max = runs.next()?;

    Some(SalaryRange {
        min,
        max,
        currency: DEFAULT_CURRENCY.to_string(),
    })
}

/// Parse a posted date, falling back to `now` when the text is missing or
/// unrecognised. Unparsable dates are kept, only less precise.
pub fn parse_posted_date(text: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    text.and_then(|t| try_parse_date(t, now)).unwrap_or(now)
}

fn try_parse_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let cleaned = POSTED_PREFIX.replace(text.trim(), "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            let midnight = date.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&midnight));
        }
    }

    parse_relative_date(cleaned, now)
}

fn parse_relative_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.to_lowercase();
    if lower.contains("today") || lower.contains("just posted") || lower.contains("just now") {
        return Some(now);
    }
    if lower.contains("yesterday") {
        return now.checked_sub_signed(Duration::try_days(1)?);
    }

    // Scraped text is untrusted: any overflow means "unparsable", never a panic.
    let caps = RELATIVE_AGE.captures(&lower)?;
    let amount: i64 = caps[1].parse().ok()?;
    let age = match &caps[2] {
        "minute" | "min" => Duration::try_minutes(amount),
        "hour" | "hr" => Duration::try_hours(amount),
        "day" => Duration::try_days(amount),
        "week" => Duration::try_weeks(amount),
        "month" => amount.checked_mul(30).and_then(Duration::try_days),
        _ => None,
    }?;
    now.checked_sub_signed(age)
}

/// Vocabulary terms present in title or description, in vocabulary order.
pub fn extract_tags(title: &str, description: &str) -> Vec<String> {
    let text = format!("{} {}", title, description).to_lowercase();
    TAG_VOCABULARY
        .iter()
        .filter(|tag| text.contains(*tag))
        .map(|tag| tag.to_string())
        .collect()
}

fn clamp(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

/// Build the storable job for a raw listing.
pub fn normalize_listing(
    raw: &RawListing,
    source_name: &str,
    now: DateTime<Utc>,
) -> Result<NormalizedJob, ScrapeError> {
    let title = raw.title.trim();
    if title.is_empty() {
        return Err(ScrapeError::Normalization("empty title".into()));
    }
    if raw.apply_url.is_empty() {
        return Err(ScrapeError::Normalization("empty apply url".into()));
    }
    if raw.apply_url.len() > MAX_APPLY_URL_LEN {
        return Err(ScrapeError::Normalization(format!(
            "apply url is {} bytes, limit is {}",
            raw.apply_url.len(),
            MAX_APPLY_URL_LEN
        )));
    }

    let company = raw
        .company
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(source_name);

    Ok(NormalizedJob {
        title: clamp(title, MAX_TITLE_LEN),
        company: clamp(company, MAX_COMPANY_LEN),
        location: clamp(&raw.location, MAX_LOCATION_LEN),
        job_type: classify_job_type(&raw.title, &raw.description),
        is_remote: infer_remote(&raw.title, &raw.description, &raw.location),
        salary: parse_salary(raw.salary_text.as_deref()),
        description: raw.description.trim().to_string(),
        tags: extract_tags(&raw.title, &raw.description),
        apply_url: raw.apply_url.clone(),
        source_name: source_name.to_string(),
        posted_date: parse_posted_date(raw.posted_date_text.as_deref(), now),
        is_active: true,
    })
}
