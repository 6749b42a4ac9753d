//! Environment-driven configuration.
//!
//! Values are read through a lookup function so tests can feed a map instead
//! of mutating the process environment. `main` loads `.env` via `dotenv`
//! before calling `Config::from_env`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{SelectorMap, Source};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Knobs for browsing and per-source extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ScraperSettings {
    pub user_agent: String,
    /// `SCRAPER_TIMEOUT`: page navigation
    pub navigation_timeout: Duration,
    /// `SCRAPER_SELECTOR_TIMEOUT`: wait for the first listing container
    pub selector_timeout: Duration,
    /// `SCRAPER_SOURCE_BUDGET`: hard wall-clock limit for one source, retries included
    pub source_budget: Duration,
    /// `SCRAPER_DELAY`: pause between consecutive sources
    pub courtesy_delay: Duration,
    /// `SCRAPER_MAX_RETRIES`: navigation attempts per source
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub chrome_path: Option<PathBuf>,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            navigation_timeout: Duration::from_millis(30_000),
            selector_timeout: Duration::from_millis(10_000),
            source_budget: Duration::from_millis(120_000),
            courtesy_delay: Duration::from_millis(2_000),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
            chrome_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSettings {
    pub interval: Duration,
    pub run_on_start: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(6 * 60 * 60),
            run_on_start: false,
        }
    }
}

/// Where the source registry comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourcesConfig {
    /// Built-in example companies
    Defaults,
    /// JSON array of sources
    File(PathBuf),
    /// The `scraping_sources` table
    Table,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub scraper: ScraperSettings,
    pub schedule: ScheduleSettings,
    pub sources: SourcesConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            scraper: ScraperSettings::from_lookup(&lookup)?,
            schedule: ScheduleSettings::from_lookup(&lookup)?,
            sources: SourcesConfig::from_lookup(&lookup)?,
        })
    }
}

impl ScraperSettings {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_attempts = parse_or(lookup, "SCRAPER_MAX_RETRIES", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "SCRAPER_MAX_RETRIES",
                value: "0".into(),
                reason: "at least one attempt is required".into(),
            });
        }

        Ok(Self {
            user_agent: lookup("SCRAPER_USER_AGENT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.user_agent),
            navigation_timeout: millis_or(lookup, "SCRAPER_TIMEOUT", defaults.navigation_timeout)?,
            selector_timeout: millis_or(lookup, "SCRAPER_SELECTOR_TIMEOUT", defaults.selector_timeout)?,
            source_budget: millis_or(lookup, "SCRAPER_SOURCE_BUDGET", defaults.source_budget)?,
            courtesy_delay: millis_or(lookup, "SCRAPER_DELAY", defaults.courtesy_delay)?,
            max_attempts,
            retry_backoff: millis_or(lookup, "SCRAPER_RETRY_BACKOFF", defaults.retry_backoff)?,
            chrome_path: lookup("CHROME_PATH").filter(|v| !v.is_empty()).map(PathBuf::from),
        })
    }
}

impl ScheduleSettings {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let interval_secs: u64 = parse_or(lookup, "SCRAPER_INTERVAL", defaults.interval.as_secs())?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "SCRAPER_INTERVAL",
                value: "0".into(),
                reason: "interval must be positive".into(),
            });
        }

        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            run_on_start: parse_bool(lookup, "SCRAPER_RUN_ON_START")?.unwrap_or(defaults.run_on_start),
        })
    }
}

impl SourcesConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if parse_bool(lookup, "SCRAPER_SOURCES_TABLE")?.unwrap_or(false) {
            return Ok(SourcesConfig::Table);
        }
        Ok(match lookup("SCRAPER_SOURCES_FILE").filter(|v| !v.trim().is_empty()) {
            Some(path) => SourcesConfig::File(PathBuf::from(path)),
            None => SourcesConfig::Defaults,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let ms: u64 = parse_or(lookup, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(ms))
}

fn parse_bool<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected a boolean".into(),
        }),
    }
}

// ============================================================================
// Source lists
// ============================================================================

/// Read a JSON array of sources and reject unusable entries.
pub fn load_sources_file(path: &Path) -> Result<Vec<Source>, ConfigError> {
    let file_error = |reason: String| ConfigError::SourcesFile {
        path: path.display().to_string(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    let sources: Vec<Source> = serde_json::from_str(&content).map_err(|e| file_error(e.to_string()))?;
    validate_sources(&sources).map_err(file_error)?;
    Ok(sources)
}

pub fn validate_sources(sources: &[Source]) -> Result<(), String> {
    let mut names = HashSet::new();
    for source in sources {
        if source.name.trim().is_empty() {
            return Err("source with empty name".into());
        }
        if !names.insert(source.name.as_str()) {
            return Err(format!("duplicate source name {:?}", source.name));
        }
        url::Url::parse(&source.website)
            .map_err(|e| format!("{}: invalid website {:?}: {}", source.name, source.website, e))?;
        url::Url::parse(&source.career_page)
            .map_err(|e| format!("{}: invalid career page {:?}: {}", source.name, source.career_page, e))?;
    }
    Ok(())
}

/// Example companies used when no registry is configured.
pub fn default_sources() -> Vec<Source> {
    let selectors = |list: &str| SelectorMap {
        list_container: list.to_string(),
        title: ".job-title".into(),
        link: ".job-link".into(),
        company: Some(".company-name".into()),
        location: ".location".into(),
        description: ".description".into(),
        salary: Some(".salary".into()),
        posted_date: Some(".posted-date".into()),
    };

    vec![
        Source {
            name: "Google".into(),
            website: "https://careers.google.com".into(),
            career_page: "https://careers.google.com/jobs/results/".into(),
            selectors: selectors(".job-listing"),
        },
        Source {
            name: "Microsoft".into(),
            website: "https://careers.microsoft.com".into(),
            career_page: "https://careers.microsoft.com/us/en/search-results".into(),
            selectors: selectors(".job-card"),
        },
        Source {
            name: "Apple".into(),
            website: "https://jobs.apple.com".into(),
            career_page: "https://jobs.apple.com/en-us/search".into(),
            selectors: selectors(".job-item"),
        },
    ]
}
