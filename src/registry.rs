//! Source registries.
//!
//! The pipeline loads the registry at the start of every pass and treats the
//! result as immutable until the pass ends, so a registry backed by a table
//! can be edited between passes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPool, Row};
use tracing::warn;

use crate::config::{self, SourcesConfig};
use crate::error::{ConfigError, ScrapeError};
use crate::models::{SelectorMap, Source};

#[async_trait]
pub trait SourceRegistry: Send + Sync + 'static {
    async fn load(&self) -> Result<Vec<Source>, ScrapeError>;

    /// Record that a source was attempted. No-op for static registries.
    async fn mark_scraped(&self, _source_name: &str, _at: DateTime<Utc>) -> Result<(), ScrapeError> {
        Ok(())
    }
}

/// A fixed list of sources, from the built-in defaults or a JSON file.
pub struct StaticRegistry {
    sources: Vec<Source>,
}

impl StaticRegistry {
    pub fn new(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    pub fn from_config(sources: &SourcesConfig) -> Result<Self, ConfigError> {
        match sources {
            SourcesConfig::File(path) => Ok(Self::new(config::load_sources_file(path)?)),
            _ => Ok(Self::new(config::default_sources())),
        }
    }
}

#[async_trait]
impl SourceRegistry for StaticRegistry {
    async fn load(&self) -> Result<Vec<Source>, ScrapeError> {
        Ok(self.sources.clone())
    }
}

/// Sources kept in the `scraping_sources` table, editable at runtime.
pub struct PgSourceRegistry {
    pool: PgPool,
}

impl PgSourceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_table(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scraping_sources (
                name VARCHAR(100) PRIMARY KEY,
                website VARCHAR(255) NOT NULL,
                career_page VARCHAR(255) NOT NULL,
                selectors JSONB NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT true,
                last_scraped TIMESTAMPTZ,
                created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SourceRegistry for PgSourceRegistry {
    async fn load(&self) -> Result<Vec<Source>, ScrapeError> {
        let rows = sqlx::query(
            "SELECT name, website, career_page, selectors::text AS selectors
             FROM scraping_sources WHERE is_active = true ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ScrapeError::Registry(e.to_string()))?;

        let mut sources = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("name");
            let selectors: String = row.get("selectors");
            // One broken row must not take the whole registry down.
            match serde_json::from_str::<SelectorMap>(&selectors) {
                Ok(selectors) => sources.push(Source {
                    name,
                    website: row.get("website"),
                    career_page: row.get("career_page"),
                    selectors,
                }),
                Err(e) => warn!("Skipping source {}: bad selector map: {}", name, e),
            }
        }
        Ok(sources)
    }

    async fn mark_scraped(&self, source_name: &str, at: DateTime<Utc>) -> Result<(), ScrapeError> {
        sqlx::query("UPDATE scraping_sources SET last_scraped = $2 WHERE name = $1")
            .bind(source_name)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| ScrapeError::Registry(e.to_string()))?;
        Ok(())
    }
}
