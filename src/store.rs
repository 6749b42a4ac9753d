use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::models::{JobType, NormalizedJob, SalaryRange, StoredJob};

/// Storage operations the pipeline needs. Implementations must reject a
/// second job with the same `apply_url` with `StoreError::Duplicate`.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn find_job_by_apply_url(&self, apply_url: &str) -> Result<Option<StoredJob>, StoreError>;

    async fn insert_job(&self, job: &NormalizedJob) -> Result<StoredJob, StoreError>;
}

// ============================================================================
// Postgres
// ============================================================================

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_db(&self) -> Result<(), StoreError> {
        // 1. Base schema, shared with the API layer
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id VARCHAR(36) PRIMARY KEY,
                title VARCHAR(255) NOT NULL,
                company VARCHAR(100) NOT NULL,
                location VARCHAR(100) NOT NULL,
                type VARCHAR(20) NOT NULL CHECK (type IN ('full-time', 'part-time', 'contract', 'internship', 'freelance')),
                remote BOOLEAN DEFAULT false,
                salary_min BIGINT,
                salary_max BIGINT,
                salary_currency VARCHAR(3) DEFAULT 'USD',
                description TEXT NOT NULL,
                tags TEXT[] DEFAULT '{}',
                apply_url VARCHAR(500) NOT NULL,
                source_url VARCHAR(500) NOT NULL,
                source VARCHAR(100) NOT NULL,
                posted_date TIMESTAMPTZ NOT NULL,
                expires_date TIMESTAMPTZ,
                is_active BOOLEAN DEFAULT true,
                created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // 2. Dedup key. Older tables were created without it, so add it separately.
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_apply_url ON jobs(apply_url);")
            .execute(&self.pool)
            .await?;

        // 3. Lookup indexes for the API; failures here are not fatal
        self.ensure_lookup_indexes().await;

        Ok(())
    }

    /// Returns the names of the indexes that could not be created.
    pub async fn ensure_lookup_indexes(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for (name, ddl) in LOOKUP_INDEXES {
            if let Err(e) = sqlx::query(*ddl).execute(&self.pool).await {
                warn!("Could not create lookup index {} on jobs: {}", name, e);
                failed.push(*name);
            }
        }
        failed
    }
}

const LOOKUP_INDEXES: &[(&str, &str)] = &[
    ("idx_jobs_source", "CREATE INDEX IF NOT EXISTS idx_jobs_source ON jobs(source);"),
    ("idx_jobs_posted_date", "CREATE INDEX IF NOT EXISTS idx_jobs_posted_date ON jobs(posted_date);"),
    ("idx_jobs_is_active", "CREATE INDEX IF NOT EXISTS idx_jobs_is_active ON jobs(is_active);"),
];

fn row_to_job(row: &PgRow) -> Result<StoredJob, StoreError> {
    let job_type: String = row.try_get("type")?;
    let salary_min: Option<i64> = row.try_get("salary_min")?;
    let salary_max: Option<i64> = row.try_get("salary_max")?;
    let currency: Option<String> = row.try_get("salary_currency")?;

    let salary = match (salary_min, salary_max) {
        (Some(min), Some(max)) => Some(SalaryRange {
            min,
            max,
            currency: currency.unwrap_or_else(|| "USD".to_string()),
        }),
        _ => None,
    };

    Ok(StoredJob {
        id: row.try_get("id")?,
        job: NormalizedJob {
            title: row.try_get("title")?,
            company: row.try_get("company")?,
            location: row.try_get("location")?,
            job_type: job_type.parse::<JobType>().map_err(StoreError::Decode)?,
            is_remote: row.try_get::<Option<bool>, _>("remote")?.unwrap_or(false),
            salary,
            description: row.try_get("description")?,
            tags: row.try_get::<Option<Vec<String>>, _>("tags")?.unwrap_or_default(),
            apply_url: row.try_get("apply_url")?,
            source_name: row.try_get("source")?,
            posted_date: row.try_get("posted_date")?,
            is_active: row.try_get::<Option<bool>, _>("is_active")?.unwrap_or(true),
        },
    })
}

const JOB_COLUMNS: &str = "id, title, company, location, type, remote, salary_min, salary_max, \
     salary_currency, description, tags, apply_url, source, posted_date, is_active";

#[async_trait]
impl JobStore for PgJobStore {
    async fn find_job_by_apply_url(&self, apply_url: &str) -> Result<Option<StoredJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE apply_url = $1", JOB_COLUMNS))
            .bind(apply_url)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn insert_job(&self, job: &NormalizedJob) -> Result<StoredJob, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();

        // The unique index decides; a concurrent pass loses here instead of
        // inserting a second copy.
        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, title, company, location, type, remote,
                salary_min, salary_max, salary_currency, description,
                tags, apply_url, source_url, source, posted_date, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12, $13, $14, $15)
            ON CONFLICT (apply_url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&id)
        .bind(&job.title)
        .bind(&job.company)
        .bind(&job.location)
        .bind(job.job_type.as_str())
        .bind(job.is_remote)
        .bind(job.salary.as_ref().map(|s| s.min))
        .bind(job.salary.as_ref().map(|s| s.max))
        .bind(job.salary.as_ref().map(|s| s.currency.as_str()).unwrap_or("USD"))
        .bind(&job.description)
        .bind(&job.tags)
        .bind(&job.apply_url)
        .bind(&job.source_name)
        .bind(job.posted_date)
        .bind(job.is_active)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(_) => Ok(StoredJob { id, job: job.clone() }),
            None => Err(StoreError::Duplicate(job.apply_url.clone())),
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store keyed by apply URL. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, StoredJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn jobs(&self) -> Vec<StoredJob> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_job_by_apply_url(&self, apply_url: &str) -> Result<Option<StoredJob>, StoreError> {
        Ok(self.lock().get(apply_url).cloned())
    }

    async fn insert_job(&self, job: &NormalizedJob) -> Result<StoredJob, StoreError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.apply_url) {
            return Err(StoreError::Duplicate(job.apply_url.clone()));
        }
        let stored = StoredJob {
            id: uuid::Uuid::new_v4().to_string(),
            job: job.clone(),
        };
        jobs.insert(job.apply_url.clone(), stored.clone());
        Ok(stored)
    }
}
