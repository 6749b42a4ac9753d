use anyhow::{Context, Result};
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use careers_crawler::browser::ChromeLauncher;
use careers_crawler::config::{Config, SourcesConfig};
use careers_crawler::registry::{PgSourceRegistry, SourceRegistry, StaticRegistry};
use careers_crawler::store::PgJobStore;
use careers_crawler::{Pipeline, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let run_once = std::env::args().any(|arg| arg == "--once");
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("connecting to DATABASE_URL")?;

    let store = Arc::new(PgJobStore::new(pool.clone()));
    store.init_db().await.context("initialising jobs table")?;

    let registry: Arc<dyn SourceRegistry> = match &config.sources {
        SourcesConfig::Table => {
            let registry = PgSourceRegistry::new(pool.clone());
            registry.init_table().await.context("initialising scraping_sources table")?;
            Arc::new(registry)
        }
        other => Arc::new(StaticRegistry::from_config(other)?),
    };

    let pipeline = Arc::new(Pipeline::new(
        ChromeLauncher::new(config.scraper.clone()),
        store,
        registry,
        config.scraper.clone(),
    ));

    if run_once {
        let results = pipeline.run_one_pass().await?;
        for result in &results {
            println!("{}", result.summary());
        }
    } else {
        let scheduler = Scheduler::start(pipeline, config.schedule.clone());
        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested, waiting for any running pass to finish");
        scheduler.stop().await;
    }

    pool.close().await;
    Ok(())
}
