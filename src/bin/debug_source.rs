//! Render one configured source and print what the pipeline would store.
//!
//! Usage: `debug_source <source name>`. Nothing is written to Postgres.

use anyhow::{anyhow, Result};
use chrono::Utc;
use dotenv::dotenv;

use careers_crawler::browser::{BrowserLauncher, BrowserSession, ChromeLauncher};
use careers_crawler::config::{ScraperSettings, SourcesConfig};
use careers_crawler::extract::extract_listings;
use careers_crawler::persist::save_all;
use careers_crawler::registry::{SourceRegistry, StaticRegistry};
use careers_crawler::store::MemoryJobStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let wanted = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("usage: debug_source <source name>"))?;

    let lookup = |key: &str| std::env::var(key).ok();
    let settings = ScraperSettings::from_lookup(&lookup)?;
    let registry = StaticRegistry::from_config(&SourcesConfig::from_lookup(&lookup)?)?;
    let source = registry
        .load()
        .await?
        .into_iter()
        .find(|s| s.name == wanted)
        .ok_or_else(|| anyhow!("no source named {:?}", wanted))?;

    println!("🕵️ Rendering {} ({})", source.name, source.career_page);
    let session = ChromeLauncher::new(settings).launch()?;
    let html = session.render(&source)?;
    println!("📄 Rendered HTML size: {} bytes", html.len());

    let page = extract_listings(&html, &source)?;
    println!("🔍 {} listing containers matched", page.containers);
    for listing in &page.listings {
        println!(
            "  [{}] {} | {} | {}",
            listing.index, listing.title, listing.location, listing.apply_url
        );
    }
    for error in &page.errors {
        println!("  ⚠️ listing {}: {}", error.listing_index, error.message);
    }

    let store = MemoryJobStore::new();
    let result = save_all(&store, &page.listings, &source.name, Utc::now()).await;
    for stored in store.jobs() {
        let job = stored.job;
        println!(
            "  ✅ {} [{}{}] tags={:?} salary={:?}",
            job.title,
            job.job_type,
            if job.is_remote { ", remote" } else { "" },
            job.tags,
            job.salary.map(|s| (s.min, s.max))
        );
    }
    println!("{}", result.summary());

    Ok(())
}
