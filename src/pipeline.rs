//! One scraping pass: every registered source, in order, through a single
//! browser session.
//!
//! Failures are contained where they happen. A bad listing costs one entry
//! in `errors`, a bad source costs one `ExtractionResult` with `failure`
//! set, and only registry or browser start-up failures abort the pass.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::config::ScraperSettings;
use crate::error::ScrapeError;
use crate::extract::{extract_with, CompiledSelectors, PageExtraction};
use crate::models::{ExtractionResult, Source};
use crate::persist::save_all;
use crate::registry::SourceRegistry;
use crate::store::JobStore;

/// Something the scheduler can run once per tick.
#[async_trait]
pub trait PassRunner: Send + Sync + 'static {
    async fn run_pass(&self) -> Result<Vec<ExtractionResult>, ScrapeError>;
}

pub struct Pipeline<L, S>
where
    L: BrowserLauncher,
    S: JobStore,
{
    launcher: Arc<L>,
    store: Arc<S>,
    registry: Arc<dyn SourceRegistry>,
    settings: ScraperSettings,
}

impl<L, S> Pipeline<L, S>
where
    L: BrowserLauncher,
    S: JobStore,
{
    pub fn new(launcher: L, store: Arc<S>, registry: Arc<dyn SourceRegistry>, settings: ScraperSettings) -> Self {
        Self {
            launcher: Arc::new(launcher),
            store,
            registry,
            settings,
        }
    }

    /// Scrape every source once. Returns one result per source, in
    /// registry order.
    pub async fn run_one_pass(&self) -> Result<Vec<ExtractionResult>, ScrapeError> {
        let sources = self.registry.load().await?;
        if sources.is_empty() {
            warn!("Source registry is empty, nothing to scrape");
            return Ok(Vec::new());
        }

        let launcher = Arc::clone(&self.launcher);
        let session = tokio::task::spawn_blocking(move || launcher.launch())
            .await
            .map_err(|e| ScrapeError::BrowserInit(format!("launch task failed: {}", e)))??;
        let session = Arc::new(session);

        info!("Starting scraping pass over {} sources", sources.len());
        let mut results = Vec::with_capacity(sources.len());

        for (i, source) in sources.iter().enumerate() {
            if i > 0 {
                courtesy_pause(self.settings.courtesy_delay).await;
            }

            let result = self.run_source(&session, source).await;
            log_result(&result);

            if let Err(e) = self.registry.mark_scraped(&source.name, Utc::now()).await {
                warn!("Could not record scrape time for {}: {}", source.name, e);
            }
            results.push(result);
        }

        // A tab stuck past its budget may still hold a clone; the process
        // exits once that last clone drops.
        let _ = tokio::task::spawn_blocking(move || drop(session)).await;

        Ok(results)
    }

    async fn run_source(&self, session: &Arc<L::Session>, source: &Source) -> ExtractionResult {
        // A bad selector would otherwise surface as a selector timeout in Chrome.
        let selectors = match CompiledSelectors::compile(&source.selectors) {
            Ok(selectors) => selectors,
            Err(e) => return ExtractionResult::failed(&source.name, e.to_string()),
        };

        // The budget covers the browser side only. save_all must never be
        // cut off midway.
        let budget = self.settings.source_budget;
        let page = match timeout(budget, self.fetch_page(session, source, &selectors)).await {
            Ok(Ok(Some(page))) => page,
            Ok(Ok(None)) => return ExtractionResult::empty(&source.name),
            Ok(Err(e)) => return ExtractionResult::failed(&source.name, e.to_string()),
            Err(_) => {
                let e = ScrapeError::SourceBudget {
                    source_name: source.name.clone(),
                    budget,
                };
                return ExtractionResult::failed(&source.name, e.to_string());
            }
        };

        if page.containers > 0 && page.listings.is_empty() {
            warn!(
                "{}: {} listings found but none could be read; check the sub-field selectors",
                source.name, page.containers
            );
        }

        let mut result = save_all(self.store.as_ref(), &page.listings, &source.name, Utc::now()).await;
        result.raw_count = page.containers;
        result.errors.extend(page.errors);
        result.errors.sort_by_key(|e| e.listing_index);
        result
    }

    /// Render and extract one source. `None` means no listing container
    /// showed up in time.
    async fn fetch_page(
        &self,
        session: &Arc<L::Session>,
        source: &Source,
        selectors: &CompiledSelectors,
    ) -> Result<Option<PageExtraction>, ScrapeError> {
        let html = match self.render_with_retry(session, source).await {
            Ok(html) => html,
            Err(ScrapeError::SelectorTimeout { selector, timeout: waited }) => {
                warn!(
                    "{}: no element matched `{}` within {:?}; no current openings or stale selectors",
                    source.name, selector, waited
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(Some(extract_with(&html, selectors, source)))
    }

    async fn render_with_retry(&self, session: &Arc<L::Session>, source: &Source) -> Result<String, ScrapeError> {
        let attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let session = Arc::clone(session);
            let target = source.clone();
            let outcome = tokio::task::spawn_blocking(move || session.render(&target))
                .await
                .unwrap_or_else(|e| {
                    Err(ScrapeError::Navigation {
                        url: source.career_page.clone(),
                        reason: format!("render task failed: {}", e),
                    })
                });

            match outcome {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!("{}: attempt {}/{} failed: {}", source.name, attempt, attempts, e);
                    sleep(self.settings.retry_backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<L, S> PassRunner for Pipeline<L, S>
where
    L: BrowserLauncher,
    S: JobStore,
{
    async fn run_pass(&self) -> Result<Vec<ExtractionResult>, ScrapeError> {
        self.run_one_pass().await
    }
}

/// Sleep for roughly `base`, with ±25% jitter.
async fn courtesy_pause(base: Duration) {
    if base.is_zero() {
        return;
    }
    let factor: f64 = {
        let mut rng = rand::thread_rng();
        rng.gen_range(0.75..1.25)
    };
    sleep(base.mul_f64(factor)).await;
}

fn log_result(result: &ExtractionResult) {
    match &result.failure {
        Some(reason) => error!("{} (failed: {})", result.summary(), reason),
        None => info!("{}", result.summary()),
    }
    for e in &result.errors {
        warn!("{}: listing {}: {}", result.source_name, e.listing_index, e.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::{NormalizedJob, SelectorMap, StoredJob};
    use crate::registry::StaticRegistry;
    use crate::store::MemoryJobStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    enum FakePage {
        Listings(String),
        NavigationTimeout,
        NoListings,
        Hang(Duration),
        /// Fail navigation this many times, then serve the HTML
        Flaky(usize, String),
    }

    #[derive(Clone, Default)]
    struct FakeLauncher {
        pages: HashMap<String, FakePage>,
        fail_launch: bool,
        launches: Arc<AtomicUsize>,
        renders: Arc<Mutex<Vec<String>>>,
    }

    struct FakeSession {
        pages: HashMap<String, FakePage>,
        renders: Arc<Mutex<Vec<String>>>,
        flaky_failures: Mutex<HashMap<String, usize>>,
    }

    impl BrowserLauncher for FakeLauncher {
        type Session = FakeSession;

        fn launch(&self) -> Result<FakeSession, ScrapeError> {
            if self.fail_launch {
                return Err(ScrapeError::BrowserInit("chrome not found".into()));
            }
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                pages: self.pages.clone(),
                renders: Arc::clone(&self.renders),
                flaky_failures: Mutex::new(HashMap::new()),
            })
        }
    }

    impl BrowserSession for FakeSession {
        fn render(&self, source: &Source) -> Result<String, ScrapeError> {
            self.renders.lock().unwrap().push(source.name.clone());
            let navigation_timeout = || ScrapeError::Navigation {
                url: source.career_page.clone(),
                reason: "timed out after 30s".into(),
            };

            match self.pages.get(&source.name) {
                Some(FakePage::Listings(html)) => Ok(html.clone()),
                Some(FakePage::NavigationTimeout) | None => Err(navigation_timeout()),
                Some(FakePage::NoListings) => Err(ScrapeError::SelectorTimeout {
                    selector: source.selectors.list_container.clone(),
                    timeout: Duration::from_secs(10),
                }),
                Some(FakePage::Hang(d)) => {
                    std::thread::sleep(*d);
                    Ok(String::new())
                }
                Some(FakePage::Flaky(failures, html)) => {
                    let mut seen = self.flaky_failures.lock().unwrap();
                    let count = seen.entry(source.name.clone()).or_insert(0);
                    if *count < *failures {
                        *count += 1;
                        Err(navigation_timeout())
                    } else {
                        Ok(html.clone())
                    }
                }
            }
        }
    }

    fn source(name: &str) -> Source {
        Source {
            name: name.into(),
            website: format!("https://{}.example", name.to_lowercase()),
            career_page: format!("https://{}.example/careers", name.to_lowercase()),
            selectors: SelectorMap {
                list_container: ".job".into(),
                title: ".title".into(),
                link: "a".into(),
                company: None,
                location: ".location".into(),
                description: ".description".into(),
                salary: None,
                posted_date: None,
            },
        }
    }

    fn page(count: usize, malformed: Option<usize>) -> String {
        (0..count)
            .map(|i| {
                let title = if Some(i) == malformed {
                    String::new()
                } else {
                    format!(r#"<h3 class="title">Engineer {}</h3>"#, i)
                };
                format!(
                    r#"<div class="job">{}<a href="/jobs/{}">Apply</a>
                       <span class="location">Remote</span><p class="description">Rust</p></div>"#,
                    title, i
                )
            })
            .collect()
    }

    fn settings() -> ScraperSettings {
        ScraperSettings {
            courtesy_delay: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            source_budget: Duration::from_secs(5),
            max_attempts: 1,
            ..ScraperSettings::default()
        }
    }

    fn pipeline(
        launcher: FakeLauncher,
        names: &[&str],
        settings: ScraperSettings,
    ) -> (Pipeline<FakeLauncher, MemoryJobStore>, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        let registry = Arc::new(StaticRegistry::new(names.iter().map(|n| source(n)).collect()));
        (Pipeline::new(launcher, Arc::clone(&store), registry, settings), store)
    }

    #[tokio::test]
    async fn test_navigation_timeout_does_not_stop_the_pass() {
        let mut launcher = FakeLauncher::default();
        launcher.pages.insert("Slow".into(), FakePage::NavigationTimeout);
        launcher.pages.insert("Fast".into(), FakePage::Listings(page(2, None)));
        let renders = Arc::clone(&launcher.renders);

        let (pipeline, store) = pipeline(launcher, &["Slow", "Fast"], settings());
        let results = pipeline.run_one_pass().await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].raw_count, 0);
        assert_eq!(results[0].saved_count, 0);
        assert!(results[0].failure.as_deref().unwrap().contains("navigation"));
        assert_eq!(results[1].saved_count, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(*renders.lock().unwrap(), vec!["Slow", "Fast"]);
    }

    #[tokio::test]
    async fn test_malformed_listing_costs_one_error() {
        let mut launcher = FakeLauncher::default();
        launcher.pages.insert("Acme".into(), FakePage::Listings(page(10, Some(3))));

        let (pipeline, store) = pipeline(launcher, &["Acme"], settings());
        let results = pipeline.run_one_pass().await.unwrap();

        assert_eq!(results[0].raw_count, 10);
        assert_eq!(results[0].saved_count, 9);
        assert_eq!(results[0].errors.len(), 1);
        assert_eq!(results[0].errors[0].listing_index, 3);
        assert!(results[0].failure.is_none());
        assert_eq!(store.len(), 9);
        assert!(store
            .jobs()
            .iter()
            .all(|j| j.job.apply_url.starts_with("https://acme.example/jobs/")));
    }

    #[tokio::test]
    async fn test_second_pass_saves_nothing_new() {
        let mut launcher = FakeLauncher::default();
        launcher.pages.insert("Acme".into(), FakePage::Listings(page(4, None)));
        let launches = Arc::clone(&launcher.launches);

        let (pipeline, store) = pipeline(launcher, &["Acme"], settings());
        let first = pipeline.run_one_pass().await.unwrap();
        let second = pipeline.run_one_pass().await.unwrap();

        assert_eq!(first[0].saved_count, 4);
        assert_eq!(second[0].saved_count, 0);
        assert_eq!(second[0].skipped_count, 4);
        assert_eq!(store.len(), 4);
        // One browser per pass
        assert_eq!(launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_listings_are_not_an_error() {
        let mut launcher = FakeLauncher::default();
        launcher.pages.insert("Quiet".into(), FakePage::NoListings);

        let (pipeline, _store) = pipeline(launcher, &["Quiet"], settings());
        let results = pipeline.run_one_pass().await.unwrap();

        assert_eq!(results[0], ExtractionResult::empty("Quiet"));
    }

    #[tokio::test]
    async fn test_browser_init_failure_aborts_the_tick() {
        let launcher = FakeLauncher {
            fail_launch: true,
            ..Default::default()
        };

        let (pipeline, store) = pipeline(launcher, &["Acme"], settings());
        let err = pipeline.run_one_pass().await.unwrap_err();

        assert!(matches!(err, ScrapeError::BrowserInit(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_hung_source_is_cut_off_by_budget() {
        let mut launcher = FakeLauncher::default();
        launcher.pages.insert("Stuck".into(), FakePage::Hang(Duration::from_millis(500)));
        launcher.pages.insert("Fast".into(), FakePage::Listings(page(1, None)));

        let mut settings = settings();
        settings.source_budget = Duration::from_millis(50);
        let (pipeline, store) = pipeline(launcher, &["Stuck", "Fast"], settings);
        let results = pipeline.run_one_pass().await.unwrap();

        assert!(results[0].failure.as_deref().unwrap().contains("budget"));
        assert_eq!(results[1].saved_count, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_navigation_is_retried() {
        let mut launcher = FakeLauncher::default();
        launcher.pages.insert("Flaky".into(), FakePage::Flaky(2, page(3, None)));
        let renders = Arc::clone(&launcher.renders);

        let mut settings = settings();
        settings.max_attempts = 3;
        let (pipeline, _store) = pipeline(launcher, &["Flaky"], settings);
        let results = pipeline.run_one_pass().await.unwrap();

        assert_eq!(results[0].saved_count, 3);
        assert_eq!(renders.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_selector_fails_before_rendering() {
        let mut launcher = FakeLauncher::default();
        // Chrome reports a bad selector as a wait failure
        launcher.pages.insert("Broken".into(), FakePage::NoListings);
        let renders = Arc::clone(&launcher.renders);

        let mut broken = source("Broken");
        broken.selectors.list_container = "div[".into();
        let store = Arc::new(MemoryJobStore::new());
        let registry = Arc::new(StaticRegistry::new(vec![broken]));
        let pipeline = Pipeline::new(launcher, store, registry, settings());

        let results = pipeline.run_one_pass().await.unwrap();

        assert!(results[0].failure.as_deref().unwrap().contains("invalid selector"));
        assert!(renders.lock().unwrap().is_empty());
    }

    /// Inserts take a fixed time each.
    struct SlowStore {
        inner: MemoryJobStore,
        delay: Duration,
    }

    #[async_trait]
    impl JobStore for SlowStore {
        async fn find_job_by_apply_url(&self, apply_url: &str) -> Result<Option<StoredJob>, StoreError> {
            self.inner.find_job_by_apply_url(apply_url).await
        }

        async fn insert_job(&self, job: &NormalizedJob) -> Result<StoredJob, StoreError> {
            sleep(self.delay).await;
            self.inner.insert_job(job).await
        }
    }

    #[tokio::test]
    async fn test_saving_is_not_cut_off_by_budget() {
        let mut launcher = FakeLauncher::default();
        launcher.pages.insert("Acme".into(), FakePage::Listings(page(5, None)));

        let mut settings = settings();
        settings.source_budget = Duration::from_millis(100);
        let store = Arc::new(SlowStore {
            inner: MemoryJobStore::new(),
            delay: Duration::from_millis(40),
        });
        let registry = Arc::new(StaticRegistry::new(vec![source("Acme")]));
        let pipeline = Pipeline::new(launcher, Arc::clone(&store), registry, settings);

        let results = pipeline.run_one_pass().await.unwrap();

        assert!(results[0].failure.is_none());
        assert_eq!(results[0].saved_count, 5);
        assert_eq!(store.inner.len(), 5);
    }

    #[tokio::test]
    async fn test_empty_registry_skips_browser_launch() {
        let launcher = FakeLauncher::default();
        let launches = Arc::clone(&launcher.launches);

        let (pipeline, _store) = pipeline(launcher, &[], settings());
        assert!(pipeline.run_one_pass().await.unwrap().is_empty());
        assert_eq!(launches.load(Ordering::SeqCst), 0);
    }
}
