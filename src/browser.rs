//! Headless Chrome session management.
//!
//! One browser process is launched per pass and shared by every source in
//! that pass. Each source gets its own tab, closed when its `PageGuard`
//! drops. The calls here block, so the pipeline drives them from
//! `spawn_blocking`.

use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ScraperSettings;
use crate::error::ScrapeError;
use crate::models::Source;

const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Starts the browser for a pass.
pub trait BrowserLauncher: Send + Sync + 'static {
    type Session: BrowserSession;

    fn launch(&self) -> Result<Self::Session, ScrapeError>;
}

/// An open browser. Dropping it terminates the process.
pub trait BrowserSession: Send + Sync + 'static {
    /// Load the source's career page in a fresh tab and return the rendered
    /// HTML once at least one listing container is present.
    fn render(&self, source: &Source) -> Result<String, ScrapeError>;
}

// ============================================================================
// Chrome implementation
// ============================================================================

pub struct ChromeLauncher {
    settings: ScraperSettings,
}

impl ChromeLauncher {
    pub fn new(settings: ScraperSettings) -> Self {
        Self { settings }
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Session = ChromeSession;

    fn launch(&self) -> Result<ChromeSession, ScrapeError> {
        let ua_arg = format!("--user-agent={}", self.settings.user_agent);
        let args = vec![
            OsStr::new(&ua_arg),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-setuid-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-accelerated-2d-canvas"),
            OsStr::new("--no-first-run"),
            OsStr::new("--no-zygote"),
            OsStr::new("--disable-gpu"),
        ];

        let browser = Browser::new(LaunchOptions {
            headless: true,
            sandbox: false,
            window_size: Some((1920, 1080)),
            path: self.settings.chrome_path.clone(),
            // Must outlive the longest source, or Chrome hangs up mid-pass.
            idle_browser_timeout: self.settings.source_budget * 2,
            args,
            ..Default::default()
        })
        .map_err(|e| ScrapeError::BrowserInit(format!("{:#}", e)))?;

        info!("Headless Chrome launched");
        Ok(ChromeSession {
            browser,
            settings: self.settings.clone(),
        })
    }
}

pub struct ChromeSession {
    browser: Browser,
    settings: ScraperSettings,
}

impl BrowserSession for ChromeSession {
    fn render(&self, source: &Source) -> Result<String, ScrapeError> {
        let navigation_error = |e: anyhow::Error| ScrapeError::Navigation {
            url: source.career_page.clone(),
            reason: format!("{:#}", e),
        };

        let page = PageGuard::open(&self.browser).map_err(navigation_error)?;
        page.set_default_timeout(self.settings.navigation_timeout);
        page.set_user_agent(&self.settings.user_agent, Some(ACCEPT_LANGUAGE), None)
            .map_err(navigation_error)?;

        info!("Scraping jobs from {}: {}", source.name, source.career_page);
        page.navigate_to(&source.career_page)
            .and_then(|tab| tab.wait_until_navigated())
            .map_err(navigation_error)?;

        let container = &source.selectors.list_container;
        if let Err(e) = page.wait_for_element_with_custom_timeout(container, self.settings.selector_timeout) {
            debug!("{}: waiting for {} failed: {}", source.name, container, e);
            return Err(ScrapeError::SelectorTimeout {
                selector: container.clone(),
                timeout: self.settings.selector_timeout,
            });
        }

        page.get_content().map_err(navigation_error)
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        info!("Headless Chrome closed");
    }
}

/// A tab that is closed on every exit path.
pub struct PageGuard {
    tab: Arc<Tab>,
}

impl PageGuard {
    pub fn open(browser: &Browser) -> anyhow::Result<Self> {
        Ok(Self { tab: browser.new_tab()? })
    }
}

impl Deref for PageGuard {
    type Target = Tab;

    fn deref(&self) -> &Tab {
        &self.tab
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(false) {
            warn!("Failed to close tab: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SelectorMap;
    use std::time::Duration;

    #[test]
    #[ignore] // Needs a local Chrome install
    fn test_render_inline_page() {
        let mut settings = ScraperSettings::default();
        settings.selector_timeout = Duration::from_secs(2);
        let session = ChromeLauncher::new(settings).launch().expect("Chrome should launch");

        let source = Source {
            name: "inline".into(),
            website: "https://example.com".into(),
            career_page: "data:text/html,<div class='job-listing'>Hello</div>".into(),
            selectors: SelectorMap {
                list_container: ".job-listing".into(),
                title: ".job-title".into(),
                link: "a".into(),
                company: None,
                location: ".location".into(),
                description: ".description".into(),
                salary: None,
                posted_date: None,
            },
        };

        let html = session.render(&source).unwrap();
        assert!(html.contains("job-listing"));
    }
}
