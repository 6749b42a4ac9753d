//! Turns a rendered career page into raw listings.
//!
//! All container elements are collected first and each one is mapped on its
//! own, so a selector mismatch on one listing only costs that listing.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;
use crate::models::{ListingError, RawListing, SelectorMap, Source};

/// Selector map parsed once per page.
pub struct CompiledSelectors {
    container: Selector,
    title: Selector,
    link: Selector,
    company: Option<Selector>,
    location: Selector,
    description: Selector,
    salary: Option<Selector>,
    posted_date: Option<Selector>,
}

impl CompiledSelectors {
    pub fn compile(map: &SelectorMap) -> Result<Self, ScrapeError> {
        Ok(Self {
            container: parse_selector(&map.list_container)?,
            title: parse_selector(&map.title)?,
            link: parse_selector(&map.link)?,
            company: map.company.as_deref().map(parse_selector).transpose()?,
            location: parse_selector(&map.location)?,
            description: parse_selector(&map.description)?,
            salary: map.salary.as_deref().map(parse_selector).transpose()?,
            posted_date: map.posted_date.as_deref().map(parse_selector).transpose()?,
        })
    }
}

fn parse_selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::InvalidSelector {
        selector: css.to_string(),
        reason: format!("{:?}", e),
    })
}

/// Everything read from one page.
#[derive(Debug, Default)]
pub struct PageExtraction {
    /// Number of `list_container` matches
    pub containers: usize,
    pub listings: Vec<RawListing>,
    pub errors: Vec<ListingError>,
}

pub fn extract_listings(html: &str, source: &Source) -> Result<PageExtraction, ScrapeError> {
    let selectors = CompiledSelectors::compile(&source.selectors)?;
    Ok(extract_with(html, &selectors, source))
}

/// Same as `extract_listings`, for callers that validated the selectors
/// before rendering the page.
pub fn extract_with(html: &str, selectors: &CompiledSelectors, source: &Source) -> PageExtraction {
    let document = Html::parse_document(html);

    let containers: Vec<ElementRef> = document.select(&selectors.container).collect();
    let mut page = PageExtraction {
        containers: containers.len(),
        ..Default::default()
    };

    for (index, element) in containers.into_iter().enumerate() {
        match extract_listing(index, element, selectors, source) {
            Ok(listing) => page.listings.push(listing),
            Err(e) => {
                debug!("{}: skipping listing {}: {}", source.name, index, e);
                page.errors.push(ListingError {
                    listing_index: index,
                    message: e.to_string(),
                });
            }
        }
    }

    page
}

fn extract_listing(
    index: usize,
    element: ElementRef,
    selectors: &CompiledSelectors,
    source: &Source,
) -> Result<RawListing, ScrapeError> {
    let required = |selector: &Selector, field: &str| {
        select_text(element, selector).ok_or_else(|| ScrapeError::ListingExtraction {
            index,
            message: format!("{} selector matched nothing", field),
        })
    };
    let optional = |selector: &Option<Selector>| selector.as_ref().and_then(|s| select_text(element, s));

    let title = required(&selectors.title, "title")?;
    let location = required(&selectors.location, "location")?;
    let description = required(&selectors.description, "description")?;

    let href = element
        .select(&selectors.link)
        .find_map(|link| link.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .ok_or_else(|| ScrapeError::ListingExtraction {
            index,
            message: "link selector matched no href".to_string(),
        })?;

    let apply_url = canonicalize_apply_url(href, &source.website).map_err(|reason| {
        ScrapeError::ListingExtraction {
            index,
            message: format!("bad apply link {:?}: {}", href, reason),
        }
    })?;

    Ok(RawListing {
        index,
        title,
        company: optional(&selectors.company),
        location,
        description,
        apply_url,
        salary_text: optional(&selectors.salary),
        posted_date_text: optional(&selectors.posted_date),
    })
}

/// Whitespace-collapsed text of the first non-empty match.
fn select_text(element: ElementRef, selector: &Selector) -> Option<String> {
    element.select(selector).find_map(|el| {
        let text = el.text().collect::<Vec<_>>().join(" ");
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!collapsed.is_empty()).then_some(collapsed)
    })
}

/// Links that already carry a scheme are returned untouched; anything else
/// is resolved against the site root.
pub fn canonicalize_apply_url(raw: &str, website: &str) -> Result<String, String> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(_) => Ok(raw.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(website).map_err(|e| format!("invalid website {:?}: {}", website, e))?;
            base.join(raw).map(String::from).map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Source {
        Source {
            name: "Example Company".into(),
            website: "https://example.com".into(),
            career_page: "https://example.com/careers".into(),
            selectors: SelectorMap {
                list_container: ".job-listing".into(),
                title: ".job-title".into(),
                link: ".job-link".into(),
                company: None,
                location: ".location".into(),
                description: ".description".into(),
                salary: Some(".salary".into()),
                posted_date: Some(".posted-date".into()),
            },
        }
    }

    fn listing_html(i: usize) -> String {
        format!(
            r#"<div class="job-listing">
                 <h2 class="job-title">Engineer {i}</h2>
                 <a class="job-link" href="/jobs/{i}">Apply</a>
                 <span class="location">Remote</span>
                 <p class="description">Build
                    things</p>
               </div>"#
        )
    }

    #[test]
    fn test_canonicalize_relative_link() {
        assert_eq!(
            canonicalize_apply_url("/jobs/123", "https://example.com").unwrap(),
            "https://example.com/jobs/123"
        );
    }

    #[test]
    fn test_canonicalize_absolute_link_passes_through() {
        let absolute = "https://boards.example.org/acme/jobs/9?src=careers";
        assert_eq!(canonicalize_apply_url(absolute, "https://example.com").unwrap(), absolute);
    }

    #[test]
    fn test_canonicalize_with_invalid_website() {
        assert!(canonicalize_apply_url("/jobs/1", "not a url").is_err());
    }

    #[test]
    fn test_extracts_every_listing() {
        let html = format!("<html><body>{}{}</body></html>", listing_html(1), listing_html(2));
        let page = extract_listings(&html, &source()).unwrap();

        assert_eq!(page.containers, 2);
        assert!(page.errors.is_empty());
        assert_eq!(page.listings[0].title, "Engineer 1");
        assert_eq!(page.listings[0].description, "Build things");
        assert_eq!(page.listings[1].apply_url, "https://example.com/jobs/2");
        assert_eq!(page.listings[1].index, 1);
        // Optional fields degrade to None
        assert!(page.listings[0].salary_text.is_none());
        assert!(page.listings[0].posted_date_text.is_none());
    }

    #[test]
    fn test_malformed_listing_is_isolated() {
        let mut body = String::new();
        for i in 0..10 {
            if i == 4 {
                body.push_str(
                    r#"<div class="job-listing"><a class="job-link" href="/jobs/4">x</a>
                       <span class="location">Oslo</span><p class="description">d</p></div>"#,
                );
            } else {
                body.push_str(&listing_html(i));
            }
        }
        let page = extract_listings(&body, &source()).unwrap();

        assert_eq!(page.containers, 10);
        assert_eq!(page.listings.len(), 9);
        assert_eq!(page.errors.len(), 1);
        assert_eq!(page.errors[0].listing_index, 4);
        assert!(page.errors[0].message.contains("title"));
    }

    #[test]
    fn test_optional_fields_are_read_when_present() {
        let html = r#"<div class="job-listing">
              <h2 class="job-title">Data Analyst</h2>
              <a class="job-link" href="https://jobs.example.net/42">Apply</a>
              <span class="location">NYC</span>
              <p class="description">SQL</p>
              <span class="salary">90000 - 110000</span>
              <time class="posted-date">2024-02-01</time>
            </div>"#;
        let page = extract_listings(html, &source()).unwrap();
        let listing = &page.listings[0];

        assert_eq!(listing.apply_url, "https://jobs.example.net/42");
        assert_eq!(listing.salary_text.as_deref(), Some("90000 - 110000"));
        assert_eq!(listing.posted_date_text.as_deref(), Some("2024-02-01"));
    }

    #[test]
    fn test_no_containers_is_empty_not_error() {
        let page = extract_listings("<html><body><p>No openings</p></body></html>", &source()).unwrap();
        assert_eq!(page.containers, 0);
        assert!(page.listings.is_empty());
        assert!(page.errors.is_empty());
    }

    #[test]
    fn test_invalid_selector_fails_the_source() {
        let mut src = source();
        src.selectors.title = "h2[".into();
        assert!(matches!(
            extract_listings("<div></div>", &src),
            Err(ScrapeError::InvalidSelector { .. })
        ));
    }
}
