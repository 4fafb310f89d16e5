//! Crawl acquisition for the news search page.
//!
//! Fetches the search results page, walks the DOM for headline elements,
//! and hands the hits to [`normalize_headlines`]. The page is fetched
//! through a [`PageFetcher`]: [`HttpFetcher`] either asks a headless render
//! service for the scrolled page (when `crawl.render_url` is set) or GETs
//! the page directly.
//!
//! # DOM walk
//!
//! For every element matching `headline_selector`, in document order:
//!
//! 1. the nearest `<a href>` ancestor (the element itself included) gives
//!    the link, resolved against the page URL;
//! 2. the nearest `div` ancestor of that anchor whose class contains
//!    `card_class` is the result card;
//! 3. the first `summary_selector` match inside the card is the summary.
//!
//! A page without any `wait_marker` match yields an empty result, not an
//! error. Any fetch failure aborts the crawl with one [`AcquireError`];
//! there is never a partial list.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use content_intake_core::models::CandidateItem;
use content_intake_core::normalize::{normalize_headlines, HeadlineHit};

use crate::config::CrawlConfig;

/// Why the search page could not be acquired.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("timed out after {0}s waiting for the search page")]
    Timeout(u64),
    #[error("could not reach {url}: {message}")]
    Network { url: String, message: String },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("page session lost before the page was read: {0}")]
    SessionLost(String),
}

impl AcquireError {
    /// Stable error code for the HTTP error body.
    pub fn code(&self) -> &'static str {
        match self {
            AcquireError::Timeout(_) => "timeout",
            AcquireError::Network { .. } => "upstream_unreachable",
            AcquireError::Navigation { .. } => "navigation_failed",
            AcquireError::SessionLost(_) => "session_lost",
        }
    }
}

/// Source of rendered page HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, AcquireError>;
}

/// Request body sent to the render service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderRequest<'a> {
    url: &'a str,
    wait_for: &'a str,
    scrolls: u32,
    timeout_ms: u64,
    user_agent: &'a str,
    accept_language: &'a str,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    html: String,
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
    config: CrawlConfig,
}

impl HttpFetcher {
    pub fn new(config: CrawlConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client, config })
    }

    fn classify(&self, url: &str, e: reqwest::Error) -> AcquireError {
        if e.is_timeout() {
            AcquireError::Timeout(self.config.timeout_secs)
        } else if e.is_body() || e.is_decode() {
            AcquireError::SessionLost(e.to_string())
        } else {
            AcquireError::Network {
                url: url.to_string(),
                message: format!("{:#}", anyhow::Error::from(e)),
            }
        }
    }

    async fn fetch_direct(&self, url: &str) -> Result<String, AcquireError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, &self.config.accept_language)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| self.classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Navigation {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            });
        }
        response.text().await.map_err(|e| self.classify(url, e))
    }

    async fn fetch_rendered(&self, render_url: &str, url: &str) -> Result<String, AcquireError> {
        let request = RenderRequest {
            url,
            wait_for: &self.config.wait_marker,
            scrolls: self.config.scroll_count,
            timeout_ms: self.config.timeout_secs * 1000,
            user_agent: &self.config.user_agent,
            accept_language: &self.config.accept_language,
        };
        let response = self
            .client
            .post(render_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(render_url, e))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AcquireError::Navigation {
                url: url.to_string(),
                message: format!("render service returned HTTP {}: {}", status, detail.trim()),
            });
        }
        let body: RenderResponse = response
            .json()
            .await
            .map_err(|e| self.classify(render_url, e))?;
        Ok(body.html)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AcquireError> {
        match &self.config.render_url {
            Some(render_url) => self.fetch_rendered(render_url, url).await,
            None => self.fetch_direct(url).await,
        }
    }
}

/// Parsed selectors for the DOM walk.
pub struct PageSelectors {
    wait_marker: Selector,
    headline: Selector,
    summary: Selector,
    card_class: String,
}

impl PageSelectors {
    pub fn from_config(config: &CrawlConfig) -> anyhow::Result<Self> {
        let parse = |name: &str, s: &str| {
            Selector::parse(s)
                .map_err(|e| anyhow::anyhow!("invalid {} selector '{}': {:?}", name, s, e))
        };
        Ok(Self {
            wait_marker: parse("wait_marker", &config.wait_marker)?,
            headline: parse("headline", &config.headline_selector)?,
            summary: parse("summary", &config.summary_selector)?,
            card_class: config.card_class.clone(),
        })
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn nearest_anchor(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .find(|e| e.value().name() == "a" && e.value().attr("href").is_some())
}

fn nearest_card<'a>(anchor: ElementRef<'a>, card_class: &str) -> Option<ElementRef<'a>> {
    std::iter::once(anchor)
        .chain(anchor.ancestors().filter_map(ElementRef::wrap))
        .find(|e| {
            e.value().name() == "div"
                && e.value()
                    .attr("class")
                    .is_some_and(|class| class.contains(card_class))
        })
}

/// Walk a page for headline hits.
///
/// Returns `None` when the page never rendered its results (no
/// `wait_marker` match).
pub fn scan_page(
    html: &str,
    page_url: &str,
    selectors: &PageSelectors,
) -> Option<Vec<HeadlineHit>> {
    let document = Html::parse_document(html);
    if document.select(&selectors.wait_marker).next().is_none() {
        return None;
    }
    let base = reqwest::Url::parse(page_url).ok();

    let mut hits = Vec::new();
    for headline in document.select(&selectors.headline) {
        let title = text_of(headline);
        let anchor = nearest_anchor(headline);
        let link = anchor
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| match &base {
                Some(base) => base.join(href.trim()).ok(),
                None => reqwest::Url::parse(href.trim()).ok(),
            })
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .map(String::from);
        let summary = anchor
            .and_then(|a| nearest_card(a, &selectors.card_class))
            .and_then(|card| card.select(&selectors.summary).next())
            .map(text_of);
        hits.push(HeadlineHit {
            title,
            link,
            summary,
        });
    }
    Some(hits)
}

/// Fetch, scan and normalize the configured search page.
pub struct Crawler<F: PageFetcher> {
    fetcher: F,
    selectors: PageSelectors,
    config: CrawlConfig,
}

impl Crawler<HttpFetcher> {
    pub fn from_config(config: &CrawlConfig) -> anyhow::Result<Self> {
        Self::with_fetcher(HttpFetcher::new(config.clone())?, config)
    }
}

impl<F: PageFetcher> Crawler<F> {
    pub fn with_fetcher(fetcher: F, config: &CrawlConfig) -> anyhow::Result<Self> {
        Ok(Self {
            fetcher,
            selectors: PageSelectors::from_config(config)?,
            config: config.clone(),
        })
    }

    pub async fn crawl(&self) -> Result<Vec<CandidateItem>, AcquireError> {
        let url = &self.config.search_url;
        tracing::info!(
            url = %url,
            rendered = self.config.render_url.is_some(),
            "fetching search page"
        );
        let html = self.fetcher.fetch(url).await?;

        let hits = match scan_page(&html, url, &self.selectors) {
            Some(hits) => hits,
            None => {
                tracing::warn!(
                    marker = %self.config.wait_marker,
                    "search page has no results marker; returning no items"
                );
                return Ok(Vec::new());
            }
        };
        let found = hits.len();
        let candidates = normalize_headlines(
            hits,
            self.config.max_items,
            &self.config.source_site,
            Utc::now(),
        );
        tracing::info!(found, kept = candidates.len(), "crawl finished");
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_intake_core::models::ContentKind;

    const PAGE: &str = r#"
        <html><body>
          <div class="sds-comps-base-layout card">
            <a href="/article/1"><span class="sds-comps-text-type-headline1">First   headline</span></a>
            <span class="sds-comps-text-type-body1">Summary one</span>
          </div>
          <div class="sds-comps-base-layout">
            <a href="https://news.example.com/article/2">
              <span class="sds-comps-text-type-headline1">Second</span>
            </a>
          </div>
          <div class="sds-comps-base-layout">
            <a href="/article/1"><span class="sds-comps-text-type-headline1">Repeat of first</span></a>
          </div>
          <span class="sds-comps-text-type-headline1">No anchor</span>
        </body></html>
    "#;

    struct StaticFetcher(Result<String, ()>);

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<String, AcquireError> {
            self.0.clone().map_err(|_| AcquireError::Navigation {
                url: url.to_string(),
                message: "HTTP 503 Service Unavailable".into(),
            })
        }
    }

    fn config() -> CrawlConfig {
        CrawlConfig {
            search_url: "https://search.example.com/search?q=AI".into(),
            ..CrawlConfig::default()
        }
    }

    #[test]
    fn scan_resolves_links_and_card_summaries() {
        let selectors = PageSelectors::from_config(&config()).unwrap();
        let hits = scan_page(PAGE, "https://search.example.com/search?q=AI", &selectors).unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].link.as_deref(), Some("https://search.example.com/article/1"));
        assert_eq!(hits[0].summary.as_deref(), Some("Summary one"));
        assert_eq!(hits[1].link.as_deref(), Some("https://news.example.com/article/2"));
        assert_eq!(hits[1].summary, None);
        assert_eq!(hits[3].link, None);
    }

    #[test]
    fn page_without_marker_scans_to_none() {
        let selectors = PageSelectors::from_config(&config()).unwrap();
        let blocked = "<html><body><p>captcha</p></body></html>";
        assert!(scan_page(blocked, "https://x.test/", &selectors).is_none());
    }

    #[tokio::test]
    async fn crawl_dedupes_links_and_skips_anchorless_hits() {
        let crawler =
            Crawler::with_fetcher(StaticFetcher(Ok(PAGE.to_string())), &config()).unwrap();
        let items = crawler.crawl().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "First headline");
        assert_eq!(items[0].kind, ContentKind::News);
        assert_eq!(items[0].source_site.as_deref(), Some("네이버 뉴스"));
        assert!(items[0].published_at.is_some());
        assert_eq!(items[1].title, "Second");
    }

    #[tokio::test]
    async fn crawl_caps_item_count() {
        let mut config = config();
        config.max_items = 1;
        let crawler = Crawler::with_fetcher(StaticFetcher(Ok(PAGE.to_string())), &config).unwrap();
        assert_eq!(crawler.crawl().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_aborts_whole_crawl() {
        let crawler = Crawler::with_fetcher(StaticFetcher(Err(())), &config()).unwrap();
        let err = crawler.crawl().await.unwrap_err();
        assert_eq!(err.code(), "navigation_failed");
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = config();
        config.timeout_secs = 5;
        let fetcher = HttpFetcher::new(config).unwrap();
        let err = fetcher
            .fetch(&format!("http://127.0.0.1:{}/search", port))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::Network { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn stalled_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let mut config = config();
        config.timeout_secs = 1;
        let fetcher = HttpFetcher::new(config).unwrap();
        let err = fetcher.fetch(&format!("http://{}/search", addr)).await.unwrap_err();
        assert!(matches!(err, AcquireError::Timeout(1)), "got {err:?}");
    }
}
