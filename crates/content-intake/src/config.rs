//! Configuration parsing and validation.
//!
//! Content Intake is configured with a TOML file (default
//! `./config/intake.toml`). Every section except `[db]` and `[admin]` has
//! defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/intake.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//!
//! [admin]
//! email = "admin@example.com"
//! id = "admin"
//!
//! [auth.tokens]
//! "s3cr3t-token" = "admin@example.com"
//!
//! [crawl]
//! render_url = "http://127.0.0.1:3001/render"
//! max_items = 20
//!
//! [feed]
//! max_pinned = 3
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub admin: AdminConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// The single operator allowed to run pipeline operations.
#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    pub email: String,
    /// Actor id recorded on rows written from the CLI.
    #[serde(default = "default_admin_id")]
    pub id: String,
}

fn default_admin_id() -> String {
    "admin".to_string()
}

/// Bearer tokens accepted by the HTTP API, mapped to the caller's email.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_search_url")]
    pub search_url: String,
    /// Headless render service. When unset the search page is fetched directly.
    #[serde(default)]
    pub render_url: Option<String>,
    /// Selector that must appear before the page counts as rendered.
    #[serde(default = "default_headline_selector")]
    pub wait_marker: String,
    #[serde(default = "default_headline_selector")]
    pub headline_selector: String,
    /// Class fragment identifying a result card.
    #[serde(default = "default_card_class")]
    pub card_class: String,
    #[serde(default = "default_summary_selector")]
    pub summary_selector: String,
    #[serde(default = "default_scroll_count")]
    pub scroll_count: u32,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_crawl_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    #[serde(default = "default_source_site")]
    pub source_site: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            render_url: None,
            wait_marker: default_headline_selector(),
            headline_selector: default_headline_selector(),
            card_class: default_card_class(),
            summary_selector: default_summary_selector(),
            scroll_count: default_scroll_count(),
            max_items: default_max_items(),
            timeout_secs: default_crawl_timeout_secs(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            source_site: default_source_site(),
        }
    }
}

fn default_search_url() -> String {
    "https://search.naver.com/search.naver?ssc=tab.news.all&where=news&sm=tab_jum&query=AI"
        .to_string()
}
fn default_headline_selector() -> String {
    "span.sds-comps-text-type-headline1".to_string()
}
fn default_card_class() -> String {
    "sds-comps-base-layout".to_string()
}
fn default_summary_selector() -> String {
    "span.sds-comps-text-type-body1".to_string()
}
fn default_scroll_count() -> u32 {
    5
}
fn default_max_items() -> usize {
    20
}
fn default_crawl_timeout_secs() -> u64 {
    120
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_accept_language() -> String {
    "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7".to_string()
}
fn default_source_site() -> String {
    content_intake_core::models::DEFAULT_NEWS_SITE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_max_pinned")]
    pub max_pinned: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_pinned: default_max_pinned(),
        }
    }
}

fn default_max_pinned() -> usize {
    content_intake_core::publish::DEFAULT_MAX_PINNED
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Checks applied to every loaded config.
pub fn validate(config: &Config) -> Result<()> {
    if config.admin.email.trim().is_empty() {
        bail!("admin.email must not be empty");
    }
    if config.admin.id.trim().is_empty() {
        bail!("admin.id must not be empty");
    }

    if config.crawl.max_items == 0 {
        bail!("crawl.max_items must be > 0");
    }
    if config.crawl.timeout_secs == 0 {
        bail!("crawl.timeout_secs must be > 0");
    }
    for (name, selector) in [
        ("crawl.wait_marker", &config.crawl.wait_marker),
        ("crawl.headline_selector", &config.crawl.headline_selector),
        ("crawl.summary_selector", &config.crawl.summary_selector),
    ] {
        if scraper::Selector::parse(selector).is_err() {
            bail!("{} is not a valid CSS selector: '{}'", name, selector);
        }
    }
    if let Some(render_url) = &config.crawl.render_url {
        if !render_url.starts_with("http://") && !render_url.starts_with("https://") {
            bail!("crawl.render_url must be an http(s) URL");
        }
    }

    for (token, email) in &config.auth.tokens {
        if token.trim().is_empty() || email.trim().is_empty() {
            bail!("auth.tokens entries must have a non-empty token and email");
        }
    }

    Ok(())
}
