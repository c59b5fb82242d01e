use async_trait::async_trait;
use once_cell::sync::Lazy;
use research_core::WebSearchError;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::rate_limiter::{RateLimitConfig, RateLimiter};

pub const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";

static RESULT_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.result__a").expect("valid result link selector"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebResult {
    pub url: String,
}

/// General web search, used to find threads the native search misses.
#[async_trait]
pub trait WebSearchSource: Send + Sync {
    async fn text_search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebResult>, WebSearchError>;
}

/// Scrapes the DuckDuckGo HTML endpoint.
#[derive(Debug)]
pub struct DuckDuckGoSearch {
    http_client: Client,
    endpoint: String,
    rate_limiter: RateLimiter,
}

impl DuckDuckGoSearch {
    pub fn new(user_agent: &str) -> Result<Self, WebSearchError> {
        Self::with_endpoint(user_agent, DUCKDUCKGO_HTML_URL)
    }

    pub fn with_endpoint(user_agent: &str, endpoint: &str) -> Result<Self, WebSearchError> {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| WebSearchError::RequestFailed {
                query: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            http_client,
            endpoint: endpoint.to_string(),
            rate_limiter: RateLimiter::new(RateLimitConfig::web_search()),
        })
    }
}

#[async_trait]
impl WebSearchSource for DuckDuckGoSearch {
    async fn text_search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebResult>, WebSearchError> {
        let _permit = self.rate_limiter.acquire_permit().await;
        debug!("Web search: {}", query);

        let failed = |e: reqwest::Error| WebSearchError::RequestFailed {
            query: query.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .form(&[("q", query)])
            .send()
            .await
            .map_err(failed)?;

        let status = response.status();
        match status.as_u16() {
            202 | 403 | 429 => {
                warn!("Web search throttled ({}) for '{}'", status, query);
                return Err(WebSearchError::Throttled);
            }
            code if !status.is_success() => {
                return Err(WebSearchError::UnexpectedStatus { status_code: code });
            }
            _ => {}
        }

        let html = response.text().await.map_err(failed)?;
        let results = parse_result_links(&html, max_results);
        debug!("Web search for '{}' returned {} links", query, results.len());
        Ok(results)
    }
}

/// Pulls result links out of a DuckDuckGo HTML page, unwrapping its
/// `/l/?uddg=` redirect links.
pub fn parse_result_links(html: &str, max_results: usize) -> Vec<WebResult> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_LINK)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(decode_result_href)
        .take(max_results)
        .map(|url| WebResult { url })
        .collect()
}

fn decode_result_href(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };

    let parsed = Url::parse(&absolute).ok()?;
    let target = parsed
        .query_pairs()
        .find(|(key, _)| key == "uddg")
        .map(|(_, value)| value.into_owned());

    Some(target.unwrap_or(absolute))
}
