pub mod api;
pub mod auth;
pub mod rate_limiter;
pub mod retry;
pub mod urls;
pub mod web_search;

#[cfg(test)]
mod tests;

pub use api::*;
pub use auth::*;
pub use rate_limiter::*;
pub use retry::*;
pub use urls::*;
pub use web_search::*;

use async_trait::async_trait;
use research_core::{
    Comment, CoreError, RedditApiError, RedditConfig, SortOrder, Thread, TimeFilter,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Reddit caps listing pages at 100 items.
const MAX_LISTING_LIMIT: u32 = 100;
const COMMENT_FETCH_LIMIT: u32 = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: u32,
    pub time_filter: TimeFilter,
    pub sort: SortOrder,
    /// Restricts the search to these subreddits; empty searches all of Reddit.
    pub subreddits: Vec<String>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, max_results: u32) -> Self {
        Self {
            query: query.into(),
            max_results,
            time_filter: TimeFilter::All,
            sort: SortOrder::Relevance,
            subreddits: Vec::new(),
        }
    }

    pub fn time_filter(mut self, time_filter: TimeFilter) -> Self {
        self.time_filter = time_filter;
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn subreddits(mut self, subreddits: Vec<String>) -> Self {
        self.subreddits = subreddits;
        self
    }
}

/// Thread and comment retrieval from the discussion platform.
#[async_trait]
pub trait ThreadSource: Send + Sync {
    async fn search_threads(&self, query: &SearchQuery) -> Result<Vec<Thread>, CoreError>;

    /// Fails with `RedditApiError::PostNotFound` when the id does not resolve.
    async fn fetch_thread(&self, thread_id: &str) -> Result<Thread, CoreError>;

    /// Every comment in the thread, unsorted and untruncated.
    async fn collect_comments(&self, thread_id: &str) -> Result<Vec<Comment>, CoreError>;

    /// The subset of `names` that are existing, reachable subreddits.
    async fn validate_forums(&self, names: &[String]) -> Vec<String>;
}

pub struct RedditClient {
    api: RedditApiClient,
    auth: RedditAuthenticator,
    retry: RetryExecutor,
}

impl RedditClient {
    pub fn new(config: &RedditConfig) -> Result<Self, CoreError> {
        Self::with_endpoints(
            config,
            REDDIT_API_BASE,
            REDDIT_TOKEN_URL,
            RetryConfig::reddit(),
        )
    }

    pub fn with_endpoints(
        config: &RedditConfig,
        api_base: &str,
        token_url: &str,
        retry: RetryConfig,
    ) -> Result<Self, CoreError> {
        let api = RedditApiClient::new(config.user_agent.clone(), api_base.to_string())?;
        let auth = RedditAuthenticator::new(
            &config.client_id,
            &config.client_secret,
            token_url,
            api.http_client().clone(),
        )?;
        info!("Reddit client ready (user agent '{}')", api.user_agent());

        Ok(Self {
            api,
            auth,
            retry: RetryExecutor::new(retry),
        })
    }

    async fn get_authed<T>(
        &self,
        operation: &str,
        endpoint: &str,
        params: &[(&str, String)],
        missing: RedditApiError,
    ) -> Result<T, CoreError>
    where
        T: DeserializeOwned + Send,
    {
        let missing = &missing;
        self.retry
            .execute(operation, move || async move {
                let token = self.auth.access_token().await?;
                let result = self
                    .api
                    .get_json(endpoint, &token, params, missing.clone())
                    .await;
                if let Err(CoreError::RedditApi(RedditApiError::InvalidToken)) = &result {
                    self.auth.invalidate().await;
                }
                result
            })
            .await
    }
}

#[async_trait]
impl ThreadSource for RedditClient {
    async fn search_threads(&self, query: &SearchQuery) -> Result<Vec<Thread>, CoreError> {
        let scope = if query.subreddits.is_empty() {
            "all".to_string()
        } else {
            query.subreddits.join("+")
        };
        let endpoint = format!("/r/{}/search", scope);
        let params = [
            ("q", query.query.clone()),
            ("sort", query.sort.as_str().to_string()),
            ("t", query.time_filter.as_str().to_string()),
            ("limit", query.max_results.min(MAX_LISTING_LIMIT).to_string()),
            ("restrict_sr", (!query.subreddits.is_empty()).to_string()),
            ("type", "link".to_string()),
            ("raw_json", "1".to_string()),
        ];

        let listing: RedditListing<RedditPostData> = self
            .get_authed(
                "search_threads",
                &endpoint,
                &params,
                RedditApiError::SubredditNotFound { subreddit: scope },
            )
            .await?;

        let threads: Vec<Thread> = listing
            .data
            .children
            .into_iter()
            .filter(|child| child.kind == "t3")
            .map(|child| child.data.into())
            .take(query.max_results as usize)
            .collect();

        debug!("Search '{}' ({}) returned {} threads", query.query, query.sort, threads.len());
        Ok(threads)
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<Thread, CoreError> {
        let not_found = || RedditApiError::PostNotFound {
            post_id: thread_id.to_string(),
        };
        let params = [("id", format!("t3_{}", thread_id)), ("raw_json", "1".to_string())];

        let listing: RedditListing<RedditPostData> = self
            .get_authed("fetch_thread", "/api/info", &params, not_found())
            .await?;

        listing
            .data
            .children
            .into_iter()
            .find(|child| child.kind == "t3")
            .map(|child| child.data.into())
            .ok_or_else(|| CoreError::RedditApi(not_found()))
    }

    async fn collect_comments(&self, thread_id: &str) -> Result<Vec<Comment>, CoreError> {
        let endpoint = format!("/comments/{}", thread_id);
        let params = [
            ("limit", COMMENT_FETCH_LIMIT.to_string()),
            ("raw_json", "1".to_string()),
        ];

        // The response is [post listing, comment listing].
        let listings: Vec<Value> = self
            .get_authed(
                "collect_comments",
                &endpoint,
                &params,
                RedditApiError::PostNotFound {
                    post_id: thread_id.to_string(),
                },
            )
            .await?;

        let comments = listings
            .get(1)
            .map(|listing| flatten_comment_tree(thread_id, listing))
            .unwrap_or_default();
        debug!("Fetched {} comments from thread {}", comments.len(), thread_id);
        Ok(comments)
    }

    async fn validate_forums(&self, names: &[String]) -> Vec<String> {
        let mut valid = Vec::new();
        for name in names {
            let endpoint = format!("/r/{}/about", name);
            let result: Result<RedditListingChild<RedditSubredditData>, CoreError> = self
                .get_authed(
                    "validate_forum",
                    &endpoint,
                    &[("raw_json", "1".to_string())],
                    RedditApiError::SubredditNotFound {
                        subreddit: name.clone(),
                    },
                )
                .await;

            match result {
                Ok(about) if about.kind == "t5" && !about.data.display_name.is_empty() => {
                    valid.push(about.data.display_name);
                }
                Ok(about) => debug!("r/{} is not a subreddit (kind {})", name, about.kind),
                Err(e) => warn!("Skipping subreddit r/{}: {}", name, e),
            }
        }
        info!("Validated {} of {} suggested subreddits", valid.len(), names.len());
        valid
    }
}
