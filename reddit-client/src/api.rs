use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use reqwest::{Client, Method, Response};
use research_core::{Comment, CoreError, RedditApiError, Thread, DELETED_AUTHOR};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
pub const REDDIT_WEB_BASE: &str = "https://reddit.com";

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    pub selftext: String,
    pub author: Option<String>,
    pub subreddit: String,
    pub url: String,
    pub permalink: String,
    pub created_utc: f64,
    pub score: i64,
    pub num_comments: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedditSubredditData {
    pub display_name: String,
    pub subreddit_type: String,
}

impl From<RedditPostData> for Thread {
    fn from(post: RedditPostData) -> Self {
        Self {
            title: post.title,
            subreddit: post.subreddit,
            score: post.score,
            num_comments: post.num_comments,
            url: post.url,
            permalink: format!("{}{}", REDDIT_WEB_BASE, post.permalink),
            selftext: Thread::truncate_selftext(&post.selftext),
            created_utc: post.created_utc,
            author: post
                .author
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| DELETED_AUTHOR.to_string()),
            id: post.id,
        }
    }
}

/// Flattens the comment listing of a `/comments/<id>` response, depth first,
/// skipping "load more" stubs.
pub fn flatten_comment_tree(thread_id: &str, listing: &Value) -> Vec<Comment> {
    let mut comments = Vec::new();
    walk_listing(thread_id, listing, 0, &mut comments);
    comments
}

fn walk_listing(thread_id: &str, listing: &Value, depth: u32, out: &mut Vec<Comment>) {
    let Some(children) = listing
        .get("data")
        .and_then(|data| data.get("children"))
        .and_then(Value::as_array)
    else {
        return;
    };

    for child in children {
        if child.get("kind").and_then(Value::as_str) != Some("t1") {
            continue;
        }
        let Some(data) = child.get("data") else {
            continue;
        };

        let text = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let id = text("id");
        if id.is_empty() {
            continue;
        }
        let comment_depth = data
            .get("depth")
            .and_then(Value::as_u64)
            .map(|d| d as u32)
            .unwrap_or(depth);
        let author = Some(text("author"))
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| DELETED_AUTHOR.to_string());

        out.push(Comment {
            id,
            thread_id: thread_id.to_string(),
            author,
            body: text("body"),
            score: data.get("score").and_then(Value::as_i64).unwrap_or(0),
            created_utc: data
                .get("created_utc")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            depth: comment_depth,
            permalink: format!("{}{}", REDDIT_WEB_BASE, text("permalink")),
        });

        // `replies` is an empty string when there are none
        if let Some(replies) = data.get("replies").filter(|r| r.is_object()) {
            walk_listing(thread_id, replies, comment_depth + 1, out);
        }
    }
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    base_url: String,
    user_agent: String,
}

impl RedditApiClient {
    pub fn new(user_agent: String, base_url: String) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(RateLimitConfig::reddit_oauth())),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent,
        })
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Sends an authenticated request. `missing` is the error reported when
    /// the endpoint answers 404.
    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        access_token: &str,
        query_params: &[(&str, String)],
        missing: RedditApiError,
    ) -> Result<Response, CoreError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let permit = self.rate_limiter.acquire_permit().await;
        debug!(
            "Acquired rate limit permit for {} {} after {:?}",
            method, endpoint, permit.queue_wait_time
        );

        info!("Making Reddit API request: {} {}", method, endpoint);
        let response = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(access_token)
            .query(query_params)
            .send()
            .await
            .map_err(|e| {
                error!("Network error for {} {}: {}", method, endpoint, e);
                if e.is_timeout() {
                    CoreError::RedditApi(RedditApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Request successful: {} {}", status, endpoint);
            return Ok(response);
        }

        error!("Request failed with status: {} for {}", status, endpoint);
        let error = match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(60);
                warn!("Rate limited, retry after {} seconds", retry_after);
                RedditApiError::RateLimitExceeded { retry_after }
            }
            401 => RedditApiError::InvalidToken,
            403 => RedditApiError::Forbidden {
                resource: endpoint.to_string(),
            },
            404 => missing,
            code if status.is_server_error() => RedditApiError::ServerError { status_code: code },
            code => RedditApiError::InvalidResponse {
                details: format!("Unexpected status {} for {}", code, endpoint),
            },
        };
        Err(CoreError::RedditApi(error))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        access_token: &str,
        query_params: &[(&str, String)],
        missing: RedditApiError,
    ) -> Result<T, CoreError> {
        let response = self
            .make_request(Method::GET, endpoint, access_token, query_params, missing)
            .await?;

        response.json().await.map_err(|e| {
            error!("Failed to parse response from {}: {}", endpoint, e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse response from {}", endpoint),
            })
        })
    }
}
