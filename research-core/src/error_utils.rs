use crate::error::*;
use std::time::Duration;
use tracing::error;

/// Classification and reporting helpers shared by the HTTP layer and the
/// pipeline's error paths.
pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> &'static str;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        match self {
            CoreError::RedditApi(e) => error!(code = self.error_code(), "Reddit request failed: {:?}", e),
            CoreError::Database(e) => error!(code = self.error_code(), "Storage failure: {:?}", e),
            CoreError::Llm(e) => error!(code = self.error_code(), "Completion failure: {:?}", e),
            other => error!(code = self.error_code(), "{}", other),
        }
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::RedditApi(e) => reddit_retryable(e),
            CoreError::Llm(e) => matches!(
                e,
                LlmError::RateLimitExceeded { .. }
                    | LlmError::ServiceUnavailable { .. }
                    | LlmError::RequestTimeout { .. }
            ),
            CoreError::Database(DatabaseError::DatabaseLocked) => true,
            CoreError::WebSearch(WebSearchError::Throttled) => true,
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            CoreError::Timeout { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after })
            | CoreError::Llm(LlmError::RateLimitExceeded { retry_after, .. }) => {
                Some(Duration::from_secs(*retry_after))
            }
            CoreError::Timeout { seconds } => Some(Duration::from_secs(*seconds)),
            CoreError::RedditApi(_) if self.is_retryable() => Some(Duration::from_secs(2)),
            CoreError::Llm(_) if self.is_retryable() => Some(Duration::from_secs(10)),
            _ if self.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::RedditApi(e) => reddit_message(e),
            CoreError::Llm(e) => llm_message(e),
            CoreError::WebSearch(_) => {
                "Web search is unavailable right now. Results come from Reddit only.".to_string()
            }
            CoreError::Config(ConfigError::MissingField { field }) => {
                format!("Required configuration field '{}' is missing.", field)
            }
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::InvalidInput { message } | CoreError::Conflict { message } => {
                message.clone()
            }
            CoreError::NotFound { resource } => format!("Could not find: {}", resource),
            CoreError::Timeout { .. } => {
                "The operation took too long to complete. Please try again.".to_string()
            }
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            CoreError::RedditApi(_) => "REDDIT_API",
            CoreError::Database(_) => "DATABASE",
            CoreError::Llm(_) => "LLM",
            CoreError::WebSearch(_) => "WEB_SEARCH",
            CoreError::Config(_) => "CONFIG",
            CoreError::Io(_) => "IO",
            CoreError::Serialization(_) => "SERIALIZATION",
            CoreError::Csv(_) => "CSV",
            CoreError::Network(_) => "NETWORK",
            CoreError::InvalidInput { .. } => "INVALID_INPUT",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Conflict { .. } => "CONFLICT",
            CoreError::Timeout { .. } => "TIMEOUT",
            CoreError::Internal { .. } => "INTERNAL",
        }
    }
}

fn reddit_retryable(error: &RedditApiError) -> bool {
    match error {
        RedditApiError::RateLimitExceeded { .. } | RedditApiError::RequestTimeout => true,
        RedditApiError::ServerError { status_code } => *status_code >= 500,
        _ => false,
    }
}

fn reddit_message(error: &RedditApiError) -> String {
    match error {
        RedditApiError::AuthenticationFailed { .. } => {
            "Reddit authentication failed. Check the client id and secret.".to_string()
        }
        RedditApiError::RateLimitExceeded { retry_after } => format!(
            "Reddit is rate limiting requests. Try again in {} seconds.",
            retry_after
        ),
        RedditApiError::Forbidden { resource } => {
            format!("Reddit denied access to {}.", resource)
        }
        RedditApiError::SubredditNotFound { subreddit } => {
            format!("Subreddit '{}' not found or is private.", subreddit)
        }
        RedditApiError::PostNotFound { .. } => "The requested thread could not be found.".to_string(),
        RedditApiError::InvalidToken => {
            "Reddit authentication token is invalid. Check the app credentials.".to_string()
        }
        RedditApiError::RequestTimeout => "Request to Reddit timed out. Please try again.".to_string(),
        RedditApiError::InvalidResponse { .. } | RedditApiError::ServerError { .. } => {
            "Reddit returned an unexpected response. Please try again later.".to_string()
        }
    }
}

fn llm_message(error: &LlmError) -> String {
    match error {
        LlmError::InvalidApiKey { provider } => {
            format!("The API key for {} was rejected.", provider)
        }
        LlmError::RateLimitExceeded {
            provider,
            retry_after,
        } => format!(
            "{} is rate limiting requests. Try again in {} seconds.",
            provider, retry_after
        ),
        LlmError::ModelNotAvailable { model } => {
            format!("Model '{}' is not available for this API key.", model)
        }
        LlmError::ServiceUnavailable { provider } => {
            format!("{} is temporarily unavailable.", provider)
        }
        _ => "The language model returned an unusable answer. Please try again.".to_string(),
    }
}
