use research_core::{
    ConfigError, CoreError, DatabaseError, ErrorExt, LlmError, RedditApiError, WebSearchError,
};
use std::time::Duration;

#[test]
fn test_error_codes() {
    let reddit_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    assert_eq!(reddit_error.error_code(), "REDDIT_API");

    let db_error = CoreError::Database(DatabaseError::DatabaseLocked);
    assert_eq!(db_error.error_code(), "DATABASE");

    let llm_error = CoreError::Llm(LlmError::InvalidApiKey {
        provider: "openai".to_string(),
    });
    assert_eq!(llm_error.error_code(), "LLM");

    let search_error = CoreError::WebSearch(WebSearchError::Throttled);
    assert_eq!(search_error.error_code(), "WEB_SEARCH");

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "api_key".to_string(),
    });
    assert_eq!(config_error.error_code(), "CONFIG");

    assert_eq!(CoreError::invalid_input("bad").error_code(), "INVALID_INPUT");
    assert_eq!(CoreError::not_found("research x").error_code(), "NOT_FOUND");
}

#[test]
fn test_retryable_errors() {
    let retryable_error =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert!(retryable_error.is_retryable());

    let not_found = CoreError::RedditApi(RedditApiError::PostNotFound {
        post_id: "abc".to_string(),
    });
    assert!(!not_found.is_retryable());

    let non_retryable_error = CoreError::Config(ConfigError::MissingField {
        field: "api_key".to_string(),
    });
    assert!(!non_retryable_error.is_retryable());
}

#[test]
fn test_retry_after() {
    let rate_limit_error =
        CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 60 });
    assert_eq!(
        rate_limit_error.retry_after(),
        Some(Duration::from_secs(60))
    );

    let timeout_error = CoreError::Timeout { seconds: 30 };
    assert_eq!(timeout_error.retry_after(), Some(Duration::from_secs(30)));

    assert_eq!(CoreError::invalid_input("x").retry_after(), None);
}

#[test]
fn test_user_friendly_messages() {
    let reddit_error = CoreError::RedditApi(RedditApiError::InvalidToken);
    let message = reddit_error.user_friendly_message();
    assert!(message.contains("authentication token is invalid"));

    let config_error = CoreError::Config(ConfigError::MissingField {
        field: "api_key".to_string(),
    });
    assert!(config_error.user_friendly_message().contains("api_key"));

    let input_error = CoreError::invalid_input("Question is required");
    assert_eq!(input_error.user_friendly_message(), "Question is required");
}

#[test]
fn test_transient_reddit_failures_back_off_briefly() {
    let server_error = CoreError::RedditApi(RedditApiError::ServerError { status_code: 503 });
    assert_eq!(server_error.retry_after(), Some(Duration::from_secs(2)));

    let client_error = CoreError::RedditApi(RedditApiError::ServerError { status_code: 404 });
    assert!(!client_error.is_retryable());
    assert_eq!(client_error.retry_after(), None);
}

#[test]
fn test_web_search_failures_are_described_as_degraded() {
    let error = CoreError::WebSearch(WebSearchError::UnexpectedStatus { status_code: 418 });
    assert!(error.user_friendly_message().contains("Reddit only"));
    assert!(!error.is_retryable());
}
