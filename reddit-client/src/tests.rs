use super::*;
use research_core::{CoreError, RedditApiError, RedditConfig, SortOrder, TimeFilter};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config() -> RedditConfig {
    RedditConfig {
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        user_agent: "ResearchAssistant/test".to_string(),
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
    }
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok",
            "token_type": "bearer",
            "expires_in": 3600,
            "scope": "*"
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> RedditClient {
    let token_url = format!("{}/api/v1/access_token", server.uri());
    RedditClient::with_endpoints(&test_config(), &server.uri(), &token_url, fast_retry())
        .unwrap()
}

fn post(id: &str, title: &str, subreddit: &str) -> serde_json::Value {
    json!({
        "kind": "t3",
        "data": {
            "id": id,
            "title": title,
            "selftext": "",
            "author": "poster",
            "subreddit": subreddit,
            "url": format!("https://www.reddit.com/r/{subreddit}/comments/{id}/x/"),
            "permalink": format!("/r/{subreddit}/comments/{id}/x/"),
            "created_utc": 1_700_000_000.0,
            "score": 42,
            "num_comments": 7
        }
    })
}

fn listing(children: Vec<serde_json::Value>) -> serde_json::Value {
    json!({"kind": "Listing", "data": {"children": children, "after": null}})
}

#[tokio::test]
async fn test_search_threads_scoped_to_subreddits() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/r/laptops+MachineLearning/search"))
        .and(query_param("q", "best laptop for ML"))
        .and(query_param("sort", "top"))
        .and(query_param("t", "year"))
        .and(query_param("restrict_sr", "true"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![
            post("a1", "Laptop A", "laptops"),
            post("b2", "Laptop B", "MachineLearning"),
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let query = SearchQuery::new("best laptop for ML", 15)
        .sort(SortOrder::Top)
        .time_filter(TimeFilter::Year)
        .subreddits(vec!["laptops".to_string(), "MachineLearning".to_string()]);

    let threads = assert_ok!(client.search_threads(&query).await);
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].id, "a1");
    assert_eq!(threads[1].subreddit, "MachineLearning");
    assert_eq!(
        threads[0].permalink,
        "https://reddit.com/r/laptops/comments/a1/x/"
    );
}

#[tokio::test]
async fn test_token_is_cached_between_requests() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/r/all/search"))
        .and(query_param("restrict_sr", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![])))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let query = SearchQuery::new("anything", 5);
    assert_ok!(client.search_threads(&query).await);
    assert_ok!(client.search_threads(&query).await);
}

#[tokio::test]
async fn test_fetch_thread_not_found_on_empty_listing() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .and(query_param("id", "t3_gone"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = assert_err!(client.fetch_thread("gone").await);
    assert!(matches!(
        err,
        CoreError::RedditApi(RedditApiError::PostNotFound { ref post_id }) if post_id == "gone"
    ));
}

#[tokio::test]
async fn test_fetch_thread_resolves_post() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .and(query_param("id", "t3_a1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(listing(vec![post("a1", "Laptop A", "laptops")])),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let thread = assert_ok!(client.fetch_thread("a1").await);
    assert_eq!(thread.title, "Laptop A");
    assert_eq!(thread.num_comments, 7);
}

#[tokio::test]
async fn test_collect_comments_flattens_second_listing() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/comments/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            listing(vec![post("a1", "Laptop A", "laptops")]),
            listing(vec![json!({"kind": "t1", "data": {
                "id": "c1", "author": "alice", "body": "Get the one with more VRAM",
                "score": 12, "created_utc": 1.0, "depth": 0,
                "permalink": "/r/laptops/comments/a1/x/c1/",
                "replies": listing(vec![json!({"kind": "t1", "data": {
                    "id": "c2", "author": "bob", "body": "Agreed", "score": 3,
                    "created_utc": 2.0, "depth": 1,
                    "permalink": "/r/laptops/comments/a1/x/c2/", "replies": ""
                }})])
            }})])
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let comments = assert_ok!(client.collect_comments("a1").await);
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[1].depth, 1);
    assert!(comments.iter().all(|c| c.thread_id == "a1"));
}

#[tokio::test]
async fn test_missing_thread_comments_map_to_post_not_found() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/comments/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = assert_err!(client.collect_comments("nope").await);
    assert!(matches!(
        err,
        CoreError::RedditApi(RedditApiError::PostNotFound { .. })
    ));
}

#[tokio::test]
async fn test_expired_token_is_refreshed_once() {
    let server = MockServer::start().await;
    mount_token(&server, 2).await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(listing(vec![post("a1", "Laptop A", "laptops")])),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let thread = assert_ok!(client.fetch_thread("a1").await);
    assert_eq!(thread.id, "a1");
}

#[tokio::test]
async fn test_validate_forums_keeps_existing_subreddits() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/r/laptops/about"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "t5",
            "data": {"display_name": "laptops", "subreddit_type": "public"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/notarealsub/about"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/quarantined/about"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let names = vec![
        "laptops".to_string(),
        "notarealsub".to_string(),
        "quarantined".to_string(),
    ];
    let valid = client.validate_forums(&names).await;
    assert_eq!(valid, vec!["laptops".to_string()]);
}

#[tokio::test]
async fn test_rejected_credentials_fail_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid_client"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = assert_err!(client.fetch_thread("a1").await);
    assert!(matches!(
        err,
        CoreError::RedditApi(RedditApiError::AuthenticationFailed { .. })
    ));
}
