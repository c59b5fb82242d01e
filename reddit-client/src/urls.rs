use once_cell::sync::Lazy;
use regex::Regex;

static COMMENTS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"reddit\.com/r/\w+/comments/(\w+)").expect("valid thread url pattern")
});

static SHORT_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"redd\.it/(\w+)").expect("valid short url pattern"));

/// Thread id from a `reddit.com/r/<sub>/comments/<id>` link. This is the
/// only shape recognised in web search results.
pub fn thread_id_from_link(url: &str) -> Option<String> {
    COMMENTS_URL
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Thread id from a user-supplied URL: full comments links or `redd.it` short links.
pub fn thread_id_from_url(url: &str) -> Option<String> {
    thread_id_from_link(url).or_else(|| {
        SHORT_URL
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}
