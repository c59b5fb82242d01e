use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::settings::ResearchSettings;

pub const DELETED_AUTHOR: &str = "[deleted]";
pub const REMOVED_AUTHOR: &str = "[removed]";

/// Thread bodies are stored truncated to this many characters.
pub const MAX_SELFTEXT_CHARS: usize = 500;

/// Reasoning attached to comments the oracle did not score.
pub const NOT_SCORED_REASONING: &str = "Score not returned by LLM";

/// Added to a researcher override so it outranks an equal LLM score.
pub const USER_OVERRIDE_OFFSET: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub subreddit: String,
    pub score: i64,
    pub num_comments: i64,
    pub url: String,
    pub permalink: String,
    pub selftext: String,
    pub created_utc: f64,
    pub author: String,
}

impl Thread {
    pub fn truncate_selftext(text: &str) -> String {
        text.chars().take(MAX_SELFTEXT_CHARS).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub thread_id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: f64,
    pub depth: u32,
    pub permalink: String,
}

impl Comment {
    /// Deleted or removed comments are never collected or stored.
    pub fn is_removed(&self) -> bool {
        let body = self.body.trim();
        body.is_empty()
            || body == DELETED_AUTHOR
            || body == REMOVED_AUTHOR
            || self.author == DELETED_AUTHOR
            || self.author == REMOVED_AUTHOR
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredComment {
    #[serde(flatten)]
    pub comment: Comment,
    pub relevancy_score: Option<u8>,
    pub reasoning: String,
    pub user_relevancy_score: Option<u8>,
    pub starred: bool,
}

impl ScoredComment {
    pub fn scored(comment: Comment, relevancy_score: u8, reasoning: String) -> Self {
        Self {
            comment,
            relevancy_score: Some(relevancy_score),
            reasoning,
            user_relevancy_score: None,
            starred: false,
        }
    }

    pub fn unscored(comment: Comment) -> Self {
        Self {
            comment,
            relevancy_score: None,
            reasoning: NOT_SCORED_REASONING.to_string(),
            user_relevancy_score: None,
            starred: false,
        }
    }

    /// Relevancy used for every default ordering: a researcher override wins
    /// over the LLM score and sits half a point above the same LLM value.
    pub fn effective_relevancy(&self) -> Option<f64> {
        match (self.user_relevancy_score, self.relevancy_score) {
            (Some(user), _) => Some(f64::from(user) + USER_OVERRIDE_OFFSET),
            (None, Some(llm)) => Some(f64::from(llm)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Pending,
    Complete,
    Error,
}

impl ResearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Pending => "pending",
            ResearchStatus::Complete => "complete",
            ResearchStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResearchStatus::Pending)
    }
}

impl FromStr for ResearchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ResearchStatus::Pending),
            "complete" => Ok(ResearchStatus::Complete),
            "error" => Ok(ResearchStatus::Error),
            other => Err(format!("unknown research status '{other}'")),
        }
    }
}

impl fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Research {
    pub id: String,
    pub question: String,
    pub status: ResearchStatus,
    pub summary: Option<String>,
    pub num_threads: i64,
    pub num_comments: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub settings: ResearchSettings,
}

/// One row of the research history listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub question: String,
    pub status: ResearchStatus,
    pub num_threads: i64,
    pub num_comments: i64,
    pub created_at: DateTime<Utc>,
    pub archived: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }

    /// Unknown values fall back to `All` rather than rejecting the request.
    pub fn parse_or_all(value: &str) -> Self {
        value.trim().parse().unwrap_or(TimeFilter::All)
    }
}

impl Default for TimeFilter {
    fn default() -> Self {
        TimeFilter::All
    }
}

impl FromStr for TimeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(TimeFilter::Hour),
            "day" => Ok(TimeFilter::Day),
            "week" => Ok(TimeFilter::Week),
            "month" => Ok(TimeFilter::Month),
            "year" => Ok(TimeFilter::Year),
            "all" => Ok(TimeFilter::All),
            other => Err(format!("unknown time filter '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Relevance,
    Top,
    New,
    Controversial,
    Hot,
}

/// Sort strategies tried by successive expand runs, in order.
pub const EXPAND_SORT_ORDERS: [SortOrder; 4] = [
    SortOrder::Top,
    SortOrder::New,
    SortOrder::Controversial,
    SortOrder::Hot,
];

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Relevance => "relevance",
            SortOrder::Top => "top",
            SortOrder::New => "new",
            SortOrder::Controversial => "controversial",
            SortOrder::Hot => "hot",
        }
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Relevance
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(author: &str, body: &str) -> Comment {
        Comment {
            id: "c1".to_string(),
            thread_id: "t1".to_string(),
            author: author.to_string(),
            body: body.to_string(),
            score: 3,
            created_utc: 1_700_000_000.0,
            depth: 0,
            permalink: "https://reddit.com/r/test/comments/t1/_/c1".to_string(),
        }
    }

    #[test]
    fn test_removed_comment_detection() {
        assert!(!comment("alice", "useful answer").is_removed());
        assert!(comment("alice", "[removed]").is_removed());
        assert!(comment("alice", "   ").is_removed());
        assert!(comment(DELETED_AUTHOR, "text").is_removed());
        assert!(comment(REMOVED_AUTHOR, "text").is_removed());
    }

    #[test]
    fn test_effective_relevancy_ordering() {
        let mut overridden = ScoredComment::unscored(comment("a", "x"));
        overridden.user_relevancy_score = Some(5);
        let llm_five = ScoredComment::scored(comment("b", "y"), 5, "ok".to_string());
        let llm_six = ScoredComment::scored(comment("c", "z"), 6, "ok".to_string());

        let overridden = overridden.effective_relevancy().unwrap();
        assert!(overridden > llm_five.effective_relevancy().unwrap());
        assert!(overridden < llm_six.effective_relevancy().unwrap());
    }

    #[test]
    fn test_unscored_comment_has_sentinel_reasoning() {
        let unscored = ScoredComment::unscored(comment("a", "x"));
        assert_eq!(unscored.relevancy_score, None);
        assert_eq!(unscored.reasoning, NOT_SCORED_REASONING);
        assert_eq!(unscored.effective_relevancy(), None);
    }

    #[test]
    fn test_time_filter_fallback() {
        assert_eq!(TimeFilter::parse_or_all("week"), TimeFilter::Week);
        assert_eq!(TimeFilter::parse_or_all("fortnight"), TimeFilter::All);
    }

    #[test]
    fn test_selftext_truncation_counts_chars() {
        let long = "é".repeat(MAX_SELFTEXT_CHARS + 20);
        assert_eq!(
            Thread::truncate_selftext(&long).chars().count(),
            MAX_SELFTEXT_CHARS
        );
    }
}
