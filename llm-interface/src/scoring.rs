//! LLM relevancy scoring for threads and comments, plus discovery hints.
//!
//! Every oracle failure here is recovered locally: thread filtering fails
//! open, comment batches fall back to unscored entries, and discovery hints
//! fall back to empty lists.

use research_core::{Comment, LlmError, ScoredComment, Thread};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{complete_structured, CompletionOracle, ResponseSchema};

pub const THREAD_RELEVANCY_THRESHOLD: u8 = 6;
pub const DEFAULT_BATCH_SIZE: usize = 20;

const COMMENT_PROMPT_CHARS: usize = 500;
const THREAD_PROMPT_CHARS: usize = 200;
const MAX_SUGGESTED_SUBREDDITS: usize = 5;
const MAX_SEARCH_QUERIES: usize = 4;

const COMMENT_SCORING_PROMPT: &str = "You are a relevancy scoring assistant. You will receive a research question and a batch of Reddit comments. For each comment, assign a relevancy score from 1-10:

- 1-2: Completely irrelevant (off-topic, jokes with no substance, spam)
- 3-4: Tangentially related but not useful for answering the question
- 5-6: Somewhat relevant, contains partial information or weak opinions
- 7-8: Relevant, provides useful information, experience, or perspective
- 9-10: Highly relevant, directly answers or deeply addresses the question

Consider: Does the comment provide factual information, personal experience, expert insight, or a well-reasoned opinion relevant to the question? Content quality matters more than upvotes.

You MUST return a score for every comment in the batch. Use the exact comment IDs provided.";

const THREAD_SCORING_PROMPT: &str = "You are a research assistant deciding which Reddit threads are worth reading to answer a question. For each thread, judge from its title, subreddit and opening text how likely its discussion is to contain useful answers, and assign a relevancy score from 1-10 (10 = almost certainly answers the question, 1 = unrelated).

You MUST return a score for every thread. Use the exact thread IDs provided.";

const DISCOVERY_PROMPT: &str = "You help find Reddit discussions that answer a research question.

Return:
- subreddits: up to 5 existing subreddit names (without the r/ prefix) where this question is most likely discussed. Return an empty list if the topic is general.
- search_queries: 2-4 short keyword-style web search queries for the question. Drop question words (what, how, which, best way to) and filler; keep the distinctive nouns and qualifiers.";

#[derive(Debug, Deserialize)]
struct CommentScore {
    comment_id: String,
    relevancy_score: i64,
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct CommentScoreBatch {
    scores: Vec<CommentScore>,
}

#[derive(Debug, Deserialize)]
struct ThreadScore {
    thread_id: String,
    relevancy_score: i64,
}

#[derive(Debug, Deserialize)]
struct ThreadScoreBatch {
    scores: Vec<ThreadScore>,
}

/// Where discovery should look: focus subreddits and web search rewrites.
/// Empty lists mean "search everything with the raw question".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiscoverySurface {
    pub subreddits: Vec<String>,
    pub search_queries: Vec<String>,
}

fn comment_schema() -> ResponseSchema {
    ResponseSchema {
        name: "comment_scores",
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "scores": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "comment_id": {"type": "string"},
                            "relevancy_score": {"type": "integer", "minimum": 1, "maximum": 10},
                            "reasoning": {"type": "string"}
                        },
                        "required": ["comment_id", "relevancy_score", "reasoning"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["scores"],
            "additionalProperties": false
        }),
    }
}

fn thread_schema() -> ResponseSchema {
    ResponseSchema {
        name: "thread_scores",
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "scores": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "thread_id": {"type": "string"},
                            "relevancy_score": {"type": "integer", "minimum": 1, "maximum": 10}
                        },
                        "required": ["thread_id", "relevancy_score"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["scores"],
            "additionalProperties": false
        }),
    }
}

fn discovery_schema() -> ResponseSchema {
    ResponseSchema {
        name: "discovery_surface",
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "subreddits": {"type": "array", "items": {"type": "string"}},
                "search_queries": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["subreddits", "search_queries"],
            "additionalProperties": false
        }),
    }
}

fn valid_score(score: i64) -> Option<u8> {
    u8::try_from(score).ok().filter(|s| (1..=10).contains(s))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub struct RelevancyScorer {
    oracle: Arc<dyn CompletionOracle>,
    batch_size: usize,
}

impl RelevancyScorer {
    pub fn new(oracle: Arc<dyn CompletionOracle>, batch_size: usize) -> Self {
        Self {
            oracle,
            batch_size: batch_size.max(1),
        }
    }

    /// Keeps threads scoring at or above the threshold. Fails open: any
    /// oracle failure, missing thread id, or an all-rejecting verdict returns
    /// the input unchanged.
    pub async fn score_threads(&self, question: &str, threads: Vec<Thread>) -> Vec<Thread> {
        if threads.is_empty() {
            return threads;
        }

        let listing = threads
            .iter()
            .map(|t| {
                format!(
                    "[Thread ID: {}] r/{} | {}\n{}",
                    t.id,
                    t.subreddit,
                    t.title,
                    truncate(&t.selftext, THREAD_PROMPT_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let user_prompt = format!("Research Question: {question}\n\nThreads to score:\n{listing}");

        let response: Result<ThreadScoreBatch, LlmError> = complete_structured(
            self.oracle.as_ref(),
            THREAD_SCORING_PROMPT,
            &user_prompt,
            &thread_schema(),
        )
        .await;

        let scores: HashMap<String, u8> = match response {
            Ok(batch) => batch
                .scores
                .into_iter()
                .filter_map(|s| valid_score(s.relevancy_score).map(|score| (s.thread_id, score)))
                .collect(),
            Err(e) => {
                warn!("Thread relevancy scoring failed, keeping all threads: {}", e);
                return threads;
            }
        };

        if threads.iter().any(|t| !scores.contains_key(&t.id)) {
            warn!(
                "Thread relevancy scoring covered {} of {} threads, keeping all threads",
                scores.len(),
                threads.len()
            );
            return threads;
        }

        let total = threads.len();
        let relevant: Vec<Thread> = threads
            .iter()
            .filter(|t| scores[&t.id] >= THREAD_RELEVANCY_THRESHOLD)
            .cloned()
            .collect();

        if relevant.is_empty() {
            warn!("Thread relevancy scoring rejected every thread, keeping all threads");
            return threads;
        }

        info!("{} of {} threads passed relevancy filtering", relevant.len(), total);
        relevant
    }

    /// Scores comments in fixed-size batches, calling `on_batch(done, total)`
    /// after each batch. Never fails: a failed batch yields unscored entries.
    pub async fn score_comments<F>(
        &self,
        question: &str,
        comments: Vec<Comment>,
        mut on_batch: F,
    ) -> Vec<ScoredComment>
    where
        F: FnMut(usize, usize) + Send,
    {
        let total_batches = comments.len().div_ceil(self.batch_size);
        let mut scored = Vec::with_capacity(comments.len());

        for (index, batch) in comments.chunks(self.batch_size).enumerate() {
            let batch_number = index + 1;
            debug!(
                "Scoring comment batch {}/{} ({} comments)",
                batch_number,
                total_batches,
                batch.len()
            );
            scored.extend(self.score_batch(question, batch).await);
            on_batch(batch_number, total_batches);
        }

        scored
    }

    async fn score_batch(&self, question: &str, batch: &[Comment]) -> Vec<ScoredComment> {
        let comments_text = batch
            .iter()
            .map(|c| {
                format!(
                    "[Comment ID: {}] (score: {})\n{}",
                    c.id,
                    c.score,
                    truncate(&c.body, COMMENT_PROMPT_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let user_prompt =
            format!("Research Question: {question}\n\nComments to score:\n{comments_text}");

        let response: Result<CommentScoreBatch, LlmError> = complete_structured(
            self.oracle.as_ref(),
            COMMENT_SCORING_PROMPT,
            &user_prompt,
            &comment_schema(),
        )
        .await;

        let mut scores: HashMap<String, (u8, String)> = match response {
            Ok(response) => response
                .scores
                .into_iter()
                .filter_map(|s| {
                    valid_score(s.relevancy_score).map(|score| (s.comment_id, (score, s.reasoning)))
                })
                .collect(),
            Err(e) => {
                warn!("Comment batch scoring failed, leaving batch unscored: {}", e);
                HashMap::new()
            }
        };

        batch
            .iter()
            .map(|comment| match scores.remove(&comment.id) {
                Some((score, reasoning)) => ScoredComment::scored(comment.clone(), score, reasoning),
                None => ScoredComment::unscored(comment.clone()),
            })
            .collect()
    }

    /// Suggests subreddits and keyword rewrites. Empty on any failure.
    pub async fn suggest_discovery_surface(&self, question: &str) -> DiscoverySurface {
        let user_prompt = format!("Research Question: {question}");
        let response: Result<DiscoverySurface, LlmError> = complete_structured(
            self.oracle.as_ref(),
            DISCOVERY_PROMPT,
            &user_prompt,
            &discovery_schema(),
        )
        .await;

        match response {
            Ok(surface) => {
                let surface = normalize_surface(surface);
                debug!(
                    "Suggested subreddits {:?} and queries {:?}",
                    surface.subreddits, surface.search_queries
                );
                surface
            }
            Err(e) => {
                warn!("Discovery suggestion failed, searching everywhere: {}", e);
                DiscoverySurface::default()
            }
        }
    }
}

fn normalize_surface(surface: DiscoverySurface) -> DiscoverySurface {
    let mut seen = HashSet::new();
    let subreddits = surface
        .subreddits
        .into_iter()
        .map(|name| {
            let name = name.trim();
            let name = name
                .strip_prefix("/r/")
                .or_else(|| name.strip_prefix("r/"))
                .unwrap_or(name);
            name.trim_matches('/').to_string()
        })
        .filter(|name| !name.is_empty() && !name.contains(char::is_whitespace))
        .filter(|name| seen.insert(name.to_lowercase()))
        .take(MAX_SUGGESTED_SUBREDDITS)
        .collect();

    let search_queries = surface
        .search_queries
        .into_iter()
        .map(|query| query.trim().to_string())
        .filter(|query| !query.is_empty())
        .take(MAX_SEARCH_QUERIES)
        .collect();

    DiscoverySurface {
        subreddits,
        search_queries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{timeout, ScriptedOracle};
    use research_core::NOT_SCORED_REASONING;
    use serde_json::json;
    use std::sync::Mutex;

    fn thread(id: &str) -> Thread {
        Thread {
            id: id.to_string(),
            title: format!("Thread {id}"),
            subreddit: "MachineLearning".to_string(),
            score: 10,
            num_comments: 4,
            url: format!("https://reddit.com/r/MachineLearning/comments/{id}"),
            permalink: format!("https://reddit.com/r/MachineLearning/comments/{id}/x/"),
            selftext: String::new(),
            created_utc: 1_700_000_000.0,
            author: "op".to_string(),
        }
    }

    fn comment(id: &str) -> Comment {
        Comment {
            id: id.to_string(),
            thread_id: "t1".to_string(),
            author: "someone".to_string(),
            body: format!("body of {id}"),
            score: 1,
            created_utc: 1_700_000_000.0,
            depth: 0,
            permalink: format!("https://reddit.com/r/x/comments/t1/_/{id}"),
        }
    }

    fn batch_scores(ids: &[String], score: u8) -> serde_json::Value {
        json!({
            "scores": ids.iter().map(|id| json!({
                "comment_id": id,
                "relevancy_score": score,
                "reasoning": "relevant"
            })).collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn test_threads_filtered_by_threshold() {
        let oracle = Arc::new(ScriptedOracle::default());
        oracle.push_json(Ok(json!({"scores": [
            {"thread_id": "a", "relevancy_score": 8},
            {"thread_id": "b", "relevancy_score": 6},
            {"thread_id": "c", "relevancy_score": 3}
        ]})));
        let scorer = RelevancyScorer::new(oracle, DEFAULT_BATCH_SIZE);

        let kept = scorer
            .score_threads("q", vec![thread("a"), thread("b"), thread("c")])
            .await;
        let ids: Vec<_> = kept.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_thread_filter_fails_open_on_oracle_error() {
        let oracle = Arc::new(ScriptedOracle::default());
        oracle.push_json(Err(timeout()));
        let scorer = RelevancyScorer::new(oracle, DEFAULT_BATCH_SIZE);

        let kept = scorer.score_threads("q", vec![thread("a"), thread("b")]).await;
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn test_thread_filter_fails_open_on_partial_coverage() {
        let oracle = Arc::new(ScriptedOracle::default());
        oracle.push_json(Ok(json!({"scores": [{"thread_id": "a", "relevancy_score": 2}]})));
        let scorer = RelevancyScorer::new(oracle, DEFAULT_BATCH_SIZE);

        let kept = scorer.score_threads("q", vec![thread("a"), thread("b")]).await;
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn test_thread_filter_never_empties_nonempty_input() {
        let oracle = Arc::new(ScriptedOracle::default());
        oracle.push_json(Ok(json!({"scores": [
            {"thread_id": "a", "relevancy_score": 1},
            {"thread_id": "b", "relevancy_score": 2}
        ]})));
        let scorer = RelevancyScorer::new(oracle, DEFAULT_BATCH_SIZE);

        let kept = scorer.score_threads("q", vec![thread("a"), thread("b")]).await;
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_is_unscored_and_others_unaffected() {
        let comments: Vec<Comment> = (0..50).map(|i| comment(&format!("c{i}"))).collect();
        let ids: Vec<String> = comments.iter().map(|c| c.id.clone()).collect();

        let oracle = Arc::new(ScriptedOracle::default());
        oracle.push_json(Ok(batch_scores(&ids[0..20], 8)));
        oracle.push_json(Err(timeout()));
        oracle.push_json(Ok(batch_scores(&ids[40..50], 7)));
        let scorer = RelevancyScorer::new(oracle.clone(), 20);

        let progress = Mutex::new(Vec::new());
        let scored = scorer
            .score_comments("q", comments, |done, total| {
                progress.lock().unwrap().push((done, total))
            })
            .await;

        assert_eq!(scored.len(), 50);
        assert!(scored[..20].iter().all(|c| c.relevancy_score == Some(8)));
        assert!(scored[20..40]
            .iter()
            .all(|c| c.relevancy_score.is_none() && c.reasoning == NOT_SCORED_REASONING));
        assert!(scored[40..].iter().all(|c| c.relevancy_score == Some(7)));
        assert_eq!(*progress.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(oracle.calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_and_out_of_range_scores_left_unscored() {
        let oracle = Arc::new(ScriptedOracle::default());
        oracle.push_json(Ok(json!({"scores": [
            {"comment_id": "c0", "relevancy_score": 9, "reasoning": "direct answer"},
            {"comment_id": "c1", "relevancy_score": 42, "reasoning": "bogus"}
        ]})));
        let scorer = RelevancyScorer::new(oracle, 20);

        let scored = scorer
            .score_comments("q", vec![comment("c0"), comment("c1"), comment("c2")], |_, _| {})
            .await;
        assert_eq!(scored[0].relevancy_score, Some(9));
        assert_eq!(scored[0].reasoning, "direct answer");
        assert_eq!(scored[1].relevancy_score, None);
        assert_eq!(scored[2].reasoning, NOT_SCORED_REASONING);
    }

    #[tokio::test]
    async fn test_discovery_surface_normalized() {
        let oracle = Arc::new(ScriptedOracle::default());
        oracle.push_json(Ok(json!({
            "subreddits": ["r/MachineLearning", "/r/laptops/", "laptops", "", "bad name"],
            "search_queries": [" laptop machine learning ", "gpu laptop training", "", "a", "b", "c"]
        })));
        let scorer = RelevancyScorer::new(oracle, 20);

        let surface = scorer.suggest_discovery_surface("best laptop for ML").await;
        assert_eq!(surface.subreddits, vec!["MachineLearning", "laptops"]);
        assert_eq!(
            surface.search_queries,
            vec!["laptop machine learning", "gpu laptop training", "a", "b"]
        );
    }

    #[tokio::test]
    async fn test_discovery_surface_empty_on_failure() {
        let oracle = Arc::new(ScriptedOracle::default());
        oracle.push_json(Err(timeout()));
        let scorer = RelevancyScorer::new(oracle, 20);

        assert_eq!(
            scorer.suggest_discovery_surface("q").await,
            DiscoverySurface::default()
        );
    }
}
