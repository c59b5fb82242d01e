use research_core::{LlmError, ScoredComment};
use std::sync::Arc;
use tracing::info;

use crate::CompletionOracle;

pub const MIN_SUMMARY_RELEVANCY: f64 = 4.0;
pub const MAX_SUMMARY_COMMENTS: usize = 50;
pub const NOTHING_TO_SUMMARIZE: &str =
    "No sufficiently relevant comments were found to summarize. Try broadening your search query.";

const SUMMARY_BODY_CHARS: usize = 600;
const SUMMARY_TEMPERATURE: f32 = 0.5;
const SUMMARY_MAX_TOKENS: u32 = 2000;

const SUMMARY_PROMPT: &str = "You are a research summarizer. You will receive a research question and Reddit comments that have been scored for relevancy. Each comment is labelled with its ID, upvote count and relevancy score.

Write the answer in Markdown with exactly this structure:

## Key Takeaways
3-6 short bullet points with the most important findings.

## Detailed Findings
Group the evidence into themes, one short header per theme. Weigh opinions by how often they appear and how well they were received, note disagreements, separate factual claims from personal anecdotes, and mention when a view was rare or downvoted. Cite every claim with the IDs of the comments that support it, inline like [c:abc123] or as a block quote followed by the citation.

## Conclusion
Directly answer the research question. If the evidence is thin or contradictory, say that it is inconclusive and why.

Be thorough but concise (300-600 words). Only cite IDs that appear in the input.";

/// Ranking weight: effective relevancy scaled by upvotes (floored at 1).
pub fn summary_weight(comment: &ScoredComment) -> f64 {
    comment.effective_relevancy().unwrap_or(0.0) * comment.comment.score.max(1) as f64
}

/// Comments eligible for the summary, best first, at most
/// `MAX_SUMMARY_COMMENTS`. Equal weights keep their input order.
pub fn select_for_summary(comments: &[ScoredComment]) -> Vec<&ScoredComment> {
    let mut relevant: Vec<&ScoredComment> = comments
        .iter()
        .filter(|c| {
            c.effective_relevancy()
                .is_some_and(|relevancy| relevancy >= MIN_SUMMARY_RELEVANCY)
        })
        .collect();

    relevant.sort_by(|a, b| summary_weight(b).total_cmp(&summary_weight(a)));
    relevant.truncate(MAX_SUMMARY_COMMENTS);
    relevant
}

pub struct SummaryComposer {
    oracle: Arc<dyn CompletionOracle>,
}

impl SummaryComposer {
    pub fn new(oracle: Arc<dyn CompletionOracle>) -> Self {
        Self { oracle }
    }

    /// Returns the narrative, or the fixed fallback without calling the
    /// oracle when nothing meets the relevancy threshold.
    pub async fn summarize(
        &self,
        question: &str,
        comments: &[ScoredComment],
    ) -> Result<String, LlmError> {
        let eligible = comments
            .iter()
            .filter(|c| {
                c.effective_relevancy()
                    .is_some_and(|relevancy| relevancy >= MIN_SUMMARY_RELEVANCY)
            })
            .count();
        let selected = select_for_summary(comments);

        if selected.is_empty() {
            info!("No comments met the summary threshold for '{}'", question);
            return Ok(NOTHING_TO_SUMMARIZE.to_string());
        }

        let comments_text = selected
            .iter()
            .map(|c| {
                let relevancy = c.effective_relevancy().unwrap_or(0.0);
                format!(
                    "[ID: {}] [Relevancy: {}/10, Upvotes: {}]\n{}",
                    c.comment.id,
                    relevancy,
                    c.comment.score,
                    c.comment.body.chars().take(SUMMARY_BODY_CHARS).collect::<String>()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let user_prompt = format!(
            "Research Question: {question}\n\n\
             Total comments analyzed: {}\n\
             Comments meeting relevancy threshold ({}+): {}\n\n\
             Top scored comments:\n{comments_text}",
            comments.len(),
            MIN_SUMMARY_RELEVANCY,
            eligible
        );

        info!(
            "Summarizing {} of {} comments for '{}'",
            selected.len(),
            comments.len(),
            question
        );
        self.oracle
            .complete_text(
                SUMMARY_PROMPT,
                &user_prompt,
                SUMMARY_TEMPERATURE,
                SUMMARY_MAX_TOKENS,
            )
            .await
    }
}
