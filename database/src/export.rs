use research_core::{CoreError, ScoredComment, Thread};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::Database;

const SAFE_QUESTION_CHARS: usize = 50;

/// File-name friendly form of a question: alphanumerics, spaces, `-` and
/// `_` only, at most 50 characters, trimmed.
pub fn safe_question(question: &str) -> String {
    question
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .take(SAFE_QUESTION_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

/// A flat export row with a fixed column set. `COLUMNS` must follow the
/// field order of the serialized struct.
trait ExportRecord: Serialize {
    const COLUMNS: &'static [&'static str];
}

#[derive(Serialize)]
struct CommentRecord<'a> {
    id: &'a str,
    thread_id: &'a str,
    author: &'a str,
    body: &'a str,
    score: i64,
    relevancy_score: Option<u8>,
    user_relevancy_score: Option<u8>,
    effective_relevancy: Option<f64>,
    starred: bool,
    reasoning: &'a str,
    permalink: &'a str,
    depth: u32,
    created_utc: f64,
}

impl ExportRecord for CommentRecord<'_> {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "thread_id",
        "author",
        "body",
        "score",
        "relevancy_score",
        "user_relevancy_score",
        "effective_relevancy",
        "starred",
        "reasoning",
        "permalink",
        "depth",
        "created_utc",
    ];
}

impl<'a> From<&'a ScoredComment> for CommentRecord<'a> {
    fn from(scored: &'a ScoredComment) -> Self {
        let comment = &scored.comment;
        Self {
            id: &comment.id,
            thread_id: &comment.thread_id,
            author: &comment.author,
            body: &comment.body,
            score: comment.score,
            relevancy_score: scored.relevancy_score,
            user_relevancy_score: scored.user_relevancy_score,
            effective_relevancy: scored.effective_relevancy(),
            starred: scored.starred,
            reasoning: &scored.reasoning,
            permalink: &comment.permalink,
            depth: comment.depth,
            created_utc: comment.created_utc,
        }
    }
}

#[derive(Serialize)]
struct ThreadRecord<'a> {
    id: &'a str,
    title: &'a str,
    subreddit: &'a str,
    score: i64,
    num_comments: i64,
    url: &'a str,
    permalink: &'a str,
    author: &'a str,
    created_utc: f64,
}

impl ExportRecord for ThreadRecord<'_> {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "title",
        "subreddit",
        "score",
        "num_comments",
        "url",
        "permalink",
        "author",
        "created_utc",
    ];
}

impl<'a> From<&'a Thread> for ThreadRecord<'a> {
    fn from(thread: &'a Thread) -> Self {
        Self {
            id: &thread.id,
            title: &thread.title,
            subreddit: &thread.subreddit,
            score: thread.score,
            num_comments: thread.num_comments,
            url: &thread.url,
            permalink: &thread.permalink,
            author: &thread.author,
            created_utc: thread.created_utc,
        }
    }
}

/// The header row is written up front so an empty research still exports
/// its column set.
fn write_csv<'a, R, T>(path: &Path, rows: &'a [T]) -> Result<(), CoreError>
where
    R: ExportRecord + From<&'a T>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(R::COLUMNS)?;
    for row in rows {
        writer.serialize(R::from(row))?;
    }
    writer.flush()?;
    Ok(())
}

impl Database {
    /// Writes the comments and threads of a research as two CSV files in the
    /// export directory and returns the comments file path.
    pub async fn export_csv(&self, research_id: &str) -> Result<PathBuf, CoreError> {
        let research = self.require_research(research_id).await?;
        let comments = self.get_comments(research_id).await?;
        let threads = self.get_threads(research_id).await?;

        let safe = safe_question(&research.question);
        let comments_path = self
            .export_dir()
            .join(format!("research_{}_{}.csv", research_id, safe));
        let threads_path = self
            .export_dir()
            .join(format!("threads_{}_{}.csv", research_id, safe));

        let result_path = comments_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), CoreError> {
            write_csv::<CommentRecord, _>(&comments_path, &comments)?;
            write_csv::<ThreadRecord, _>(&threads_path, &threads)?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::Internal {
            message: format!("CSV export task failed: {}", e),
        })??;

        info!(
            "Exported research {} to {}",
            research_id,
            result_path.display()
        );
        Ok(result_path)
    }
}
