mod export;

#[cfg(test)]
mod tests;

pub use export::safe_question;

use chrono::{DateTime, Utc};
use research_core::{
    Comment, CoreError, DatabaseError, HistoryEntry, Research, ResearchSettings, ResearchStatus,
    ScoredComment, SettingsUpdate, StorageConfig, Thread,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Number of researches returned by the history listing.
pub const HISTORY_LIMIT: i64 = 50;

#[derive(Debug, FromRow)]
struct ResearchRow {
    id: String,
    question: String,
    status: String,
    summary: Option<String>,
    num_threads: i64,
    num_comments: i64,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    settings_json: String,
}

impl ResearchRow {
    fn into_research(self) -> Result<Research, DatabaseError> {
        let status = parse_status(&self.status)?;
        let settings = parse_settings(&self.settings_json)?;
        Ok(Research {
            id: self.id,
            question: self.question,
            status,
            summary: self.summary,
            num_threads: self.num_threads,
            num_comments: self.num_comments,
            created_at: self.created_at,
            completed_at: self.completed_at,
            settings,
        })
    }
}

#[derive(Debug, FromRow)]
struct ThreadRow {
    id: String,
    title: String,
    subreddit: String,
    score: i64,
    num_comments: i64,
    url: String,
    permalink: String,
    selftext: String,
    created_utc: f64,
    author: String,
}

impl From<ThreadRow> for Thread {
    fn from(row: ThreadRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            subreddit: row.subreddit,
            score: row.score,
            num_comments: row.num_comments,
            url: row.url,
            permalink: row.permalink,
            selftext: row.selftext,
            created_utc: row.created_utc,
            author: row.author,
        }
    }
}

#[derive(Debug, FromRow)]
struct CommentRow {
    id: String,
    thread_id: String,
    author: String,
    body: String,
    score: i64,
    created_utc: f64,
    depth: i64,
    permalink: String,
    relevancy_score: Option<i64>,
    reasoning: String,
    user_relevancy_score: Option<i64>,
    starred: bool,
}

impl From<CommentRow> for ScoredComment {
    fn from(row: CommentRow) -> Self {
        let score_from_db = |value: Option<i64>| value.and_then(|v| u8::try_from(v).ok());
        Self {
            comment: Comment {
                id: row.id,
                thread_id: row.thread_id,
                author: row.author,
                body: row.body,
                score: row.score,
                created_utc: row.created_utc,
                depth: u32::try_from(row.depth).unwrap_or(0),
                permalink: row.permalink,
            },
            relevancy_score: score_from_db(row.relevancy_score),
            reasoning: row.reasoning,
            user_relevancy_score: score_from_db(row.user_relevancy_score),
            starred: row.starred,
        }
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: String,
    question: String,
    status: String,
    num_threads: i64,
    num_comments: i64,
    created_at: DateTime<Utc>,
    settings_json: String,
}

fn parse_status(raw: &str) -> Result<ResearchStatus, DatabaseError> {
    raw.parse().map_err(|details| DatabaseError::CorruptRow {
        table: "researches".to_string(),
        details,
    })
}

fn parse_settings(raw: &str) -> Result<ResearchSettings, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::CorruptRow {
        table: "researches".to_string(),
        details: format!("settings_json: {}", e),
    })
}

/// SQLite store for researches, their threads and their scored comments.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    export_dir: PathBuf,
}

impl Database {
    /// Opens (creating if needed) the database and export directory, then
    /// applies migrations.
    pub async fn open(config: &StorageConfig) -> Result<Self, CoreError> {
        let db = Self::connect(&config.db_path, &config.export_dir).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    pub async fn connect(db_path: &Path, export_dir: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(export_dir)?;

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: format!("{}: {}", db_path.display(), e),
            })?;

        info!("Connected to database at {}", db_path.display());
        Ok(Self {
            pool,
            export_dir: export_dir.to_path_buf(),
        })
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        debug!("Database migrations applied");
        Ok(())
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub async fn create_research(
        &self,
        research_id: &str,
        question: &str,
        settings: &ResearchSettings,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO researches (id, question, status, created_at, settings_json)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(research_id)
        .bind(question)
        .bind(ResearchStatus::Pending.as_str())
        .bind(Utc::now())
        .bind(serde_json::to_string(settings)?)
        .execute(&self.pool)
        .await?;

        info!("Created research {} for '{}'", research_id, question);
        Ok(())
    }

    pub async fn get_research(&self, research_id: &str) -> Result<Option<Research>, CoreError> {
        let row: Option<ResearchRow> = sqlx::query_as("SELECT * FROM researches WHERE id = ?")
            .bind(research_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(ResearchRow::into_research).transpose()?)
    }

    /// Like `get_research`, but a missing research is a `NotFound` error.
    pub async fn require_research(&self, research_id: &str) -> Result<Research, CoreError> {
        self.get_research(research_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("research {}", research_id)))
    }

    /// The most recent researches, newest first.
    pub async fn get_history(&self) -> Result<Vec<HistoryEntry>, CoreError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT id, question, status, num_threads, num_comments, created_at, settings_json
             FROM researches ORDER BY created_at DESC LIMIT ?",
        )
        .bind(HISTORY_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<HistoryEntry, DatabaseError> {
                Ok(HistoryEntry {
                    status: parse_status(&row.status)?,
                    archived: parse_settings(&row.settings_json)?.archived,
                    id: row.id,
                    question: row.question,
                    num_threads: row.num_threads,
                    num_comments: row.num_comments,
                    created_at: row.created_at,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(CoreError::from)
    }

    pub async fn get_settings(&self, research_id: &str) -> Result<ResearchSettings, CoreError> {
        let raw: Option<(String,)> =
            sqlx::query_as("SELECT settings_json FROM researches WHERE id = ?")
                .bind(research_id)
                .fetch_optional(&self.pool)
                .await?;

        match raw {
            Some((json,)) => Ok(parse_settings(&json)?),
            None => Err(CoreError::not_found(format!("research {}", research_id))),
        }
    }

    /// Read-merge-write of the settings blob inside one transaction.
    pub async fn update_settings(
        &self,
        research_id: &str,
        update: SettingsUpdate,
    ) -> Result<ResearchSettings, CoreError> {
        let mut tx = self.pool.begin().await?;

        let raw: Option<(String,)> =
            sqlx::query_as("SELECT settings_json FROM researches WHERE id = ?")
                .bind(research_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((json,)) = raw else {
            return Err(CoreError::not_found(format!("research {}", research_id)));
        };

        let mut settings = parse_settings(&json)?;
        settings.merge(update);

        sqlx::query("UPDATE researches SET settings_json = ? WHERE id = ?")
            .bind(serde_json::to_string(&settings)?)
            .bind(research_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!("Updated settings for research {}", research_id);
        Ok(settings)
    }

    /// Inserts threads, refreshing the stored copy of any already present.
    pub async fn save_threads(&self, research_id: &str, threads: &[Thread]) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        for thread in threads {
            sqlx::query(
                "INSERT INTO threads
                    (id, research_id, title, subreddit, score, num_comments, url, permalink,
                     selftext, created_utc, author)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (id, research_id) DO UPDATE SET
                    title = excluded.title,
                    subreddit = excluded.subreddit,
                    score = excluded.score,
                    num_comments = excluded.num_comments,
                    url = excluded.url,
                    permalink = excluded.permalink,
                    selftext = excluded.selftext,
                    created_utc = excluded.created_utc,
                    author = excluded.author",
            )
            .bind(&thread.id)
            .bind(research_id)
            .bind(&thread.title)
            .bind(&thread.subreddit)
            .bind(thread.score)
            .bind(thread.num_comments)
            .bind(&thread.url)
            .bind(&thread.permalink)
            .bind(&thread.selftext)
            .bind(thread.created_utc)
            .bind(&thread.author)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Saved {} threads for research {}", threads.len(), research_id);
        Ok(())
    }

    /// Inserts scored comments. Re-scoring an existing comment keeps the
    /// researcher's override and star.
    pub async fn save_scored_comments(
        &self,
        research_id: &str,
        comments: &[ScoredComment],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        for scored in comments {
            let comment = &scored.comment;
            sqlx::query(
                "INSERT INTO comments
                    (id, research_id, thread_id, author, body, score, created_utc, depth,
                     permalink, relevancy_score, reasoning, user_relevancy_score, starred)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (id, research_id) DO UPDATE SET
                    thread_id = excluded.thread_id,
                    author = excluded.author,
                    body = excluded.body,
                    score = excluded.score,
                    created_utc = excluded.created_utc,
                    depth = excluded.depth,
                    permalink = excluded.permalink,
                    relevancy_score = excluded.relevancy_score,
                    reasoning = excluded.reasoning",
            )
            .bind(&comment.id)
            .bind(research_id)
            .bind(&comment.thread_id)
            .bind(&comment.author)
            .bind(&comment.body)
            .bind(comment.score)
            .bind(comment.created_utc)
            .bind(i64::from(comment.depth))
            .bind(&comment.permalink)
            .bind(scored.relevancy_score.map(i64::from))
            .bind(&scored.reasoning)
            .bind(scored.user_relevancy_score.map(i64::from))
            .bind(scored.starred)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Saved {} comments for research {}", comments.len(), research_id);
        Ok(())
    }

    pub async fn get_existing_thread_ids(
        &self,
        research_id: &str,
    ) -> Result<HashSet<String>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM threads WHERE research_id = ?")
            .bind(research_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Threads ordered by popularity, highest first.
    pub async fn get_threads(&self, research_id: &str) -> Result<Vec<Thread>, CoreError> {
        let rows: Vec<ThreadRow> = sqlx::query_as(
            "SELECT id, title, subreddit, score, num_comments, url, permalink, selftext,
                    created_utc, author
             FROM threads WHERE research_id = ? ORDER BY score DESC",
        )
        .bind(research_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Thread::from).collect())
    }

    /// Comments ordered by effective relevancy, then popularity. Unscored
    /// comments sort last.
    pub async fn get_comments(&self, research_id: &str) -> Result<Vec<ScoredComment>, CoreError> {
        let rows: Vec<CommentRow> = sqlx::query_as(
            "SELECT id, thread_id, author, body, score, created_utc, depth, permalink,
                    relevancy_score, reasoning, user_relevancy_score, starred
             FROM comments WHERE research_id = ?
             ORDER BY COALESCE(user_relevancy_score + 0.5, relevancy_score) DESC, score DESC",
        )
        .bind(research_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ScoredComment::from).collect())
    }

    /// Deletes a thread and exactly its comments, then recounts. Returns
    /// whether the thread existed.
    pub async fn delete_thread(&self, research_id: &str, thread_id: &str) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM threads WHERE id = ? AND research_id = ?")
            .bind(thread_id)
            .bind(research_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let comments = sqlx::query("DELETE FROM comments WHERE thread_id = ? AND research_id = ?")
            .bind(thread_id)
            .bind(research_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!(
            "Deleted thread {} ({} comments) from research {}",
            thread_id, comments, research_id
        );
        self.recalculate_counts(research_id).await?;
        Ok(deleted > 0)
    }

    /// Sets the stored counters to the actual row counts and returns them.
    pub async fn recalculate_counts(&self, research_id: &str) -> Result<(i64, i64), CoreError> {
        sqlx::query(
            "UPDATE researches SET
                num_threads = (SELECT COUNT(*) FROM threads WHERE research_id = ?1),
                num_comments = (SELECT COUNT(*) FROM comments WHERE research_id = ?1)
             WHERE id = ?1",
        )
        .bind(research_id)
        .execute(&self.pool)
        .await?;

        let counts: (i64, i64) =
            sqlx::query_as("SELECT num_threads, num_comments FROM researches WHERE id = ?")
                .bind(research_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(counts)
    }

    /// Records a status change. Terminal statuses stamp `completed_at`; the
    /// counters are always recomputed from the stored rows.
    pub async fn update_research_status(
        &self,
        research_id: &str,
        status: ResearchStatus,
    ) -> Result<(), CoreError> {
        let completed_at = status.is_terminal().then(Utc::now);
        sqlx::query(
            "UPDATE researches SET
                status = ?1,
                completed_at = ?2,
                num_threads = (SELECT COUNT(*) FROM threads WHERE research_id = ?3),
                num_comments = (SELECT COUNT(*) FROM comments WHERE research_id = ?3)
             WHERE id = ?3",
        )
        .bind(status.as_str())
        .bind(completed_at)
        .bind(research_id)
        .execute(&self.pool)
        .await?;

        info!("Research {} is now {}", research_id, status);
        Ok(())
    }

    pub async fn save_summary(&self, research_id: &str, summary: &str) -> Result<(), CoreError> {
        let updated = sqlx::query("UPDATE researches SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(research_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(CoreError::not_found(format!("research {}", research_id)));
        }
        Ok(())
    }

    /// Sets or clears the researcher's relevancy override (1-10).
    pub async fn set_comment_override(
        &self,
        research_id: &str,
        comment_id: &str,
        score: Option<u8>,
    ) -> Result<(), CoreError> {
        if let Some(value) = score {
            if !(1..=10).contains(&value) {
                return Err(CoreError::invalid_input(format!(
                    "Relevancy override must be between 1 and 10, got {}",
                    value
                )));
            }
        }

        let updated = sqlx::query(
            "UPDATE comments SET user_relevancy_score = ? WHERE id = ? AND research_id = ?",
        )
        .bind(score.map(i64::from))
        .bind(comment_id)
        .bind(research_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(CoreError::not_found(format!("comment {}", comment_id)));
        }
        Ok(())
    }

    pub async fn set_comment_starred(
        &self,
        research_id: &str,
        comment_id: &str,
        starred: bool,
    ) -> Result<(), CoreError> {
        let updated =
            sqlx::query("UPDATE comments SET starred = ? WHERE id = ? AND research_id = ?")
                .bind(starred)
                .bind(comment_id)
                .bind(research_id)
                .execute(&self.pool)
                .await?
                .rows_affected();

        if updated == 0 {
            return Err(CoreError::not_found(format!("comment {}", comment_id)));
        }
        Ok(())
    }
}
