//! The three research flows: fresh research, expand with a new sort order,
//! and adding a single thread. Each run reports through its own
//! [`ProgressReporter`] and always ends the stream, whatever the outcome.

use database::Database;
use llm_interface::RelevancyScorer;
use reddit_client::{thread_id_from_url, SearchQuery, ThreadSource, WebSearchSource};
use research_core::{
    CollectionLimits, Comment, CoreError, ErrorExt, ResearchStatus, ScoredComment,
    SettingsUpdate, SortOrder, Stage, Thread, TimeFilter,
};
use futures::FutureExt;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::caps::{cap_thread_comments, cap_total_comments};
use crate::discovery::{DiscoveryMerger, DiscoveryRequest};
use crate::progress::ProgressReporter;

const FRESH_WEB_RESULTS_PER_QUERY: usize = 15;
const EXPAND_WEB_RESULTS_PER_QUERY: usize = 10;
const TITLE_PREVIEW_CHARS: usize = 60;
const ADDED_TITLE_CHARS: usize = 50;

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn subreddit_label(subreddits: &[String]) -> String {
    subreddits
        .iter()
        .map(|s| format!("r/{s}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Turns a panic inside a flow into a run error so the research still
/// settles.
async fn catch_panic<F>(flow: F) -> Result<(), CoreError>
where
    F: Future<Output = Result<(), CoreError>>,
{
    AssertUnwindSafe(flow).catch_unwind().await.unwrap_or_else(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        Err(CoreError::Internal {
            message: format!("Run aborted: {}", reason),
        })
    })
}

/// `base + span * done / total`, rounded down.
fn stage_progress(base: u8, span: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return base;
    }
    let step = (usize::from(span) * done.min(total)) / total;
    base.saturating_add(step as u8)
}

pub struct ResearchPipeline {
    db: Database,
    source: Arc<dyn ThreadSource>,
    discovery: DiscoveryMerger,
    scorer: RelevancyScorer,
    limits: CollectionLimits,
}

impl ResearchPipeline {
    pub fn new(
        db: Database,
        source: Arc<dyn ThreadSource>,
        web: Arc<dyn WebSearchSource>,
        scorer: RelevancyScorer,
        limits: CollectionLimits,
    ) -> Self {
        Self {
            discovery: DiscoveryMerger::new(Arc::clone(&source), web),
            db,
            source,
            scorer,
            limits,
        }
    }

    pub async fn run_research(
        &self,
        research_id: &str,
        seed_urls: &[String],
        progress: ProgressReporter,
    ) {
        info!("Starting research {}", research_id);
        let result = catch_panic(self.research(research_id, seed_urls, &progress)).await;
        self.settle(research_id, result, progress).await;
    }

    pub async fn run_expand(&self, research_id: &str, sort: SortOrder, progress: ProgressReporter) {
        info!("Expanding research {} with sort '{}'", research_id, sort);
        let result = catch_panic(self.expand(research_id, sort, &progress)).await;
        self.settle(research_id, result, progress).await;
    }

    pub async fn run_add_thread(
        &self,
        research_id: &str,
        thread_id: &str,
        progress: ProgressReporter,
    ) {
        info!("Adding thread {} to research {}", thread_id, research_id);
        let result = catch_panic(self.add_thread(research_id, thread_id, &progress)).await;
        self.settle(research_id, result, progress).await;
    }

    async fn settle(
        &self,
        research_id: &str,
        result: Result<(), CoreError>,
        progress: ProgressReporter,
    ) {
        if let Err(e) = result {
            e.log_error();
            if let Err(status_error) = self
                .db
                .update_research_status(research_id, ResearchStatus::Error)
                .await
            {
                error!(
                    "Could not mark research {} as failed: {}",
                    research_id, status_error
                );
            }
            progress.fail(e.to_string());
        }
        progress.finish();
    }

    /// Short-circuits a run that has nothing more to do. Not an error.
    async fn finish_early(
        &self,
        research_id: &str,
        message: &str,
        progress: &ProgressReporter,
    ) -> Result<(), CoreError> {
        info!("Research {} finished early: {}", research_id, message);
        self.db
            .update_research_status(research_id, ResearchStatus::Complete)
            .await?;
        progress.complete(message);
        Ok(())
    }

    async fn export(&self, research_id: &str) {
        if let Err(e) = self.db.export_csv(research_id).await {
            warn!("CSV export for research {} failed: {}", research_id, e);
        }
    }

    async fn research(
        &self,
        research_id: &str,
        seed_urls: &[String],
        progress: &ProgressReporter,
    ) -> Result<(), CoreError> {
        let research = self.db.require_research(research_id).await?;
        let question = research.question.as_str();
        let settings = &research.settings;
        let max_threads = self.limits.clamp_threads(settings.max_threads);
        let max_comments = self
            .limits
            .clamp_comments_per_thread(settings.max_comments_per_thread) as usize;
        let time_filter = settings.time_filter.unwrap_or_default();

        let threads = if seed_urls.is_empty() {
            self.discover_threads(research_id, question, max_threads, time_filter, progress)
                .await?
        } else {
            self.load_seed_threads(seed_urls, progress).await
        };

        if threads.is_empty() {
            let message = if seed_urls.is_empty() {
                "No threads found. Try a different query."
            } else {
                "None of the provided URLs are valid Reddit threads."
            };
            return self.finish_early(research_id, message, progress).await;
        }
        self.db.save_threads(research_id, &threads).await?;

        let comments = self
            .collect_comments(&threads, max_comments, progress, 20, 40)
            .await?;
        progress.report(
            Stage::Collecting,
            format!("Collected {} comments total", comments.len()),
            60,
        );
        if comments.is_empty() {
            return self
                .finish_early(research_id, "No comments found in the threads.", progress)
                .await;
        }

        let unscored: Vec<ScoredComment> =
            comments.iter().cloned().map(ScoredComment::unscored).collect();
        self.db.save_scored_comments(research_id, &unscored).await?;

        progress.report(
            Stage::Scoring,
            format!("Scoring {} comments for relevancy...", comments.len()),
            62,
        );
        let scored = self.score_comments(question, comments, progress, 62, 33).await;
        self.db.save_scored_comments(research_id, &scored).await?;
        progress.report(Stage::Scoring, "Scoring complete", 95);

        self.db
            .update_research_status(research_id, ResearchStatus::Complete)
            .await?;
        self.export(research_id).await;

        info!(
            "Research {} complete: {} threads, {} comments",
            research_id,
            threads.len(),
            scored.len()
        );
        progress.complete("Research complete!");
        Ok(())
    }

    async fn discover_threads(
        &self,
        research_id: &str,
        question: &str,
        max_threads: u32,
        time_filter: TimeFilter,
        progress: &ProgressReporter,
    ) -> Result<Vec<Thread>, CoreError> {
        progress.report(Stage::Searching, "Finding relevant subreddits...", 3);
        let surface = self.scorer.suggest_discovery_surface(question).await;
        let subreddits = if surface.subreddits.is_empty() {
            Vec::new()
        } else {
            self.source.validate_forums(&surface.subreddits).await
        };

        let scope = if subreddits.is_empty() {
            "Searching across all of Reddit...".to_string()
        } else {
            format!("Searching in: {}", subreddit_label(&subreddits))
        };
        progress.report(Stage::Searching, scope, 8);
        self.db
            .update_settings(research_id, SettingsUpdate::subreddits(subreddits.clone()))
            .await?;

        progress.report(Stage::Searching, "Searching for relevant threads...", 10);
        let web_queries = if surface.search_queries.is_empty() {
            vec![question.to_string()]
        } else {
            surface.search_queries
        };
        let request = DiscoveryRequest {
            search: SearchQuery::new(question, max_threads)
                .time_filter(time_filter)
                .subreddits(subreddits),
            web_queries,
            web_results_per_query: FRESH_WEB_RESULTS_PER_QUERY,
            web_candidate_cap: max_threads as usize,
        };

        let discovered = self
            .discovery
            .discover(&request, |native| {
                progress.report(
                    Stage::Searching,
                    format!("Found {native} threads via Reddit, searching the web for more..."),
                    14,
                )
            })
            .await?;

        let candidates = discovered.threads.len();
        progress.report(
            Stage::Searching,
            format!(
                "Found {} threads total ({} from web search), filtering for relevancy...",
                candidates, discovered.web_added
            ),
            18,
        );
        if candidates == 0 {
            return Ok(Vec::new());
        }

        let relevant = self.scorer.score_threads(question, discovered.threads).await;
        progress.report(
            Stage::Searching,
            format!("{} of {} threads are relevant", relevant.len(), candidates),
            22,
        );
        Ok(relevant)
    }

    /// Resolves user-supplied thread URLs, skipping any that do not parse
    /// or resolve.
    async fn load_seed_threads(
        &self,
        seed_urls: &[String],
        progress: &ProgressReporter,
    ) -> Vec<Thread> {
        progress.report(
            Stage::Searching,
            format!("Fetching {} user-provided thread(s)...", seed_urls.len()),
            10,
        );

        let mut seen = HashSet::new();
        let mut threads = Vec::new();
        for url in seed_urls {
            let Some(thread_id) = thread_id_from_url(url) else {
                warn!("Ignoring seed URL that is not a Reddit thread: {}", url);
                continue;
            };
            if !seen.insert(thread_id.clone()) {
                continue;
            }
            match self.source.fetch_thread(&thread_id).await {
                Ok(thread) => threads.push(thread),
                Err(e) => warn!("Could not load seed thread {}: {}", thread_id, e),
            }
        }

        if !threads.is_empty() {
            progress.report(
                Stage::Searching,
                format!("Loaded {} thread(s), collecting comments...", threads.len()),
                22,
            );
        }
        threads
    }

    async fn collect_comments(
        &self,
        threads: &[Thread],
        max_per_thread: usize,
        progress: &ProgressReporter,
        base: u8,
        span: u8,
    ) -> Result<Vec<Comment>, CoreError> {
        let total = threads.len();
        let mut collected = Vec::new();
        for (index, thread) in threads.iter().enumerate() {
            progress.report(
                Stage::Collecting,
                format!(
                    "Collecting comments from thread {}/{}: {}...",
                    index + 1,
                    total,
                    preview(&thread.title, TITLE_PREVIEW_CHARS)
                ),
                stage_progress(base, span, index, total),
            );
            let comments = self.source.collect_comments(&thread.id).await?;
            collected.extend(cap_thread_comments(comments, max_per_thread));
        }
        Ok(cap_total_comments(collected, self.limits.total_comments_cap))
    }

    async fn score_comments(
        &self,
        question: &str,
        comments: Vec<Comment>,
        progress: &ProgressReporter,
        base: u8,
        span: u8,
    ) -> Vec<ScoredComment> {
        self.scorer
            .score_comments(question, comments, |batch, total| {
                progress.report(
                    Stage::Scoring,
                    format!("Scoring batch {batch}/{total}..."),
                    stage_progress(base, span, batch, total),
                )
            })
            .await
    }

    async fn mark_sort_tried(&self, research_id: &str, sort: SortOrder) -> Result<(), CoreError> {
        self.db
            .update_settings(research_id, SettingsUpdate::sort_tried(sort))
            .await?;
        Ok(())
    }

    async fn expand(
        &self,
        research_id: &str,
        sort: SortOrder,
        progress: &ProgressReporter,
    ) -> Result<(), CoreError> {
        let research = self.db.require_research(research_id).await?;
        let question = research.question.as_str();
        let settings = &research.settings;
        let max_comments = self
            .limits
            .clamp_comments_per_thread(settings.max_comments_per_thread) as usize;
        let existing = self.db.get_existing_thread_ids(research_id).await?;

        let scope = if settings.subreddits.is_empty() {
            "all of Reddit".to_string()
        } else {
            subreddit_label(&settings.subreddits)
        };
        progress.report(
            Stage::Searching,
            format!("Searching {scope} sorted by {sort}..."),
            5,
        );

        // A higher ceiling than a fresh run, since many hits are duplicates.
        let limit = self.limits.max_threads_limit;
        let request = DiscoveryRequest {
            search: SearchQuery::new(question, limit)
                .sort(sort)
                .time_filter(settings.time_filter.unwrap_or_default())
                .subreddits(settings.subreddits.clone()),
            web_queries: vec![format!("{question} {sort}")],
            web_results_per_query: EXPAND_WEB_RESULTS_PER_QUERY,
            web_candidate_cap: limit as usize,
        };
        let discovered = self
            .discovery
            .discover(&request, |_| {
                progress.report(
                    Stage::Searching,
                    "Searching the web for more Reddit threads...",
                    12,
                )
            })
            .await?;

        let new_threads: Vec<Thread> = discovered
            .threads
            .into_iter()
            .filter(|thread| !existing.contains(&thread.id))
            .collect();
        progress.report(
            Stage::Searching,
            format!(
                "Found {} new threads, filtering for relevancy...",
                new_threads.len()
            ),
            20,
        );
        if new_threads.is_empty() {
            self.mark_sort_tried(research_id, sort).await?;
            return self
                .finish_early(research_id, "No new threads found with this strategy.", progress)
                .await;
        }

        let candidates = new_threads.len();
        let relevant = self.scorer.score_threads(question, new_threads).await;
        progress.report(
            Stage::Searching,
            format!("{} of {} new threads are relevant", relevant.len(), candidates),
            30,
        );

        let comments = self
            .collect_comments(&relevant, max_comments, progress, 30, 35)
            .await?;
        progress.report(
            Stage::Collecting,
            format!("Collected {} new comments", comments.len()),
            65,
        );
        if comments.is_empty() {
            self.mark_sort_tried(research_id, sort).await?;
            return self
                .finish_early(research_id, "No new comments found.", progress)
                .await;
        }

        let scored = self.score_comments(question, comments, progress, 65, 30).await;

        // Threads are stored only together with their comments.
        self.db.save_threads(research_id, &relevant).await?;
        self.db.save_scored_comments(research_id, &scored).await?;
        self.mark_sort_tried(research_id, sort).await?;
        self.db
            .update_research_status(research_id, ResearchStatus::Complete)
            .await?;
        self.export(research_id).await;

        progress.complete(format!("Added {} new comments!", scored.len()));
        Ok(())
    }

    async fn add_thread(
        &self,
        research_id: &str,
        thread_id: &str,
        progress: &ProgressReporter,
    ) -> Result<(), CoreError> {
        let research = self.db.require_research(research_id).await?;
        let max_comments = self
            .limits
            .clamp_comments_per_thread(research.settings.max_comments_per_thread)
            as usize;

        progress.report(Stage::Fetching, "Fetching thread details...", 10);
        let thread = self.source.fetch_thread(thread_id).await?;
        self.db
            .save_threads(research_id, std::slice::from_ref(&thread))
            .await?;

        progress.report(
            Stage::Collecting,
            format!(
                "Collecting comments from: {}...",
                preview(&thread.title, TITLE_PREVIEW_CHARS)
            ),
            30,
        );
        let comments = cap_thread_comments(
            self.source.collect_comments(thread_id).await?,
            max_comments,
        );
        if comments.is_empty() {
            return self
                .finish_early(research_id, "Thread added (no comments found).", progress)
                .await;
        }

        progress.report(
            Stage::Scoring,
            format!("Scoring {} comments for relevancy...", comments.len()),
            55,
        );
        let scored = self
            .score_comments(&research.question, comments, progress, 55, 40)
            .await;
        self.db.save_scored_comments(research_id, &scored).await?;
        self.db
            .update_research_status(research_id, ResearchStatus::Complete)
            .await?;
        self.export(research_id).await;

        progress.complete(format!(
            "Added \"{}\" with {} comments!",
            preview(&thread.title, ADDED_TITLE_CHARS),
            scored.len()
        ));
        Ok(())
    }
}
