use database::Database;
use llm_interface::{CompletionOracle, RelevancyScorer, SummaryComposer};
use reddit_client::{thread_id_from_url, ThreadSource, WebSearchSource};
use research_core::{
    CollectionLimits, CoreError, HistoryEntry, Research, ResearchSettings, ResearchStatus,
    ScoredComment, SettingsUpdate, SortOrder, Thread, TimeFilter,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::guard::RunGuard;
use crate::pipeline::ResearchPipeline;
use crate::progress::{OperationKind, ProgressRegistry, ProgressSubscription};

const RESEARCH_ID_LEN: usize = 12;

pub const ALREADY_PROCESSED_MESSAGE: &str =
    "This thread has already been processed for this research.";

/// Request body for a new research.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StartResearch {
    pub question: String,
    pub max_threads: Option<u32>,
    pub max_comments_per_thread: Option<u32>,
    pub time_filter: Option<String>,
    pub seed_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AddThreadOutcome {
    Started { thread_id: String },
    AlreadyExists { already_exists: bool, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpandStatus {
    pub can_expand: bool,
    pub next_sort: Option<SortOrder>,
    pub sorts_tried: Vec<SortOrder>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchDetail {
    pub research: Research,
    pub threads: Vec<Thread>,
    pub comments: Vec<ScoredComment>,
}

fn new_research_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(RESEARCH_ID_LEN);
    id
}

/// Entry point for the presentation layer. Starting a run returns as soon
/// as the run is spawned; its progress is read with [`ResearchService::subscribe`].
pub struct ResearchService {
    db: Database,
    pipeline: Arc<ResearchPipeline>,
    summarizer: SummaryComposer,
    progress: Arc<ProgressRegistry>,
    guard: RunGuard,
    limits: CollectionLimits,
}

impl ResearchService {
    pub fn new(
        db: Database,
        source: Arc<dyn ThreadSource>,
        web: Arc<dyn WebSearchSource>,
        oracle: Arc<dyn CompletionOracle>,
        limits: CollectionLimits,
    ) -> Self {
        let scorer = RelevancyScorer::new(Arc::clone(&oracle), limits.llm_batch_size);
        let pipeline = ResearchPipeline::new(db.clone(), source, web, scorer, limits);
        Self {
            db,
            pipeline: Arc::new(pipeline),
            summarizer: SummaryComposer::new(oracle),
            progress: Arc::new(ProgressRegistry::new()),
            guard: RunGuard::new(),
            limits,
        }
    }

    pub async fn start_research(&self, request: StartResearch) -> Result<String, CoreError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(CoreError::invalid_input("Question is required"));
        }

        let settings = ResearchSettings {
            max_threads: Some(self.limits.clamp_threads(request.max_threads)),
            max_comments_per_thread: Some(
                self.limits
                    .clamp_comments_per_thread(request.max_comments_per_thread),
            ),
            time_filter: Some(
                request
                    .time_filter
                    .as_deref()
                    .map(TimeFilter::parse_or_all)
                    .unwrap_or_default(),
            ),
            ..ResearchSettings::default()
        };
        let seed_urls: Vec<String> = request
            .seed_urls
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        let research_id = new_research_id();
        self.db
            .create_research(&research_id, question, &settings)
            .await?;

        let permit = self.guard.try_acquire(&research_id)?;
        let reporter = self.progress.register(&research_id, OperationKind::Research);
        let pipeline = Arc::clone(&self.pipeline);
        let id = research_id.clone();
        tokio::spawn(async move {
            let _permit = permit;
            pipeline.run_research(&id, &seed_urls, reporter).await;
        });

        info!("Research {} started for '{}'", research_id, question);
        Ok(research_id)
    }

    /// Starts an expand run with the next untried sort order and returns it.
    pub async fn expand(&self, research_id: &str) -> Result<SortOrder, CoreError> {
        let research = self.db.require_research(research_id).await?;
        ensure_finished(&research)?;
        let sort = research.settings.next_untried_sort().ok_or_else(|| {
            CoreError::invalid_input("All search strategies have been tried for this query.")
        })?;

        let permit = self.guard.try_acquire(research_id)?;
        let reporter = self.progress.register(research_id, OperationKind::Expand);
        let pipeline = Arc::clone(&self.pipeline);
        let id = research_id.to_string();
        tokio::spawn(async move {
            let _permit = permit;
            pipeline.run_expand(&id, sort, reporter).await;
        });

        info!("Expand of {} started with sort '{}'", research_id, sort);
        Ok(sort)
    }

    pub async fn expand_status(&self, research_id: &str) -> Result<ExpandStatus, CoreError> {
        let settings = self.db.require_research(research_id).await?.settings;
        let remaining = settings.remaining_sorts();
        Ok(ExpandStatus {
            can_expand: !remaining.is_empty(),
            next_sort: remaining.first().copied(),
            sorts_tried: settings.sorts_tried,
        })
    }

    /// Starts collecting one thread into an existing research. A thread the
    /// research already holds is reported, not re-collected.
    pub async fn add_thread(
        &self,
        research_id: &str,
        url: &str,
    ) -> Result<AddThreadOutcome, CoreError> {
        let research = self.db.require_research(research_id).await?;
        let url = url.trim();
        if url.is_empty() {
            return Err(CoreError::invalid_input("URL is required"));
        }
        let thread_id = thread_id_from_url(url).ok_or_else(|| {
            CoreError::invalid_input("Invalid Reddit thread URL. Paste a full reddit.com link.")
        })?;

        if self
            .db
            .get_existing_thread_ids(research_id)
            .await?
            .contains(&thread_id)
        {
            return Ok(AddThreadOutcome::AlreadyExists {
                already_exists: true,
                message: ALREADY_PROCESSED_MESSAGE.to_string(),
            });
        }
        ensure_finished(&research)?;

        let permit = self.guard.try_acquire(research_id)?;
        let reporter = self.progress.register(research_id, OperationKind::AddThread);
        let pipeline = Arc::clone(&self.pipeline);
        let id = research_id.to_string();
        let thread = thread_id.clone();
        tokio::spawn(async move {
            let _permit = permit;
            pipeline.run_add_thread(&id, &thread, reporter).await;
        });

        info!("Adding thread {} to research {}", thread_id, research_id);
        Ok(AddThreadOutcome::Started { thread_id })
    }

    pub fn subscribe(&self, research_id: &str, kind: OperationKind) -> ProgressSubscription {
        self.progress.subscribe(research_id, kind)
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self, research_id: &str) -> bool {
        self.guard.is_running(research_id)
    }

    pub async fn get_research(&self, research_id: &str) -> Result<ResearchDetail, CoreError> {
        let research = self.db.require_research(research_id).await?;
        let threads = self.db.get_threads(research_id).await?;
        let comments = self.db.get_comments(research_id).await?;
        Ok(ResearchDetail {
            research,
            threads,
            comments,
        })
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, CoreError> {
        self.db.get_history().await
    }

    /// Composes and stores the narrative summary.
    pub async fn summarize(&self, research_id: &str) -> Result<String, CoreError> {
        let research = self.db.require_research(research_id).await?;
        let comments = self.db.get_comments(research_id).await?;
        let summary = self
            .summarizer
            .summarize(&research.question, &comments)
            .await?;
        self.db.save_summary(research_id, &summary).await?;
        Ok(summary)
    }

    pub async fn delete_thread(&self, research_id: &str, thread_id: &str) -> Result<(), CoreError> {
        self.db.require_research(research_id).await?;
        if !self.db.delete_thread(research_id, thread_id).await? {
            return Err(CoreError::not_found(format!("thread {}", thread_id)));
        }
        info!("Deleted thread {} from research {}", thread_id, research_id);
        Ok(())
    }

    pub async fn export_csv(&self, research_id: &str) -> Result<PathBuf, CoreError> {
        self.db.export_csv(research_id).await
    }

    pub async fn set_comment_override(
        &self,
        research_id: &str,
        comment_id: &str,
        score: Option<u8>,
    ) -> Result<(), CoreError> {
        self.db
            .set_comment_override(research_id, comment_id, score)
            .await
    }

    pub async fn set_comment_starred(
        &self,
        research_id: &str,
        comment_id: &str,
        starred: bool,
    ) -> Result<(), CoreError> {
        self.db
            .set_comment_starred(research_id, comment_id, starred)
            .await
    }

    pub async fn set_archived(&self, research_id: &str, archived: bool) -> Result<(), CoreError> {
        self.db
            .update_settings(research_id, SettingsUpdate::archived(archived))
            .await?;
        Ok(())
    }
}

fn ensure_finished(research: &Research) -> Result<(), CoreError> {
    if research.status == ResearchStatus::Pending {
        return Err(CoreError::Conflict {
            message: format!("Research {} has not finished yet", research.id),
        });
    }
    Ok(())
}
