//! Candidate thread discovery from the native search API and web search.

use reddit_client::{thread_id_from_link, SearchQuery, ThreadSource, WebSearchSource};
use research_core::{CoreError, Thread};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Narrow per-subreddit web searches never ask for fewer results than this.
const MIN_RESULTS_PER_SUBREDDIT: usize = 5;

#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    /// Native search; its subreddit list also scopes the web searches.
    pub search: SearchQuery,
    pub web_queries: Vec<String>,
    pub web_results_per_query: usize,
    /// Upper bound on distinct thread ids taken from web results.
    pub web_candidate_cap: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Discovered {
    pub threads: Vec<Thread>,
    pub native_count: usize,
    pub web_added: usize,
}

/// Ids in first-seen order without repeats.
#[derive(Debug, Default)]
struct OrderedIds {
    ids: Vec<String>,
    seen: HashSet<String>,
}

impl OrderedIds {
    fn extend(&mut self, ids: impl IntoIterator<Item = String>) {
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.ids.push(id);
            }
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

pub struct DiscoveryMerger {
    source: Arc<dyn ThreadSource>,
    web: Arc<dyn WebSearchSource>,
}

impl DiscoveryMerger {
    pub fn new(source: Arc<dyn ThreadSource>, web: Arc<dyn WebSearchSource>) -> Self {
        Self { source, web }
    }

    /// Native results first, then web-only threads in first-seen order.
    /// `on_native` receives the native result count before web discovery
    /// starts. A native search failure is returned; web failures are not.
    pub async fn discover<F>(
        &self,
        request: &DiscoveryRequest,
        on_native: F,
    ) -> Result<Discovered, CoreError>
    where
        F: FnOnce(usize) + Send,
    {
        let mut threads = self.source.search_threads(&request.search).await?;
        let native_count = threads.len();
        on_native(native_count);

        let mut seen: HashSet<String> = threads.iter().map(|t| t.id.clone()).collect();
        let web_ids = self.web_thread_ids(request).await;
        let mut web_added = 0;

        for id in web_ids {
            if seen.contains(&id) {
                continue;
            }
            match self.source.fetch_thread(&id).await {
                Ok(thread) => {
                    seen.insert(thread.id.clone());
                    threads.push(thread);
                    web_added += 1;
                }
                Err(e) => debug!("Dropping web result {}: {}", id, e),
            }
        }

        info!(
            "Discovered {} threads ({} native, {} from web)",
            threads.len(),
            native_count,
            web_added
        );
        Ok(Discovered {
            threads,
            native_count,
            web_added,
        })
    }

    async fn web_thread_ids(&self, request: &DiscoveryRequest) -> Vec<String> {
        let cap = request.web_candidate_cap;
        let subreddits = &request.search.subreddits;
        let per_subreddit = if subreddits.is_empty() {
            0
        } else {
            MIN_RESULTS_PER_SUBREDDIT.max(request.web_results_per_query / subreddits.len())
        };

        let mut found = OrderedIds::default();
        'queries: for query in &request.web_queries {
            if found.len() >= cap {
                break;
            }
            found.extend(
                self.search_ids(&format!("{query} site:reddit.com"), request.web_results_per_query)
                    .await,
            );

            for subreddit in subreddits {
                if found.len() >= cap {
                    break 'queries;
                }
                found.extend(
                    self.search_ids(&format!("{query} site:reddit.com/r/{subreddit}"), per_subreddit)
                        .await,
                );
            }
        }

        let mut ids = found.ids;
        ids.truncate(cap);
        debug!("Web search produced {} candidate thread ids", ids.len());
        ids
    }

    async fn search_ids(&self, query: &str, max_results: usize) -> Vec<String> {
        match self.web.text_search(query, max_results).await {
            Ok(results) => results
                .iter()
                .filter_map(|result| thread_id_from_link(&result.url))
                .collect(),
            Err(e) => {
                warn!("Web search '{}' failed: {}", query, e);
                Vec::new()
            }
        }
    }
}
