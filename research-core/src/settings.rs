use serde::{Deserialize, Serialize};

use crate::types::{SortOrder, TimeFilter, EXPAND_SORT_ORDERS};

/// Per-research settings, persisted as a JSON blob next to the research row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSettings {
    pub max_threads: Option<u32>,
    pub max_comments_per_thread: Option<u32>,
    pub time_filter: Option<TimeFilter>,
    /// Validated subreddits discovery was focused on. Empty means all of Reddit.
    pub subreddits: Vec<String>,
    pub sorts_tried: Vec<SortOrder>,
    pub archived: bool,
}

/// A partial update. `None` leaves a field untouched; `sorts_tried` is
/// append-only.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub max_threads: Option<u32>,
    pub max_comments_per_thread: Option<u32>,
    pub time_filter: Option<TimeFilter>,
    pub subreddits: Option<Vec<String>>,
    pub sort_tried: Option<SortOrder>,
    pub archived: Option<bool>,
}

impl SettingsUpdate {
    pub fn subreddits(subreddits: Vec<String>) -> Self {
        Self {
            subreddits: Some(subreddits),
            ..Self::default()
        }
    }

    pub fn sort_tried(sort: SortOrder) -> Self {
        Self {
            sort_tried: Some(sort),
            ..Self::default()
        }
    }

    pub fn archived(archived: bool) -> Self {
        Self {
            archived: Some(archived),
            ..Self::default()
        }
    }
}

impl ResearchSettings {
    pub fn merge(&mut self, update: SettingsUpdate) {
        if let Some(max_threads) = update.max_threads {
            self.max_threads = Some(max_threads);
        }
        if let Some(max_comments) = update.max_comments_per_thread {
            self.max_comments_per_thread = Some(max_comments);
        }
        if let Some(time_filter) = update.time_filter {
            self.time_filter = Some(time_filter);
        }
        if let Some(subreddits) = update.subreddits {
            self.subreddits = subreddits;
        }
        if let Some(sort) = update.sort_tried {
            if !self.sorts_tried.contains(&sort) {
                self.sorts_tried.push(sort);
            }
        }
        if let Some(archived) = update.archived {
            self.archived = archived;
        }
    }

    pub fn next_untried_sort(&self) -> Option<SortOrder> {
        EXPAND_SORT_ORDERS
            .iter()
            .copied()
            .find(|sort| !self.sorts_tried.contains(sort))
    }

    pub fn remaining_sorts(&self) -> Vec<SortOrder> {
        EXPAND_SORT_ORDERS
            .iter()
            .copied()
            .filter(|sort| !self.sorts_tried.contains(sort))
            .collect()
    }
}
