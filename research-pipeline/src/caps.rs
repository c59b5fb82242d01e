//! Comment volume ceilings. Truncation always keeps the most upvoted
//! comments; ties keep their collection order.

use research_core::Comment;

fn sort_by_popularity(comments: &mut [Comment]) {
    // sort_by is stable
    comments.sort_by(|a, b| b.score.cmp(&a.score));
}

/// Drops deleted/removed comments and keeps the `max_per_thread` most upvoted.
pub fn cap_thread_comments(comments: Vec<Comment>, max_per_thread: usize) -> Vec<Comment> {
    let mut kept: Vec<Comment> = comments.into_iter().filter(|c| !c.is_removed()).collect();
    sort_by_popularity(&mut kept);
    kept.truncate(max_per_thread);
    kept
}

/// Applies the research-wide ceiling. Input at or under the cap is returned
/// in its original order.
pub fn cap_total_comments(mut comments: Vec<Comment>, total_cap: usize) -> Vec<Comment> {
    if comments.len() <= total_cap {
        return comments;
    }
    sort_by_popularity(&mut comments);
    comments.truncate(total_cap);
    comments
}
