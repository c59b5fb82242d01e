use crate::Database;
use research_core::{
    Comment, CoreError, ResearchSettings, ResearchStatus, ScoredComment, SettingsUpdate,
    SortOrder, Thread, TimeFilter,
};
use std::env;

async fn setup_test_db() -> Database {
    let name = format!("test_research_{}", uuid::Uuid::new_v4());
    let db_path = env::temp_dir().join(format!("{name}.db"));
    let export_dir = env::temp_dir().join(format!("{name}_exports"));

    let db = Database::connect(&db_path, &export_dir)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

async fn create_research(db: &Database, id: &str) {
    let settings = ResearchSettings {
        max_threads: Some(15),
        max_comments_per_thread: Some(100),
        time_filter: Some(TimeFilter::All),
        ..ResearchSettings::default()
    };
    db.create_research(id, "best laptop for ML?", &settings)
        .await
        .expect("Failed to create research");
}

fn thread(id: &str, score: i64) -> Thread {
    Thread {
        id: id.to_string(),
        title: format!("Thread {id}"),
        subreddit: "laptops".to_string(),
        score,
        num_comments: 10,
        url: format!("https://reddit.com/r/laptops/comments/{id}/"),
        permalink: format!("https://reddit.com/r/laptops/comments/{id}/"),
        selftext: String::new(),
        created_utc: 1_700_000_000.0,
        author: "poster".to_string(),
    }
}

fn comment(id: &str, thread_id: &str, score: i64, relevancy: Option<u8>) -> ScoredComment {
    let comment = Comment {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        author: "commenter".to_string(),
        body: format!("comment {id}"),
        score,
        created_utc: 1_700_000_100.0,
        depth: 0,
        permalink: format!("https://reddit.com/r/laptops/comments/{thread_id}/_/{id}/"),
    };
    match relevancy {
        Some(value) => ScoredComment::scored(comment, value, "relevant".to_string()),
        None => ScoredComment::unscored(comment),
    }
}

#[tokio::test]
async fn test_database_connection_and_migrations() {
    let db = setup_test_db().await;
    assert!(db.get_history().await.unwrap().is_empty());
    // Migrations are idempotent
    db.run_migrations().await.expect("Second migration run failed");
}

#[tokio::test]
async fn test_create_and_load_research() {
    let db = setup_test_db().await;
    create_research(&db, "abc123def456").await;

    let research = db.require_research("abc123def456").await.unwrap();
    assert_eq!(research.question, "best laptop for ML?");
    assert_eq!(research.status, ResearchStatus::Pending);
    assert_eq!(research.settings.max_threads, Some(15));
    assert!(research.completed_at.is_none());

    assert!(db.get_research("missing").await.unwrap().is_none());
    assert!(matches!(
        db.require_research("missing").await,
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_status_update_recomputes_counts() {
    let db = setup_test_db().await;
    create_research(&db, "r1").await;

    db.save_threads("r1", &[thread("t1", 5), thread("t2", 50)])
        .await
        .unwrap();
    db.save_scored_comments("r1", &[comment("c1", "t1", 3, Some(7))])
        .await
        .unwrap();
    db.update_research_status("r1", ResearchStatus::Complete)
        .await
        .unwrap();

    let research = db.require_research("r1").await.unwrap();
    assert_eq!(research.status, ResearchStatus::Complete);
    assert_eq!(research.num_threads, 2);
    assert_eq!(research.num_comments, 1);
    assert!(research.completed_at.is_some());

    let threads = db.get_threads("r1").await.unwrap();
    assert_eq!(threads[0].id, "t2");
}

#[tokio::test]
async fn test_delete_thread_removes_only_its_comments() {
    let db = setup_test_db().await;
    create_research(&db, "r1").await;
    create_research(&db, "r2").await;

    db.save_threads("r1", &[thread("t1", 5), thread("t2", 8)])
        .await
        .unwrap();
    db.save_threads("r2", &[thread("t1", 5)]).await.unwrap();
    db.save_scored_comments(
        "r1",
        &[
            comment("c1", "t1", 3, Some(7)),
            comment("c2", "t1", 9, Some(4)),
            comment("c3", "t2", 1, None),
        ],
    )
    .await
    .unwrap();
    db.save_scored_comments("r2", &[comment("c1", "t1", 3, Some(7))])
        .await
        .unwrap();
    db.recalculate_counts("r1").await.unwrap();

    assert!(db.delete_thread("r1", "t1").await.unwrap());

    let research = db.require_research("r1").await.unwrap();
    assert_eq!(research.num_threads, 1);
    assert_eq!(research.num_comments, 1);
    let remaining = db.get_comments("r1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].comment.id, "c3");

    // Same thread id in another research is untouched
    assert_eq!(db.get_comments("r2").await.unwrap().len(), 1);
    assert!(!db.delete_thread("r1", "t1").await.unwrap());
}

#[tokio::test]
async fn test_comments_ordered_by_effective_relevancy() {
    let db = setup_test_db().await;
    create_research(&db, "r1").await;
    db.save_threads("r1", &[thread("t1", 5)]).await.unwrap();
    db.save_scored_comments(
        "r1",
        &[
            comment("llm5", "t1", 100, Some(5)),
            comment("llm6", "t1", 1, Some(6)),
            comment("user5", "t1", 1, Some(2)),
            comment("unscored", "t1", 500, None),
        ],
    )
    .await
    .unwrap();
    db.set_comment_override("r1", "user5", Some(5)).await.unwrap();

    let ids: Vec<String> = db
        .get_comments("r1")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.comment.id)
        .collect();
    assert_eq!(ids, vec!["llm6", "user5", "llm5", "unscored"]);
}

#[tokio::test]
async fn test_rescoring_keeps_curation() {
    let db = setup_test_db().await;
    create_research(&db, "r1").await;
    db.save_threads("r1", &[thread("t1", 5)]).await.unwrap();
    db.save_scored_comments("r1", &[comment("c1", "t1", 3, Some(4))])
        .await
        .unwrap();
    db.set_comment_override("r1", "c1", Some(9)).await.unwrap();
    db.set_comment_starred("r1", "c1", true).await.unwrap();

    db.save_scored_comments("r1", &[comment("c1", "t1", 4, Some(6))])
        .await
        .unwrap();

    let stored = &db.get_comments("r1").await.unwrap()[0];
    assert_eq!(stored.relevancy_score, Some(6));
    assert_eq!(stored.user_relevancy_score, Some(9));
    assert!(stored.starred);
    assert_eq!(stored.comment.score, 4);
}

#[tokio::test]
async fn test_override_validation() {
    let db = setup_test_db().await;
    create_research(&db, "r1").await;
    db.save_threads("r1", &[thread("t1", 5)]).await.unwrap();
    db.save_scored_comments("r1", &[comment("c1", "t1", 3, Some(4))])
        .await
        .unwrap();

    assert!(matches!(
        db.set_comment_override("r1", "c1", Some(11)).await,
        Err(CoreError::InvalidInput { .. })
    ));
    assert!(matches!(
        db.set_comment_override("r1", "nope", Some(3)).await,
        Err(CoreError::NotFound { .. })
    ));
    db.set_comment_override("r1", "c1", None).await.unwrap();
    assert_eq!(db.get_comments("r1").await.unwrap()[0].user_relevancy_score, None);
}

#[tokio::test]
async fn test_settings_merge_persists() {
    let db = setup_test_db().await;
    create_research(&db, "r1").await;

    db.update_settings("r1", SettingsUpdate::subreddits(vec!["laptops".to_string()]))
        .await
        .unwrap();
    db.update_settings("r1", SettingsUpdate::sort_tried(SortOrder::Top))
        .await
        .unwrap();
    let settings = db
        .update_settings("r1", SettingsUpdate::sort_tried(SortOrder::Top))
        .await
        .unwrap();

    assert_eq!(settings.sorts_tried, vec![SortOrder::Top]);
    let stored = db.get_settings("r1").await.unwrap();
    assert_eq!(stored.subreddits, vec!["laptops".to_string()]);
    assert_eq!(stored.max_threads, Some(15));
    assert_eq!(stored.next_untried_sort(), Some(SortOrder::New));
}

#[tokio::test]
async fn test_history_flags_archived() {
    let db = setup_test_db().await;
    create_research(&db, "r1").await;
    create_research(&db, "r2").await;
    db.update_settings("r1", SettingsUpdate::archived(true))
        .await
        .unwrap();

    let history = db.get_history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, "r2");
    assert!(history.iter().find(|h| h.id == "r1").unwrap().archived);
    assert!(!history[0].archived);
}

#[tokio::test]
async fn test_export_writes_both_files() {
    let db = setup_test_db().await;
    create_research(&db, "r1").await;
    db.save_threads("r1", &[thread("t1", 5)]).await.unwrap();
    db.save_scored_comments(
        "r1",
        &[comment("c1", "t1", 3, Some(8)), comment("c2", "t1", 2, None)],
    )
    .await
    .unwrap();
    db.set_comment_starred("r1", "c1", true).await.unwrap();

    let path = db.export_csv("r1").await.unwrap();
    assert!(path.ends_with("research_r1_best laptop for ML.csv"));

    let comments_csv = std::fs::read_to_string(&path).unwrap();
    let mut lines = comments_csv.lines();
    assert_eq!(
        lines.next().unwrap(),
        "id,thread_id,author,body,score,relevancy_score,user_relevancy_score,\
         effective_relevancy,starred,reasoning,permalink,depth,created_utc"
    );
    assert!(lines.next().unwrap().starts_with("c1,t1,commenter,comment c1,3,8,,8.0,true,"));
    assert!(lines.next().unwrap().starts_with("c2,t1,commenter,comment c2,2,,,,false,"));

    let threads_csv = std::fs::read_to_string(
        db.export_dir().join("threads_r1_best laptop for ML.csv"),
    )
    .unwrap();
    assert!(threads_csv.starts_with(
        "id,title,subreddit,score,num_comments,url,permalink,author,created_utc"
    ));
    assert_eq!(threads_csv.lines().count(), 2);
}

#[tokio::test]
async fn test_export_of_research_without_comments_keeps_headers() {
    let db = setup_test_db().await;
    create_research(&db, "r1").await;
    db.save_threads("r1", &[thread("t1", 5)]).await.unwrap();

    let path = db.export_csv("r1").await.unwrap();
    let comments_csv = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        comments_csv,
        "id,thread_id,author,body,score,relevancy_score,user_relevancy_score,\
         effective_relevancy,starred,reasoning,permalink,depth,created_utc\n"
    );

    db.delete_thread("r1", "t1").await.unwrap();
    db.export_csv("r1").await.unwrap();
    let threads_csv = std::fs::read_to_string(
        db.export_dir().join("threads_r1_best laptop for ML.csv"),
    )
    .unwrap();
    assert_eq!(
        threads_csv,
        "id,title,subreddit,score,num_comments,url,permalink,author,created_utc\n"
    );
}
