mod common;

use chrono::Duration;
use common::*;
use repost_scheduler::clock::ManualClock;
use repost_scheduler::db;
use repost_scheduler::pipeline::SweepSummary;
use std::sync::Arc;

async fn count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn referenced_articles_survive_any_age() {
    let pool = setup_pool().await;
    let clock = Arc::new(ManualClock::new(t0()));
    let pipeline = pipeline_with(
        pool.clone(),
        clock,
        Arc::new(RecordingPublisher::default()),
        Arc::new(FixedSearch::default()),
    );

    seed_article(&pool, "old-referenced", t0() - Duration::days(31)).await;
    seed_article(&pool, "old-orphan", t0() - Duration::days(31)).await;
    seed_article(&pool, "recent", t0() - Duration::days(29)).await;
    let account = seed_account(&pool, "acme").await;
    seed_repost(&pool, "old-referenced", &account, None, Some(t0() + Duration::days(1))).await;

    let summary = pipeline.cleanup_old_data().await;
    assert_eq!(summary.articles, Some(1));

    assert!(db::fetch_article(&pool, "old-referenced").await.unwrap().is_some());
    assert!(db::fetch_article(&pool, "old-orphan").await.unwrap().is_none());
    assert!(db::fetch_article(&pool, "recent").await.unwrap().is_some());
}

#[tokio::test]
async fn posted_repost_still_protects_article() {
    let pool = setup_pool().await;
    let clock = Arc::new(ManualClock::new(t0()));
    let pipeline = pipeline_with(
        pool.clone(),
        clock.clone(),
        Arc::new(RecordingPublisher::default()),
        Arc::new(FixedSearch::default()),
    );

    seed_article(&pool, "a1", t0()).await;
    let account = seed_account(&pool, "acme").await;
    seed_repost(&pool, "a1", &account, None, None).await;
    pipeline.process_due_reposts().await.unwrap();

    clock.advance(Duration::days(90));
    pipeline.cleanup_old_data().await;
    assert!(db::fetch_article(&pool, "a1").await.unwrap().is_some());
}

#[tokio::test]
async fn tokens_and_sessions_use_their_own_thresholds() {
    let pool = setup_pool().await;
    let clock = Arc::new(ManualClock::new(t0()));
    let pipeline = pipeline_with(
        pool.clone(),
        clock,
        Arc::new(RecordingPublisher::default()),
        Arc::new(FixedSearch::default()),
    );

    db::insert_verification_token(&pool, "a@example.com", "tok-old", t0() - Duration::hours(25))
        .await
        .unwrap();
    db::insert_verification_token(&pool, "b@example.com", "tok-new", t0() - Duration::hours(23))
        .await
        .unwrap();
    db::insert_session(&pool, "sess-old", "user-1", t0() - Duration::days(8))
        .await
        .unwrap();
    db::insert_session(&pool, "sess-new", "user-1", t0() - Duration::days(6))
        .await
        .unwrap();

    let summary = pipeline.cleanup_old_data().await;
    assert_eq!(
        summary,
        SweepSummary {
            verification_tokens: Some(1),
            sessions: Some(1),
            articles: Some(0),
        }
    );

    let tokens: Vec<String> = sqlx::query_scalar("SELECT token FROM verification_tokens")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(tokens, vec!["tok-new"]);
    let sessions: Vec<String> = sqlx::query_scalar("SELECT session_token FROM sessions")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(sessions, vec!["sess-new"]);
}

#[tokio::test]
async fn failing_step_does_not_abort_sweep() {
    let pool = setup_pool().await;
    let clock = Arc::new(ManualClock::new(t0()));
    let pipeline = pipeline_with(
        pool.clone(),
        clock,
        Arc::new(RecordingPublisher::default()),
        Arc::new(FixedSearch::default()),
    );

    seed_article(&pool, "stale", t0() - Duration::days(40)).await;
    db::insert_session(&pool, "sess-old", "user-1", t0() - Duration::days(30))
        .await
        .unwrap();
    sqlx::query("DROP TABLE verification_tokens")
        .execute(&pool)
        .await
        .unwrap();

    let summary = pipeline.cleanup_old_data().await;
    assert_eq!(summary.verification_tokens, None);
    assert_eq!(summary.sessions, Some(1));
    assert_eq!(summary.articles, Some(1));
    assert_eq!(summary.failed_steps(), 1);

    assert_eq!(count(&pool, "sessions").await, 0);
    assert_eq!(count(&pool, "articles").await, 0);
}
