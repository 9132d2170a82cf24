mod common;

use chrono::Duration;
use common::*;
use repost_scheduler::clock::ManualClock;
use repost_scheduler::db;
use repost_scheduler::model::ArticleCandidate;
use repost_scheduler::pipeline::IngestSummary;
use std::sync::Arc;

fn hit(source_id: &str, title: &str) -> ArticleCandidate {
    ArticleCandidate {
        source_id: source_id.to_string(),
        title: title.to_string(),
        content: format!("{} body", title),
        original_url: format!("https://example.com/{}", source_id),
        platform: "twitter".to_string(),
        author_name: Some("someone".to_string()),
        author_id: Some("42".to_string()),
        published_at: t0() - Duration::hours(2),
    }
}

#[tokio::test]
async fn ingestion_is_idempotent() {
    let pool = setup_pool().await;
    let clock = Arc::new(ManualClock::new(t0()));
    let search = FixedSearch {
        hits: vec![hit("s1", "First"), hit("s2", "Second")],
        ..Default::default()
    };
    let pipeline = pipeline_with(
        pool.clone(),
        clock.clone(),
        Arc::new(RecordingPublisher::default()),
        Arc::new(search.clone()),
    );

    let kw = vec!["rust".to_string()];
    let pf = vec!["twitter".to_string()];
    let topic = db::insert_topic(&pool, "Rust", Some("lang"), &kw, &pf, "user-7", t0())
        .await
        .unwrap();

    let first = pipeline.fetch_articles().await.unwrap();
    assert_eq!(
        first,
        IngestSummary {
            topics: 1,
            inserted: 2,
            existing: 0,
            failed_articles: 0,
            failed_topics: 0,
        }
    );

    clock.advance(Duration::minutes(10));
    let second = pipeline.fetch_articles().await.unwrap();
    assert_eq!((second.inserted, second.existing), (0, 2));

    let ids = db::list_articles_for_topic(&pool, &topic).await.unwrap();
    assert_eq!(ids, vec![format!("{}:s1", topic), format!("{}:s2", topic)]);

    let stored = db::fetch_article(&pool, &ids[0]).await.unwrap().unwrap();
    assert_eq!(stored.title, "First");
    assert_eq!(stored.user_id, "user-7");
    assert_eq!(stored.topic_id, topic);
    assert_eq!(stored.created_at, t0());
    assert_eq!(stored.author_id.as_deref(), Some("42"));

    let queries = search.queries.lock().await.clone();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0], (kw, pf));
}

#[tokio::test]
async fn existing_article_is_left_unchanged() {
    let pool = setup_pool().await;
    let clock = Arc::new(ManualClock::new(t0()));

    let kw = vec!["rust".to_string()];
    let pf = vec!["twitter".to_string()];
    let topic = db::insert_topic(&pool, "Rust", None, &kw, &pf, "user-7", t0())
        .await
        .unwrap();

    let mut original = article(&format!("{}:s1", topic), "hand written");
    original.title = "Original".to_string();
    db::upsert_article(&pool, &original, t0() - Duration::days(2))
        .await
        .unwrap();

    let search = FixedSearch {
        hits: vec![hit("s1", "Replacement")],
        ..Default::default()
    };
    let pipeline = pipeline_with(
        pool.clone(),
        clock,
        Arc::new(RecordingPublisher::default()),
        Arc::new(search),
    );
    let summary = pipeline.fetch_articles().await.unwrap();
    assert_eq!(summary.existing, 1);

    let stored = db::fetch_article(&pool, &original.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Original");
    assert_eq!(stored.content, "hand written");
    assert_eq!(stored.created_at, t0() - Duration::days(2));
}

#[tokio::test]
async fn search_failure_is_isolated_per_topic() {
    let pool = setup_pool().await;
    let clock = Arc::new(ManualClock::new(t0()));
    let search = FixedSearch {
        fail: true,
        ..Default::default()
    };
    let pipeline = pipeline_with(
        pool.clone(),
        clock,
        Arc::new(RecordingPublisher::default()),
        Arc::new(search),
    );

    let kw = vec!["a".to_string()];
    let pf = vec!["twitter".to_string()];
    db::insert_topic(&pool, "A", None, &kw, &pf, "u", t0()).await.unwrap();
    db::insert_topic(&pool, "B", None, &kw, &pf, "u", t0()).await.unwrap();

    let summary = pipeline.fetch_articles().await.unwrap();
    assert_eq!(summary.topics, 2);
    assert_eq!(summary.failed_topics, 2);
    assert_eq!(summary.inserted, 0);
}

#[tokio::test]
async fn store_failure_is_counted_per_article() {
    let pool = setup_pool().await;
    let clock = Arc::new(ManualClock::new(t0()));
    let search = FixedSearch {
        hits: vec![hit("s1", "Fine"), hit("s2", "Broken"), hit("s3", "Also fine")],
        ..Default::default()
    };
    let pipeline = pipeline_with(
        pool.clone(),
        clock,
        Arc::new(RecordingPublisher::default()),
        Arc::new(search),
    );

    let kw = vec!["rust".to_string()];
    let pf = vec!["twitter".to_string()];
    let topic = db::insert_topic(&pool, "Rust", None, &kw, &pf, "u", t0()).await.unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_broken BEFORE INSERT ON articles \
         WHEN NEW.title = 'Broken' BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let summary = pipeline.fetch_articles().await.unwrap();
    assert_eq!(
        summary,
        IngestSummary {
            topics: 1,
            inserted: 2,
            existing: 0,
            failed_articles: 1,
            failed_topics: 0,
        }
    );
    let ids = db::list_articles_for_topic(&pool, &topic).await.unwrap();
    assert_eq!(ids, vec![format!("{}:s1", topic), format!("{}:s3", topic)]);
}
