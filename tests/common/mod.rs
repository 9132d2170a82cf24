#![allow(dead_code)]

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use repost_scheduler::clock::ManualClock;
use repost_scheduler::config::Config;
use repost_scheduler::db::{self, NewArticle, NewRepost};
use repost_scheduler::model::ArticleCandidate;
use repost_scheduler::pipeline::Pipeline;
use repost_scheduler::services::{ArticleSearch, CaptionGenerator, Publisher, TemplateCaptioner};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCall {
    pub platform: String,
    pub handle: String,
    pub caption: String,
}

/// Records every publish; fails for handles listed in `failing`.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    calls: Arc<Mutex<Vec<PublishCall>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl RecordingPublisher {
    pub async fn fail_for(&self, handle: &str) {
        self.failing.lock().await.insert(handle.to_string());
    }

    pub async fn recover(&self, handle: &str) {
        self.failing.lock().await.remove(handle);
    }

    pub async fn calls(&self) -> Vec<PublishCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, platform: &str, account_handle: &str, caption: &str) -> Result<String> {
        if self.failing.lock().await.contains(account_handle) {
            return Err(anyhow!("platform rejected post for @{}", account_handle));
        }
        let mut calls = self.calls.lock().await;
        calls.push(PublishCall {
            platform: platform.to_string(),
            handle: account_handle.to_string(),
            caption: caption.to_string(),
        });
        Ok(format!("ext-{}", calls.len()))
    }
}

/// Returns a fixed hit list, or an error when `fail` is set.
#[derive(Clone, Default)]
pub struct FixedSearch {
    pub hits: Vec<ArticleCandidate>,
    pub fail: bool,
    pub queries: Arc<Mutex<Vec<(Vec<String>, Vec<String>)>>>,
}

#[async_trait::async_trait]
impl ArticleSearch for FixedSearch {
    async fn search(&self, keywords: &[String], platforms: &[String]) -> Result<Vec<ArticleCandidate>> {
        self.queries
            .lock()
            .await
            .push((keywords.to_vec(), platforms.to_vec()));
        if self.fail {
            return Err(anyhow!("search backend unavailable"));
        }
        Ok(self.hits.clone())
    }
}

pub struct FailingCaptioner;

/// Fails only for articles with the given title.
pub struct TitleFailingCaptioner(pub &'static str);

#[async_trait::async_trait]
impl CaptionGenerator for TitleFailingCaptioner {
    async fn generate(&self, title: &str, content: &str) -> Result<String> {
        if title == self.0 {
            return Err(anyhow!("model refused {}", title));
        }
        TemplateCaptioner.generate(title, content).await
    }
}

#[async_trait::async_trait]
impl CaptionGenerator for FailingCaptioner {
    async fn generate(&self, _title: &str, _content: &str) -> Result<String> {
        Err(anyhow!("model overloaded"))
    }
}

pub fn pipeline_with(
    pool: sqlx::SqlitePool,
    clock: Arc<ManualClock>,
    publisher: Arc<dyn Publisher>,
    search: Arc<dyn ArticleSearch>,
) -> Pipeline {
    let cfg = Config::default();
    Pipeline {
        pool,
        clock,
        publisher,
        search,
        captioner: Arc::new(TemplateCaptioner),
        reposts: cfg.reposts,
        retention: cfg.retention,
    }
}

pub fn article(id: &str, content: &str) -> NewArticle {
    NewArticle {
        id: id.to_string(),
        title: format!("Title {}", id),
        content: content.to_string(),
        original_url: format!("https://example.com/{}", id),
        platform: "twitter".to_string(),
        author_name: Some("author".to_string()),
        author_id: None,
        published_at: t0(),
        topic_id: "topic-1".to_string(),
        user_id: "user-1".to_string(),
    }
}

pub async fn seed_article(pool: &sqlx::SqlitePool, id: &str, created_at: DateTime<Utc>) {
    db::upsert_article(pool, &article(id, &format!("content of {}", id)), created_at)
        .await
        .unwrap();
}

pub async fn seed_account(pool: &sqlx::SqlitePool, handle: &str) -> String {
    db::insert_media_account(pool, "twitter", &format!("acct-{}", handle), handle, "user-1", t0())
        .await
        .unwrap()
}

pub async fn seed_repost(
    pool: &sqlx::SqlitePool,
    article_id: &str,
    account_id: &str,
    custom_caption: Option<&str>,
    scheduled_at: Option<DateTime<Utc>>,
) -> String {
    db::create_repost(
        pool,
        &NewRepost {
            article_id: article_id.to_string(),
            media_account_id: account_id.to_string(),
            user_id: "user-1".to_string(),
            custom_caption: custom_caption.map(str::to_string),
            scheduled_at,
        },
        t0() - chrono::Duration::hours(1),
    )
    .await
    .unwrap()
}

/// Rows violating "posted_at is set iff status is posted".
pub async fn posted_at_violations(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM reposts WHERE (status = 'posted') != (posted_at IS NOT NULL)",
    )
    .fetch_one(pool)
    .await
    .unwrap()
}
