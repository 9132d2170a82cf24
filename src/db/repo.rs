use super::model::{CaptionTarget, DueRepost, NewArticle, NewRepost};
use crate::model::{Article, MediaAccount, Repost, RepostStatus, Topic};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePoolOptions::new()
        .connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded_path, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_topic(
    pool: &Pool,
    name: &str,
    description: Option<&str>,
    keywords: &[String],
    platforms: &[String],
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO topics (id, name, description, keywords, platforms, user_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(description)
    .bind(serde_json::to_string(keywords)?)
    .bind(serde_json::to_string(platforms)?)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("failed to insert topic")?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn list_topics(pool: &Pool) -> Result<Vec<Topic>> {
    let rows = sqlx::query(
        "SELECT id, name, description, keywords, platforms, user_id, created_at \
         FROM topics ORDER BY julianday(created_at) ASC, id ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list topics")?;

    rows.iter().map(topic_from_row).collect()
}

fn topic_from_row(row: &SqliteRow) -> Result<Topic> {
    let id: String = row.get("id");
    let keywords: String = row.get("keywords");
    let platforms: String = row.get("platforms");
    Ok(Topic {
        keywords: serde_json::from_str(&keywords)
            .with_context(|| format!("topic {} has malformed keywords", id))?,
        platforms: serde_json::from_str(&platforms)
            .with_context(|| format!("topic {} has malformed platforms", id))?,
        name: row.get("name"),
        description: row.try_get::<Option<String>, _>("description")?,
        user_id: row.get("user_id"),
        created_at: row.try_get("created_at")?,
        id,
    })
}

// ---------------------------------------------------------------------------
// Media accounts
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_media_account(
    pool: &Pool,
    platform: &str,
    account_id: &str,
    account_name: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO media_accounts (id, platform, account_id, account_name, user_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(platform)
    .bind(account_id)
    .bind(account_name)
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("failed to insert media account")?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn fetch_media_account(pool: &Pool, id: &str) -> Result<Option<MediaAccount>> {
    let row = sqlx::query(
        "SELECT id, platform, account_id, account_name, expires_at, user_id \
         FROM media_accounts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(MediaAccount {
        id: row.get("id"),
        platform: row.get("platform"),
        account_id: row.get("account_id"),
        account_name: row.get("account_name"),
        expires_at: row.try_get("expires_at")?,
        user_id: row.get("user_id"),
    }))
}

// ---------------------------------------------------------------------------
// Articles
// ---------------------------------------------------------------------------

/// Insert an article unless one with the same id already exists.
/// Returns `true` when a row was written.
#[instrument(skip_all)]
pub async fn upsert_article(pool: &Pool, article: &NewArticle, now: DateTime<Utc>) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO articles (id, title, content, original_url, platform, author_name, author_id, \
                               published_at, topic_id, user_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(&article.id)
    .bind(&article.title)
    .bind(&article.content)
    .bind(&article.original_url)
    .bind(&article.platform)
    .bind(&article.author_name)
    .bind(&article.author_id)
    .bind(article.published_at)
    .bind(&article.topic_id)
    .bind(&article.user_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .with_context(|| format!("failed to upsert article {}", article.id))?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn fetch_article(pool: &Pool, id: &str) -> Result<Option<Article>> {
    let row = sqlx::query(
        "SELECT id, title, content, original_url, platform, author_name, author_id, \
                published_at, topic_id, user_id, created_at \
         FROM articles WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(Article {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        original_url: row.get("original_url"),
        platform: row.get("platform"),
        author_name: row.try_get("author_name")?,
        author_id: row.try_get("author_id")?,
        published_at: row.try_get("published_at")?,
        topic_id: row.get("topic_id"),
        user_id: row.get("user_id"),
        created_at: row.try_get("created_at")?,
    }))
}

#[instrument(skip_all)]
pub async fn list_articles_for_topic(pool: &Pool, topic_id: &str) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT id FROM articles WHERE topic_id = ? ORDER BY id")
        .bind(topic_id)
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Reposts
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn create_repost(pool: &Pool, repost: &NewRepost, now: DateTime<Utc>) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO reposts (id, article_id, media_account_id, custom_caption, status, \
                              scheduled_at, user_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&repost.article_id)
    .bind(&repost.media_account_id)
    .bind(&repost.custom_caption)
    .bind(RepostStatus::Pending.as_str())
    .bind(repost.scheduled_at)
    .bind(&repost.user_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .context("failed to insert repost")?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn fetch_repost(pool: &Pool, id: &str) -> Result<Option<Repost>> {
    let row = sqlx::query(
        "SELECT id, article_id, media_account_id, custom_caption, ai_caption, status, \
                scheduled_at, posted_at, external_id, attempts, last_error, caption_attempts, \
                user_id, created_at, updated_at \
         FROM reposts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status_str: String = row.get("status");
    let status = RepostStatus::parse_state(&status_str)
        .ok_or_else(|| anyhow!("repost {} has unknown status {}", id, status_str))?;

    Ok(Some(Repost {
        id: row.get("id"),
        article_id: row.get("article_id"),
        media_account_id: row.get("media_account_id"),
        custom_caption: row.try_get("custom_caption")?,
        ai_caption: row.try_get("ai_caption")?,
        status,
        scheduled_at: row.try_get("scheduled_at")?,
        posted_at: row.try_get("posted_at")?,
        external_id: row.try_get("external_id")?,
        attempts: row.get("attempts"),
        last_error: row.try_get("last_error")?,
        caption_attempts: row.get("caption_attempts"),
        user_id: row.get("user_id"),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

/// Pending reposts whose `scheduled_at` is unset or not after `now`.
///
/// Rows with fewer failed attempts come first, so reposts that keep failing
/// cannot fill every batch. Within the same attempt count, unscheduled rows
/// come first, then the oldest `scheduled_at`, then the oldest `created_at`,
/// with `id` as the final tie-break.
#[instrument(skip_all)]
pub async fn list_due_reposts(pool: &Pool, now: DateTime<Utc>, limit: i64) -> Result<Vec<DueRepost>> {
    let rows = sqlx::query(
        "SELECT id, article_id, media_account_id, custom_caption, ai_caption, user_id, attempts \
         FROM reposts \
         WHERE status = 'pending' \
           AND (scheduled_at IS NULL OR julianday(scheduled_at) <= julianday(?)) \
         ORDER BY attempts ASC, scheduled_at IS NOT NULL, julianday(scheduled_at) ASC, \
                  julianday(created_at) ASC, id ASC \
         LIMIT ?",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch due reposts")?;

    let due = rows
        .into_iter()
        .map(|row| DueRepost {
            id: row.get("id"),
            article_id: row.get("article_id"),
            media_account_id: row.get("media_account_id"),
            custom_caption: row.get("custom_caption"),
            ai_caption: row.get("ai_caption"),
            user_id: row.get("user_id"),
            attempts: row.get("attempts"),
        })
        .collect();
    Ok(due)
}

/// Move a pending repost to `posted`. Returns `false` if the row was not
/// pending any more (already posted or failed), in which case nothing changes.
#[instrument(skip_all)]
pub async fn mark_repost_posted(
    pool: &Pool,
    id: &str,
    external_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE reposts \
         SET status = 'posted', posted_at = ?, updated_at = ?, external_id = COALESCE(?, external_id) \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(now)
    .bind(now)
    .bind(external_id)
    .bind(id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to mark repost {} posted", id))?;
    Ok(res.rows_affected() == 1)
}

/// Record a failed attempt. When `max_attempts > 0` and the new attempt count
/// reaches it, the repost becomes `failed`. Returns the resulting status, or
/// `None` if the repost was not pending.
#[instrument(skip_all)]
pub async fn record_repost_failure(
    pool: &Pool,
    id: &str,
    error: &str,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Result<Option<RepostStatus>> {
    let status: Option<String> = sqlx::query_scalar(
        "UPDATE reposts \
         SET attempts = attempts + 1, last_error = ?, updated_at = ?, \
             status = CASE WHEN ? > 0 AND attempts + 1 >= ? THEN 'failed' ELSE status END \
         WHERE id = ? AND status = 'pending' \
         RETURNING status",
    )
    .bind(error)
    .bind(now)
    .bind(i64::from(max_attempts))
    .bind(i64::from(max_attempts))
    .bind(id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to record failure for repost {}", id))?;

    Ok(status.and_then(|s| RepostStatus::parse_state(&s)))
}

/// Pending reposts without a generated caption whose article still exists,
/// fewest failed generations first.
#[instrument(skip_all)]
pub async fn list_reposts_needing_caption(pool: &Pool, limit: i64) -> Result<Vec<CaptionTarget>> {
    let rows = sqlx::query(
        "SELECT r.id AS repost_id, a.title, a.content \
         FROM reposts r \
         JOIN articles a ON r.article_id = a.id \
         WHERE r.ai_caption IS NULL AND r.status = 'pending' \
         ORDER BY r.caption_attempts ASC, julianday(r.created_at) ASC, r.id ASC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch reposts needing captions")?;

    let targets = rows
        .into_iter()
        .map(|row| CaptionTarget {
            repost_id: row.get("repost_id"),
            title: row.get("title"),
            content: row.get("content"),
        })
        .collect();
    Ok(targets)
}

/// Fill `ai_caption` if it is still empty. Never touches `status`.
#[instrument(skip_all)]
pub async fn set_ai_caption(pool: &Pool, id: &str, caption: &str, now: DateTime<Utc>) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE reposts SET ai_caption = ?, updated_at = ? WHERE id = ? AND ai_caption IS NULL",
    )
    .bind(caption)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to store caption for repost {}", id))?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn record_caption_failure(pool: &Pool, id: &str, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE reposts SET caption_attempts = caption_attempts + 1, updated_at = ? \
         WHERE id = ? AND ai_caption IS NULL",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await
    .with_context(|| format!("failed to record caption failure for repost {}", id))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tokens and sessions
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_verification_token(
    pool: &Pool,
    identifier: &str,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO verification_tokens (identifier, token, expires_at) VALUES (?, ?, ?)")
        .bind(identifier)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn insert_session(
    pool: &Pool,
    session_token: &str,
    user_id: &str,
    expires_at: DateTime<Utc>,
) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO sessions (id, session_token, user_id, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(session_token)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn delete_verification_tokens_expired_before(
    pool: &Pool,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let res = sqlx::query("DELETE FROM verification_tokens WHERE julianday(expires_at) < julianday(?)")
        .bind(cutoff)
        .execute(pool)
        .await
        .context("failed to delete verification tokens")?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn delete_sessions_expired_before(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query("DELETE FROM sessions WHERE julianday(expires_at) < julianday(?)")
        .bind(cutoff)
        .execute(pool)
        .await
        .context("failed to delete sessions")?;
    Ok(res.rows_affected())
}

/// Delete articles created before `cutoff` that no repost references.
#[instrument(skip_all)]
pub async fn delete_unreferenced_articles_before(
    pool: &Pool,
    cutoff: DateTime<Utc>,
) -> Result<u64> {
    let res = sqlx::query(
        "DELETE FROM articles \
         WHERE julianday(created_at) < julianday(?) \
           AND NOT EXISTS (SELECT 1 FROM reposts r WHERE r.article_id = articles.id)",
    )
    .bind(cutoff)
    .execute(pool)
    .await
    .context("failed to delete old articles")?;
    Ok(res.rows_affected())
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn get_settings(pool: &Pool) -> Result<BTreeMap<String, String>> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM system_settings")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().collect())
}

/// Upsert every entry by key in a single transaction.
#[instrument(skip_all)]
pub async fn upsert_settings(
    pool: &Pool,
    settings: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for (key, value) in settings {
        sqlx::query(
            "INSERT INTO system_settings (key, value, created_at, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to upsert setting {}", key))?;
    }
    tx.commit().await?;
    Ok(())
}
