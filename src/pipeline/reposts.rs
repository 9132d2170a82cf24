use anyhow::Result;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::caption::resolve_caption;
use crate::clock::Clock;
use crate::config::Reposts;
use crate::db::{self, DueRepost, Pool};
use crate::model::RepostStatus;
use crate::services::Publisher;

/// Why a single repost could not be posted on this fire.
#[derive(Debug, Error)]
pub enum RepostError {
    #[error("article {0} not found")]
    ArticleMissing(String),
    #[error("media account {0} not found")]
    AccountMissing(String),
    #[error("publish to {platform} failed: {message}")]
    Publish { platform: String, message: String },
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
    /// Published, but the transition to `posted` could not be saved.
    #[error("published as {external_id} but status not saved: {message}")]
    Unrecorded { external_id: String, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub selected: usize,
    pub posted: usize,
    pub failed: usize,
    /// Reposts that hit the attempt cap on this fire and are now `failed`.
    pub abandoned: usize,
    /// Published, but still `pending` because the store update failed.
    pub unrecorded: usize,
}

/// Post one bounded batch of due reposts.
///
/// Only the initial batch query can fail the whole fire. Every item after
/// that succeeds or fails on its own; a failed item stays `pending` (or turns
/// `failed` once the attempt cap is reached) and the loop moves on.
#[instrument(skip_all)]
pub async fn process_due_reposts(
    pool: &Pool,
    publisher: &dyn Publisher,
    clock: &dyn Clock,
    opts: &Reposts,
) -> Result<ProcessSummary> {
    let due = db::list_due_reposts(pool, clock.now(), opts.batch_size).await?;
    let mut summary = ProcessSummary {
        selected: due.len(),
        ..Default::default()
    };

    for item in &due {
        match process_repost(pool, publisher, clock, item).await {
            Ok(true) => summary.posted += 1,
            Ok(false) => debug!(repost_id = %item.id, "repost left pending state concurrently"),
            // Already published; attempts stay unchanged.
            Err(err @ RepostError::Unrecorded { .. }) => {
                summary.unrecorded += 1;
                error!(repost_id = %item.id, error = %err, "repost published but not marked posted");
            }
            Err(err) => {
                summary.failed += 1;
                warn!(repost_id = %item.id, attempt = item.attempts + 1, error = %err, "repost failed");
                match db::record_repost_failure(
                    pool,
                    &item.id,
                    &err.to_string(),
                    opts.max_attempts,
                    clock.now(),
                )
                .await
                {
                    Ok(Some(RepostStatus::Failed)) => {
                        summary.abandoned += 1;
                        warn!(repost_id = %item.id, max_attempts = opts.max_attempts, "repost gave up");
                    }
                    Ok(_) => {}
                    Err(err) => error!(repost_id = %item.id, ?err, "failed to record repost failure"),
                }
            }
        }
    }

    if summary.selected > 0 {
        info!(
            selected = summary.selected,
            posted = summary.posted,
            failed = summary.failed,
            abandoned = summary.abandoned,
            unrecorded = summary.unrecorded,
            "processed scheduled reposts"
        );
    }
    Ok(summary)
}

/// Resolve dependencies, publish and mark one repost posted.
///
/// Returns `Ok(false)` when the publish succeeded but the row was no longer
/// pending by the time it was updated.
#[instrument(skip_all, fields(repost_id = %item.id))]
pub async fn process_repost(
    pool: &Pool,
    publisher: &dyn Publisher,
    clock: &dyn Clock,
    item: &DueRepost,
) -> Result<bool, RepostError> {
    let article = db::fetch_article(pool, &item.article_id)
        .await
        .map_err(RepostError::Store)?
        .ok_or_else(|| RepostError::ArticleMissing(item.article_id.clone()))?;
    let account = db::fetch_media_account(pool, &item.media_account_id)
        .await
        .map_err(RepostError::Store)?
        .ok_or_else(|| RepostError::AccountMissing(item.media_account_id.clone()))?;

    let caption = resolve_caption(
        item.custom_caption.as_deref(),
        item.ai_caption.as_deref(),
        &article.content,
    );

    let external_id = publisher
        .publish(&account.platform, &account.account_name, caption)
        .await
        .map_err(|err| RepostError::Publish {
            platform: account.platform.clone(),
            message: format!("{:#}", err),
        })?;

    let marked = db::mark_repost_posted(pool, &item.id, Some(&external_id), clock.now()).await;
    marked.map_err(|err| RepostError::Unrecorded {
        message: format!("{:#}", err),
        external_id,
    })
}
