use chrono::Duration;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::config::Retention;
use crate::db::{self, Pool};

/// Rows removed by each sweep step; `None` means that step failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub verification_tokens: Option<u64>,
    pub sessions: Option<u64>,
    pub articles: Option<u64>,
}

impl SweepSummary {
    pub fn failed_steps(&self) -> usize {
        [self.verification_tokens, self.sessions, self.articles]
            .iter()
            .filter(|s| s.is_none())
            .count()
    }
}

/// Delete expired tokens, expired sessions and stale unreferenced articles.
///
/// Each step runs regardless of how the others went.
#[instrument(skip_all)]
pub async fn cleanup_old_data(pool: &Pool, clock: &dyn Clock, retention: &Retention) -> SweepSummary {
    let now = clock.now();

    let verification_tokens = step(
        "verification tokens",
        db::delete_verification_tokens_expired_before(
            pool,
            now - Duration::days(retention.verification_token_days),
        )
        .await,
    );
    let sessions = step(
        "sessions",
        db::delete_sessions_expired_before(pool, now - Duration::days(retention.session_days)).await,
    );
    let articles = step(
        "articles",
        db::delete_unreferenced_articles_before(pool, now - Duration::days(retention.article_days))
            .await,
    );

    let summary = SweepSummary {
        verification_tokens,
        sessions,
        articles,
    };
    info!(failed_steps = summary.failed_steps(), "cleanup completed");
    summary
}

fn step(what: &str, res: anyhow::Result<u64>) -> Option<u64> {
    match res {
        Ok(n) => {
            if n > 0 {
                info!(deleted = n, "deleted old {}", what);
            }
            Some(n)
        }
        Err(err) => {
            warn!(?err, "failed to clean up {}", what);
            None
        }
    }
}
