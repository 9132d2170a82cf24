use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::db::{self, Pool};
use crate::services::CaptionGenerator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptionSummary {
    pub selected: usize,
    pub generated: usize,
    pub failed: usize,
}

/// Backfill `ai_caption` for up to `limit` pending reposts.
#[instrument(skip_all)]
pub async fn generate_captions(
    pool: &Pool,
    captioner: &dyn CaptionGenerator,
    clock: &dyn Clock,
    limit: i64,
) -> Result<CaptionSummary> {
    let targets = db::list_reposts_needing_caption(pool, limit).await?;
    let mut summary = CaptionSummary {
        selected: targets.len(),
        ..Default::default()
    };

    for target in &targets {
        let caption = match captioner.generate(&target.title, &target.content).await {
            Ok(caption) => caption,
            Err(err) => {
                summary.failed += 1;
                warn!(repost_id = %target.repost_id, ?err, "caption generation failed");
                if let Err(err) = db::record_caption_failure(pool, &target.repost_id, clock.now()).await {
                    warn!(repost_id = %target.repost_id, ?err, "failed to record caption failure");
                }
                continue;
            }
        };
        match db::set_ai_caption(pool, &target.repost_id, &caption, clock.now()).await {
            Ok(true) => summary.generated += 1,
            Ok(false) => {}
            Err(err) => {
                summary.failed += 1;
                warn!(repost_id = %target.repost_id, ?err, "failed to store caption");
            }
        }
    }

    if summary.generated > 0 || summary.failed > 0 {
        info!(
            generated = summary.generated,
            failed = summary.failed,
            "generated AI captions"
        );
    }
    Ok(summary)
}
