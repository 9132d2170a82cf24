use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::db::{self, NewArticle, Pool};
use crate::model::Topic;
use crate::services::ArticleSearch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub topics: usize,
    pub inserted: usize,
    pub existing: usize,
    /// Hits the store refused to write.
    pub failed_articles: usize,
    pub failed_topics: usize,
}

/// Search every topic's keywords and store new hits.
///
/// Hits whose article id is already stored are left untouched.
#[instrument(skip_all)]
pub async fn fetch_articles(
    pool: &Pool,
    search: &dyn ArticleSearch,
    clock: &dyn Clock,
) -> Result<IngestSummary> {
    let topics = db::list_topics(pool).await?;
    let mut summary = IngestSummary {
        topics: topics.len(),
        ..Default::default()
    };

    for topic in &topics {
        match ingest_topic(pool, search, clock, topic).await {
            Ok(counts) => {
                summary.inserted += counts.inserted;
                summary.existing += counts.existing;
                summary.failed_articles += counts.failed;
            }
            Err(err) => {
                summary.failed_topics += 1;
                warn!(topic_id = %topic.id, ?err, "failed to fetch articles for topic");
            }
        }
    }

    if summary.inserted > 0 || summary.failed_articles > 0 || summary.failed_topics > 0 {
        info!(
            topics = summary.topics,
            inserted = summary.inserted,
            existing = summary.existing,
            failed_articles = summary.failed_articles,
            failed_topics = summary.failed_topics,
            "fetched articles"
        );
    }
    Ok(summary)
}

#[derive(Default)]
struct TopicCounts {
    inserted: usize,
    existing: usize,
    failed: usize,
}

async fn ingest_topic(
    pool: &Pool,
    search: &dyn ArticleSearch,
    clock: &dyn Clock,
    topic: &Topic,
) -> Result<TopicCounts> {
    info!(
        topic = %topic.name,
        keywords = ?topic.keywords,
        platforms = ?topic.platforms,
        "searching for topic articles"
    );
    let hits = search
        .search(&topic.keywords, &topic.platforms)
        .await
        .with_context(|| format!("search failed for topic {}", topic.id))?;

    let mut counts = TopicCounts::default();
    for hit in hits {
        let article = NewArticle {
            id: hit.article_id(&topic.id),
            title: hit.title,
            content: hit.content,
            original_url: hit.original_url,
            platform: hit.platform,
            author_name: hit.author_name,
            author_id: hit.author_id,
            published_at: hit.published_at,
            topic_id: topic.id.clone(),
            user_id: topic.user_id.clone(),
        };
        match db::upsert_article(pool, &article, clock.now()).await {
            Ok(true) => counts.inserted += 1,
            Ok(false) => counts.existing += 1,
            Err(err) => {
                counts.failed += 1;
                warn!(article_id = %article.id, ?err, "failed to store article");
            }
        }
    }
    Ok(counts)
}
