use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{ArticleSearch, CaptionGenerator, Publisher};
use crate::clock::Clock;
use crate::model::ArticleCandidate;

const CAPTION_SNIPPET_CHARS: usize = 50;

/// Logs the post instead of calling a platform and hands back a fresh id.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedPublisher;

#[async_trait]
impl Publisher for SimulatedPublisher {
    async fn publish(&self, platform: &str, account_handle: &str, caption: &str) -> Result<String> {
        if platform.trim().is_empty() {
            bail!("cannot publish without a platform");
        }
        info!("Posting to {} (@{}): {}", platform, account_handle, caption);
        Ok(format!("sim-{}", uuid::Uuid::new_v4()))
    }
}

/// Produces one candidate per platform. Source ids only change once per
/// `window_secs`, so repeated searches inside a window return the same hits.
#[derive(Clone)]
pub struct SimulatedSearch {
    clock: Arc<dyn Clock>,
    window_secs: i64,
}

impl SimulatedSearch {
    pub fn new(clock: Arc<dyn Clock>, window_secs: i64) -> Self {
        Self {
            clock,
            window_secs: window_secs.max(1),
        }
    }
}

#[async_trait]
impl ArticleSearch for SimulatedSearch {
    async fn search(&self, keywords: &[String], platforms: &[String]) -> Result<Vec<ArticleCandidate>> {
        let now = self.clock.now();
        let bucket = now.timestamp().div_euclid(self.window_secs);
        let slug = slugify(keywords);
        let joined = keywords.join(", ");

        let hits = platforms
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|platform| {
                let source_id = format!("{}-{}-{}", platform, slug, bucket);
                ArticleCandidate {
                    title: format!("Article about {}", joined),
                    content: format!("Content related to keywords: {}", joined),
                    original_url: format!("https://example.com/article/{}", source_id),
                    platform: platform.clone(),
                    author_name: None,
                    author_id: None,
                    published_at: now,
                    source_id,
                }
            })
            .collect();
        Ok(hits)
    }
}

fn slugify(keywords: &[String]) -> String {
    let slug: String = keywords
        .iter()
        .map(|k| {
            k.trim()
                .chars()
                .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                .collect::<String>()
        })
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        "any".to_string()
    } else {
        slug
    }
}

/// Fixed-format caption built from the title and the start of the body.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateCaptioner;

#[async_trait]
impl CaptionGenerator for TemplateCaptioner {
    async fn generate(&self, title: &str, content: &str) -> Result<String> {
        let snippet: String = content.chars().take(CAPTION_SNIPPET_CHARS).collect();
        Ok(format!("🚀 {} - {}... #socialmedia #growth", title, snippet))
    }
}
