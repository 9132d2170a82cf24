use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a repost. Transitions only move forward:
/// `Pending -> Posted` or `Pending -> Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepostStatus {
    Pending,
    Posted,
    Failed,
}

impl RepostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepostStatus::Pending => "pending",
            RepostStatus::Posted => "posted",
            RepostStatus::Failed => "failed",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RepostStatus::Pending),
            "posted" => Some(RepostStatus::Posted),
            "failed" => Some(RepostStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RepostStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub platforms: Vec<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
    pub original_url: String,
    pub platform: String,
    pub author_name: Option<String>,
    pub author_id: Option<String>,
    pub published_at: DateTime<Utc>,
    pub topic_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAccount {
    pub id: String,
    pub platform: String,
    pub account_id: String,
    pub account_name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repost {
    pub id: String,
    pub article_id: String,
    pub media_account_id: String,
    pub custom_caption: Option<String>,
    pub ai_caption: Option<String>,
    pub status: RepostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub caption_attempts: i64,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A search hit returned by an [`ArticleSearch`](crate::services::ArticleSearch)
/// backend, before it is bound to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleCandidate {
    /// Identifier unique within the source platform.
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub original_url: String,
    pub platform: String,
    pub author_name: Option<String>,
    pub author_id: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl ArticleCandidate {
    /// Article id for this candidate under `topic_id`. Stable across fetches,
    /// so re-ingesting the same hit resolves to the same row.
    pub fn article_id(&self, topic_id: &str) -> String {
        format!("{}:{}", topic_id, self.source_id)
    }
}
