//! Database view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};

/// Ledger slice the processor needs to post one repost.
#[derive(Debug, Clone)]
pub struct DueRepost {
    pub id: String,
    pub article_id: String,
    pub media_account_id: String,
    pub custom_caption: Option<String>,
    pub ai_caption: Option<String>,
    pub user_id: String,
    pub attempts: i64,
}

/// Pending repost still waiting for a generated caption, joined with its article.
#[derive(Debug, Clone)]
pub struct CaptionTarget {
    pub repost_id: String,
    pub title: String,
    pub content: String,
}

/// Insert payload for an article.
#[derive(Debug, Clone)]
pub struct NewArticle {
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
}

/// Insert payload for a repost. New reposts always start `pending`.
#[derive(Debug, Clone)]
pub struct NewRepost {
    pub article_id: String,
    pub media_account_id: String,
    pub user_id: String,
    pub custom_caption: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
}
