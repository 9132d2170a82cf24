//! Capabilities the pipeline reaches outside the store for.
//!
//! Each one is a trait so tests can swap in recording fakes; `simulated`
//! carries the implementations the scheduler binary runs with.

use anyhow::Result;
use async_trait::async_trait;
use std::any::Any;

use crate::model::ArticleCandidate;

pub mod simulated;

pub use simulated::{SimulatedPublisher, SimulatedSearch, TemplateCaptioner};

/// Posts a caption to a social platform on behalf of an account.
#[async_trait]
pub trait Publisher: Send + Sync + Any {
    /// Returns the platform's identifier for the new post.
    async fn publish(&self, platform: &str, account_handle: &str, caption: &str) -> Result<String>;
}

/// Finds articles matching a topic's keywords on the given platforms.
#[async_trait]
pub trait ArticleSearch: Send + Sync + Any {
    async fn search(&self, keywords: &[String], platforms: &[String]) -> Result<Vec<ArticleCandidate>>;
}

/// Writes a caption for an article.
#[async_trait]
pub trait CaptionGenerator: Send + Sync + Any {
    async fn generate(&self, title: &str, content: &str) -> Result<String>;
}
