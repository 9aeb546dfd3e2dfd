// src/integrations/channel.rs
//
// Publishing seam
//
// A channel is a social page the publisher posts to and the ingester reads
// comments from. Only the operations the core invokes are modeled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::PostMetrics;
use crate::error::AppResult;

/// Identifier and public link of a freshly published post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub id: String,
    pub uri: String,
}

/// A comment pulled from a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingComment {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub message: String,
    pub created_time: DateTime<Utc>,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Publication time of the page's most recent post
    async fn latest_post_time(&self) -> AppResult<Option<DateTime<Utc>>>;

    /// Single-photo endpoint for one image, multi-image post otherwise.
    /// Image order is preserved.
    async fn publish(&self, caption: &str, images: &[PathBuf]) -> AppResult<PublishedPost>;

    /// Secondary comment under a post, optionally with an image
    async fn comment(&self, post_id: &str, text: &str, image: Option<PathBuf>)
        -> AppResult<String>;

    async fn fetch_metrics(&self, post_id: &str) -> AppResult<PostMetrics>;

    /// Latest comments from the page's recent posts
    async fn fetch_comments(&self, limit: u32) -> AppResult<Vec<IncomingComment>>;
}
