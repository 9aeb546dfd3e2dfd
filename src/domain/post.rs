// src/domain/post.rs
//
// Published artifacts and their engagement metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Engagement counters refreshed from the insights API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostMetrics {
    pub impressions: u64,
    /// Reaction type (lowercase) to count
    pub reactions: BTreeMap<String, u64>,
    pub shares: u64,
    pub comments: u64,
    pub engaged_users: u64,
    pub clicks: u64,
}

impl PostMetrics {
    pub fn total_reactions(&self) -> u64 {
        self.reactions.values().sum()
    }
}

/// A post published on a channel; never deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Platform post id
    pub id: String,
    pub request_id: Uuid,
    pub channel: String,
    pub uri: String,
    pub published_at: DateTime<Utc>,
    pub metrics: PostMetrics,
    pub metrics_updated_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn new(id: String, request_id: Uuid, channel: String, uri: String) -> Self {
        Self {
            id,
            request_id,
            channel,
            uri,
            published_at: Utc::now(),
            metrics: PostMetrics::default(),
            metrics_updated_at: None,
        }
    }
}
