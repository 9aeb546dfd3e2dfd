// src/integrations/facebook/client.rs
//
// Facebook Graph API Integration
//
// ARCHITECTURE:
// - Page-token client for photos, feed posts, comments and insights
// - Maps Graph responses → DTOs (NO domain mutation beyond metric values)
// - Exposed to the core through the `Channel` seam
//
// CRITICAL RULES:
// - This is INFRASTRUCTURE, not DOMAIN
// - Never touches the database
// - Handles all Graph API concerns (auth, multipart, response shapes)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{multipart, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ChannelConfig;
use crate::domain::PostMetrics;
use crate::error::{AppError, AppResult};
use crate::integrations::channel::{Channel, IncomingComment, PublishedPost};

/// Reaction types fetched per post
const REACTION_TYPES: [&str; 6] = ["LIKE", "LOVE", "WOW", "HAHA", "SAD", "ANGRY"];

/// Recent page posts whose comments are ingested
const COMMENT_SOURCES: u32 = 5;

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
    post_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    created_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentData {
    id: String,
    from: Option<FromData>,
    message: Option<String>,
    created_time: String,
}

#[derive(Debug, Deserialize)]
struct FromData {
    id: String,
    name: String,
}

/// Graph timestamps look like `2024-01-31T18:00:00+0000`
pub fn parse_graph_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Fold an insights payload into metrics
///
/// `{data: [{name, values: [{value}]}]}`; `post_clicks_by_type` carries an
/// object whose counts are summed.
pub fn parse_insights(payload: &Value, metrics: &mut PostMetrics) {
    let entries = match payload.get("data").and_then(Value::as_array) {
        Some(entries) => entries,
        None => return,
    };

    for entry in entries {
        let name = entry.get("name").and_then(Value::as_str).unwrap_or_default();
        let value = entry
            .get("values")
            .and_then(Value::as_array)
            .and_then(|values| values.first())
            .and_then(|v| v.get("value"));

        let count = match value {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::Object(map)) => map.values().filter_map(Value::as_u64).sum(),
            _ => 0,
        };

        match name {
            "post_impressions" => metrics.impressions = count,
            "post_engaged_users" => metrics.engaged_users = count,
            "post_clicks_by_type" | "post_clicks" => metrics.clicks = count,
            _ => {}
        }
    }
}

/// Fold a reactions/shares/comments field payload into metrics
pub fn parse_reactions(payload: &Value, metrics: &mut PostMetrics) {
    for reaction in REACTION_TYPES {
        let key = reaction.to_lowercase();
        let count = payload
            .get(&key)
            .and_then(|r| r.pointer("/summary/total_count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if count > 0 {
            metrics.reactions.insert(key, count);
        }
    }

    metrics.shares = payload
        .pointer("/shares/count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    metrics.comments = payload
        .pointer("/comments/summary/total_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
}

fn reaction_fields() -> String {
    let mut fields: Vec<String> = REACTION_TYPES
        .iter()
        .map(|r| {
            format!(
                "reactions.type({}).limit(0).summary(total_count).as({})",
                r,
                r.to_lowercase()
            )
        })
        .collect();
    fields.push("shares".to_string());
    fields.push("comments.limit(0).summary(true)".to_string());
    fields.join(",")
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

/// Graph API client bound to one page
pub struct FacebookClient {
    name: String,
    graph_url: String,
    access_token: String,
    http_client: Client,
}

impl FacebookClient {
    pub fn new(graph_url: &str, channel: &ChannelConfig) -> AppResult<Self> {
        let http_client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            name: channel.name.clone(),
            graph_url: graph_url.trim_end_matches('/').to_string(),
            access_token: channel.access_token.clone(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.graph_url, path.trim_start_matches('/'))
    }

    async fn image_part(path: &Path) -> AppResult<multipart::Part> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("frame.png")
            .to_string();
        multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))
            .map_err(|e| AppError::Other(format!("Invalid mime type: {}", e)))
    }

    async fn read_json<T>(response: reqwest::Response) -> AppResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Other(format!("Graph API status {}: {}", status, text)));
        }
        serde_json::from_str(&text).map_err(|e| {
            AppError::Other(format!("Failed to parse Graph response: {} - body: {}", e, text))
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> AppResult<Value> {
        let response = self
            .http_client
            .get(self.url(path))
            .query(&[("access_token", self.access_token.as_str())])
            .query(query)
            .send()
            .await?;
        Self::read_json(response).await
    }

    /// POST /me/photos; `published = false` stages an image for a feed post
    pub async fn upload_photo(
        &self,
        image: &Path,
        caption: Option<&str>,
        published: bool,
    ) -> AppResult<String> {
        let mut form = multipart::Form::new()
            .text("published", published.to_string())
            .part("source", Self::image_part(image).await?);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .http_client
            .post(self.url("me/photos"))
            .query(&[("access_token", self.access_token.as_str())])
            .multipart(form)
            .send()
            .await?;

        let created: IdResponse = Self::read_json(response).await?;
        Ok(created.post_id.unwrap_or(created.id))
    }

    /// POST /me/feed with staged photos attached in order
    pub async fn post_feed(&self, message: &str, media_ids: &[String]) -> AppResult<String> {
        let mut form: Vec<(String, String)> = vec![("message".to_string(), message.to_string())];
        for (i, media_id) in media_ids.iter().enumerate() {
            form.push((
                format!("attached_media[{}]", i),
                json!({ "media_fbid": media_id }).to_string(),
            ));
        }

        let response = self
            .http_client
            .post(self.url("me/feed"))
            .query(&[("access_token", self.access_token.as_str())])
            .form(&form)
            .send()
            .await?;

        let created: IdResponse = Self::read_json(response).await?;
        Ok(created.id)
    }

    pub async fn recent_posts(&self, limit: u32) -> AppResult<Vec<(String, Option<DateTime<Utc>>)>> {
        let payload = self
            .get(
                "me/posts",
                &[
                    ("fields", "id,created_time".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let posts: DataResponse<PostData> = serde_json::from_value(payload)?;
        Ok(posts
            .data
            .into_iter()
            .map(|p| {
                let created = p.created_time.as_deref().and_then(parse_graph_time);
                (p.id, created)
            })
            .collect())
    }

    pub async fn post_comments(&self, post_id: &str, limit: u32) -> AppResult<Vec<IncomingComment>> {
        let payload = self
            .get(
                &format!("{}/comments", post_id),
                &[
                    ("fields", "id,from,message,created_time".to_string()),
                    ("order", "reverse_chronological".to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        let comments: DataResponse<CommentData> = serde_json::from_value(payload)?;

        Ok(comments
            .data
            .into_iter()
            .filter_map(|c| {
                // Comments by deleted or private profiles carry no author
                let from = c.from?;
                Some(IncomingComment {
                    id: c.id,
                    user_id: from.id,
                    user_name: from.name,
                    message: c.message.unwrap_or_default(),
                    created_time: parse_graph_time(&c.created_time).unwrap_or_else(Utc::now),
                })
            })
            .collect())
    }
}

#[async_trait]
impl Channel for FacebookClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn latest_post_time(&self) -> AppResult<Option<DateTime<Utc>>> {
        Ok(self.recent_posts(1).await?.into_iter().next().and_then(|(_, t)| t))
    }

    async fn publish(&self, caption: &str, images: &[PathBuf]) -> AppResult<PublishedPost> {
        let id = match images {
            [] => return Err(AppError::Other("Nothing to publish".to_string())),
            [single] => self.upload_photo(single, Some(caption), true).await?,
            many => {
                let mut media_ids = Vec::with_capacity(many.len());
                for image in many {
                    media_ids.push(self.upload_photo(image, None, false).await?);
                }
                self.post_feed(caption, &media_ids).await?
            }
        };

        log::info!("[{}] Published post {}", self.name, id);
        Ok(PublishedPost {
            uri: format!("https://www.facebook.com/{}", id),
            id,
        })
    }

    async fn comment(
        &self,
        post_id: &str,
        text: &str,
        image: Option<PathBuf>,
    ) -> AppResult<String> {
        let mut form = multipart::Form::new().text("message", text.to_string());
        if let Some(image) = image {
            form = form.part("source", Self::image_part(&image).await?);
        }

        let response = self
            .http_client
            .post(self.url(&format!("{}/comments", post_id)))
            .query(&[("access_token", self.access_token.as_str())])
            .multipart(form)
            .send()
            .await?;

        let created: IdResponse = Self::read_json(response).await?;
        Ok(created.id)
    }

    async fn fetch_metrics(&self, post_id: &str) -> AppResult<PostMetrics> {
        let mut metrics = PostMetrics::default();

        let insights = self
            .get(
                &format!("{}/insights", post_id),
                &[(
                    "metric",
                    "post_impressions,post_engaged_users,post_clicks_by_type".to_string(),
                )],
            )
            .await?;
        parse_insights(&insights, &mut metrics);

        let reactions = self.get(post_id, &[("fields", reaction_fields())]).await?;
        parse_reactions(&reactions, &mut metrics);

        Ok(metrics)
    }

    async fn fetch_comments(&self, limit: u32) -> AppResult<Vec<IncomingComment>> {
        let mut comments = Vec::new();
        for (post_id, _) in self.recent_posts(COMMENT_SOURCES).await? {
            match self.post_comments(&post_id, limit).await {
                Ok(batch) => comments.extend(batch),
                Err(e) => log::warn!("[{}] Skipping comments of {}: {}", self.name, post_id, e),
            }
        }
        Ok(comments)
    }
}
