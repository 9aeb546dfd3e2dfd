// src/repositories/post_repository.rs
//
// Published posts and their metrics

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp};
use crate::db::ConnectionPool;
use crate::domain::{Post, PostMetrics};
use crate::error::AppResult;

pub trait PostRepository: Send + Sync {
    /// Insert the post and mark its request used, all or nothing.
    fn insert_for_request(&self, post: &Post) -> AppResult<()>;
    fn get_by_id(&self, id: &str) -> AppResult<Option<Post>>;
    fn exists_for_request(&self, request_id: Uuid) -> AppResult<bool>;
    fn latest_published_at(&self, channel: &str) -> AppResult<Option<DateTime<Utc>>>;
    /// Posts published inside `[from, to]`, oldest first
    fn list_published_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Post>>;
    fn update_metrics(
        &self,
        id: &str,
        metrics: &PostMetrics,
        updated_at: DateTime<Utc>,
    ) -> AppResult<()>;
    /// User id of the request behind a post
    fn author_of(&self, post_id: &str) -> AppResult<Option<String>>;
}

pub struct SqlitePostRepository {
    pool: Arc<ConnectionPool>,
}

const COLUMNS: &str = "id, request_id, channel, uri, published_at, impressions, reactions, \
     shares, comments, engaged_users, clicks, metrics_updated_at";

impl SqlitePostRepository {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn row_to_post(row: &Row) -> Result<Post, rusqlite::Error> {
        let request_id: String = row.get("request_id")?;
        let request_id = Uuid::parse_str(&request_id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let reactions_json: String = row.get("reactions")?;
        let reactions: BTreeMap<String, u64> =
            serde_json::from_str(&reactions_json).unwrap_or_default();

        let published_at: String = row.get("published_at")?;
        let metrics_updated_at: Option<String> = row.get("metrics_updated_at")?;
        let count = |name: &str| -> Result<u64, rusqlite::Error> {
            let value: i64 = row.get(name)?;
            Ok(value.max(0) as u64)
        };

        Ok(Post {
            id: row.get("id")?,
            request_id,
            channel: row.get("channel")?,
            uri: row.get("uri")?,
            published_at: parse_timestamp(&published_at)?,
            metrics: PostMetrics {
                impressions: count("impressions")?,
                reactions,
                shares: count("shares")?,
                comments: count("comments")?,
                engaged_users: count("engaged_users")?,
                clicks: count("clicks")?,
            },
            metrics_updated_at: metrics_updated_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

impl PostRepository for SqlitePostRepository {
    fn insert_for_request(&self, post: &Post) -> AppResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO posts (
                id, request_id, channel, uri, published_at, impressions, reactions,
                shares, comments, engaged_users, clicks, metrics_updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                post.id,
                post.request_id.to_string(),
                post.channel,
                post.uri,
                format_timestamp(&post.published_at),
                post.metrics.impressions as i64,
                serde_json::to_string(&post.metrics.reactions)?,
                post.metrics.shares as i64,
                post.metrics.comments as i64,
                post.metrics.engaged_users as i64,
                post.metrics.clicks as i64,
                post.metrics_updated_at.as_ref().map(format_timestamp),
            ],
        )?;
        tx.execute(
            "UPDATE requests SET used = 1 WHERE id = ?1",
            params![post.request_id.to_string()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> AppResult<Option<Post>> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM posts WHERE id = ?1", COLUMNS);
        let post = conn
            .query_row(&sql, params![id], Self::row_to_post)
            .optional()?;
        Ok(post)
    }

    fn exists_for_request(&self, request_id: Uuid) -> AppResult<bool> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE request_id = ?1",
            params![request_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn latest_published_at(&self, channel: &str) -> AppResult<Option<DateTime<Utc>>> {
        let conn = self.pool.get()?;
        let latest: Option<String> = conn
            .query_row(
                "SELECT MAX(published_at) FROM posts WHERE channel = ?1",
                params![channel],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(latest.as_deref().map(parse_timestamp).transpose()?)
    }

    fn list_published_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AppResult<Vec<Post>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {} FROM posts WHERE published_at BETWEEN ?1 AND ?2 ORDER BY published_at",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let posts = stmt
            .query_map(
                params![format_timestamp(&from), format_timestamp(&to)],
                Self::row_to_post,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    fn update_metrics(
        &self,
        id: &str,
        metrics: &PostMetrics,
        updated_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE posts SET impressions = ?1, reactions = ?2, shares = ?3, comments = ?4,
                engaged_users = ?5, clicks = ?6, metrics_updated_at = ?7
             WHERE id = ?8",
            params![
                metrics.impressions as i64,
                serde_json::to_string(&metrics.reactions)?,
                metrics.shares as i64,
                metrics.comments as i64,
                metrics.engaged_users as i64,
                metrics.clicks as i64,
                format_timestamp(&updated_at),
                id,
            ],
        )?;
        Ok(())
    }

    fn author_of(&self, post_id: &str) -> AppResult<Option<String>> {
        let conn = self.pool.get()?;
        let author = conn
            .query_row(
                "SELECT r.user_id FROM posts p JOIN requests r ON r.id = p.request_id
                 WHERE p.id = ?1",
                params![post_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(author)
    }
}

// ============================================================================
// Repository contract
// ============================================================================
//
// - A post row and its request's `used` flag are written in one transaction
// - At most one post per (request, channel)
// - Posts are never deleted
