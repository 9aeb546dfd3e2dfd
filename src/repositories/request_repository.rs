// src/repositories/request_repository.rs
//
// Request queue persistence, daily role limits and the chamber log

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::Arc;
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp};
use crate::db::ConnectionPool;
use crate::domain::{Command, LimitKind, Request};
use crate::error::AppResult;

pub trait RequestRepository: Send + Sync {
    fn insert(&self, request: &Request) -> AppResult<()>;
    /// Persist every mutable column of an existing request
    fn update(&self, request: &Request) -> AppResult<()>;
    fn get_by_id(&self, id: Uuid) -> AppResult<Option<Request>>;

    /// A content-identical request that is still pending or linked to one of
    /// the last `window_posts` posts.
    fn find_duplicate(
        &self,
        user_id: &str,
        comment: &str,
        window_posts: u32,
    ) -> AppResult<Option<Uuid>>;

    fn exists_for_source(&self, source_comment_id: &str) -> AppResult<bool>;

    /// Uniformly random unused request, skipping the ids in `exclude` and
    /// requests iced after `iced_before`.
    fn pick_random(
        &self,
        verified: bool,
        tag: Option<&str>,
        iced_before: DateTime<Utc>,
        exclude: &[Uuid],
    ) -> AppResult<Option<Request>>;

    /// Oldest unused requests first
    fn list_oldest(&self, verified: bool, limit: u32) -> AppResult<Vec<Request>>;

    fn mark_used(&self, id: Uuid) -> AppResult<()>;

    /// Count one hit unless `limit` is already reached. Returns whether the
    /// hit was counted.
    fn try_consume_limit(
        &self,
        user_id: &str,
        kind: LimitKind,
        limit: u32,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Consume one hit of `limit` and insert `request` in one transaction.
    /// Returns false, inserting nothing, when the limit is already reached.
    /// `None` skips the limit.
    fn insert_within_limit(
        &self,
        request: &Request,
        limit: Option<(LimitKind, u32)>,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    fn limit_hits(&self, user_id: &str, kind: LimitKind) -> AppResult<u32>;

    /// Zero every counter; returns the number of rows touched
    fn reset_limits(&self, now: DateTime<Utc>) -> AppResult<usize>;

    fn log_verdict(&self, request_id: Uuid, operator_id: &str, verdict: &str) -> AppResult<()>;

    fn verdicts_for(&self, request_id: Uuid) -> AppResult<Vec<String>>;
}

pub struct SqliteRequestRepository {
    pool: Arc<ConnectionPool>,
}

const COLUMNS: &str = "id, user_id, comment, appended, command, verified, used, iced_count, \
     last_iced_at, language, tag, source_comment_id, created_at";

impl SqliteRequestRepository {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn row_to_request(row: &Row) -> Result<Request, rusqlite::Error> {
        let id_str: String = row.get("id")?;
        let id = Uuid::parse_str(&id_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        let command_str: String = row.get("command")?;
        let command = Command::parse(&command_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown command '{}'", command_str).into(),
            )
        })?;

        let iced_count: i64 = row.get("iced_count")?;
        let last_iced_at: Option<String> = row.get("last_iced_at")?;
        let created_at: String = row.get("created_at")?;

        Ok(Request {
            id,
            user_id: row.get("user_id")?,
            comment: row.get("comment")?,
            appended: row.get("appended")?,
            command,
            verified: row.get("verified")?,
            used: row.get("used")?,
            iced_count: iced_count.max(0) as u32,
            last_iced_at: last_iced_at.as_deref().map(parse_timestamp).transpose()?,
            language: row.get("language")?,
            tag: row.get("tag")?,
            source_comment_id: row.get("source_comment_id")?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

impl RequestRepository for SqliteRequestRepository {
    fn insert(&self, request: &Request) -> AppResult<()> {
        let conn = self.pool.get()?;
        insert_row(&conn, request)?;
        Ok(())
    }

    fn update(&self, request: &Request) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE requests SET
                appended = ?1, verified = ?2, used = ?3, iced_count = ?4,
                last_iced_at = ?5, tag = ?6
             WHERE id = ?7",
            params![
                request.appended,
                request.verified,
                request.used,
                request.iced_count as i64,
                request.last_iced_at.as_ref().map(format_timestamp),
                request.tag,
                request.id.to_string(),
            ],
        )?;
        Ok(())
    }

    fn get_by_id(&self, id: Uuid) -> AppResult<Option<Request>> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM requests WHERE id = ?1", COLUMNS);
        let request = conn
            .query_row(&sql, params![id.to_string()], Self::row_to_request)
            .optional()?;
        Ok(request)
    }

    fn find_duplicate(
        &self,
        user_id: &str,
        comment: &str,
        window_posts: u32,
    ) -> AppResult<Option<Uuid>> {
        let conn = self.pool.get()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT id FROM requests
                 WHERE user_id = ?1 AND comment = ?2
                   AND (used = 0 OR id IN (
                        SELECT request_id FROM posts
                        ORDER BY published_at DESC LIMIT ?3))
                 LIMIT 1",
                params![user_id, comment, window_posts as i64],
                |row| row.get(0),
            )
            .optional()?;

        Ok(found.map(|id| Uuid::parse_str(&id)).transpose()?)
    }

    fn exists_for_source(&self, source_comment_id: &str) -> AppResult<bool> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM requests WHERE source_comment_id = ?1",
            params![source_comment_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn pick_random(
        &self,
        verified: bool,
        tag: Option<&str>,
        iced_before: DateTime<Utc>,
        exclude: &[Uuid],
    ) -> AppResult<Option<Request>> {
        let conn = self.pool.get()?;
        let excluded = (0..exclude.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM requests
             WHERE verified = ?1 AND used = 0
               AND (?2 IS NULL OR tag = ?2)
               AND (last_iced_at IS NULL OR last_iced_at < ?3)
               {}
             ORDER BY RANDOM() LIMIT 1",
            COLUMNS,
            if exclude.is_empty() {
                String::new()
            } else {
                format!("AND id NOT IN ({})", excluded)
            }
        );

        let mut values = vec![
            Value::Integer(verified as i64),
            tag.map_or(Value::Null, |t| Value::Text(t.to_string())),
            Value::Text(format_timestamp(&iced_before)),
        ];
        values.extend(exclude.iter().map(|id| Value::Text(id.to_string())));

        let request = conn
            .query_row(&sql, params_from_iter(values), Self::row_to_request)
            .optional()?;
        Ok(request)
    }

    fn list_oldest(&self, verified: bool, limit: u32) -> AppResult<Vec<Request>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {} FROM requests WHERE verified = ?1 AND used = 0
             ORDER BY created_at ASC LIMIT ?2",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let requests = stmt
            .query_map(params![verified, limit as i64], Self::row_to_request)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    fn mark_used(&self, id: Uuid) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE requests SET used = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    fn try_consume_limit(
        &self,
        user_id: &str,
        kind: LimitKind,
        limit: u32,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let conn = self.pool.get()?;
        Ok(consume_hit(&conn, user_id, kind, limit, now)?)
    }

    fn insert_within_limit(
        &self,
        request: &Request,
        limit: Option<(LimitKind, u32)>,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        if let Some((kind, limit)) = limit {
            if !consume_hit(&tx, &request.user_id, kind, limit, now)? {
                return Ok(false);
            }
        }
        insert_row(&tx, request)?;

        tx.commit()?;
        Ok(true)
    }

    fn limit_hits(&self, user_id: &str, kind: LimitKind) -> AppResult<u32> {
        let conn = self.pool.get()?;
        let hits: Option<i64> = conn
            .query_row(
                "SELECT hits FROM role_limits WHERE user_id = ?1 AND kind = ?2",
                params![user_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hits.unwrap_or(0).max(0) as u32)
    }

    fn reset_limits(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE role_limits SET hits = 0, window_start = ?1",
            params![format_timestamp(&now)],
        )?;
        Ok(rows)
    }

    fn log_verdict(&self, request_id: Uuid, operator_id: &str, verdict: &str) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO chamber_log (request_id, operator_id, verdict, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                request_id.to_string(),
                operator_id,
                verdict,
                format_timestamp(&Utc::now())
            ],
        )?;
        Ok(())
    }

    fn verdicts_for(&self, request_id: Uuid) -> AppResult<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT verdict FROM chamber_log WHERE request_id = ?1 ORDER BY id")?;
        let verdicts = stmt
            .query_map(params![request_id.to_string()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(verdicts)
    }
}

// ============================================================================
// Repository contract
// ============================================================================
//
// - Requests are never deleted; `used` is terminal
// - `try_consume_limit` is a single atomic upsert guarded by `hits < limit`
// - `pick_random` never returns used requests

fn insert_row(conn: &Connection, request: &Request) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO requests (
            id, user_id, comment, appended, command, verified, used, iced_count,
            last_iced_at, language, tag, source_comment_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            request.id.to_string(),
            request.user_id,
            request.comment,
            request.appended,
            request.command.name(),
            request.verified,
            request.used,
            request.iced_count as i64,
            request.last_iced_at.as_ref().map(format_timestamp),
            request.language,
            request.tag,
            request.source_comment_id,
            format_timestamp(&request.created_at),
        ],
    )
}

/// Row-level check-and-increment; a full counter is left untouched
fn consume_hit(
    conn: &Connection,
    user_id: &str,
    kind: LimitKind,
    limit: u32,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    if limit == 0 {
        return Ok(false);
    }
    let changed = conn.execute(
        "INSERT INTO role_limits (user_id, kind, hits, window_start)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT(user_id, kind) DO UPDATE SET hits = hits + 1
         WHERE role_limits.hits < ?4",
        params![user_id, kind.as_str(), format_timestamp(&now), limit as i64],
    )?;
    Ok(changed == 1)
}
