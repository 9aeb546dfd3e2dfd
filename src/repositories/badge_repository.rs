// src/repositories/badge_repository.rs
//
// Badge definitions and awards

use rusqlite::{params, Row};
use std::sync::Arc;

use super::{format_timestamp, parse_timestamp};
use crate::db::ConnectionPool;
use crate::domain::{Award, Badge};
use crate::error::AppResult;

pub trait BadgeRepository: Send + Sync {
    /// Write the static badge table
    fn sync_definitions(&self) -> AppResult<()>;
    /// Returns false when the (user, post, badge) triple already exists
    fn award(&self, award: &Award) -> AppResult<bool>;
    fn awards_for_user(&self, user_id: &str) -> AppResult<Vec<Award>>;
    fn awards_for_post(&self, post_id: &str) -> AppResult<Vec<Award>>;
    /// Sum of the weights of every badge the user holds
    fn user_points(&self, user_id: &str) -> AppResult<i64>;
}

pub struct SqliteBadgeRepository {
    pool: Arc<ConnectionPool>,
}

impl SqliteBadgeRepository {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn row_to_award(row: &Row) -> Result<Award, rusqlite::Error> {
        let badge_id: i64 = row.get("badge_id")?;
        let badge = Badge::from_id(badge_id).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Integer,
                format!("unknown badge id {}", badge_id).into(),
            )
        })?;
        let created_at: String = row.get("created_at")?;
        Ok(Award {
            user_id: row.get("user_id")?,
            post_id: row.get("post_id")?,
            badge,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

impl BadgeRepository for SqliteBadgeRepository {
    fn sync_definitions(&self) -> AppResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        for badge in Badge::ALL {
            tx.execute(
                "INSERT INTO badges (id, name, weight, kind) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, weight = excluded.weight, kind = excluded.kind",
                params![badge.id(), badge.name(), badge.weight(), badge.kind().as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn award(&self, award: &Award) -> AppResult<bool> {
        let conn = self.pool.get()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO user_badges (user_id, post_id, badge_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                award.user_id,
                award.post_id,
                award.badge.id(),
                format_timestamp(&award.created_at)
            ],
        )?;
        Ok(inserted == 1)
    }

    fn awards_for_user(&self, user_id: &str) -> AppResult<Vec<Award>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, post_id, badge_id, created_at FROM user_badges
             WHERE user_id = ?1 ORDER BY id",
        )?;
        let awards = stmt
            .query_map(params![user_id], Self::row_to_award)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(awards)
    }

    fn awards_for_post(&self, post_id: &str) -> AppResult<Vec<Award>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, post_id, badge_id, created_at FROM user_badges
             WHERE post_id = ?1 ORDER BY id",
        )?;
        let awards = stmt
            .query_map(params![post_id], Self::row_to_award)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(awards)
    }

    fn user_points(&self, user_id: &str) -> AppResult<i64> {
        let conn = self.pool.get()?;
        let points: i64 = conn.query_row(
            "SELECT COALESCE(SUM(b.weight), 0) FROM user_badges ub
             JOIN badges b ON b.id = ub.badge_id
             WHERE ub.user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(points)
    }
}

// ============================================================================
// Repository contract
// ============================================================================
//
// - Awards are unique per (user, post, badge); duplicates are ignored
// - Awards without a post (rejections) accumulate, since NULL never conflicts
