// src/repositories/user_repository.rs

use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

use super::{format_timestamp, parse_timestamp};
use crate::db::ConnectionPool;
use crate::domain::{Role, User};
use crate::error::AppResult;

pub trait UserRepository: Send + Sync {
    /// Insert, or refresh the display name. Roles are kept.
    fn upsert(&self, user: &User) -> AppResult<()>;
    fn get_by_id(&self, id: &str) -> AppResult<Option<User>>;
    fn set_role(&self, id: &str, role: Role) -> AppResult<()>;
}

pub struct SqliteUserRepository {
    pool: Arc<ConnectionPool>,
}

impl SqliteUserRepository {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &Row) -> Result<User, rusqlite::Error> {
        let role: String = row.get("role")?;
        let created_at: String = row.get("created_at")?;
        Ok(User {
            id: row.get("id")?,
            name: row.get("name")?,
            role: Role::parse(&role),
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

impl UserRepository for SqliteUserRepository {
    fn upsert(&self, user: &User) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO users (id, name, role, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![
                user.id,
                user.name,
                user.role.as_str(),
                format_timestamp(&user.created_at)
            ],
        )?;
        Ok(())
    }

    fn get_by_id(&self, id: &str) -> AppResult<Option<User>> {
        let conn = self.pool.get()?;
        let user = conn
            .query_row(
                "SELECT id, name, role, created_at FROM users WHERE id = ?1",
                params![id],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn set_role(&self, id: &str, role: Role) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE users SET role = ?1 WHERE id = ?2",
            params![role.as_str(), id],
        )?;
        Ok(())
    }
}
