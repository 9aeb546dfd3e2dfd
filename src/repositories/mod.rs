// src/repositories/mod.rs
//
// Repository layer
//
// CRITICAL RULES:
// - Repositories are DUMB data mappers
// - NO business logic
// - NO invariant enforcement
// - NO event emission
// - NO cross-repository calls
// - Explicit SQL only

pub mod badge_repository;
pub mod media_repository;
pub mod post_repository;
pub mod request_repository;
pub mod user_repository;

pub use badge_repository::{BadgeRepository, SqliteBadgeRepository};
pub use media_repository::{MediaRepository, SqliteMediaRepository, Upserted};
pub use post_repository::{PostRepository, SqlitePostRepository};
pub use request_repository::{RequestRepository, SqliteRequestRepository};
pub use user_repository::{SqliteUserRepository, UserRepository};

use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp - returns rusqlite::Error for query_map compatibility
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}
