// src/repositories/media_repository.rs
//
// Media catalog persistence
//
// Scalar metadata is a JSON column on `media_items`; directors, countries,
// genres and categories live in lookup tables joined through link tables.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::sync::Arc;

use super::{format_timestamp, parse_timestamp};
use crate::db::ConnectionPool;
use crate::domain::{MediaItem, MediaKind, MediaMetadata};
use crate::error::AppResult;

/// Result of an idempotent registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created(i64),
    Updated(i64),
}

impl Upserted {
    pub fn id(&self) -> i64 {
        match self {
            Upserted::Created(id) | Upserted::Updated(id) => *id,
        }
    }
}

pub trait MediaRepository: Send + Sync {
    /// Insert or refresh by (kind, resource); un-hides returning items.
    fn upsert(&self, item: &MediaItem) -> AppResult<Upserted>;
    fn get_by_id(&self, id: i64) -> AppResult<Option<MediaItem>>;
    fn get_by_resource(&self, kind: MediaKind, resource: &str) -> AppResult<Option<MediaItem>>;
    /// Non-hidden items, optionally restricted to some kinds
    fn list_visible(&self, kinds: &[MediaKind]) -> AppResult<Vec<MediaItem>>;
    fn list_all(&self) -> AppResult<Vec<MediaItem>>;
    fn set_hidden(&self, id: i64, hidden: bool) -> AppResult<()>;
    fn update_metadata(&self, id: i64, metadata: &MediaMetadata) -> AppResult<()>;
    /// Items credited to a director, matched case-insensitively
    fn list_by_person(&self, name: &str) -> AppResult<Vec<MediaItem>>;
}

pub struct SqliteMediaRepository {
    pool: Arc<ConnectionPool>,
}

const COLUMNS: &str = "id, kind, title, original_title, parallel_title, season, episode, \
     resource, subtitle_handle, metadata, hidden, created_at, updated_at";

impl SqliteMediaRepository {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn row_to_media(row: &Row) -> Result<MediaItem, rusqlite::Error> {
        let kind_str: String = row.get("kind")?;
        let kind = MediaKind::parse(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown media kind '{}'", kind_str).into(),
            )
        })?;

        // Lists are filled in by `attach_lists`
        let metadata_json: String = row.get("metadata")?;
        let mut metadata: MediaMetadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable metadata for '{}': {}", kind_str, e);
            MediaMetadata::default()
        });
        for list in &NAME_LISTS {
            (list.field)(&mut metadata).clear();
        }

        let season: Option<i64> = row.get("season")?;
        let episode: Option<i64> = row.get("episode")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;

        Ok(MediaItem {
            id: row.get("id")?,
            kind,
            title: row.get("title")?,
            original_title: row.get("original_title")?,
            parallel_title: row.get("parallel_title")?,
            season: season.map(|v| v as u32),
            episode: episode.map(|v| v as u32),
            resource: row.get("resource")?,
            subtitle_handle: row.get("subtitle_handle")?,
            metadata,
            hidden: row.get("hidden")?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}

/// One list-valued metadata field and the tables holding it
struct NameList {
    names: &'static str,
    link: &'static str,
    key: &'static str,
    /// Credit role, for lists stored in `media_credits`
    role: Option<&'static str>,
    field: fn(&mut MediaMetadata) -> &mut Vec<String>,
}

impl NameList {
    fn role_filter(&self, column: &str) -> String {
        self.role
            .map(|role| format!(" AND {} = '{}'", column, role))
            .unwrap_or_default()
    }
}

const NAME_LISTS: [NameList; 4] = [
    NameList {
        names: "people",
        link: "media_credits",
        key: "person_id",
        role: Some("director"),
        field: directors,
    },
    NameList {
        names: "countries",
        link: "media_countries",
        key: "country_id",
        role: None,
        field: countries,
    },
    NameList {
        names: "genres",
        link: "media_genres",
        key: "genre_id",
        role: None,
        field: genres,
    },
    NameList {
        names: "categories",
        link: "media_categories",
        key: "category_id",
        role: None,
        field: categories,
    },
];

fn directors(m: &mut MediaMetadata) -> &mut Vec<String> {
    &mut m.directors
}

fn countries(m: &mut MediaMetadata) -> &mut Vec<String> {
    &mut m.countries
}

fn genres(m: &mut MediaMetadata) -> &mut Vec<String> {
    &mut m.genres
}

fn categories(m: &mut MediaMetadata) -> &mut Vec<String> {
    &mut m.categories
}

/// Metadata without its list fields, as stored in `media_items.metadata`
fn scalar_json(metadata: &MediaMetadata) -> serde_json::Result<String> {
    let mut scalars = metadata.clone();
    for list in &NAME_LISTS {
        (list.field)(&mut scalars).clear();
    }
    serde_json::to_string(&scalars)
}

fn with_lists(conn: &Connection, item: Option<MediaItem>) -> rusqlite::Result<Option<MediaItem>> {
    let mut items: Vec<MediaItem> = item.into_iter().collect();
    attach_lists(conn, &mut items)?;
    Ok(items.pop())
}

/// Replace every list of `media_id` with the ones in `metadata`
fn write_lists(conn: &Connection, media_id: i64, metadata: &MediaMetadata) -> rusqlite::Result<()> {
    let mut source = metadata.clone();
    for list in &NAME_LISTS {
        conn.execute(
            &format!(
                "DELETE FROM {link} WHERE media_id = ?1{role}",
                link = list.link,
                role = list.role_filter("role")
            ),
            params![media_id],
        )?;

        for (position, name) in (list.field)(&mut source).iter().enumerate() {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            conn.execute(
                &format!("INSERT OR IGNORE INTO {} (name) VALUES (?1)", list.names),
                params![name],
            )?;
            let name_id: i64 = conn.query_row(
                &format!("SELECT id FROM {} WHERE name = ?1", list.names),
                params![name],
                |row| row.get(0),
            )?;
            match list.role {
                Some(role) => conn.execute(
                    &format!(
                        "INSERT OR IGNORE INTO {} (media_id, {}, role, position) VALUES (?1, ?2, ?3, ?4)",
                        list.link, list.key
                    ),
                    params![media_id, name_id, role, position as i64],
                )?,
                None => conn.execute(
                    &format!(
                        "INSERT OR IGNORE INTO {} (media_id, {}, position) VALUES (?1, ?2, ?3)",
                        list.link, list.key
                    ),
                    params![media_id, name_id, position as i64],
                )?,
            };
        }
    }
    Ok(())
}

/// Fill the list fields of `items` from the link tables. A single item
/// only reads its own links.
fn attach_lists(conn: &Connection, items: &mut [MediaItem]) -> rusqlite::Result<()> {
    let only: Option<i64> = match &*items {
        [] => return Ok(()),
        [item] => Some(item.id),
        _ => None,
    };

    let mut by_id: HashMap<i64, &mut MediaItem> =
        items.iter_mut().map(|item| (item.id, item)).collect();

    for list in &NAME_LISTS {
        let sql = format!(
            "SELECT l.media_id, n.name FROM {link} l
             JOIN {names} n ON n.id = l.{key}
             WHERE (?1 IS NULL OR l.media_id = ?1){role}
             ORDER BY l.media_id, l.position",
            link = list.link,
            names = list.names,
            key = list.key,
            role = list.role_filter("l.role")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![only], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (media_id, name) = row?;
            if let Some(item) = by_id.get_mut(&media_id) {
                (list.field)(&mut item.metadata).push(name);
            }
        }
    }
    Ok(())
}

impl MediaRepository for SqliteMediaRepository {
    fn upsert(&self, item: &MediaItem) -> AppResult<Upserted> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = format_timestamp(&Utc::now());

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM media_items WHERE kind = ?1 AND resource = ?2",
                params![item.kind.as_str(), item.resource],
                |row| row.get(0),
            )
            .optional()?;

        let upserted = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE media_items SET
                        title = ?1, original_title = COALESCE(?2, original_title),
                        parallel_title = COALESCE(?3, parallel_title), season = ?4, episode = ?5,
                        subtitle_handle = ?6, hidden = 0, updated_at = ?7
                     WHERE id = ?8",
                    params![
                        item.title,
                        item.original_title,
                        item.parallel_title,
                        item.season.map(|v| v as i64),
                        item.episode.map(|v| v as i64),
                        item.subtitle_handle,
                        now,
                        id,
                    ],
                )?;
                Upserted::Updated(id)
            }
            None => {
                tx.execute(
                    "INSERT INTO media_items (
                        kind, title, original_title, parallel_title, season, episode,
                        resource, subtitle_handle, metadata, hidden, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                    params![
                        item.kind.as_str(),
                        item.title,
                        item.original_title,
                        item.parallel_title,
                        item.season.map(|v| v as i64),
                        item.episode.map(|v| v as i64),
                        item.resource,
                        item.subtitle_handle,
                        scalar_json(&item.metadata)?,
                        item.hidden,
                        now,
                    ],
                )?;
                let id = tx.last_insert_rowid();
                write_lists(&tx, id, &item.metadata)?;
                Upserted::Created(id)
            }
        };

        tx.commit()?;
        Ok(upserted)
    }

    fn get_by_id(&self, id: i64) -> AppResult<Option<MediaItem>> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM media_items WHERE id = ?1", COLUMNS);
        let item = conn
            .query_row(&sql, params![id], Self::row_to_media)
            .optional()?;
        Ok(with_lists(&conn, item)?)
    }

    fn get_by_resource(&self, kind: MediaKind, resource: &str) -> AppResult<Option<MediaItem>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {} FROM media_items WHERE kind = ?1 AND resource = ?2",
            COLUMNS
        );
        let item = conn
            .query_row(&sql, params![kind.as_str(), resource], Self::row_to_media)
            .optional()?;
        Ok(with_lists(&conn, item)?)
    }

    fn list_visible(&self, kinds: &[MediaKind]) -> AppResult<Vec<MediaItem>> {
        let items = self.list_all()?;
        Ok(items
            .into_iter()
            .filter(|item| !item.hidden)
            .filter(|item| kinds.is_empty() || kinds.contains(&item.kind))
            .collect())
    }

    fn list_all(&self) -> AppResult<Vec<MediaItem>> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM media_items ORDER BY id", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut items = stmt
            .query_map([], Self::row_to_media)?
            .collect::<Result<Vec<_>, _>>()?;
        attach_lists(&conn, &mut items)?;
        Ok(items)
    }

    fn set_hidden(&self, id: i64, hidden: bool) -> AppResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE media_items SET hidden = ?1, updated_at = ?2 WHERE id = ?3",
            params![hidden, format_timestamp(&Utc::now()), id],
        )?;
        Ok(())
    }

    fn update_metadata(&self, id: i64, metadata: &MediaMetadata) -> AppResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE media_items SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
            params![scalar_json(metadata)?, format_timestamp(&Utc::now()), id],
        )?;
        write_lists(&tx, id, metadata)?;
        tx.commit()?;
        Ok(())
    }

    fn list_by_person(&self, name: &str) -> AppResult<Vec<MediaItem>> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {} FROM media_items WHERE id IN (
                SELECT c.media_id FROM media_credits c
                JOIN people p ON p.id = c.person_id
                WHERE p.name = ?1 COLLATE NOCASE
             ) ORDER BY id",
            COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut items = stmt
            .query_map(params![name.trim()], Self::row_to_media)?
            .collect::<Result<Vec<_>, _>>()?;
        attach_lists(&conn, &mut items)?;
        Ok(items)
    }
}

// ============================================================================
// Repository contract
// ============================================================================
//
// - Registration is additive and idempotent: (kind, resource) is the key
// - One file may be catalogued under several kinds (a song and its lyrics)
// - Rows are never deleted; `hidden` replaces removal
// - Metadata is only written through `update_metadata` (or the first insert)
// - Lookup rows (people, genres...) are shared and never deleted

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::test_pool;

    fn parasite() -> MediaItem {
        MediaItem::new(MediaKind::Movie, "Parasite".into(), "/movies/Parasite (2019).mkv".into())
            .with_subtitles("/movies/Parasite (2019).en.srt")
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let repo = SqliteMediaRepository::new(test_pool());

        let first = repo.upsert(&parasite()).unwrap();
        assert!(matches!(first, Upserted::Created(_)));

        let second = repo.upsert(&parasite()).unwrap();
        assert_eq!(second, Upserted::Updated(first.id()));
        assert_eq!(repo.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_hidden_items_excluded_from_visible() {
        let repo = SqliteMediaRepository::new(test_pool());
        let id = repo.upsert(&parasite()).unwrap().id();

        repo.set_hidden(id, true).unwrap();
        assert!(repo.list_visible(&[]).unwrap().is_empty());
        assert!(repo.get_by_id(id).unwrap().unwrap().hidden);

        // Reappearing on a rescan un-hides it
        repo.upsert(&parasite()).unwrap();
        assert_eq!(repo.list_visible(&[MediaKind::Movie]).unwrap().len(), 1);
    }

    #[test]
    fn test_metadata_round_trip() {
        let repo = SqliteMediaRepository::new(test_pool());
        let id = repo.upsert(&parasite()).unwrap().id();

        let metadata = MediaMetadata {
            year: Some(2019),
            directors: vec!["Bong Joon-ho".into()],
            runtime: Some(132),
            ..Default::default()
        };
        repo.update_metadata(id, &metadata).unwrap();

        let loaded = repo.get_by_resource(MediaKind::Movie, "/movies/Parasite (2019).mkv").unwrap().unwrap();
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.pretty_title(), "Parasite (2019)");
    }

    #[test]
    fn test_metadata_lists_are_relational() {
        let repo = SqliteMediaRepository::new(test_pool());
        let parasite_id = repo.upsert(&parasite()).unwrap().id();
        let mother = MediaItem::new(MediaKind::Movie, "Mother".into(), "/movies/Mother (2009).mkv".into());
        let mother_id = repo.upsert(&mother).unwrap().id();

        let metadata = |genres: &[&str]| MediaMetadata {
            directors: vec!["Bong Joon-ho".into()],
            countries: vec!["South Korea".into()],
            genres: genres.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        };
        repo.update_metadata(parasite_id, &metadata(&["Thriller", "Comedy", "Drama"])).unwrap();
        repo.update_metadata(mother_id, &metadata(&["Crime"])).unwrap();

        // Ordering survives, and a rewrite replaces the old links
        let loaded = repo.get_by_id(parasite_id).unwrap().unwrap();
        assert_eq!(loaded.metadata.genres, vec!["Thriller", "Comedy", "Drama"]);
        repo.update_metadata(parasite_id, &metadata(&["Drama"])).unwrap();
        let all = repo.list_all().unwrap();
        assert_eq!(all[0].metadata.genres, vec!["Drama"]);
        assert_eq!(all[1].metadata.genres, vec!["Crime"]);

        let by_director = repo.list_by_person("bong joon-ho").unwrap();
        assert_eq!(by_director.len(), 2);
        assert!(repo.list_by_person("Park Chan-wook").unwrap().is_empty());

        // One shared person row, not one per film
        let conn = repo.pool.get().unwrap();
        let people: i64 = conn
            .query_row("SELECT COUNT(*) FROM people", [], |row| row.get(0))
            .unwrap();
        assert_eq!(people, 1);
        let scalars: String = conn
            .query_row("SELECT metadata FROM media_items WHERE id = ?1", [parasite_id], |row| row.get(0))
            .unwrap();
        assert!(!scalars.contains("Bong"));
    }

    #[test]
    fn test_list_visible_filters_kind() {
        let repo = SqliteMediaRepository::new(test_pool());
        repo.upsert(&parasite()).unwrap();
        repo.upsert(
            &MediaItem::new(MediaKind::Episode, "The Wire".into(), "/tv/wire s01e02.mkv".into())
                .with_episode(1, 2),
        )
        .unwrap();

        let episodes = repo.list_visible(&[MediaKind::Episode]).unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].season, Some(1));
    }

    #[test]
    fn test_same_file_under_two_kinds() {
        let repo = SqliteMediaRepository::new(test_pool());
        let song = MediaItem::new(MediaKind::Song, "Song".into(), "/music/song.mp4".into());
        let lyrics = MediaItem::new(MediaKind::Lyrics, "Song".into(), "/music/song.mp4".into())
            .with_subtitles("/music/song.lyrics.txt");

        let a = repo.upsert(&song).unwrap();
        let b = repo.upsert(&lyrics).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(repo.list_all().unwrap().len(), 2);
    }
}
