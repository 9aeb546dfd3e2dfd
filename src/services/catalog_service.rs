// src/services/catalog_service.rs
//
// Media Catalog
//
// ARCHITECTURE:
// - Fuzzy lookup of visible items by kind
// - Library rescan: walk the configured roots, classify files by naming
//   rules, upsert items and hide the ones whose files disappeared
// - Optional metadata enrichment through a MetadataProvider
//
// CRITICAL RULES:
// - Registration is additive and idempotent (upsert by kind + resource)
// - Items are hidden, never deleted
// - Ranking is deterministic: (score desc, index asc)

use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, LibraryConfig, ResolverConfig};
use crate::domain::{
    parse_episode_designator, validate_media_item, MediaItem, MediaKind, MediaMetadata,
};
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, LibraryRescanned, MediaHidden, MediaRegistered};
use crate::infrastructure::fuzzy;
use crate::integrations::{MetadataProvider, MovieDetails};
use crate::repositories::{MediaRepository, Upserted};
use crate::services::subtitle_service::sibling_subtitle;

/// Outcome of one library rescan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanReport {
    pub registered: usize,
    pub updated: usize,
    pub hidden: usize,
}

// ============================================================================
// CATALOG SERVICE
// ============================================================================

pub struct CatalogService {
    media_repo: Arc<dyn MediaRepository>,
    event_bus: Arc<EventBus>,
    library: LibraryConfig,
    languages: Vec<String>,
    thresholds: ResolverConfig,
    rules: LibraryRules,
}

impl CatalogService {
    pub fn new(
        media_repo: Arc<dyn MediaRepository>,
        event_bus: Arc<EventBus>,
        config: &Config,
    ) -> Self {
        Self {
            media_repo,
            event_bus,
            library: config.library.clone(),
            languages: config.subtitles.languages.clone(),
            thresholds: config.resolver.clone(),
            rules: LibraryRules::default(),
        }
    }

    pub fn lookup_by_id(&self, id: i64) -> AppResult<MediaItem> {
        self.media_repo
            .get_by_id(id)?
            .filter(|item| !item.hidden)
            .ok_or_else(|| AppError::NothingFound(format!("Media item #{} not found", id)))
    }

    /// Best visible item for a free-text query.
    ///
    /// Without a kind hint, a `sXXeYY` designator selects episodes and
    /// anything else selects movies.
    pub fn fuzzy_find(&self, kind_hint: Option<MediaKind>, query: &str) -> AppResult<MediaItem> {
        let designator = parse_episode_designator(query);
        let kind = kind_hint.unwrap_or(if designator.is_some() {
            MediaKind::Episode
        } else {
            MediaKind::Movie
        });

        let mut candidates = self.media_repo.list_visible(&[kind])?;
        if let (MediaKind::Episode, Some((season, episode))) = (kind, designator) {
            candidates.retain(|item| item.season == Some(season) && item.episode == Some(episode));
        }

        // Flatten every search key, remembering its owner
        let mut keys = Vec::new();
        let mut owners = Vec::new();
        for (i, item) in candidates.iter().enumerate() {
            for key in item.search_keys() {
                keys.push(key);
                owners.push(i);
            }
        }

        let ranked = fuzzy::rank(&keys, |key| fuzzy::normalized_ratio(query, key));
        let best = ranked.first().map(|&(key, score)| (owners[key], score));

        match best {
            Some((owner, score)) if score >= self.threshold(kind) => {
                log::debug!("'{}' matched '{}' ({})", query, candidates[owner].title, score);
                Ok(candidates.swap_remove(owner))
            }
            best => {
                let nearest = best.map(|(owner, _)| candidates[owner].pretty_title());
                Err(not_found(kind, query, nearest))
            }
        }
    }

    fn threshold(&self, kind: MediaKind) -> u32 {
        match kind {
            MediaKind::Movie => self.thresholds.movie_threshold,
            MediaKind::Episode => self.thresholds.episode_threshold,
            _ => self.thresholds.other_threshold,
        }
    }

    /// Validate, upsert and announce one item
    pub fn register(&self, item: &MediaItem) -> AppResult<Upserted> {
        validate_media_item(item)?;
        let outcome = self.media_repo.upsert(item)?;
        if let Upserted::Created(id) = outcome {
            self.event_bus
                .emit(MediaRegistered::new(id, item.kind, item.title.clone()));
        }
        Ok(outcome)
    }

    pub fn list_visible(&self, kinds: &[MediaKind]) -> AppResult<Vec<MediaItem>> {
        self.media_repo.list_visible(kinds)
    }

    // ========================================================================
    // LIBRARY RESCAN
    // ========================================================================

    pub fn rescan_library(&self) -> AppResult<RescanReport> {
        let mut report = RescanReport::default();
        let mut seen: HashSet<(MediaKind, String)> = HashSet::new();

        for root in &self.library.roots {
            if !root.is_dir() {
                log::warn!("Library root {} is not a directory", root.display());
                continue;
            }

            for entry in walkdir::WalkDir::new(root)
                .follow_links(true)
                .into_iter()
                .filter_map(|e: Result<walkdir::DirEntry, walkdir::Error>| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }

                let item = match self.classify(root, entry.path()) {
                    Some(item) => item,
                    None => continue,
                };

                seen.insert((item.kind, item.resource.clone()));
                match self.register(&item) {
                    Ok(Upserted::Created(_)) => report.registered += 1,
                    Ok(Upserted::Updated(_)) => report.updated += 1,
                    Err(e) => log::warn!("Skipping {}: {}", entry.path().display(), e),
                }
            }
        }

        for item in self.media_repo.list_all()? {
            if item.hidden || seen.contains(&(item.kind, item.resource.clone())) {
                continue;
            }
            if is_remote(&item.resource) || Path::new(&item.resource).exists() {
                continue;
            }

            self.media_repo.set_hidden(item.id, true)?;
            self.event_bus
                .emit(MediaHidden::new(item.id, item.resource.clone()));
            report.hidden += 1;
        }

        log::info!(
            "Library rescan: {} registered, {} updated, {} hidden",
            report.registered,
            report.updated,
            report.hidden
        );
        self.event_bus.emit(LibraryRescanned::new(
            report.registered,
            report.updated,
            report.hidden,
        ));
        Ok(report)
    }

    /// Turn a file under `root` into a catalog candidate
    pub fn classify(&self, root: &Path, path: &Path) -> Option<MediaItem> {
        let name = path.file_name()?.to_str()?;

        if let Some(stem) = name.strip_suffix(".lyrics.txt") {
            let video = self.sibling_video(path, stem)?;
            let item = MediaItem::new(
                MediaKind::Lyrics,
                clean_title(stem),
                video.to_string_lossy().to_string(),
            )
            .with_subtitles(path.to_string_lossy().to_string());
            return Some(item);
        }

        let extension = path.extension()?.to_str()?.to_lowercase();
        let stem = path.file_stem()?.to_str()?;
        let resource = path.to_string_lossy().to_string();

        if let Some(kind) = self.rules.folder_kind(root, path) {
            let accepted = self.is_video(&extension)
                || (kind == MediaKind::MangaPage && self.rules.is_image(&extension));
            if !accepted {
                return None;
            }
            return Some(MediaItem::new(kind, clean_title(stem), resource));
        }

        if !self.is_video(&extension) {
            return None;
        }

        let mut item = if let Some((season, episode)) = parse_episode_designator(stem) {
            let title = self.rules.episode_title(path)?;
            MediaItem::new(MediaKind::Episode, title, resource).with_episode(season, episode)
        } else if let Some((title, year)) = self.rules.movie_title(stem) {
            MediaItem::new(MediaKind::Movie, title, resource).with_year(year)
        } else {
            log::debug!("Unrecognized file name: {}", path.display());
            return None;
        };

        item.subtitle_handle = self
            .find_subtitles(path)
            .map(|p| p.to_string_lossy().to_string());
        Some(item)
    }

    fn is_video(&self, extension: &str) -> bool {
        self.library
            .video_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    fn sibling_video(&self, path: &Path, stem: &str) -> Option<PathBuf> {
        self.library
            .video_extensions
            .iter()
            .map(|ext| path.with_file_name(format!("{}.{}", stem, ext)))
            .find(|candidate| candidate.is_file())
    }

    /// First `{stem}.{lang}.srt` in language priority, then `{stem}.srt`
    fn find_subtitles(&self, video: &Path) -> Option<PathBuf> {
        self.languages
            .iter()
            .map(|lang| sibling_subtitle(video, Some(lang)))
            .chain(std::iter::once(sibling_subtitle(video, None)))
            .find(|candidate| candidate.is_file())
    }

    // ========================================================================
    // METADATA ENRICHMENT
    // ========================================================================

    /// Fill provider metadata for movies that have none yet.
    /// Returns the number of items enriched.
    pub async fn enrich_metadata(&self, provider: &dyn MetadataProvider) -> AppResult<usize> {
        let movies = self.media_repo.list_visible(&[MediaKind::Movie])?;
        let mut enriched = 0;

        for movie in movies.into_iter().filter(|m| m.metadata.tmdb_id.is_none()) {
            let details = match provider
                .movie_details(&movie.title, movie.metadata.year)
                .await
            {
                Ok(Some(details)) => details,
                Ok(None) => {
                    log::debug!("No metadata for {}", movie.pretty_title());
                    continue;
                }
                Err(e) => {
                    log::warn!("Metadata lookup failed for {}: {}", movie.pretty_title(), e);
                    continue;
                }
            };

            let metadata = merge_details(&movie.metadata, &details);
            self.media_repo.update_metadata(movie.id, &metadata)?;

            if details.original_title.is_some() && movie.original_title.is_none() {
                let mut renamed = movie.clone();
                renamed.original_title = details.original_title.clone();
                self.media_repo.upsert(&renamed)?;
            }
            enriched += 1;
        }

        Ok(enriched)
    }
}

fn merge_details(current: &MediaMetadata, details: &MovieDetails) -> MediaMetadata {
    MediaMetadata {
        year: current.year.or(details.year),
        directors: details.directors.clone(),
        female_director: details.female_director,
        countries: details.countries.clone(),
        genres: details.genres.clone(),
        categories: current.categories.clone(),
        runtime: details.runtime,
        tmdb_id: Some(details.tmdb_id),
        rating: details.rating,
    }
}

fn not_found(kind: MediaKind, query: &str, nearest: Option<String>) -> AppError {
    let suggestion = nearest
        .map(|n| format!(". Maybe you meant {}?", n))
        .unwrap_or_default();
    match kind {
        MediaKind::Movie => AppError::MovieNotFound(format!("Movie not found: {}{}", query, suggestion)),
        MediaKind::Episode => {
            AppError::EpisodeNotFound(format!("Episode not found: {}{}", query, suggestion))
        }
        other => AppError::NothingFound(format!(
            "Nothing found for {} ({}){}",
            query, other, suggestion
        )),
    }
}

fn is_remote(resource: &str) -> bool {
    resource.starts_with("http://") || resource.starts_with("https://")
}

/// Dots and underscores become spaces; whitespace collapses
fn clean_title(raw: &str) -> String {
    raw.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c.is_whitespace())
        .to_string()
}

// ============================================================================
// LIBRARY RULES
// ============================================================================

/// Naming rules for library files
pub struct LibraryRules {
    /// `Title (Year)`
    movie_pattern: Regex,
    /// Text before an `sXXeYY` designator
    episode_title_pattern: Regex,
    image_extensions: Vec<&'static str>,
}

impl Default for LibraryRules {
    fn default() -> Self {
        Self {
            movie_pattern: Regex::new(r"^(.+?)\s*\((\d{4})\)").unwrap(),
            episode_title_pattern: Regex::new(r"(?i)^(.*?)[\s._-]*s\d{1,2}\s?e\d{1,3}\b").unwrap(),
            image_extensions: vec!["png", "jpg", "jpeg", "webp"],
        }
    }
}

impl LibraryRules {
    pub fn movie_title(&self, stem: &str) -> Option<(String, i32)> {
        let captures = self.movie_pattern.captures(stem)?;
        let title = clean_title(captures.get(1)?.as_str());
        let year = captures.get(2)?.as_str().parse().ok()?;
        (!title.is_empty()).then_some((title, year))
    }

    /// Title before the designator, or the parent folder name
    pub fn episode_title(&self, path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_str()?;
        if let Some(captures) = self.episode_title_pattern.captures(stem) {
            let title = clean_title(captures.get(1).map(|m| m.as_str()).unwrap_or_default());
            if !title.is_empty() {
                return Some(title);
            }
        }

        let folder = path.parent()?.file_name()?.to_str()?;
        let title = clean_title(folder);
        (!title.is_empty()).then_some(title)
    }

    /// Kind implied by the first folder under the library root
    pub fn folder_kind(&self, root: &Path, path: &Path) -> Option<MediaKind> {
        let relative = path.strip_prefix(root).ok()?;
        let mut components = relative.components();
        let top = components.next()?.as_os_str().to_str()?.to_lowercase();
        // Files directly under the root have no folder
        components.next()?;

        match top.as_str() {
            "songs" | "music" => Some(MediaKind::Song),
            "manga" | "comics" => Some(MediaKind::MangaPage),
            "games" => Some(MediaKind::GameCutscene),
            "sports" => Some(MediaKind::SportsClip),
            "yt" | "youtube" => Some(MediaKind::YtVideo),
            _ => None,
        }
    }

    pub fn is_image(&self, extension: &str) -> bool {
        self.image_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }
}
