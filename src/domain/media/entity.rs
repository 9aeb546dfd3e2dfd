use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Kind of media a request can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Episode,
    Song,
    MangaPage,
    GameCutscene,
    SportsClip,
    YtVideo,
    Lyrics,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Episode => "episode",
            MediaKind::Song => "song",
            MediaKind::MangaPage => "manga_page",
            MediaKind::GameCutscene => "game_cutscene",
            MediaKind::SportsClip => "sports_clip",
            MediaKind::YtVideo => "yt_video",
            MediaKind::Lyrics => "lyrics",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "movie" => Some(MediaKind::Movie),
            "episode" => Some(MediaKind::Episode),
            "song" => Some(MediaKind::Song),
            "manga_page" => Some(MediaKind::MangaPage),
            "game_cutscene" => Some(MediaKind::GameCutscene),
            "sports_clip" => Some(MediaKind::SportsClip),
            "yt_video" => Some(MediaKind::YtVideo),
            "lyrics" => Some(MediaKind::Lyrics),
            _ => None,
        }
    }

    /// Whether quote brackets can be resolved against this kind
    pub fn accepts_quotes(&self) -> bool {
        matches!(self, MediaKind::Movie | MediaKind::Episode | MediaKind::Lyrics)
    }

    /// Whether timestamp, range and index brackets can be resolved against this kind
    pub fn accepts_timestamps(&self) -> bool {
        !matches!(self, MediaKind::Lyrics)
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider metadata attached to an item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaMetadata {
    pub year: Option<i32>,
    pub directors: Vec<String>,
    pub female_director: bool,
    pub countries: Vec<String>,
    pub genres: Vec<String>,
    pub categories: Vec<String>,
    /// Minutes
    pub runtime: Option<u32>,
    pub tmdb_id: Option<i64>,
    pub rating: Option<f32>,
}

/// A catalogued movie, episode or other frame source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    /// Stable identifier; 0 until persisted
    pub id: i64,

    pub kind: MediaKind,

    /// Display title (show title for episodes)
    pub title: String,

    pub original_title: Option<String>,

    /// Short form used by parallels
    pub parallel_title: Option<String>,

    pub season: Option<u32>,
    pub episode: Option<u32>,

    /// Local file path or remote URI
    pub resource: String,

    pub subtitle_handle: Option<String>,

    pub metadata: MediaMetadata,

    /// Set when the resource disappears; items are never deleted
    pub hidden: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaItem {
    pub fn new(kind: MediaKind, title: String, resource: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            kind,
            title,
            original_title: None,
            parallel_title: None,
            season: None,
            episode: None,
            resource,
            subtitle_handle: None,
            metadata: MediaMetadata::default(),
            hidden: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.metadata.year = Some(year);
        self
    }

    pub fn with_subtitles(mut self, handle: impl Into<String>) -> Self {
        self.subtitle_handle = Some(handle.into());
        self
    }

    pub fn with_episode(mut self, season: u32, episode: u32) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    /// `Title (Year)` for movies, `Show - Season S, Episode E` for episodes
    pub fn pretty_title(&self) -> String {
        match (self.kind, self.season, self.episode) {
            (MediaKind::Episode, Some(s), Some(e)) => {
                format!("{} - Season {}, Episode {}", self.title, s, e)
            }
            _ => match self.metadata.year {
                Some(year) => format!("{} ({})", self.title, year),
                None => self.title.clone(),
            },
        }
    }

    pub fn short_title(&self) -> String {
        self.parallel_title
            .clone()
            .unwrap_or_else(|| self.pretty_title())
    }

    /// Strings the fuzzy catalog search scores a query against
    pub fn search_keys(&self) -> Vec<String> {
        let suffix = |title: &str| match (self.kind, self.season, self.episode) {
            (MediaKind::Episode, Some(s), Some(e)) => format!("{} s{:02}e{:02}", title, s, e),
            _ => match self.metadata.year {
                Some(year) => format!("{} {}", title, year),
                None => title.to_string(),
            },
        };

        let mut keys = vec![suffix(&self.title)];
        if let Some(original) = &self.original_title {
            if original != &self.title {
                keys.push(suffix(original));
            }
        }
        keys
    }
}

/// Extract a `sXXeYY` designator from free text.
pub fn parse_episode_designator(text: &str) -> Option<(u32, u32)> {
    static DESIGNATOR: OnceLock<Regex> = OnceLock::new();
    let re = DESIGNATOR.get_or_init(|| Regex::new(r"(?i)\bs(\d{1,2})\s?e(\d{1,3})\b").unwrap());

    let caps = re.captures(text)?;
    let season = caps.get(1)?.as_str().parse().ok()?;
    let episode = caps.get(2)?.as_str().parse().ok()?;
    Some((season, episode))
}
