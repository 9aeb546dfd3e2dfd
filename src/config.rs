// src/config.rs
//
// Runtime configuration
//
// Loaded once from TOML by the binary and handed to every component
// constructor. Every section falls back to its defaults, so an empty file
// is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    pub subtitles: SubtitleConfig,
    pub rendering: RenderingConfig,
    pub resolver: ResolverConfig,
    pub limits: LimitsConfig,
    pub chamber: ChamberConfig,
    pub publisher: PublisherConfig,
    pub scheduler: SchedulerConfig,
    pub channels: Vec<ChannelConfig>,
    pub webhooks: WebhookConfig,
    pub tmdb: TmdbConfig,
}

impl Config {
    /// Parse a configuration file.
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| AppError::Other(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Parse a file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> AppResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::warn!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Other(e.to_string()))
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Defaults to {data_dir}/kinobot/kinobot.db
    pub path: Option<PathBuf>,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub roots: Vec<PathBuf>,
    pub video_extensions: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            video_extensions: ["mkv", "mp4", "avi", "m4v", "webm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    /// Language codes probed as `{stem}.{lang}.srt`, in priority order
    pub languages: Vec<String>,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            languages: vec!["en".to_string(), "es-MX".to_string(), "pt-BR".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    /// TrueType/OpenType face used for quotes. Text drawing is skipped
    /// with a warning when no font is available.
    pub font_path: Option<PathBuf>,
    /// Extra faces selectable through `--font name`
    pub fonts_dir: Option<PathBuf>,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub ffmpeg_timeout_secs: u64,
    pub ffprobe_timeout_secs: u64,
    pub subtitle_timeout_secs: u64,
    /// Disk frame cache; in-memory when unset
    pub cache_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub gif_max_edge: u32,
    pub gif_step_frames: u32,
    pub gif_max_seconds: u64,
    pub palette_colors: usize,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            fonts_dir: None,
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            ffmpeg_timeout_secs: 15,
            ffprobe_timeout_secs: 60,
            subtitle_timeout_secs: 600,
            cache_dir: None,
            output_dir: std::env::temp_dir().join("kinobot"),
            gif_max_edge: 650,
            gif_step_frames: 4,
            gif_max_seconds: 7,
            palette_colors: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Maximum length of a merged quote
    pub merge_limit: usize,
    pub max_brackets: usize,
    pub movie_threshold: u32,
    pub episode_threshold: u32,
    pub other_threshold: u32,
    pub quote_threshold: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            merge_limit: 60,
            max_brackets: 15,
            movie_threshold: 59,
            episode_threshold: 77,
            other_threshold: 59,
            quote_threshold: 87,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub classic_daily: u32,
    pub gif_daily: u32,
    pub privileged_roles: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            classic_daily: 5,
            gif_daily: 1,
            privileged_roles: vec!["admin".to_string(), "patron".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChamberConfig {
    pub ice_delay_hours: i64,
    pub max_ices: u32,
    pub max_exceptions: usize,
    pub continue_timeout_secs: u64,
}

impl Default for ChamberConfig {
    fn default() -> Self {
        Self {
            ice_delay_hours: 24,
            max_ices: 5,
            max_exceptions: 10,
            continue_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub graph_url: String,
    pub cooldown_enabled: bool,
    pub cooldown_minutes: i64,
    /// Duplicate requests are checked against this many latest posts
    pub duplicate_window_posts: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            graph_url: "https://graph.facebook.com/v18.0".to_string(),
            cooldown_enabled: true,
            cooldown_minutes: 5,
            duplicate_window_posts: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub ingest_minutes: u64,
    pub metrics_hours: u64,
    pub badges_minutes: u64,
    pub rescan_minutes: u64,
    pub post_attempts: usize,
    pub comments_per_source: u32,
    /// Metrics are refreshed for posts between these ages
    pub metrics_max_age_days: i64,
    pub metrics_min_age_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ingest_minutes: 30,
            metrics_hours: 6,
            badges_minutes: 30,
            rescan_minutes: 60,
            post_attempts: 5,
            comments_per_source: 50,
            metrics_max_age_days: 20,
            metrics_min_age_hours: 12,
        }
    }
}

/// One publishing target (a Facebook page)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub name: String,
    pub page_id: String,
    pub access_token: String,
    /// Daily "HH:MM" UTC slots; takes precedence over `interval_minutes`
    pub post_times: Vec<String>,
    pub interval_minutes: Option<u64>,
    /// Only requests carrying this tag are posted here
    pub tag: Option<String>,
    /// Whether comments on this page's posts are ingested as requests
    pub ingest_comments: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Discord webhook receiving job failures
    pub diagnostics: Option<String>,
    /// Discord webhook receiving published posts
    pub announcements: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TmdbConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl_secs: u64,
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.themoviedb.org/3".to_string(),
            cache_dir: None,
            cache_ttl_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.resolver.merge_limit, 60);
        assert_eq!(config.limits.classic_daily, 5);
        assert_eq!(config.limits.gif_daily, 1);
        assert!(config.publisher.cooldown_enabled);
        assert_eq!(config.rendering.gif_max_edge, 650);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [resolver]
            merge_limit = 80

            [[channels]]
            name = "main"
            page_id = "123"
            access_token = "token"
            post_times = ["00:00", "12:30"]
            "#,
        )
        .unwrap();

        assert_eq!(config.resolver.merge_limit, 80);
        assert_eq!(config.resolver.quote_threshold, 87);
        let channel = config.channel("main").unwrap();
        assert_eq!(channel.post_times.len(), 2);
        assert!(channel.tag.is_none());
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(Config::from_toml("resolver = [").is_err());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.chamber.max_exceptions, 10);
    }
}
