use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::media::MediaKind;

/// Request verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Req,
    Parallel,
    Palette,
    Gif,
    Song,
    Manga,
    Comic,
    Game,
    Sports,
    Yt,
    Lyrics,
}

/// Which daily counter a command consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Classic,
    Gif,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Classic => "classic",
            LimitKind::Gif => "gif",
        }
    }
}

impl Command {
    pub const ALL: [Command; 11] = [
        Command::Req,
        Command::Parallel,
        Command::Palette,
        Command::Gif,
        Command::Song,
        Command::Manga,
        Command::Comic,
        Command::Game,
        Command::Sports,
        Command::Yt,
        Command::Lyrics,
    ];

    /// Name without the leading `!`
    pub fn name(&self) -> &'static str {
        match self {
            Command::Req => "req",
            Command::Parallel => "parallel",
            Command::Palette => "palette",
            Command::Gif => "gif",
            Command::Song => "song",
            Command::Manga => "manga",
            Command::Comic => "comic",
            Command::Game => "game",
            Command::Sports => "sports",
            Command::Yt => "yt",
            Command::Lyrics => "lyrics",
        }
    }

    /// Accepts `!req` as well as the stored `req`
    pub fn parse(value: &str) -> Option<Self> {
        let name = value.strip_prefix('!').unwrap_or(value).to_lowercase();
        Command::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Catalog kind the media query is looked up in; `None` means
    /// movies and episodes.
    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            Command::Req | Command::Parallel | Command::Palette | Command::Gif => None,
            Command::Song => Some(MediaKind::Song),
            Command::Manga | Command::Comic => Some(MediaKind::MangaPage),
            Command::Game => Some(MediaKind::GameCutscene),
            Command::Sports => Some(MediaKind::SportsClip),
            Command::Yt => Some(MediaKind::YtVideo),
            Command::Lyrics => Some(MediaKind::Lyrics),
        }
    }

    pub fn limit_kind(&self) -> LimitKind {
        match self {
            Command::Gif => LimitKind::Gif,
            _ => LimitKind::Classic,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "!{}", self.name())
    }
}

/// Lifecycle position derived from the request flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Verified,
    Iced,
    Used,
}

/// A user request waiting in (or retired from) the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub user_id: String,

    /// Raw request line as submitted
    pub comment: String,

    /// Operator edits appended to the comment
    pub appended: String,

    pub command: Command,
    pub verified: bool,
    pub used: bool,
    pub iced_count: u32,
    pub last_iced_at: Option<DateTime<Utc>>,
    pub language: String,
    pub tag: Option<String>,

    /// Platform comment the request was ingested from
    pub source_comment_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn new(user_id: String, comment: String, command: Command) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            comment,
            appended: String::new(),
            command,
            verified: false,
            used: false,
            iced_count: 0,
            last_iced_at: None,
            language: "en".to_string(),
            tag: None,
            source_comment_id: None,
            created_at: Utc::now(),
        }
    }

    /// The text the handler parses: comment plus operator edits
    pub fn effective_comment(&self) -> String {
        if self.appended.is_empty() {
            self.comment.clone()
        } else {
            format!("{} {}", self.comment.trim_end(), self.appended.trim())
        }
    }

    pub fn state(&self) -> RequestState {
        if self.used {
            RequestState::Used
        } else if self.verified {
            RequestState::Verified
        } else if self.iced_count > 0 {
            RequestState::Iced
        } else {
            RequestState::Queued
        }
    }

    /// Eligible for posting iff verified and not used
    pub fn is_postable(&self) -> bool {
        self.verified && !self.used
    }

    pub fn verify(&mut self, tag: Option<String>) {
        self.verified = true;
        if tag.is_some() {
            self.tag = tag;
        }
    }

    pub fn mark_used(&mut self) {
        self.used = true;
    }

    /// Defer the request; it goes back to the unverified queue.
    pub fn register_ice(&mut self, now: DateTime<Utc>) {
        self.verified = false;
        self.iced_count += 1;
        self.last_iced_at = Some(now);
    }

    /// Edits re-open the verdict.
    pub fn append_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.appended.is_empty() {
            self.appended = text.to_string();
        } else {
            self.appended = format!("{} {}", self.appended, text);
        }
        self.verified = false;
    }

    pub fn reset_append(&mut self) {
        self.appended.clear();
    }

    /// Fresh queued copy, used by the chamber's edit loop
    pub fn clone_queued(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            verified: false,
            used: false,
            iced_count: 0,
            last_iced_at: None,
            source_comment_id: None,
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request::new("u1".into(), "!req Heat [1:00]".into(), Command::Req)
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("!req"), Some(Command::Req));
        assert_eq!(Command::parse("GIF"), Some(Command::Gif));
        assert_eq!(Command::parse("!nope"), None);
        assert_eq!(Command::Gif.limit_kind(), LimitKind::Gif);
        assert_eq!(Command::Palette.to_string(), "!palette");
    }

    #[test]
    fn test_state_machine() {
        let mut r = request();
        assert_eq!(r.state(), RequestState::Queued);

        r.verify(Some("main".into()));
        assert_eq!(r.state(), RequestState::Verified);
        assert!(r.is_postable());

        r.register_ice(Utc::now());
        assert_eq!(r.state(), RequestState::Iced);
        assert!(!r.is_postable());

        r.verify(None);
        assert_eq!(r.tag.as_deref(), Some("main"));
        r.mark_used();
        assert_eq!(r.state(), RequestState::Used);
        assert!(!r.is_postable());
    }

    #[test]
    fn test_append_reopens_verdict() {
        let mut r = request();
        r.verify(None);
        r.append_text("--plus 200");
        assert!(!r.verified);
        assert_eq!(r.effective_comment(), "!req Heat [1:00] --plus 200");

        r.reset_append();
        assert_eq!(r.effective_comment(), "!req Heat [1:00]");
    }

    #[test]
    fn test_clone_is_queued() {
        let mut r = request();
        r.verify(None);
        r.append_text("[1:02]");
        let copy = r.clone_queued();
        assert_ne!(copy.id, r.id);
        assert_eq!(copy.state(), RequestState::Queued);
        assert_eq!(copy.appended, "[1:02]");
    }
}
