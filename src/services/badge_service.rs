// src/services/badge_service.rs
//
// Badge Engine
//
// ARCHITECTURE:
// - Each badge is a predicate over one context kind
// - Static badges read media metadata, interaction badges read post
//   metrics, handler badges read request telemetry
// - Awards go through the repository's unique constraint, so evaluating
//   a post twice never awards twice
//
// CRITICAL RULES:
// - BadgeAwarded is emitted only for newly inserted awards
// - Rejections are awarded without a post and accumulate

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{Award, Badge, BadgeKind, MediaItem, PostMetrics};
use crate::error::AppResult;
use crate::events::{BadgeAwarded, EventBus};
use crate::parser::ParsedRequest;
use crate::repositories::{BadgeRepository, PostRepository};

const VINTAGE_BEFORE: i32 = 1940;
const EPIC_MINUTES: u32 = 180;
const LIKED_REACTIONS: u64 = 300;
const LOVED_REACTIONS: u64 = 100;
const TALKATIVE_COMMENTS: u64 = 50;
const SHARED_SHARES: u64 = 30;
const VIRAL_IMPRESSIONS: u64 = 50_000;
const CLICKED_CLICKS: u64 = 1_000;

/// Explicit flags this close to their default count as pointless
const NEAR_DEFAULT_RATIO: f64 = 0.05;
/// Tolerance for flags whose default is zero (percent scale)
const NEAR_ZERO: f64 = 5.0;
const PRETENTIOUS_FLAGS: usize = 3;

/// What the handler observed while processing one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerTelemetry {
    pub border: bool,
    pub text_background: bool,
    /// Explicit numeric flags within tolerance of their defaults
    pub near_default_flags: usize,
    pub brackets: usize,
}

impl HandlerTelemetry {
    pub fn from_request(parsed: &ParsedRequest) -> Self {
        let near_default_flags = parsed
            .explicit_numeric_flags()
            .iter()
            .filter(|flag| {
                if flag.default == 0.0 {
                    flag.value.abs() <= NEAR_ZERO
                } else {
                    (flag.value - flag.default).abs() <= flag.default.abs() * NEAR_DEFAULT_RATIO
                }
            })
            .count();

        Self {
            border: parsed.options.border.is_some(),
            text_background: parsed.options.text_background.is_some(),
            near_default_flags,
            brackets: parsed.bracket_count(),
        }
    }
}

/// Input a badge predicate is evaluated against
#[derive(Debug, Clone, Copy)]
pub enum BadgeContext<'a> {
    Static(&'a MediaItem),
    Interaction(&'a PostMetrics),
    Handler(&'a HandlerTelemetry),
}

/// Evaluate one badge; `Some(reason)` when it applies. A context of the
/// wrong kind never matches.
pub fn check(badge: Badge, context: BadgeContext<'_>) -> Option<String> {
    match (badge, context) {
        (Badge::Vintage, BadgeContext::Static(media)) => media
            .metadata
            .year
            .filter(|year| *year < VINTAGE_BEFORE)
            .map(|year| format!("{} is from {}", media.title, year)),
        (Badge::FemaleDirector, BadgeContext::Static(media)) => media
            .metadata
            .female_director
            .then(|| format!("{} was directed by a woman", media.title)),
        (Badge::Anime, BadgeContext::Static(media)) => {
            let japanese = media
                .metadata
                .countries
                .iter()
                .any(|c| c.eq_ignore_ascii_case("japan") || c.eq_ignore_ascii_case("jp"));
            let animated = media
                .metadata
                .genres
                .iter()
                .any(|g| g.eq_ignore_ascii_case("animation"));
            (japanese && animated).then(|| format!("{} is a Japanese animation", media.title))
        }
        (Badge::Epic, BadgeContext::Static(media)) => media
            .metadata
            .runtime
            .filter(|minutes| *minutes >= EPIC_MINUTES)
            .map(|minutes| format!("{} runs for {} minutes", media.title, minutes)),

        (Badge::Liked, BadgeContext::Interaction(m)) => threshold(
            m.total_reactions(),
            LIKED_REACTIONS,
            "reactions",
        ),
        (Badge::Loved, BadgeContext::Interaction(m)) => threshold(
            m.reactions.get("love").copied().unwrap_or(0),
            LOVED_REACTIONS,
            "love reactions",
        ),
        (Badge::Talkative, BadgeContext::Interaction(m)) => {
            threshold(m.comments, TALKATIVE_COMMENTS, "comments")
        }
        (Badge::Shared, BadgeContext::Interaction(m)) => threshold(m.shares, SHARED_SHARES, "shares"),
        (Badge::Viral, BadgeContext::Interaction(m)) => {
            threshold(m.impressions, VIRAL_IMPRESSIONS, "impressions")
        }
        (Badge::Clicked, BadgeContext::Interaction(m)) => threshold(m.clicks, CLICKED_CLICKS, "clicks"),

        (Badge::Artist, BadgeContext::Handler(t)) => (t.border && t.text_background)
            .then(|| "Used both a border and a text background".to_string()),
        (Badge::PretentiousRequester, BadgeContext::Handler(t)) => {
            (t.near_default_flags >= PRETENTIOUS_FLAGS).then(|| {
                format!(
                    "{} flags set to what they already were",
                    t.near_default_flags
                )
            })
        }

        _ => None,
    }
}

fn threshold(value: u64, minimum: u64, what: &str) -> Option<String> {
    (value >= minimum).then(|| format!("{} {} (>= {})", value, what, minimum))
}

// ============================================================================
// BADGE SERVICE
// ============================================================================

pub struct BadgeService {
    badge_repo: Arc<dyn BadgeRepository>,
    post_repo: Arc<dyn PostRepository>,
    event_bus: Arc<EventBus>,
}

impl BadgeService {
    pub fn new(
        badge_repo: Arc<dyn BadgeRepository>,
        post_repo: Arc<dyn PostRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            badge_repo,
            post_repo,
            event_bus,
        }
    }

    pub fn sync_definitions(&self) -> AppResult<()> {
        self.badge_repo.sync_definitions()
    }

    pub fn award_rejection(&self, user_id: &str) -> AppResult<bool> {
        self.grant(
            Award::new(user_id.to_string(), None, Badge::Rejected),
            "Request rejected in the chamber".to_string(),
        )
    }

    /// Static and handler badges for a freshly published post
    pub fn award_publication(
        &self,
        user_id: &str,
        post_id: &str,
        media: &[Arc<MediaItem>],
        telemetry: &HandlerTelemetry,
    ) -> AppResult<Vec<Badge>> {
        let mut awarded = Vec::new();

        for badge in Badge::of_kind(BadgeKind::Static) {
            let reason = media
                .iter()
                .find_map(|item| check(badge, BadgeContext::Static(item)));
            if let Some(reason) = reason {
                if self.grant(
                    Award::new(user_id.to_string(), Some(post_id.to_string()), badge),
                    reason,
                )? {
                    awarded.push(badge);
                }
            }
        }

        for badge in Badge::of_kind(BadgeKind::Handler) {
            if let Some(reason) = check(badge, BadgeContext::Handler(telemetry)) {
                if self.grant(
                    Award::new(user_id.to_string(), Some(post_id.to_string()), badge),
                    reason,
                )? {
                    awarded.push(badge);
                }
            }
        }

        Ok(awarded)
    }

    /// Interaction badges for posts published inside `[from, to]`;
    /// returns the number of new awards.
    pub fn award_interactions(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> AppResult<usize> {
        let posts = self.post_repo.list_published_between(from, to)?;
        let mut awarded = 0;

        for post in posts {
            let author = match self.post_repo.author_of(&post.id)? {
                Some(author) => author,
                None => {
                    log::warn!("[BADGES] Post {} has no author", post.id);
                    continue;
                }
            };

            for badge in Badge::of_kind(BadgeKind::Interaction) {
                if let Some(reason) = check(badge, BadgeContext::Interaction(&post.metrics)) {
                    if self.grant(
                        Award::new(author.clone(), Some(post.id.clone()), badge),
                        reason,
                    )? {
                        awarded += 1;
                    }
                }
            }
        }

        Ok(awarded)
    }

    pub fn points(&self, user_id: &str) -> AppResult<i64> {
        self.badge_repo.user_points(user_id)
    }

    pub fn awards(&self, user_id: &str) -> AppResult<Vec<Award>> {
        self.badge_repo.awards_for_user(user_id)
    }

    fn grant(&self, award: Award, reason: String) -> AppResult<bool> {
        let inserted = self.badge_repo.award(&award)?;
        if inserted {
            log::info!(
                "[BADGES] {} awarded to {}: {}",
                award.badge.name(),
                award.user_id,
                reason
            );
            self.event_bus.emit(BadgeAwarded::new(
                award.user_id,
                award.post_id,
                award.badge,
                reason,
            ));
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Command, MediaKind, Post, Request, User};
    use crate::events::register_badge_handlers;
    use crate::events::RequestRejected;
    use crate::parser::parse_request;
    use crate::repositories::test_support::test_pool;
    use crate::repositories::{
        RequestRepository, SqliteBadgeRepository, SqlitePostRepository, SqliteRequestRepository,
        SqliteUserRepository, UserRepository,
    };

    struct Fixture {
        service: Arc<BadgeService>,
        bus: Arc<EventBus>,
        requests: SqliteRequestRepository,
        posts: Arc<SqlitePostRepository>,
    }

    fn setup() -> Fixture {
        let pool = test_pool();
        SqliteUserRepository::new(Arc::clone(&pool))
            .upsert(&User::new("u1", "Alice"))
            .unwrap();
        let bus = Arc::new(EventBus::new());
        let posts = Arc::new(SqlitePostRepository::new(Arc::clone(&pool)));
        let service = Arc::new(BadgeService::new(
            Arc::new(SqliteBadgeRepository::new(Arc::clone(&pool))),
            posts.clone(),
            Arc::clone(&bus),
        ));
        service.sync_definitions().unwrap();
        Fixture {
            service,
            bus,
            requests: SqliteRequestRepository::new(pool),
            posts,
        }
    }

    fn publish(f: &Fixture, post_id: &str, metrics: PostMetrics) -> Post {
        let mut request = Request::new("u1".into(), format!("!req Heat [{}]", post_id), Command::Req);
        request.verify(None);
        f.requests.insert(&request).unwrap();

        let mut post = Post::new(post_id.into(), request.id, "main".into(), "uri".into());
        post.published_at = Utc::now() - chrono::Duration::days(1);
        f.posts.insert_for_request(&post).unwrap();
        f.posts
            .update_metrics(post_id, &metrics, Utc::now())
            .unwrap();
        post
    }

    fn stalker() -> MediaItem {
        let mut item = MediaItem::new(MediaKind::Movie, "Stalker".into(), "/m/stalker.mkv".into());
        item.metadata.runtime = Some(162);
        item
    }

    #[test]
    fn test_static_predicates() {
        let mut item = stalker();
        assert!(check(Badge::Vintage, BadgeContext::Static(&item)).is_none());
        assert!(check(Badge::Epic, BadgeContext::Static(&item)).is_none());

        item.metadata.year = Some(1927);
        item.metadata.runtime = Some(210);
        item.metadata.countries = vec!["Japan".into()];
        item.metadata.genres = vec!["Animation".into(), "Drama".into()];

        assert!(check(Badge::Vintage, BadgeContext::Static(&item)).is_some());
        assert!(check(Badge::Epic, BadgeContext::Static(&item)).is_some());
        assert!(check(Badge::Anime, BadgeContext::Static(&item)).is_some());
        assert!(check(Badge::FemaleDirector, BadgeContext::Static(&item)).is_none());
    }

    #[test]
    fn test_wrong_context_never_matches() {
        let mut metrics = PostMetrics::default();
        metrics.impressions = 1_000_000;
        assert!(check(Badge::Viral, BadgeContext::Interaction(&metrics)).is_some());
        assert!(check(Badge::Vintage, BadgeContext::Interaction(&metrics)).is_none());
    }

    #[test]
    fn test_handler_telemetry() {
        let artist = parse_request("!req Heat [00:10] --border 10 --text-background black").unwrap();
        let telemetry = HandlerTelemetry::from_request(&artist);
        assert!(check(Badge::Artist, BadgeContext::Handler(&telemetry)).is_some());

        let pretentious = parse_request(
            "!req Heat [00:10] --font-size 5.5 --contrast 2 --brightness 0 --sharpness 40",
        )
        .unwrap();
        let telemetry = HandlerTelemetry::from_request(&pretentious);
        assert_eq!(telemetry.near_default_flags, 3);
        assert!(check(Badge::PretentiousRequester, BadgeContext::Handler(&telemetry)).is_some());
    }

    #[test]
    fn test_publication_awards_once() {
        let f = setup();
        publish(&f, "p1", PostMetrics::default());
        let mut item = stalker();
        item.metadata.year = Some(1930);
        let media = vec![Arc::new(item)];

        let first = f
            .service
            .award_publication("u1", "p1", &media, &HandlerTelemetry::default())
            .unwrap();
        assert_eq!(first, vec![Badge::Vintage]);

        let second = f
            .service
            .award_publication("u1", "p1", &media, &HandlerTelemetry::default())
            .unwrap();
        assert!(second.is_empty());
        assert_eq!(f.service.points("u1").unwrap(), Badge::Vintage.weight());
    }

    #[test]
    fn test_interaction_awards() {
        let f = setup();
        let mut metrics = PostMetrics::default();
        metrics.reactions.insert("love".into(), 120);
        metrics.reactions.insert("like".into(), 200);
        metrics.comments = 3;
        publish(&f, "p1", metrics);

        let from = Utc::now() - chrono::Duration::days(20);
        let awarded = f.service.award_interactions(from, Utc::now()).unwrap();
        assert_eq!(awarded, 2); // liked + loved
        assert_eq!(f.service.award_interactions(from, Utc::now()).unwrap(), 0);

        let badges: Vec<Badge> = f
            .service
            .awards("u1")
            .unwrap()
            .into_iter()
            .map(|a| a.badge)
            .collect();
        assert!(badges.contains(&Badge::Liked));
        assert!(badges.contains(&Badge::Loved));
    }

    #[test]
    fn test_rejection_handler_awards_through_bus() {
        let f = setup();
        register_badge_handlers(&f.bus, Arc::clone(&f.service));

        f.bus.emit(RequestRejected::new(
            uuid::Uuid::new_v4(),
            "u1".into(),
            "op".into(),
        ));
        f.bus.emit(RequestRejected::new(
            uuid::Uuid::new_v4(),
            "u1".into(),
            "op".into(),
        ));

        assert_eq!(f.service.points("u1").unwrap(), Badge::Rejected.weight() * 2);
        let awarded = f
            .bus
            .get_event_log()
            .into_iter()
            .filter(|e| e.event_type == "BadgeAwarded")
            .count();
        assert_eq!(awarded, 2);
    }
}
