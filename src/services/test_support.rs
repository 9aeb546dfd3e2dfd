// src/services/test_support.rs
//
// Fully wired service graph over an in-memory database and a synthetic
// frame source. Shared by the orchestration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::domain::{MediaItem, MediaKind, PostMetrics, Request};
use crate::error::{AppError, AppResult};
use crate::events::{register_badge_handlers, EventBus};
use crate::infrastructure::frame_extractor::tests::FakeSource;
use crate::integrations::{Channel, IncomingComment, PublishedPost};
use crate::infrastructure::{FrameExtractor, MemoryFrameCache};
use crate::repositories::test_support::test_pool;
use crate::repositories::{
    SqliteBadgeRepository, SqliteMediaRepository, SqlitePostRepository, SqliteRequestRepository,
    SqliteUserRepository,
};
use crate::services::badge_service::BadgeService;
use crate::services::catalog_service::CatalogService;
use crate::services::handler::RequestHandler;
use crate::services::render::Renderer;
use crate::services::request_service::{RequestService, SubmitRequest};
use crate::services::resolver::ResolverService;
use crate::services::subtitle_service::SubtitleService;

pub(crate) struct Stack {
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub requests: Arc<RequestService>,
    pub handler: Arc<RequestHandler>,
    pub badges: Arc<BadgeService>,
    pub posts: Arc<SqlitePostRepository>,
    pub users: Arc<SqliteUserRepository>,
    pub catalog: Arc<CatalogService>,
    pub _dir: tempfile::TempDir,
}

impl Stack {
    /// Queue a request as `u1` (Alice)
    pub fn submit(&self, comment: &str) -> Request {
        self.requests
            .enqueue(SubmitRequest::new("u1", "Alice", comment))
            .unwrap()
    }
}

pub(crate) fn stack() -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.rendering.output_dir = dir.path().join("out");
    config.limits.classic_daily = 100;

    let pool = test_pool();
    let bus = Arc::new(EventBus::new());

    let users = Arc::new(SqliteUserRepository::new(Arc::clone(&pool)));
    let posts = Arc::new(SqlitePostRepository::new(Arc::clone(&pool)));
    let catalog = Arc::new(CatalogService::new(
        Arc::new(SqliteMediaRepository::new(Arc::clone(&pool))),
        Arc::clone(&bus),
        &config,
    ));
    for (title, year) in [("Heat", 1995), ("Collateral", 2004), ("Stalker", 1979)] {
        let resource = format!("/m/{}.mkv", title.to_lowercase());
        catalog
            .register(&MediaItem::new(MediaKind::Movie, title.into(), resource).with_year(year))
            .unwrap();
    }

    let requests = Arc::new(RequestService::new(
        Arc::new(SqliteRequestRepository::new(Arc::clone(&pool))),
        users.clone(),
        Arc::clone(&catalog),
        Arc::clone(&bus),
        &config,
    ));

    let badges = Arc::new(BadgeService::new(
        Arc::new(SqliteBadgeRepository::new(Arc::clone(&pool))),
        posts.clone(),
        Arc::clone(&bus),
    ));
    badges.sync_definitions().unwrap();
    register_badge_handlers(&bus, Arc::clone(&badges));

    let extractor = Arc::new(FrameExtractor::new(
        Arc::new(FakeSource::new(1280, 720, 600_000, None)),
        Arc::new(MemoryFrameCache::new(64)),
    ));
    let resolver = Arc::new(ResolverService::new(
        Arc::clone(&catalog),
        Arc::new(SubtitleService::new(&config)),
        config.resolver.clone(),
    ));
    let renderer = Arc::new(Renderer::new(extractor, config.rendering.clone()));
    let handler = Arc::new(RequestHandler::new(resolver, renderer));

    Stack {
        config,
        bus,
        requests,
        handler,
        badges,
        posts,
        users,
        catalog,
        _dir: dir,
    }
}

/// In-memory channel recording what gets published
pub(crate) struct FakeChannel {
    pub latest: Mutex<Option<DateTime<Utc>>>,
    pub published: Mutex<Vec<(String, Vec<PathBuf>)>>,
    pub comments: Mutex<Vec<(String, String)>>,
    pub incoming: Vec<IncomingComment>,
    pub metrics: PostMetrics,
    pub fail_publish: bool,
    /// Captions containing any of these fail to publish
    pub failing_captions: Vec<String>,
    /// Posts whose insights cannot be fetched
    pub failing_metrics: Vec<String>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            incoming: Vec::new(),
            metrics: PostMetrics::default(),
            fail_publish: false,
            failing_captions: Vec::new(),
            failing_metrics: Vec::new(),
        }
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn name(&self) -> &str {
        "page"
    }

    async fn latest_post_time(&self) -> AppResult<Option<DateTime<Utc>>> {
        Ok(*self.latest.lock().unwrap())
    }

    async fn publish(&self, caption: &str, images: &[PathBuf]) -> AppResult<PublishedPost> {
        if self.fail_publish || self.failing_captions.iter().any(|c| caption.contains(c.as_str())) {
            return Err(AppError::Other("graph api unavailable".to_string()));
        }
        let mut published = self.published.lock().unwrap();
        published.push((caption.to_string(), images.to_vec()));
        let id = format!("post-{}", published.len());
        Ok(PublishedPost {
            uri: format!("https://facebook.com/{}", id),
            id,
        })
    }

    async fn comment(&self, post_id: &str, text: &str, _image: Option<PathBuf>) -> AppResult<String> {
        let mut comments = self.comments.lock().unwrap();
        comments.push((post_id.to_string(), text.to_string()));
        Ok(format!("comment-{}", comments.len()))
    }

    async fn fetch_metrics(&self, post_id: &str) -> AppResult<PostMetrics> {
        if self.failing_metrics.iter().any(|id| id == post_id) {
            return Err(AppError::Other(format!("post {} was deleted", post_id)));
        }
        Ok(self.metrics.clone())
    }

    async fn fetch_comments(&self, limit: u32) -> AppResult<Vec<IncomingComment>> {
        Ok(self.incoming.iter().take(limit as usize).cloned().collect())
    }
}
