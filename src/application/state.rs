// src/application/state.rs
//
// Composition root
//
// Builds the repositories, services and integrations from one Config.
// Nothing here holds logic of its own.

use std::sync::Arc;

use crate::config::Config;
use crate::db::{
    create_connection_pool, get_connection, get_database_path, initialize_database,
    ConnectionPool,
};
use crate::error::AppResult;
use crate::events::{register_badge_handlers, EventBus};
use crate::infrastructure::{
    DiskFrameCache, FfmpegFrameSource, FrameCache, FrameExtractor, FrameSource, MemoryFrameCache,
};
use crate::integrations::{Emitter, FacebookClient, WebhookEmitter};
use crate::repositories::{
    PostRepository, SqliteBadgeRepository, SqliteMediaRepository, SqlitePostRepository,
    SqliteRequestRepository, SqliteUserRepository, UserRepository,
};
use crate::services::{
    BadgeService, CatalogService, Chamber, FontBook, Publisher, Renderer, RequestHandler,
    RequestService, ResolverService, Scheduler, SubtitleService,
};

/// In-memory frames kept when no cache directory is configured
const MEMORY_FRAME_CACHE: usize = 256;

/// Every long-lived component, wired once.
/// All fields are Arc-wrapped for sharing across tasks.
pub struct AppState {
    pub config: Config,
    pub pool: Arc<ConnectionPool>,
    pub event_bus: Arc<EventBus>,
    pub catalog: Arc<CatalogService>,
    pub subtitles: Arc<SubtitleService>,
    pub requests: Arc<RequestService>,
    pub badges: Arc<BadgeService>,
    pub handler: Arc<RequestHandler>,
    pub publisher: Arc<Publisher>,
    pub user_repo: Arc<dyn UserRepository>,
    pub post_repo: Arc<dyn PostRepository>,
    pub diagnostics: Arc<dyn Emitter>,
}

impl AppState {
    /// Open the configured database and decode frames with ffmpeg.
    pub fn build(config: Config) -> AppResult<Self> {
        let db_path = get_database_path(config.database.path.as_deref())?;
        log::info!("Using database {}", db_path.display());
        let pool = Arc::new(create_connection_pool(&db_path, config.database.pool_size)?);
        let source = Arc::new(FfmpegFrameSource::new(&config.rendering));
        Self::from_parts(config, pool, source)
    }

    /// Wire everything over an existing pool and frame source.
    pub fn from_parts(
        config: Config,
        pool: Arc<ConnectionPool>,
        source: Arc<dyn FrameSource>,
    ) -> AppResult<Self> {
        {
            let conn = get_connection(&pool)?;
            initialize_database(&conn)?;
        }

        // 1. INFRASTRUCTURE
        let event_bus = Arc::new(EventBus::new());
        let cache: Arc<dyn FrameCache> = match &config.rendering.cache_dir {
            Some(dir) => Arc::new(DiskFrameCache::new(dir.clone())?),
            None => Arc::new(MemoryFrameCache::new(MEMORY_FRAME_CACHE)),
        };
        let extractor = Arc::new(FrameExtractor::new(source, cache));

        // 2. REPOSITORIES
        let user_repo: Arc<dyn UserRepository> =
            Arc::new(SqliteUserRepository::new(Arc::clone(&pool)));
        let post_repo: Arc<dyn PostRepository> =
            Arc::new(SqlitePostRepository::new(Arc::clone(&pool)));

        // 3. SERVICES
        let catalog = Arc::new(CatalogService::new(
            Arc::new(SqliteMediaRepository::new(Arc::clone(&pool))),
            Arc::clone(&event_bus),
            &config,
        ));
        let subtitles = Arc::new(SubtitleService::new(&config));
        let requests = Arc::new(RequestService::new(
            Arc::new(SqliteRequestRepository::new(Arc::clone(&pool))),
            Arc::clone(&user_repo),
            Arc::clone(&catalog),
            Arc::clone(&event_bus),
            &config,
        ));
        let badges = Arc::new(BadgeService::new(
            Arc::new(SqliteBadgeRepository::new(Arc::clone(&pool))),
            Arc::clone(&post_repo),
            Arc::clone(&event_bus),
        ));
        badges.sync_definitions()?;

        let resolver = Arc::new(ResolverService::new(
            Arc::clone(&catalog),
            Arc::clone(&subtitles),
            config.resolver.clone(),
        ));
        let renderer = Arc::new(
            Renderer::new(extractor, config.rendering.clone())
                .with_fonts(FontBook::load(&config.rendering)),
        );
        let handler = Arc::new(RequestHandler::new(resolver, renderer));

        // 4. INTEGRATIONS
        let diagnostics: Arc<dyn Emitter> =
            Arc::new(WebhookEmitter::new(config.webhooks.diagnostics.clone())?);
        let announcements: Arc<dyn Emitter> =
            Arc::new(WebhookEmitter::new(config.webhooks.announcements.clone())?);
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&post_repo),
            Arc::clone(&badges),
            Arc::clone(&event_bus),
            announcements,
            config.publisher.clone(),
        ));

        // 5. EVENT HANDLERS
        register_badge_handlers(&event_bus, Arc::clone(&badges));

        Ok(Self {
            config,
            pool,
            event_bus,
            catalog,
            subtitles,
            requests,
            badges,
            handler,
            publisher,
            user_repo,
            post_repo,
            diagnostics,
        })
    }

    pub fn chamber(&self) -> Chamber {
        Chamber::new(
            Arc::clone(&self.requests),
            Arc::clone(&self.handler),
            Arc::clone(&self.user_repo),
            self.config.chamber.clone(),
        )
    }

    /// Scheduler with one Facebook client per configured channel
    pub fn scheduler(&self) -> AppResult<Scheduler> {
        let mut scheduler = Scheduler::new(
            Arc::clone(&self.requests),
            Arc::clone(&self.handler),
            Arc::clone(&self.publisher),
            Arc::clone(&self.catalog),
            Arc::clone(&self.badges),
            Arc::clone(&self.post_repo),
            Arc::clone(&self.user_repo),
            Arc::clone(&self.event_bus),
            Arc::clone(&self.diagnostics),
            self.config.scheduler.clone(),
        );
        for channel in &self.config.channels {
            let client = FacebookClient::new(&self.config.publisher.graph_url, channel)?;
            scheduler = scheduler.with_channel(Arc::new(client), channel.clone());
        }
        Ok(scheduler)
    }
}
