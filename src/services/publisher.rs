// src/services/publisher.rs
//
// Publisher
//
// ARCHITECTURE:
// - Cooldown check -> channel upload -> Post row -> side effects
// - Side effects (info comment, badges, announcement) never undo a post
//
// CRITICAL RULES:
// - A request publishes at most once
// - Images keep bracket order all the way to the channel
// - The Post row and the "used" flag are written in one transaction

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::config::PublisherConfig;
use crate::domain::{Post, Request};
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, PostPublished};
use crate::integrations::{Channel, Emitter};
use crate::repositories::PostRepository;
use crate::services::badge_service::BadgeService;
use crate::services::handler::HandledRequest;

pub struct Publisher {
    post_repo: Arc<dyn PostRepository>,
    badges: Arc<BadgeService>,
    event_bus: Arc<EventBus>,
    announcements: Arc<dyn Emitter>,
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(
        post_repo: Arc<dyn PostRepository>,
        badges: Arc<BadgeService>,
        event_bus: Arc<EventBus>,
        announcements: Arc<dyn Emitter>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            post_repo,
            badges,
            event_bus,
            announcements,
            config,
        }
    }

    /// Fails with `RecentPostFound` while the channel is cooling down.
    ///
    /// Both the page itself and our own post log are consulted, so posts
    /// made by hand also count.
    pub async fn check_cooldown(&self, channel: &dyn Channel) -> AppResult<()> {
        if !self.config.cooldown_enabled {
            return Ok(());
        }

        let remote = channel.latest_post_time().await?;
        let local = self.post_repo.latest_published_at(channel.name())?;
        let latest = match remote.into_iter().chain(local).max() {
            Some(latest) => latest,
            None => return Ok(()),
        };

        let elapsed = Utc::now() - latest;
        if elapsed < Duration::minutes(self.config.cooldown_minutes) {
            return Err(AppError::RecentPostFound(format!(
                "Latest post on {} is {} seconds old",
                channel.name(),
                elapsed.num_seconds().max(0)
            )));
        }
        Ok(())
    }

    pub async fn publish(
        &self,
        channel: &dyn Channel,
        request: &Request,
        handled: &HandledRequest,
    ) -> AppResult<Post> {
        self.check_cooldown(channel).await?;

        if self.post_repo.exists_for_request(request.id)? {
            return Err(AppError::Unwanted(format!(
                "Request {} was already published",
                request.id
            )));
        }
        if handled.images.is_empty() {
            return Err(AppError::NothingFound("Nothing to publish".to_string()));
        }

        let published = channel.publish(&handled.caption, &handled.images).await?;
        let post = Post::new(
            published.id,
            request.id,
            channel.name().to_string(),
            published.uri,
        );
        self.post_repo.insert_for_request(&post)?;
        log::info!("Published request {} as {} ({})", request.id, post.id, post.uri);

        if let Some(info) = &handled.info_comment {
            if let Err(e) = self.comment(channel, &post.id, info).await {
                log::warn!("Info comment on {} failed: {}", post.id, e);
            }
        }

        match self.badges.award_publication(
            &request.user_id,
            &post.id,
            &handled.media,
            &handled.telemetry,
        ) {
            Ok(badges) if !badges.is_empty() => {
                log::debug!("[BADGES] {} badge(s) for post {}", badges.len(), post.id)
            }
            Ok(_) => {}
            Err(e) => log::error!("[BADGES] Awarding post {} failed: {}", post.id, e),
        }

        self.event_bus.emit(PostPublished::new(
            post.id.clone(),
            request.id,
            request.user_id.clone(),
            post.channel.clone(),
            post.uri.clone(),
        ));

        let announcement = format!("New post on {}: {}", post.channel, post.uri);
        if let Err(e) = self.announcements.send(&announcement).await {
            log::warn!("Announcement for {} failed: {}", post.id, e);
        }

        Ok(post)
    }

    /// Secondary comment under a published post
    pub async fn comment(&self, channel: &dyn Channel, post_id: &str, text: &str) -> AppResult<String> {
        let id = channel.comment(post_id, text, None).await?;
        log::debug!("Commented {} on {}", id, post_id);
        Ok(id)
    }
}
