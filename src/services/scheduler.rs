// src/services/scheduler.rs
//
// Job Scheduler
//
// ARCHITECTURE:
// - One tokio task per periodic job, one task per channel
// - Each channel posts sequentially, so at most one post is in flight per page
// - Every job runs through `run_job`, the single error boundary
//
// CRITICAL RULES:
// - Typed failures are counted, never alerted
// - Untyped failures go to the diagnostics webhook and never stop the loop
// - RecentPostFound ends a post cycle without touching the request

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::{ChannelConfig, SchedulerConfig};
use crate::domain::{Post, Request};
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, JobFailed};
use crate::integrations::{Channel, Emitter};
use crate::parser::is_command;
use crate::repositories::{PostRepository, UserRepository};
use crate::services::badge_service::BadgeService;
use crate::services::catalog_service::{CatalogService, RescanReport};
use crate::services::handler::RequestHandler;
use crate::services::publisher::Publisher;
use crate::services::request_service::{RequestService, SubmitRequest};

/// A channel together with its posting schedule
pub struct ChannelSlot {
    pub channel: Arc<dyn Channel>,
    pub config: ChannelConfig,
}

pub struct Scheduler {
    requests: Arc<RequestService>,
    handler: Arc<RequestHandler>,
    publisher: Arc<Publisher>,
    catalog: Arc<CatalogService>,
    badges: Arc<BadgeService>,
    post_repo: Arc<dyn PostRepository>,
    user_repo: Arc<dyn UserRepository>,
    event_bus: Arc<EventBus>,
    diagnostics: Arc<dyn Emitter>,
    channels: Vec<Arc<ChannelSlot>>,
    config: SchedulerConfig,
    typed_failures: Mutex<BTreeMap<String, usize>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        requests: Arc<RequestService>,
        handler: Arc<RequestHandler>,
        publisher: Arc<Publisher>,
        catalog: Arc<CatalogService>,
        badges: Arc<BadgeService>,
        post_repo: Arc<dyn PostRepository>,
        user_repo: Arc<dyn UserRepository>,
        event_bus: Arc<EventBus>,
        diagnostics: Arc<dyn Emitter>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            requests,
            handler,
            publisher,
            catalog,
            badges,
            post_repo,
            user_repo,
            event_bus,
            diagnostics,
            channels: Vec::new(),
            config,
            typed_failures: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn Channel>, config: ChannelConfig) -> Self {
        self.channels.push(Arc::new(ChannelSlot { channel, config }));
        self
    }

    // ========================================================================
    // JOBS
    // ========================================================================

    /// Pick verified requests until one is published.
    ///
    /// Every attempt picks a request not tried yet in this cycle. When
    /// every attempt fails the last request is retired and the failure
    /// is reported.
    pub async fn post_cycle(&self, slot: &ChannelSlot) -> AppResult<Post> {
        let tag = slot.config.tag.as_deref();
        let mut attempted: Vec<Uuid> = Vec::new();
        let mut last: Option<(Request, AppError)> = None;

        while attempted.len() < self.config.post_attempts {
            let request = match self.requests.pick_random_excluding(true, tag, &attempted) {
                Ok(request) => request,
                // Only requests that failed without being retired are left
                Err(AppError::NothingFound(_)) if last.as_ref().is_some_and(|(_, e)| !e.should_skip()) => {
                    break
                }
                Err(e) => return Err(e),
            };
            attempted.push(request.id);
            log::info!(
                "[{}] Attempt {}: request {}",
                slot.channel.name(),
                attempted.len(),
                request.id
            );

            match self.post_request(slot, &request).await {
                Ok(post) => return Ok(post),
                Err(e @ AppError::RecentPostFound(_)) => return Err(e),
                Err(e) => {
                    log::warn!("[{}] Request {} failed: {}", slot.channel.name(), request.id, e);
                    if e.should_skip() {
                        self.requests.mark_used(request.id)?;
                    }
                    last = Some((request, e));
                }
            }
        }

        let message = match &last {
            Some((request, error)) => {
                self.requests.mark_used(request.id)?;
                format!(
                    "Giving up on {} after {} attempt(s); last request {} failed with {}",
                    slot.channel.name(),
                    attempted.len(),
                    request.id,
                    error
                )
            }
            None => format!("No post attempts configured for {}", slot.channel.name()),
        };
        if let Err(e) = self.diagnostics.send(&message).await {
            log::warn!("Diagnostics webhook failed: {}", e);
        }
        Err(AppError::Unwanted(message))
    }

    async fn post_request(&self, slot: &ChannelSlot, request: &Request) -> AppResult<Post> {
        let user_name = self
            .user_repo
            .get_by_id(&request.user_id)?
            .map(|user| user.name)
            .unwrap_or_else(|| request.user_id.clone());

        // Cheap check before the expensive render
        self.publisher.check_cooldown(slot.channel.as_ref()).await?;

        let handled = self.handler.handle(request, &user_name).await?;
        self.publisher
            .publish(slot.channel.as_ref(), request, &handled)
            .await
    }

    /// Queue every command found in recent comments. Returns how many
    /// requests were queued.
    pub async fn ingest_comments(&self) -> AppResult<usize> {
        let mut queued = 0;

        for slot in self.channels.iter().filter(|slot| slot.config.ingest_comments) {
            let comments = slot
                .channel
                .fetch_comments(self.config.comments_per_source)
                .await?;

            for comment in comments {
                let message = comment.message.trim();
                if !is_command(message) {
                    continue;
                }
                let submit = SubmitRequest::new(&comment.user_id, &comment.user_name, message)
                    .from_comment(&comment.id);
                match self.requests.enqueue(submit) {
                    Ok(_) => queued += 1,
                    Err(e) if e.is_typed() => {
                        log::debug!("Comment {} not queued: {} ({})", comment.id, e, e.kind())
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        log::info!("Ingested {} request(s)", queued);
        Ok(queued)
    }

    /// Refresh insights of posts old enough to have settled but still
    /// young enough to matter.
    pub async fn refresh_metrics(&self) -> AppResult<usize> {
        let now = Utc::now();
        let posts = self.post_repo.list_published_between(
            now - ChronoDuration::days(self.config.metrics_max_age_days),
            now - ChronoDuration::hours(self.config.metrics_min_age_hours),
        )?;

        let mut refreshed = 0;
        for post in posts {
            let slot = match self.slot(&post.channel) {
                Some(slot) => slot,
                None => {
                    log::debug!("Post {} belongs to unknown channel {}", post.id, post.channel);
                    continue;
                }
            };
            let metrics = match slot.channel.fetch_metrics(&post.id).await {
                Ok(metrics) => metrics,
                Err(e) => {
                    log::warn!("Metrics of post {} unavailable: {}", post.id, e);
                    continue;
                }
            };
            match self.post_repo.update_metrics(&post.id, &metrics, Utc::now()) {
                Ok(()) => refreshed += 1,
                Err(e) => log::warn!("Metrics of post {} not stored: {}", post.id, e),
            }
        }

        log::info!("Refreshed metrics of {} post(s)", refreshed);
        Ok(refreshed)
    }

    pub async fn award_badges(&self) -> AppResult<usize> {
        let now = Utc::now();
        self.badges
            .award_interactions(now - ChronoDuration::days(self.config.metrics_max_age_days), now)
    }

    pub async fn reset_limits(&self) -> AppResult<usize> {
        self.requests.reset_limits()
    }

    pub async fn rescan_library(&self) -> AppResult<RescanReport> {
        let catalog = Arc::clone(&self.catalog);
        tokio::task::spawn_blocking(move || catalog.rescan_library()).await?
    }

    // ========================================================================
    // ERROR BOUNDARY
    // ========================================================================

    /// Run one job; failures are reported and swallowed.
    pub async fn run_job<T, Fut>(&self, job: &str, work: Fut) -> Option<T>
    where
        Fut: Future<Output = AppResult<T>>,
    {
        log::debug!("Job {} started", job);
        match work.await {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(job, &e).await;
                None
            }
        }
    }

    async fn report(&self, job: &str, error: &AppError) {
        let typed = error.is_typed();
        if typed {
            log::warn!("Job {} ended with {}: {}", job, error.kind(), error);
            if let Ok(mut counts) = self.typed_failures.lock() {
                *counts.entry(error.kind().to_string()).or_insert(0) += 1;
            }
        } else {
            log::error!("Job {} failed: {:?}", job, error);
            let message = format!("Job {} failed: {:?}", job, error);
            if let Err(e) = self.diagnostics.send(&message).await {
                log::warn!("Diagnostics webhook failed: {}", e);
            }
        }

        self.event_bus.emit(JobFailed::new(
            job.to_string(),
            error.kind().to_string(),
            error.to_string(),
            typed,
        ));
    }

    /// Typed failures seen so far, by kind
    pub fn failure_counts(&self) -> BTreeMap<String, usize> {
        self.typed_failures
            .lock()
            .map(|counts| counts.clone())
            .unwrap_or_default()
    }

    fn slot(&self, name: &str) -> Option<&Arc<ChannelSlot>> {
        self.channels.iter().find(|slot| slot.channel.name() == name)
    }

    // ========================================================================
    // LOOP
    // ========================================================================

    /// Run every job until ctrl-c.
    pub async fn run(self: Arc<Self>) -> AppResult<()> {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        let mut tasks = vec![
            self.every("ingest_comments", minutes(self.config.ingest_minutes), |s| async move {
                s.ingest_comments().await
            }),
            self.every("refresh_metrics", minutes(self.config.metrics_hours * 60), |s| async move {
                s.refresh_metrics().await
            }),
            self.every("award_badges", minutes(self.config.badges_minutes), |s| async move {
                s.award_badges().await
            }),
            self.every("rescan_library", minutes(self.config.rescan_minutes), |s| async move {
                s.rescan_library().await
            }),
            self.daily_reset(),
        ];
        for slot in &self.channels {
            tasks.push(self.post_loop(Arc::clone(slot)));
        }

        log::info!("Scheduler running {} task(s)", tasks.len());
        tokio::signal::ctrl_c().await?;

        log::info!("Shutting down scheduler");
        for task in tasks {
            task.abort();
        }
        Ok(())
    }

    fn every<F, Fut, T>(self: &Arc<Self>, job: &'static str, period: Duration, make: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                scheduler.run_job(job, make(Arc::clone(&scheduler))).await;
            }
        })
    }

    fn daily_reset(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let midnight = vec!["00:00".to_string()];
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let wait = next_slot(now, &midnight)
                    .and_then(|at| (at - now).to_std().ok())
                    .unwrap_or(Duration::from_secs(3600));
                tokio::time::sleep(wait).await;
                scheduler.run_job("reset_limits", scheduler.reset_limits()).await;
            }
        })
    }

    fn post_loop(self: &Arc<Self>, slot: Arc<ChannelSlot>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let job = format!("post_cycle:{}", slot.channel.name());
            loop {
                let now = Utc::now();
                let wait = if !slot.config.post_times.is_empty() {
                    next_slot(now, &slot.config.post_times).and_then(|at| (at - now).to_std().ok())
                } else {
                    slot.config.interval_minutes.map(|m| Duration::from_secs(m * 60))
                };
                let wait = match wait {
                    Some(wait) => wait,
                    None => {
                        log::warn!("Channel {} has no posting schedule", slot.channel.name());
                        return;
                    }
                };

                tokio::time::sleep(wait).await;
                scheduler.run_job(&job, scheduler.post_cycle(&slot)).await;
            }
        })
    }
}

/// Next daily `HH:MM` slot (UTC) strictly after `now`
pub fn next_slot(now: DateTime<Utc>, times: &[String]) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    times
        .iter()
        .filter_map(|time| match NaiveTime::parse_from_str(time.trim(), "%H:%M") {
            Ok(time) => Some(time),
            Err(_) => {
                log::warn!("Ignoring invalid post time {:?}", time);
                None
            }
        })
        .flat_map(|time| {
            [today, today + ChronoDuration::days(1)]
                .into_iter()
                .map(move |day| day.and_time(time).and_utc())
        })
        .filter(|at| *at > now)
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{IncomingComment, MockEmitter};
    use crate::services::test_support::{stack, FakeChannel, Stack};
    use chrono::TimeZone;

    fn scheduler(s: &Stack, channel: FakeChannel, diagnostics: MockEmitter) -> Scheduler {
        let mut announcements = MockEmitter::new();
        announcements.expect_send().returning(|_| Ok(()));
        let publisher = Arc::new(Publisher::new(
            s.posts.clone(),
            Arc::clone(&s.badges),
            Arc::clone(&s.bus),
            Arc::new(announcements),
            s.config.publisher.clone(),
        ));
        let config = ChannelConfig {
            name: "page".to_string(),
            ingest_comments: true,
            ..ChannelConfig::default()
        };
        Scheduler::new(
            Arc::clone(&s.requests),
            Arc::clone(&s.handler),
            publisher,
            Arc::clone(&s.catalog),
            Arc::clone(&s.badges),
            s.posts.clone(),
            s.users.clone(),
            Arc::clone(&s.bus),
            Arc::new(diagnostics),
            s.config.scheduler.clone(),
        )
        .with_channel(Arc::new(channel), config)
    }

    fn verified(s: &Stack, comment: &str) -> Request {
        let request = s.submit(comment);
        s.requests.verify(request.id, "op", None).unwrap()
    }

    #[test]
    fn test_next_slot() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 13, 30, 0).unwrap();
        let times = vec!["09:00".to_string(), "18:00".to_string(), "bogus".to_string()];

        assert_eq!(
            next_slot(now, &times),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap())
        );

        let late = Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap();
        assert_eq!(
            next_slot(late, &times),
            Some(Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap())
        );
        assert_eq!(next_slot(now, &[]), None);
    }

    #[tokio::test]
    async fn test_post_cycle_skips_broken_requests() {
        let s = stack();
        let broken = verified(&s, "!req Heat [00:59:00]");
        let scheduler = scheduler(&s, FakeChannel::new(), MockEmitter::new());

        // The only candidate fails; with no request left the cycle ends
        let err = scheduler.post_cycle(&scheduler.channels[0]).await.unwrap_err();
        assert!(matches!(err, AppError::NothingFound(_)));
        assert!(s.requests.get(broken.id).unwrap().used);

        let good = verified(&s, "!req Collateral [00:00:05]");
        let post = scheduler.post_cycle(&scheduler.channels[0]).await.unwrap();
        assert_eq!(post.request_id, good.id);
    }

    #[tokio::test]
    async fn test_post_cycle_gives_up_after_attempts() {
        let s = stack();
        let mut channel = FakeChannel::new();
        channel.fail_publish = true;
        let request = verified(&s, "!req Heat [00:00:05]");

        let mut diagnostics = MockEmitter::new();
        diagnostics
            .expect_send()
            .withf(|message| message.contains("after 1 attempt(s)"))
            .times(1)
            .returning(|_| Ok(()));
        let scheduler = scheduler(&s, channel, diagnostics);

        let err = scheduler.post_cycle(&scheduler.channels[0]).await.unwrap_err();
        assert!(matches!(err, AppError::Unwanted(_)));
        assert!(s.requests.get(request.id).unwrap().used);
    }

    #[tokio::test]
    async fn test_post_cycle_moves_past_failing_requests() {
        let s = stack();
        let mut channel = FakeChannel::new();
        channel.failing_captions = vec!["Heat".to_string()];
        let broken: Vec<Request> = (1..=4)
            .map(|n| verified(&s, &format!("!req Heat [00:00:0{}]", n)))
            .collect();
        let good = verified(&s, "!req Collateral [00:00:05]");
        let scheduler = scheduler(&s, channel, MockEmitter::new());

        let post = scheduler.post_cycle(&scheduler.channels[0]).await.unwrap();

        assert_eq!(post.request_id, good.id);
        // Untyped failures are retried later, not retired
        for request in broken {
            assert!(!s.requests.get(request.id).unwrap().used);
        }
    }

    #[tokio::test]
    async fn test_recent_post_aborts_cycle() {
        let s = stack();
        let channel = FakeChannel::new();
        *channel.latest.lock().unwrap() = Some(Utc::now());
        let request = verified(&s, "!req Heat [00:00:05]");
        let scheduler = scheduler(&s, channel, MockEmitter::new());

        let err = scheduler.post_cycle(&scheduler.channels[0]).await.unwrap_err();
        assert!(matches!(err, AppError::RecentPostFound(_)));
        assert!(!s.requests.get(request.id).unwrap().used);
    }

    #[tokio::test]
    async fn test_ingest_comments_queues_commands_once() {
        let s = stack();
        let mut channel = FakeChannel::new();
        let comment = |id: &str, message: &str| IncomingComment {
            id: id.to_string(),
            user_id: "u2".to_string(),
            user_name: "Bob".to_string(),
            message: message.to_string(),
            created_time: Utc::now(),
        };
        channel.incoming = vec![
            comment("c1", "!req Heat [00:00:05]"),
            comment("c2", "great movie"),
            comment("c3", "!req Unknown Movie XYZ [hello]"),
        ];
        let scheduler = scheduler(&s, channel, MockEmitter::new());

        assert_eq!(scheduler.ingest_comments().await.unwrap(), 1);
        assert_eq!(scheduler.ingest_comments().await.unwrap(), 0);
        assert_eq!(s.requests.list_oldest(false, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_job_alerts_only_untyped_errors() {
        let s = stack();
        let mut diagnostics = MockEmitter::new();
        diagnostics
            .expect_send()
            .withf(|message| message.contains("broken_job"))
            .times(1)
            .returning(|_| Ok(()));
        let scheduler = scheduler(&s, FakeChannel::new(), diagnostics);

        let typed = scheduler
            .run_job("typed_job", async {
                Err::<(), _>(AppError::NothingFound("No requests found".into()))
            })
            .await;
        let untyped = scheduler
            .run_job("broken_job", async {
                Err::<(), _>(AppError::Other("disk on fire".into()))
            })
            .await;

        assert!(typed.is_none() && untyped.is_none());
        assert_eq!(scheduler.failure_counts().get("NothingFound"), Some(&1));
        let failed = s
            .bus
            .get_event_log()
            .into_iter()
            .filter(|e| e.event_type == "JobFailed")
            .count();
        assert_eq!(failed, 2);
    }

    #[tokio::test]
    async fn test_refresh_metrics_window() {
        let s = stack();
        let mut channel = FakeChannel::new();
        channel.metrics.impressions = 1234;
        let request = verified(&s, "!req Heat [00:00:05]");

        let mut old = Post::new("p-old".into(), request.id, "page".into(), "uri".into());
        old.published_at = Utc::now() - ChronoDuration::days(2);
        s.posts.insert_for_request(&old).unwrap();

        let scheduler = scheduler(&s, channel, MockEmitter::new());
        assert_eq!(scheduler.refresh_metrics().await.unwrap(), 1);
        let stored = s.posts.get_by_id("p-old").unwrap().unwrap();
        assert_eq!(stored.metrics.impressions, 1234);
        assert!(stored.metrics_updated_at.is_some());
    }

    #[tokio::test]
    async fn test_refresh_metrics_survives_missing_post() {
        let s = stack();
        let mut channel = FakeChannel::new();
        channel.metrics.impressions = 77;
        channel.failing_metrics = vec!["p-gone".to_string()];
        let request = verified(&s, "!req Heat [00:00:05]");

        for id in ["p-gone", "p-kept"] {
            let mut post = Post::new(id.into(), request.id, "page".into(), "uri".into());
            post.published_at = Utc::now() - ChronoDuration::days(2);
            s.posts.insert_for_request(&post).unwrap();
        }

        let scheduler = scheduler(&s, channel, MockEmitter::new());
        assert_eq!(scheduler.refresh_metrics().await.unwrap(), 1);
        let kept = s.posts.get_by_id("p-kept").unwrap().unwrap();
        assert_eq!(kept.metrics.impressions, 77);
        let gone = s.posts.get_by_id("p-gone").unwrap().unwrap();
        assert!(gone.metrics_updated_at.is_none());
    }
}
