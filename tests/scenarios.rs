// tests/scenarios.rs
//
// End-to-end request scenarios over an in-memory database, a synthetic
// video source and an in-memory channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{GenericImageView, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use kinobot::application::AppState;
use kinobot::config::{ChannelConfig, Config};
use kinobot::db::create_memory_pool;
use kinobot::domain::{MediaItem, MediaKind, PostMetrics, Request};
use kinobot::infrastructure::{FrameSource, VideoInfo};
use kinobot::integrations::{Channel, IncomingComment, PublishedPost};
use kinobot::parser::parse_request;
use kinobot::repositories::PostRepository;
use kinobot::services::{
    ChannelSlot, Operator, ResolverService, Scheduler, SubmitRequest, Verdict,
};
use kinobot::{AppError, AppResult, HandledRequest};

// ============================================================================
// FAKES
// ============================================================================

/// Two-hour 1280x720 video of color gradients
struct GradientSource;

#[async_trait]
impl FrameSource for GradientSource {
    async fn probe(&self, _resource: &str) -> AppResult<VideoInfo> {
        Ok(VideoInfo {
            width: 1280,
            height: 720,
            fps: 24.0,
            duration_ms: 7_200_000,
            dar: None,
        })
    }

    async fn decode_frame(&self, _resource: &str, millis: u64) -> AppResult<Option<RgbImage>> {
        if millis > 7_200_000 {
            return Ok(None);
        }
        let shift = ((millis / 1000) % 50) as u32;
        Ok(Some(RgbImage::from_fn(1280, 720, |x, y| {
            Rgb([
                (20 + (x * 180 / 1280 + shift) % 180) as u8,
                (20 + y * 180 / 720) as u8,
                100,
            ])
        })))
    }
}

#[derive(Default)]
struct MemoryChannel {
    published: Mutex<Vec<(String, Vec<PathBuf>)>>,
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        "page"
    }

    async fn latest_post_time(&self) -> AppResult<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn publish(&self, caption: &str, images: &[PathBuf]) -> AppResult<PublishedPost> {
        let mut published = self.published.lock().unwrap();
        published.push((caption.to_string(), images.to_vec()));
        let id = format!("page_{}", published.len());
        Ok(PublishedPost {
            uri: format!("https://facebook.com/{}", id),
            id,
        })
    }

    async fn comment(&self, _post_id: &str, _text: &str, _image: Option<PathBuf>) -> AppResult<String> {
        Ok("comment".to_string())
    }

    async fn fetch_metrics(&self, _post_id: &str) -> AppResult<PostMetrics> {
        Ok(PostMetrics::default())
    }

    async fn fetch_comments(&self, _limit: u32) -> AppResult<Vec<IncomingComment>> {
        Ok(Vec::new())
    }
}

/// Verifies everything it is shown
struct ApprovingOperator;

#[async_trait]
impl Operator for ApprovingOperator {
    fn id(&self) -> String {
        "moderator".to_string()
    }

    async fn show(&self, _request: &Request, _handled: &HandledRequest) -> AppResult<()> {
        Ok(())
    }

    async fn verdict(&self) -> AppResult<Verdict> {
        Ok(Verdict::Verify { tag: None })
    }

    async fn show_error(&self, _request: &Request, message: &str) -> AppResult<()> {
        panic!("unexpected chamber error: {}", message);
    }

    async fn ask_continue(&self) -> AppResult<bool> {
        Ok(true)
    }
}

// ============================================================================
// FIXTURE
// ============================================================================

const PARASITE_SRT: &str = "141\n00:13:01,000 --> 00:13:03,500\nWhere are you going?\n\n\
142\n00:13:04,220 --> 00:13:05,930\nYou are the one who crossed the line first.\n\n\
143\n00:13:06,180 --> 00:13:08,300\nDo I have a plan?\n";

const HEAT_SRT: &str = "1\n00:40:01,000 --> 00:40:03,000\nI do what I do best.\n";

const COLLATERAL_SRT: &str = "1\n00:21:10,000 --> 00:21:12,000\nI'm a guy doing a job.\n";

struct World {
    state: AppState,
    dir: tempfile::TempDir,
}

impl World {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.rendering.output_dir = dir.path().join("out");

        let pool = Arc::new(create_memory_pool().unwrap());
        let state = AppState::from_parts(config, pool, Arc::new(GradientSource)).unwrap();

        let world = Self { state, dir };
        world.movie("Parasite", 2019, Some(PARASITE_SRT));
        world.movie("Stalker", 1979, None);
        world.movie("The Grand Budapest Hotel", 2014, None);
        world.movie("Heat", 1995, Some(HEAT_SRT));
        world.movie("Collateral", 2004, Some(COLLATERAL_SRT));
        world
    }

    fn movie(&self, title: &str, year: i32, srt: Option<&str>) {
        let video = self.dir.path().join(format!("{} ({}).mkv", title, year));
        let mut item = MediaItem::new(
            MediaKind::Movie,
            title.to_string(),
            video.to_string_lossy().to_string(),
        )
        .with_year(year);
        if let Some(srt) = srt {
            let path = self.dir.path().join(format!("{} ({}).en.srt", title, year));
            std::fs::write(&path, srt).unwrap();
            item = item.with_subtitles(path.to_string_lossy().to_string());
        }
        self.state.catalog.register(&item).unwrap();
    }

    fn resolver(&self) -> ResolverService {
        ResolverService::new(
            Arc::clone(&self.state.catalog),
            Arc::clone(&self.state.subtitles),
            self.state.config.resolver.clone(),
        )
    }

    fn submit(&self, user: &str, comment: &str) -> AppResult<Request> {
        self.state
            .requests
            .enqueue(SubmitRequest::new(user, user.to_uppercase(), comment))
    }

    async fn handle(&self, comment: &str) -> HandledRequest {
        let request = self.submit("alice", comment).unwrap();
        self.state.handler.handle(&request, "Alice").await.unwrap()
    }
}

fn dimensions(path: &Path) -> (u32, u32) {
    image::open(path).unwrap().dimensions()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn quotes_resolve_to_their_cues_in_order() {
    let world = World::new();
    let parsed = parse_request("!req Parasite [you are the one who] [do I have a plan?]").unwrap();

    let resolution = world.resolver().resolve(&parsed, "en").unwrap();
    let stamps: Vec<u64> = resolution
        .brackets
        .iter()
        .map(|b| b.timestamp_ms())
        .collect();
    assert_eq!(stamps, vec![784_220, 786_180]);

    let handled = world
        .handle("!req Parasite [you are the one who] [do I have a plan?]")
        .await;
    assert_eq!(handled.images.len(), 2);
    assert!(handled.caption.starts_with("Parasite (2019)\n\nRequested by Alice"));
    assert!(handled.images.iter().all(|p| dimensions(p) == (1280, 720)));
}

#[tokio::test]
async fn gif_range_is_one_small_animation() {
    let world = World::new();
    let handled = world.handle("!gif Stalker [20:34 - 20:39]").await;

    assert_eq!(handled.images.len(), 1);
    let path = &handled.images[0];
    assert_eq!(path.extension().unwrap(), "gif");
    let (w, h) = dimensions(path);
    assert!(w.max(h) <= 650, "{}x{}", w, h);
}

#[tokio::test]
async fn palette_adds_border_and_strip() {
    let world = World::new();
    let handled = world
        .handle("!palette The Grand Budapest Hotel [00:42:10]")
        .await;

    assert_eq!(handled.images.len(), 1);
    // border round(1280 * 0.0065) = 8 on three sides, strip of 72 below
    assert_eq!(dimensions(&handled.images[0]), (1296, 800));
}

#[tokio::test]
async fn parallel_stacks_both_films() {
    let world = World::new();
    let handled = world
        .handle("!parallel Heat [I do what I do best] | Collateral [I'm a guy doing a job]")
        .await;

    assert_eq!(handled.images.len(), 1);
    assert_eq!(dimensions(&handled.images[0]), (1280, 1440));
    assert!(handled
        .caption
        .starts_with("Heat (1995) | Collateral (2004)"));
    assert_eq!(handled.media.len(), 2);
}

#[tokio::test]
async fn unknown_movie_is_not_queued() {
    let world = World::new();
    let err = world
        .submit("bob", "!req Unknown Movie XYZ [hello]")
        .unwrap_err();

    match err {
        AppError::MovieNotFound(message) => {
            assert!(message.starts_with("Movie not found: Unknown Movie XYZ"), "{}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(world.state.requests.list_oldest(false, 10).unwrap().is_empty());
}

#[tokio::test]
async fn repeated_request_is_a_duplicate() {
    let world = World::new();
    world.submit("bob", "!req Heat [00:10:00]").unwrap();

    let err = world.submit("bob", "!req Heat [00:10:00]").unwrap_err();
    assert!(matches!(err, AppError::DuplicateRequest(_)));
    assert_eq!(world.state.requests.list_oldest(false, 10).unwrap().len(), 1);

    // Someone else may ask for the same frame
    assert!(world.submit("carol", "!req Heat [00:10:00]").is_ok());
}

#[tokio::test]
async fn request_travels_from_comment_to_post() {
    let world = World::new();
    let request = world.submit("bob", "!req Heat [I do what I do best]").unwrap();

    let summary = world
        .state
        .chamber()
        .run(&ApprovingOperator, kinobot::ChamberMode::Oldies(5))
        .await
        .unwrap();
    assert_eq!(summary.verified, 1);

    let scheduler: Scheduler = world.state.scheduler().unwrap();
    let channel = Arc::new(MemoryChannel::default());
    let slot = ChannelSlot {
        channel: channel.clone(),
        config: ChannelConfig {
            name: "page".to_string(),
            ..ChannelConfig::default()
        },
    };

    let post = scheduler.post_cycle(&slot).await.unwrap();
    assert_eq!(post.request_id, request.id);
    assert!(world.state.post_repo.exists_for_request(request.id).unwrap());
    assert!(world.state.requests.get(request.id).unwrap().used);

    let published = channel.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert!(published[0].0.contains("Requested by BOB"));
    drop(published);

    // Nothing verified is left to post
    let err = scheduler.post_cycle(&slot).await.unwrap_err();
    assert!(matches!(err, AppError::NothingFound(_)));
}
