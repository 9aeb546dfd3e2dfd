// src/services/render/mod.rs
//
// Renderer
//
// ARCHITECTURE:
// - Frames come from the FrameExtractor (decode, DAR fix, trim, cache)
// - Pure image functions live in the submodules
// - Frames are fetched on the async side; post-ops, layout and encoding
//   run on the blocking pool
// - Artifacts are composed in memory, then written to the output dir
//
// CRITICAL RULES:
// - Output order equals bracket order
// - Per frame: custom crop -> contrast -> brightness -> sharpness ->
//   aspect crop -> text -> border
// - `--raw` skips text and every post-op
// - Errors carry the index of the bracket that produced them

pub mod collage;
pub mod gif;
pub mod palette;
pub mod postproc;
pub mod text;

use std::path::PathBuf;
use std::sync::Arc;

use image::{Delay, RgbImage};
use uuid::Uuid;

use crate::config::RenderingConfig;
use crate::domain::Command;
use crate::error::{AppError, AppResult};
use crate::infrastructure::FrameExtractor;
use crate::parser::GlobalOptions;
use crate::services::resolver::{ResolvedBracket, ResolvedContent, Resolution};

pub use text::{FontBook, TextStyle};

/// A composed output, before it is written to disk
#[derive(Debug, Clone)]
pub enum Artifact {
    Still(RgbImage),
    Animation { frames: Vec<RgbImage>, delay: Delay },
}

impl Artifact {
    fn extension(&self) -> &'static str {
        match self {
            Artifact::Still(_) => "png",
            Artifact::Animation { .. } => "gif",
        }
    }
}

pub struct Renderer {
    extractor: Arc<FrameExtractor>,
    stage: Stage,
}

impl Renderer {
    pub fn new(extractor: Arc<FrameExtractor>, config: RenderingConfig) -> Self {
        let fonts = Arc::new(FontBook::load(&config));
        Self {
            extractor,
            stage: Stage { config, fonts },
        }
    }

    pub fn with_fonts(mut self, fonts: FontBook) -> Self {
        self.stage.fonts = Arc::new(fonts);
        self
    }

    /// Compose and write every artifact; returns paths in bracket order.
    pub async fn render(
        &self,
        command: Command,
        resolution: &Resolution,
        options: &GlobalOptions,
    ) -> AppResult<Vec<PathBuf>> {
        let artifacts = self.compose(command, resolution, options).await?;
        let stage = self.stage.clone();
        tokio::task::spawn_blocking(move || stage.write(&artifacts)).await?
    }

    /// Frames are fetched here; every post-op runs on the blocking pool.
    pub async fn compose(
        &self,
        command: Command,
        resolution: &Resolution,
        options: &GlobalOptions,
    ) -> AppResult<Vec<Artifact>> {
        if resolution.brackets.is_empty() {
            return Err(AppError::NothingFound("Nothing to render".to_string()));
        }
        let style = TextStyle::from_options(options)?;

        let (batches, fps) = if command == Command::Gif {
            self.fetch_ranges(resolution).await?
        } else {
            (self.fetch_stills(command, resolution).await?, 0.0)
        };

        let stage = self.stage.clone();
        let brackets = resolution.brackets.clone();
        let options = options.clone();
        tokio::task::spawn_blocking(move || {
            stage.compose(command, &brackets, batches, fps, &options, &style)
        })
        .await?
    }

    /// One frame per bracket; palettes only use the first
    async fn fetch_stills(
        &self,
        command: Command,
        resolution: &Resolution,
    ) -> AppResult<Vec<Vec<RgbImage>>> {
        let wanted = if command == Command::Palette { 1 } else { resolution.brackets.len() };
        let mut batches = Vec::with_capacity(wanted);
        for bracket in resolution.brackets.iter().take(wanted) {
            let frame = self
                .extractor
                .frame_at(&bracket.media, bracket.timestamp_ms())
                .await
                .map_err(|e| e.at_bracket(bracket.index))?;
            batches.push(vec![frame]);
        }
        Ok(batches)
    }

    /// Every bracket's span clipped to the gif ceiling, plus the first fps
    async fn fetch_ranges(&self, resolution: &Resolution) -> AppResult<(Vec<Vec<RgbImage>>, f64)> {
        let ceiling_ms = self.stage.config.gif_max_seconds * 1000;
        let mut batches = Vec::with_capacity(resolution.brackets.len());
        let mut fps = 0.0;

        for bracket in &resolution.brackets {
            let (start, end) = bracket.span_ms();
            let end = end.min(start + ceiling_ms);

            let info = self
                .extractor
                .video_info(&bracket.media)
                .await
                .map_err(|e| e.at_bracket(bracket.index))?;
            if fps == 0.0 {
                fps = info.fps;
            }

            batches.push(
                self.extractor
                    .frames_in_range(&bracket.media, start, end, self.stage.config.gif_step_frames)
                    .await
                    .map_err(|e| e.at_bracket(bracket.index))?,
            );
        }
        Ok((batches, fps))
    }
}

/// Synchronous pixel work: post-ops, text, layouts and encoding
#[derive(Clone)]
struct Stage {
    config: RenderingConfig,
    fonts: Arc<FontBook>,
}

impl Stage {
    /// `batches[i]` holds the raw frames of `brackets[i]`
    fn compose(
        &self,
        command: Command,
        brackets: &[ResolvedBracket],
        batches: Vec<Vec<RgbImage>>,
        fps: f64,
        options: &GlobalOptions,
        style: &TextStyle,
    ) -> AppResult<Vec<Artifact>> {
        let mut finished: Vec<Vec<RgbImage>> = Vec::with_capacity(batches.len());
        for (bracket, raw) in brackets.iter().zip(batches) {
            let frames = raw
                .into_iter()
                .map(|frame| self.finish(frame, bracket, options, style))
                .collect::<AppResult<Vec<RgbImage>>>()
                .map_err(|e| e.at_bracket(bracket.index))?;
            finished.push(frames);
        }

        match command {
            Command::Gif => Ok(vec![self.animation(finished, fps)?]),
            Command::Palette => {
                let frame = finished
                    .into_iter()
                    .flatten()
                    .next()
                    .ok_or_else(|| AppError::NothingFound("Nothing to render".to_string()))?;
                Ok(vec![Artifact::Still(palette::palette_frame(
                    &frame,
                    self.config.palette_colors,
                ))])
            }
            Command::Parallel => {
                let frames: Vec<RgbImage> = finished.into_iter().flatten().collect();
                let composed = collage::compose(&frames)
                    .ok_or_else(|| AppError::NothingFound("Nothing to render".to_string()))?;
                Ok(vec![Artifact::Still(composed)])
            }
            _ => Ok(finished.into_iter().flatten().map(Artifact::Still).collect()),
        }
    }

    fn finish(
        &self,
        frame: RgbImage,
        bracket: &ResolvedBracket,
        options: &GlobalOptions,
        style: &TextStyle,
    ) -> AppResult<RgbImage> {
        if options.raw {
            return Ok(frame);
        }

        let mut frame = self.adjust(frame, bracket, options);
        if let Some(text) = bracket.text() {
            self.draw_text(&mut frame, &text, options, style)?;
        }
        if let Some(border) = options.border {
            frame = postproc::add_border(&frame, border);
        }
        Ok(frame)
    }

    fn adjust(
        &self,
        frame: RgbImage,
        bracket: &ResolvedBracket,
        options: &GlobalOptions,
    ) -> RgbImage {
        let mut frame = match bracket.postproc.custom_crop {
            Some(bounds) => postproc::custom_crop(&frame, bounds),
            None => frame,
        };
        frame = postproc::adjust_contrast(&frame, options.contrast);
        frame = postproc::adjust_brightness(&frame, options.brightness);
        frame = postproc::adjust_sharpness(&frame, options.sharpness);

        if let Some(quotient) = options.aspect_quotient {
            frame = postproc::aspect_crop(
                &frame,
                quotient,
                bracket.postproc.x_crop_offset,
                bracket.postproc.y_crop_offset,
            );
        }
        frame
    }

    fn draw_text(
        &self,
        frame: &mut RgbImage,
        text: &str,
        options: &GlobalOptions,
        style: &TextStyle,
    ) -> AppResult<()> {
        let font = self.fonts.get(options.font.as_deref())?;
        text::draw_quote(frame, text, &font, style);
        Ok(())
    }

    fn animation(&self, finished: Vec<Vec<RgbImage>>, fps: f64) -> AppResult<Artifact> {
        let frames: Vec<RgbImage> = finished
            .iter()
            .flatten()
            .map(|frame| gif::fit_edge(frame, self.config.gif_max_edge))
            .collect();

        if frames.is_empty() {
            return Err(AppError::InexistentTimestamp(
                "No frames found for the gif".to_string(),
            ));
        }

        log::debug!("Composed gif of {} frames at {:.3} fps", frames.len(), fps);
        Ok(Artifact::Animation {
            frames,
            delay: gif::frame_delay(fps, self.config.gif_step_frames),
        })
    }

    fn write(&self, artifacts: &[Artifact]) -> AppResult<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let batch = Uuid::new_v4();

        let mut paths = Vec::with_capacity(artifacts.len());
        for (i, artifact) in artifacts.iter().enumerate() {
            let path = self
                .config
                .output_dir
                .join(format!("{}-{:02}.{}", batch, i, artifact.extension()));
            match artifact {
                Artifact::Still(image) => image.save(&path)?,
                Artifact::Animation { frames, delay } => gif::write_gif(frames, *delay, &path)?,
            }
            log::info!("Rendered {}", path.display());
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Whether a resolved bracket carries text to draw
pub fn has_text(bracket: &ResolvedBracket) -> bool {
    matches!(bracket.content, ResolvedContent::Cue(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MediaItem, MediaKind, SubtitleCue};
    use crate::infrastructure::frame_extractor::tests::FakeSource;
    use crate::infrastructure::MemoryFrameCache;
    use crate::parser::PostProc;

    fn renderer(dir: &std::path::Path) -> Renderer {
        let extractor = Arc::new(FrameExtractor::new(
            Arc::new(FakeSource::new(1280, 720, 2_000_000, None)),
            Arc::new(MemoryFrameCache::new(64)),
        ));
        let config = RenderingConfig {
            output_dir: dir.to_path_buf(),
            ..RenderingConfig::default()
        };
        Renderer::new(extractor, config)
    }

    fn bracket(index: usize, content: ResolvedContent) -> ResolvedBracket {
        let mut media = MediaItem::new(MediaKind::Movie, "Stalker".into(), "/m/stalker.mkv".into());
        media.id = 7;
        ResolvedBracket {
            index,
            media: Arc::new(media),
            content,
            postproc: PostProc::default(),
            milli_offset: 0,
        }
    }

    fn resolution(brackets: Vec<ResolvedBracket>) -> Resolution {
        Resolution { brackets }
    }

    #[tokio::test]
    async fn test_stills_keep_bracket_order() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let res = resolution(vec![
            bracket(1, ResolvedContent::Frame { millis: 1_000 }),
            bracket(2, ResolvedContent::Frame { millis: 2_000 }),
        ]);

        let paths = renderer
            .render(Command::Req, &res, &GlobalOptions::default())
            .await
            .unwrap();

        assert_eq!(paths.len(), 2);
        assert!(paths[0].to_string_lossy().ends_with("-00.png"));
        assert!(paths[1].to_string_lossy().ends_with("-01.png"));
        assert!(paths.iter().all(|p| p.is_file()));
    }

    #[tokio::test]
    async fn test_missing_frame_reports_bracket() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let res = resolution(vec![
            bracket(1, ResolvedContent::Frame { millis: 1_000 }),
            bracket(2, ResolvedContent::Frame { millis: 9_000_000 }),
        ]);

        let err = renderer
            .compose(Command::Req, &res, &GlobalOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Bracket { index: 2, .. }));
        assert!(matches!(err.root(), AppError::InexistentTimestamp(_)));
    }

    #[tokio::test]
    async fn test_aspect_and_border() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let options = GlobalOptions {
            aspect_quotient: Some(1.0),
            border: Some(10),
            ..GlobalOptions::default()
        };
        let res = resolution(vec![bracket(1, ResolvedContent::Frame { millis: 1_000 })]);

        let artifacts = renderer.compose(Command::Req, &res, &options).await.unwrap();
        match &artifacts[0] {
            Artifact::Still(image) => {
                // letterbox trimmed: 1280x540, then cropped square
                assert_eq!(image.dimensions(), (560, 560));
            }
            other => panic!("unexpected artifact {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_raw_skips_post_ops() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let options = GlobalOptions {
            aspect_quotient: Some(1.0),
            raw: true,
            ..GlobalOptions::default()
        };
        let res = resolution(vec![bracket(1, ResolvedContent::Frame { millis: 1_000 })]);

        let artifacts = renderer.compose(Command::Req, &res, &options).await.unwrap();
        match &artifacts[0] {
            Artifact::Still(image) => assert_eq!(image.dimensions(), (1280, 540)),
            other => panic!("unexpected artifact {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gif_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let res = resolution(vec![bracket(
            1,
            ResolvedContent::Range {
                start_ms: 1_234_000,
                end_ms: 1_239_000,
            },
        )]);

        let artifacts = renderer
            .compose(Command::Gif, &res, &GlobalOptions::default())
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 1);
        match &artifacts[0] {
            Artifact::Animation { frames, .. } => {
                // 5 s at 24 fps, every 4th frame
                assert_eq!(frames.len(), 31);
                assert!(frames.iter().all(|f| f.width().max(f.height()) <= 650));
            }
            other => panic!("unexpected artifact {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parallel_composes_one_image() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let cue = SubtitleCue::new(0, 1_000, 2_000, String::from("I do what I do best"));
        let res = resolution(vec![
            bracket(1, ResolvedContent::Cue(cue)),
            bracket(2, ResolvedContent::Frame { millis: 5_000 }),
        ]);

        let artifacts = renderer
            .compose(Command::Parallel, &res, &GlobalOptions::default())
            .await
            .unwrap();
        match &artifacts[0] {
            Artifact::Still(image) => assert_eq!(image.dimensions(), (1280, 1080)),
            other => panic!("unexpected artifact {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_config_draws_quote_text() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = renderer(dir.path());
        let cue = SubtitleCue::new(0, 1_000, 2_000, String::from("I do what I do best"));
        let res = resolution(vec![
            bracket(1, ResolvedContent::Cue(cue)),
            bracket(2, ResolvedContent::Frame { millis: 1_000 }),
        ]);

        let artifacts = renderer
            .compose(Command::Req, &res, &GlobalOptions::default())
            .await
            .unwrap();
        let (quoted, plain) = match (&artifacts[0], &artifacts[1]) {
            (Artifact::Still(a), Artifact::Still(b)) => (a, b),
            other => panic!("unexpected artifacts {:?}", other),
        };

        assert_eq!(quoted.dimensions(), plain.dimensions());
        let changed: Vec<u32> = quoted
            .enumerate_pixels()
            .filter(|(x, y, p)| plain.get_pixel(*x, *y) != *p)
            .map(|(_, y, _)| y)
            .collect();
        assert!(!changed.is_empty());
        // Text sits near the bottom edge
        assert!(changed.iter().all(|y| *y > quoted.height() / 2));
    }

    #[test]
    fn test_has_text() {
        let cue = SubtitleCue::new(0, 0, 1, String::from("hi"));
        assert!(has_text(&bracket(1, ResolvedContent::Cue(cue))));
        assert!(!has_text(&bracket(1, ResolvedContent::Frame { millis: 0 })));
    }
}
