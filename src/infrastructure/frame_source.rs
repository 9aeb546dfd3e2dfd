// src/infrastructure/frame_source.rs
//
// Video decoding seam
//
// The default source shells out to ffmpeg/ffprobe per frame.
// A long-lived decoder (or a test fake) can stand in through `FrameSource`.

use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::RenderingConfig;
use crate::error::{AppError, AppResult};

/// Stream properties needed to address frames
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    /// Stored pixel size
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_ms: u64,
    /// Display aspect ratio declared by the container
    pub dar: Option<f64>,
}

impl VideoInfo {
    pub fn frame_index(&self, millis: u64) -> u64 {
        ((millis as f64) * self.fps / 1000.0).round() as u64
    }

    pub fn frame_duration_ms(&self) -> f64 {
        if self.fps > 0.0 {
            1000.0 / self.fps
        } else {
            1000.0 / 24.0
        }
    }
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn probe(&self, resource: &str) -> AppResult<VideoInfo>;

    /// Decode the frame shown at `millis`; `None` when nothing is decoded there.
    async fn decode_frame(&self, resource: &str, millis: u64) -> AppResult<Option<RgbImage>>;
}

// ============================================================================
// FFPROBE OUTPUT
// ============================================================================

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    display_aspect_ratio: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse "16:9" or "24000/1001" style ratios.
pub fn parse_ratio(value: &str) -> Option<f64> {
    let (num, den) = value
        .split_once(':')
        .or_else(|| value.split_once('/'))
        .unwrap_or((value, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if num <= 0.0 || den <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// Build `VideoInfo` from ffprobe's JSON output.
pub fn parse_probe_json(json: &str) -> AppResult<VideoInfo> {
    let output: ProbeOutput = serde_json::from_str(json)?;
    let stream = output
        .streams
        .first()
        .ok_or_else(|| AppError::Other("ffprobe found no video stream".to_string()))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(AppError::Other("ffprobe reported an empty frame size".to_string()));
    }

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_ratio)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_ratio))
        .unwrap_or(24.0);

    let duration_secs: f64 = stream
        .duration
        .as_deref()
        .or_else(|| output.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);

    // "0:1" and "N/A" mean unknown
    let dar = stream
        .display_aspect_ratio
        .as_deref()
        .and_then(parse_ratio);

    Ok(VideoInfo {
        width,
        height,
        fps,
        duration_ms: (duration_secs * 1000.0) as u64,
        dar,
    })
}

// ============================================================================
// FFMPEG IMPLEMENTATION
// ============================================================================

pub struct FfmpegFrameSource {
    ffmpeg_bin: String,
    ffprobe_bin: String,
    ffmpeg_timeout: Duration,
    ffprobe_timeout: Duration,
}

impl FfmpegFrameSource {
    pub fn new(config: &RenderingConfig) -> Self {
        Self {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            ffmpeg_timeout: Duration::from_secs(config.ffmpeg_timeout_secs),
            ffprobe_timeout: Duration::from_secs(config.ffprobe_timeout_secs),
        }
    }

    async fn run(
        &self,
        command: &mut Command,
        limit: Duration,
        what: &str,
    ) -> AppResult<std::process::Output> {
        let output = tokio::time::timeout(limit, command.output())
            .await
            .map_err(|_| AppError::Timeout(format!("{} exceeded {}s", what, limit.as_secs())))?
            .map_err(|e| AppError::Other(format!("Failed to run {}: {}", what, e)))?;
        Ok(output)
    }

    /// MediaInfo fallback for containers where ffprobe lacks a DAR
    async fn mediainfo_dar(&self, resource: &str) -> Option<f64> {
        let mut command = Command::new("mediainfo");
        command
            .arg("--Inform=Video;%DisplayAspectRatio%")
            .arg(resource)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = self
            .run(&mut command, self.ffprobe_timeout, "mediainfo")
            .await
            .ok()?;
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn probe(&self, resource: &str) -> AppResult<VideoInfo> {
        if !resource.contains("://") && !Path::new(resource).exists() {
            return Err(AppError::Unwanted(format!("Media file missing: {}", resource)));
        }

        let mut command = Command::new(&self.ffprobe_bin);
        command
            .args(["-v", "error", "-select_streams", "v:0"])
            .args([
                "-show_entries",
                "stream=width,height,display_aspect_ratio,r_frame_rate,avg_frame_rate,duration:format=duration",
            ])
            .args(["-of", "json"])
            .arg(resource)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = self.run(&mut command, self.ffprobe_timeout, "ffprobe").await?;
        if !output.status.success() {
            return Err(AppError::Other(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut info = parse_probe_json(&String::from_utf8_lossy(&output.stdout))?;
        if info.dar.is_none() {
            info.dar = self.mediainfo_dar(resource).await;
        }

        log::debug!("Probed {}: {:?}", resource, info);
        Ok(info)
    }

    async fn decode_frame(&self, resource: &str, millis: u64) -> AppResult<Option<RgbImage>> {
        // Input seeking jumps to the prior keyframe and decodes forward
        let position = format!("{}.{:03}", millis / 1000, millis % 1000);

        let mut command = Command::new(&self.ffmpeg_bin);
        command
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .args(["-ss", &position])
            .args(["-i", resource])
            .args(["-an", "-sn", "-frames:v", "1"])
            .args(["-f", "image2pipe", "-vcodec", "png", "-"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = self.run(&mut command, self.ffmpeg_timeout, "ffmpeg").await?;
        if !output.status.success() {
            return Err(AppError::Other(format!(
                "ffmpeg frame extraction failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if output.stdout.is_empty() {
            return Ok(None);
        }

        let image = image::load_from_memory(&output.stdout)?;
        Ok(Some(image.to_rgb8()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ratio() {
        assert_eq!(parse_ratio("16:9"), Some(16.0 / 9.0));
        assert_eq!(parse_ratio("24000/1001"), Some(24000.0 / 1001.0));
        assert_eq!(parse_ratio("0:1"), None);
        assert_eq!(parse_ratio("N/A"), None);
        assert_eq!(parse_ratio("1.778"), Some(1.778));
    }

    #[test]
    fn test_parse_probe_json() {
        let json = r#"{
            "streams": [{
                "width": 720, "height": 480,
                "display_aspect_ratio": "16:9",
                "r_frame_rate": "24000/1001",
                "avg_frame_rate": "24000/1001"
            }],
            "format": {"duration": "9000.5"}
        }"#;
        let info = parse_probe_json(json).unwrap();
        assert_eq!(info.width, 720);
        assert_eq!(info.duration_ms, 9_000_500);
        assert!((info.dar.unwrap() - 16.0 / 9.0).abs() < 1e-9);
        assert!((info.fps - 23.976).abs() < 0.001);
        assert_eq!(info.frame_index(1000), 24);
    }

    #[test]
    fn test_probe_without_streams_fails() {
        assert!(parse_probe_json(r#"{"streams": []}"#).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_unwanted() {
        let source = FfmpegFrameSource::new(&RenderingConfig::default());
        let err = source.probe("/definitely/not/here.mkv").await.unwrap_err();
        assert!(matches!(err, AppError::Unwanted(_)));
    }
}
