// src/services/render/gif.rs

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{imageops, imageops::FilterType, Delay, DynamicImage, Frame, RgbImage};

use crate::error::AppResult;

/// Scale down so the longer edge is at most `max_edge`
pub fn fit_edge(image: &RgbImage, max_edge: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let longest = w.max(h);
    if longest <= max_edge || longest == 0 {
        return image.clone();
    }
    let factor = max_edge as f32 / longest as f32;
    let width = ((w as f32 * factor).round() as u32).max(1);
    let height = ((h as f32 * factor).round() as u32).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Delay between frames sampled every `step_frames` at `fps`
pub fn frame_delay(fps: f64, step_frames: u32) -> Delay {
    let fps = if fps > 0.0 { fps } else { 24.0 };
    Delay::from_saturating_duration(Duration::from_secs_f64(step_frames.max(1) as f64 / fps))
}

/// Encode a looping GIF.
pub fn write_gif(frames: &[RgbImage], delay: Delay, path: &Path) -> AppResult<()> {
    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = GifEncoder::new(writer);
    encoder.set_repeat(Repeat::Infinite)?;

    let frames = frames.iter().map(|frame| {
        let rgba = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
        Frame::from_parts(rgba, 0, 0, delay)
    });
    encoder.encode_frames(frames)?;
    Ok(())
}
