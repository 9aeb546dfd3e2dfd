// src/services/render/collage.rs
//
// Parallel composition: homogenize aspect ratios, then stack or grid.

use std::collections::HashMap;

use image::{imageops, imageops::FilterType, Rgb, RgbImage};

/// Most frequent color after coarse bucketing (4 bits per channel)
pub fn dominant_color(image: &RgbImage) -> Rgb<u8> {
    let mut buckets: HashMap<[u8; 3], (u64, [u64; 3])> = HashMap::new();
    for px in image.pixels() {
        let key = [px[0] >> 4, px[1] >> 4, px[2] >> 4];
        let entry = buckets.entry(key).or_insert((0, [0; 3]));
        entry.0 += 1;
        for c in 0..3 {
            entry.1[c] += px[c] as u64;
        }
    }

    buckets
        .into_iter()
        .max_by_key(|(key, (count, _))| (*count, std::cmp::Reverse(*key)))
        .map(|(_, (count, sum))| {
            Rgb([
                (sum[0] / count) as u8,
                (sum[1] / count) as u8,
                (sum[2] / count) as u8,
            ])
        })
        .unwrap_or(Rgb([0, 0, 0]))
}

/// Pad horizontally or vertically until `width / height == ratio`.
pub fn pad_to_aspect(image: &RgbImage, ratio: f32, fill: Rgb<u8>) -> RgbImage {
    let (w, h) = image.dimensions();
    let current = w as f32 / h.max(1) as f32;
    if (current - ratio).abs() < 0.005 {
        return image.clone();
    }

    let (canvas_w, canvas_h) = if current < ratio {
        ((h as f32 * ratio).round() as u32, h)
    } else {
        (w, (w as f32 / ratio).round() as u32)
    };

    let mut canvas = RgbImage::from_pixel(canvas_w.max(w), canvas_h.max(h), fill);
    let x = (canvas.width() - w) / 2;
    let y = (canvas.height() - h) / 2;
    imageops::overlay(&mut canvas, image, x as i64, y as i64);
    canvas
}

/// Same aspect ratio (the widest one) and the same width (the narrowest one).
pub fn homogenize(frames: &[RgbImage]) -> Vec<RgbImage> {
    let ratio = frames
        .iter()
        .map(|f| f.width() as f32 / f.height().max(1) as f32)
        .fold(0.0f32, f32::max);

    let padded: Vec<RgbImage> = frames
        .iter()
        .map(|f| pad_to_aspect(f, ratio, dominant_color(f)))
        .collect();

    let width = padded.iter().map(RgbImage::width).min().unwrap_or(0).max(1);
    let height = ((width as f32 / ratio).round() as u32).max(1);

    padded
        .into_iter()
        .map(|f| {
            if f.dimensions() == (width, height) {
                f
            } else {
                imageops::resize(&f, width, height, FilterType::Lanczos3)
            }
        })
        .collect()
}

/// Two frames stack vertically; three or four go in a 2x2 grid.
pub fn compose(frames: &[RgbImage]) -> Option<RgbImage> {
    let frames = homogenize(frames);
    let first = frames.first()?;
    let (w, h) = first.dimensions();

    match frames.len() {
        1 => Some(first.clone()),
        2 => {
            let mut canvas = RgbImage::new(w, h * 2);
            imageops::overlay(&mut canvas, &frames[0], 0, 0);
            imageops::overlay(&mut canvas, &frames[1], 0, h as i64);
            Some(canvas)
        }
        _ => {
            let fill = dominant_color(first);
            let mut canvas = RgbImage::from_pixel(w * 2, h * 2, fill);
            for (i, frame) in frames.iter().take(4).enumerate() {
                let x = (i as u32 % 2) * w;
                let y = (i as u32 / 2) * h;
                imageops::overlay(&mut canvas, frame, x as i64, y as i64);
            }
            Some(canvas)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dominant_color() {
        let img = RgbImage::from_fn(10, 10, |x, _| {
            if x < 7 {
                Rgb([200, 10, 10])
            } else {
                Rgb([0, 0, 0])
            }
        });
        assert_eq!(dominant_color(&img), Rgb([200, 10, 10]));
    }

    #[test]
    fn test_pad_to_wider_aspect() {
        let img = RgbImage::from_pixel(100, 100, Rgb([5, 5, 5]));
        let padded = pad_to_aspect(&img, 2.0, Rgb([9, 9, 9]));
        assert_eq!(padded.dimensions(), (200, 100));
        assert_eq!(padded.get_pixel(0, 0), &Rgb([9, 9, 9]));
        assert_eq!(padded.get_pixel(100, 50), &Rgb([5, 5, 5]));
    }

    #[test]
    fn test_two_frames_stack_with_equal_aspect() {
        let wide = RgbImage::from_pixel(400, 200, Rgb([1, 1, 1]));
        let square = RgbImage::from_pixel(300, 300, Rgb([2, 2, 2]));

        let frames = homogenize(&[wide.clone(), square.clone()]);
        assert_eq!(frames[0].dimensions(), frames[1].dimensions());

        let out = compose(&[wide, square]).unwrap();
        let (w, h) = frames[0].dimensions();
        assert_eq!(out.dimensions(), (w, h * 2));
    }

    #[test]
    fn test_three_frames_make_a_grid() {
        let frame = RgbImage::from_pixel(160, 90, Rgb([3, 3, 3]));
        let out = compose(&[frame.clone(), frame.clone(), frame]).unwrap();
        assert_eq!(out.dimensions(), (320, 180));
    }

    #[test]
    fn test_empty_input() {
        assert!(compose(&[]).is_none());
    }
}
