// src/services/render/palette.rs
//
// Median-cut quantization and the palette strip below a frame.

use image::{imageops, Rgb, RgbImage};

/// Colors brighter than this (mean of channels) are pruned
const LIGHT_MEAN: u32 = 165;

/// Fewer surviving colors than this abort the palette
const MIN_COLORS: usize = 6;

/// Border width relative to the frame width
const BORDER_RATIO: f32 = 0.0065;

/// Strip height relative to the frame height
const STRIP_RATIO: f32 = 0.1;

/// Pixels sampled at most per frame
const MAX_SAMPLES: usize = 40_000;

/// Up to `colors` representative colors, darkest first.
pub fn median_cut(image: &RgbImage, colors: usize) -> Vec<Rgb<u8>> {
    let total = image.pixels().len();
    if total == 0 || colors == 0 {
        return Vec::new();
    }
    let step = (total / MAX_SAMPLES).max(1);
    let samples: Vec<[u8; 3]> = image.pixels().step_by(step).map(|p| p.0).collect();

    let mut boxes: Vec<Vec<[u8; 3]>> = vec![samples];
    while boxes.len() < colors {
        // Split the box with the widest channel range
        let candidate = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.len() > 1)
            .map(|(i, b)| (i, widest_channel(b)))
            .filter(|(_, (_, range))| *range > 0)
            .max_by_key(|(i, (_, range))| (*range, std::cmp::Reverse(*i)));

        let (index, (channel, _)) = match candidate {
            Some(c) => c,
            None => break,
        };

        let mut bucket = boxes.swap_remove(index);
        bucket.sort_unstable_by_key(|px| px[channel]);
        let upper = bucket.split_off(value_boundary(&bucket, channel));
        boxes.push(bucket);
        boxes.push(upper);
    }

    let mut palette: Vec<Rgb<u8>> = boxes.iter().map(|b| mean_color(b)).collect();
    palette.sort_by_key(|c| c.0.iter().map(|v| *v as u32).sum::<u32>());
    palette.dedup();
    palette
}

/// Split point closest to the median where the channel value changes, so
/// equal pixels never straddle two boxes. `sorted` has a non-zero range.
fn value_boundary(sorted: &[[u8; 3]], channel: usize) -> usize {
    let mid = sorted.len() / 2;
    (1..sorted.len())
        .filter(|&j| sorted[j - 1][channel] != sorted[j][channel])
        .min_by_key(|&j| j.abs_diff(mid))
        .unwrap_or(mid)
}

fn widest_channel(pixels: &[[u8; 3]]) -> (usize, u8) {
    (0..3)
        .map(|c| {
            let min = pixels.iter().map(|p| p[c]).min().unwrap_or(0);
            let max = pixels.iter().map(|p| p[c]).max().unwrap_or(0);
            (c, max - min)
        })
        .max_by_key(|(c, range)| (*range, std::cmp::Reverse(*c)))
        .unwrap_or((0, 0))
}

fn mean_color(pixels: &[[u8; 3]]) -> Rgb<u8> {
    let n = pixels.len().max(1) as u64;
    let mut sum = [0u64; 3];
    for p in pixels {
        for c in 0..3 {
            sum[c] += p[c] as u64;
        }
    }
    Rgb([(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8])
}

/// Drop light colors when enough dark ones remain to fill a palette;
/// `None` when the quantization itself found too few colors.
pub fn prune_light(colors: Vec<Rgb<u8>>) -> Option<Vec<Rgb<u8>>> {
    if colors.len() < MIN_COLORS {
        return None;
    }
    let dark: Vec<Rgb<u8>> = colors
        .iter()
        .copied()
        .filter(|c| c.0.iter().map(|v| *v as u32).sum::<u32>() / 3 <= LIGHT_MEAN)
        .collect();
    if dark.len() >= MIN_COLORS {
        Some(dark)
    } else {
        Some(colors)
    }
}

/// Frame with a palette strip appended, or the frame untouched when the
/// palette does not have enough colors.
pub fn palette_frame(frame: &RgbImage, colors: usize) -> RgbImage {
    let palette = match prune_light(median_cut(frame, colors)) {
        Some(palette) => palette,
        None => {
            log::info!("Not enough colors for a palette; returning the plain frame");
            return frame.clone();
        }
    };

    let (w, h) = frame.dimensions();
    let border = ((w as f32 * BORDER_RATIO).round() as u32).max(1);
    let strip = ((h as f32 * STRIP_RATIO).round() as u32).max(1);

    let mut canvas = RgbImage::from_pixel(w + border * 2, border + h + strip, Rgb([255, 255, 255]));
    imageops::overlay(&mut canvas, frame, border as i64, border as i64);

    let n = palette.len() as u32;
    let base = w / n;
    for (i, color) in palette.iter().enumerate() {
        let i = i as u32;
        let x0 = border + base * i;
        let x1 = if i == n - 1 { border + w } else { x0 + base };
        for x in x0..x1 {
            for y in border + h..border + h + strip {
                canvas.put_pixel(x, y, *color);
            }
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripes(colors: &[[u8; 3]]) -> RgbImage {
        let n = colors.len() as u32;
        RgbImage::from_fn(n * 20, 40, |x, _| Rgb(colors[(x / 20) as usize]))
    }

    const DARK: [[u8; 3]; 10] = [
        [10, 10, 10],
        [120, 20, 20],
        [20, 120, 20],
        [20, 20, 120],
        [100, 100, 0],
        [0, 100, 100],
        [100, 0, 100],
        [60, 60, 60],
        [140, 70, 10],
        [10, 70, 140],
    ];

    #[test]
    fn test_median_cut_recovers_distinct_colors() {
        let palette = median_cut(&stripes(&DARK), 10);
        assert_eq!(palette.len(), 10);
        for color in DARK {
            assert!(palette.contains(&Rgb(color)), "missing {:?}", color);
        }
    }

    #[test]
    fn test_prune_light_colors() {
        let mut colors: Vec<Rgb<u8>> = DARK.iter().take(6).map(|c| Rgb(*c)).collect();
        colors.push(Rgb([250, 250, 250]));
        let kept = prune_light(colors).unwrap();
        assert_eq!(kept.len(), 6);

        let few = vec![Rgb([0, 0, 0]), Rgb([240, 240, 240])];
        assert!(prune_light(few).is_none());
    }

    #[test]
    fn test_light_colors_kept_when_pruning_would_empty_palette() {
        let mut colors: Vec<Rgb<u8>> = DARK.iter().take(3).map(|c| Rgb(*c)).collect();
        colors.extend([
            Rgb([250, 250, 250]),
            Rgb([230, 200, 210]),
            Rgb([240, 240, 180]),
            Rgb([200, 220, 250]),
        ]);
        let kept = prune_light(colors.clone()).unwrap();
        assert_eq!(kept, colors);
    }

    #[test]
    fn test_palette_layout() {
        let frame = RgbImage::from_fn(1000, 400, |x, _| Rgb(DARK[(x / 100) as usize]));
        let out = palette_frame(&frame, 10);

        let border = 7; // round(1000 * 0.0065)
        assert_eq!(out.dimensions(), (1000 + border * 2, border + 400 + 40));
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(border, border), &Rgb(DARK[0]));
        // Strip row starts right below the frame
        assert_ne!(out.get_pixel(border + 5, border + 400), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_flat_frame_is_returned_untouched() {
        let frame = RgbImage::from_pixel(200, 100, Rgb([30, 30, 30]));
        assert_eq!(palette_frame(&frame, 10), frame);
    }
}
