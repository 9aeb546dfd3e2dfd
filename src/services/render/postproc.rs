// src/services/render/postproc.rs
//
// Frame post-operations. Enhancements blend against a degenerate image:
// factor 1.0 is the identity, 0.0 is the degenerate image itself.

use image::{imageops, Rgb, RgbImage};

use super::text::luminance;

/// Percent value (-100..=100) to an enhancement factor
pub fn factor(value: i32) -> f32 {
    1.0 + value as f32 / 100.0
}

fn blend(image: &RgbImage, degenerate: &RgbImage, factor: f32) -> RgbImage {
    let mut out = image.clone();
    for (px, base) in out.pixels_mut().zip(degenerate.pixels()) {
        for c in 0..3 {
            let v = base[c] as f32 + (px[c] as f32 - base[c] as f32) * factor;
            px[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

pub fn adjust_contrast(image: &RgbImage, value: i32) -> RgbImage {
    if value == 0 {
        return image.clone();
    }
    let count = (image.width() as f64 * image.height() as f64).max(1.0);
    let mean = image.pixels().map(|p| luminance(*p) as f64).sum::<f64>() / count;
    let gray = mean.round() as u8;
    let degenerate = RgbImage::from_pixel(image.width(), image.height(), Rgb([gray, gray, gray]));
    blend(image, &degenerate, factor(value))
}

pub fn adjust_brightness(image: &RgbImage, value: i32) -> RgbImage {
    if value == 0 {
        return image.clone();
    }
    let degenerate = RgbImage::new(image.width(), image.height());
    blend(image, &degenerate, factor(value))
}

pub fn adjust_sharpness(image: &RgbImage, value: i32) -> RgbImage {
    if value == 0 {
        return image.clone();
    }
    let degenerate = imageops::blur(image, 1.0);
    blend(image, &degenerate, factor(value))
}

/// Crop to left/top/right/bottom percentages.
pub fn custom_crop(image: &RgbImage, bounds: [u32; 4]) -> RgbImage {
    let (w, h) = image.dimensions();
    let [left, top, right, bottom] = bounds.map(|v| v.min(100));
    let x = w * left / 100;
    let y = h * top / 100;
    let width = (w * right / 100).saturating_sub(x).max(1);
    let height = (h * bottom / 100).saturating_sub(y).max(1);
    imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Crop to `quotient` (width / height). Offsets move the crop box inside
/// the slack, in percent of half the slack.
pub fn aspect_crop(image: &RgbImage, quotient: f32, x_offset: i32, y_offset: i32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || quotient <= 0.0 {
        return image.clone();
    }
    let current = w as f32 / h as f32;

    let place = |slack: u32, offset: i32| -> u32 {
        let half = slack as f32 / 2.0;
        (half + half * offset.clamp(-100, 100) as f32 / 100.0).round() as u32
    };

    if (current - quotient).abs() < 0.005 {
        return image.clone();
    }

    if current > quotient {
        let width = ((h as f32 * quotient).round() as u32).clamp(1, w);
        let x = place(w - width, x_offset).min(w - width);
        imageops::crop_imm(image, x, 0, width, h).to_image()
    } else {
        let height = ((w as f32 / quotient).round() as u32).clamp(1, h);
        let y = place(h - height, y_offset).min(h - height);
        imageops::crop_imm(image, 0, y, w, height).to_image()
    }
}

/// White border of `px` pixels on every side
pub fn add_border(image: &RgbImage, px: u32) -> RgbImage {
    if px == 0 {
        return image.clone();
    }
    let mut canvas = RgbImage::from_pixel(
        image.width() + px * 2,
        image.height() + px * 2,
        Rgb([255, 255, 255]),
    );
    imageops::overlay(&mut canvas, image, px as i64, px as i64);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, _| {
            let v = (x * 255 / w.max(1)) as u8;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_zero_adjustments_are_identity() {
        let img = gradient(20, 10);
        assert_eq!(adjust_contrast(&img, 0), img);
        assert_eq!(adjust_brightness(&img, 0), img);
        assert_eq!(adjust_sharpness(&img, 0), img);
    }

    #[test]
    fn test_brightness_scales_channels() {
        let img = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        assert_eq!(adjust_brightness(&img, 50).get_pixel(0, 0), &Rgb([150, 150, 150]));
        assert_eq!(adjust_brightness(&img, -100).get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_contrast_pulls_towards_mean() {
        let img = gradient(100, 2);
        let flat = adjust_contrast(&img, -100);
        let first = flat.get_pixel(0, 0);
        assert!(flat.pixels().all(|p| p == first));
    }

    #[test]
    fn test_aspect_crop_centered_and_offset() {
        let img = gradient(400, 100);
        let centered = aspect_crop(&img, 2.0, 0, 0);
        assert_eq!(centered.dimensions(), (200, 100));
        assert_eq!(centered.get_pixel(0, 0), img.get_pixel(100, 0));

        let left = aspect_crop(&img, 2.0, -100, 0);
        assert_eq!(left.get_pixel(0, 0), img.get_pixel(0, 0));

        let tall = aspect_crop(&RgbImage::new(100, 100), 2.0, 0, 0);
        assert_eq!(tall.dimensions(), (100, 50));
    }

    #[test]
    fn test_custom_crop() {
        let img = gradient(200, 100);
        let cropped = custom_crop(&img, [10, 20, 60, 100]);
        assert_eq!(cropped.dimensions(), (100, 80));
    }

    #[test]
    fn test_border() {
        let img = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let bordered = add_border(&img, 3);
        assert_eq!(bordered.dimensions(), (16, 16));
        assert_eq!(bordered.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(bordered.get_pixel(3, 3), &Rgb([0, 0, 0]));
    }
}
