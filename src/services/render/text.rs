// src/services/render/text.rs
//
// Quote drawing: harmonic wrap, stroke, optional background box.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::config::RenderingConfig;
use crate::error::{AppError, AppResult};
use crate::parser::GlobalOptions;

const MIN_WRAP: usize = 25;
const MAX_WRAP: usize = 50;

/// Bottom margin as a fraction of the frame height
const BOTTOM_MARGIN: f32 = 0.067;

/// Widest a line may get before the font is scaled down
const MAX_LINE_WIDTH: f32 = 0.95;

const MIN_STROKE_PX: f32 = 2.0;

/// Text block height stays under `frame width * this * lines`
const MAX_LINE_HEIGHT_RATIO: f32 = 0.033;

// ============================================================================
// FONTS
// ============================================================================

/// Default face plus named faces looked up lazily in `fonts_dir`
pub struct FontBook {
    default: Option<Arc<FontVec>>,
    dir: Option<PathBuf>,
    named: Mutex<HashMap<String, Arc<FontVec>>>,
}

/// Face used when `font_path` is unset or unreadable
const BUNDLED_FONT: &[u8] = include_bytes!("../../../assets/fonts/DejaVuSans-Bold.ttf");

impl FontBook {
    pub fn load(config: &RenderingConfig) -> Self {
        let configured = config.font_path.as_deref().and_then(|path| match load_font(path) {
            Ok(font) => Some(Arc::new(font)),
            Err(e) => {
                log::warn!("Configured font unavailable, using the bundled face: {}", e);
                None
            }
        });

        Self {
            default: configured.or_else(bundled_font),
            dir: config.fonts_dir.clone(),
            named: Mutex::new(HashMap::new()),
        }
    }

    /// Only the bundled face; `--font` names are rejected
    pub fn bundled() -> Self {
        Self {
            default: bundled_font(),
            dir: None,
            named: Mutex::new(HashMap::new()),
        }
    }

    /// Face for `--font name`, or the default face.
    pub fn get(&self, name: Option<&str>) -> AppResult<Arc<FontVec>> {
        let name = match name {
            Some(name) => name,
            None => {
                return self
                    .default
                    .clone()
                    .ok_or_else(|| AppError::Other("No usable font loaded".to_string()))
            }
        };

        if let Some(font) = self.named.lock().ok().and_then(|n| n.get(name).cloned()) {
            return Ok(font);
        }

        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| AppError::InvalidRequest(format!("Font not available: {}", name)))?;

        let path = ["ttf", "otf"]
            .iter()
            .map(|ext| dir.join(format!("{}.{}", name, ext)))
            .find(|p| p.is_file())
            .ok_or_else(|| AppError::InvalidRequest(format!("Font not available: {}", name)))?;

        let font = Arc::new(load_font(&path)?);
        if let Ok(mut named) = self.named.lock() {
            named.insert(name.to_string(), Arc::clone(&font));
        }
        Ok(font)
    }
}

fn bundled_font() -> Option<Arc<FontVec>> {
    match FontVec::try_from_vec(BUNDLED_FONT.to_vec()) {
        Ok(font) => Some(Arc::new(font)),
        Err(e) => {
            log::error!("Bundled font is unreadable: {}", e);
            None
        }
    }
}

fn load_font(path: &Path) -> AppResult<FontVec> {
    let data = std::fs::read(path)?;
    FontVec::try_from_vec(data)
        .map_err(|e| AppError::Other(format!("Invalid font {}: {}", path.display(), e)))
}

// ============================================================================
// STYLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    /// Percent of the frame height
    pub font_size: f32,
    /// Percent of the frame height
    pub stroke_width: f32,
    pub color: Rgb<u8>,
    pub stroke_color: Rgb<u8>,
    pub background: Option<Rgb<u8>>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_size: GlobalOptions::DEFAULT_FONT_SIZE,
            stroke_width: GlobalOptions::DEFAULT_STROKE_WIDTH,
            color: Rgb([255, 255, 255]),
            stroke_color: Rgb([0, 0, 0]),
            background: None,
        }
    }
}

impl TextStyle {
    pub fn from_options(options: &GlobalOptions) -> AppResult<Self> {
        let color = match &options.font_color {
            Some(name) => parse_color(name)?,
            None => Rgb([255, 255, 255]),
        };
        let background = options
            .text_background
            .as_deref()
            .map(parse_color)
            .transpose()?;

        Ok(Self {
            font_size: options.font_size,
            stroke_width: options.stroke_width,
            color,
            stroke_color: contrasting(color),
            background,
        })
    }
}

/// Named colors or `#rrggbb`
pub fn parse_color(value: &str) -> AppResult<Rgb<u8>> {
    let value = value.trim().to_lowercase();
    let named = match value.as_str() {
        "white" => Some([255, 255, 255]),
        "black" => Some([0, 0, 0]),
        "yellow" => Some([255, 226, 0]),
        "red" => Some([220, 30, 30]),
        "green" => Some([40, 180, 70]),
        "blue" => Some([30, 90, 220]),
        "orange" => Some([255, 140, 0]),
        "pink" => Some([255, 150, 190]),
        "purple" => Some([130, 60, 170]),
        "gray" | "grey" => Some([128, 128, 128]),
        _ => None,
    };
    if let Some(rgb) = named {
        return Ok(Rgb(rgb));
    }

    let hex = value.strip_prefix('#').unwrap_or(&value);
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
        if let (Ok(r), Ok(g), Ok(b)) = (channel(0), channel(2), channel(4)) {
            return Ok(Rgb([r, g, b]));
        }
    }

    Err(AppError::InvalidRequest(format!("Unknown color: {}", value)))
}

fn contrasting(color: Rgb<u8>) -> Rgb<u8> {
    if luminance(color) < 60.0 {
        Rgb([255, 255, 255])
    } else {
        Rgb([0, 0, 0])
    }
}

pub(crate) fn luminance(color: Rgb<u8>) -> f32 {
    let [r, g, b] = color.0;
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

// ============================================================================
// WRAPPING
// ============================================================================

/// Greedy word wrap at `width` characters; longer words sit alone.
pub fn wrap_at(text: &str, width: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let extra = if current.is_empty() { 0 } else { 1 };
        if !current.is_empty() && current.chars().count() + extra + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Pick the wrap width that makes lines the most even.
///
/// Ties go to fewer lines, then to the narrower width.
pub fn harmonic_wrap(text: &str) -> Vec<String> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().count() <= MIN_WRAP {
        return if text.is_empty() { Vec::new() } else { vec![text] };
    }

    let mut best: Option<((usize, usize, usize), Vec<String>)> = None;
    for width in MIN_WRAP..=MAX_WRAP {
        let lines = wrap_at(&text, width);
        let lengths: Vec<usize> = lines.iter().map(|l| l.chars().count()).collect();
        let spread = lengths.iter().max().copied().unwrap_or(0)
            - lengths.iter().min().copied().unwrap_or(0);
        let key = (spread, lines.len(), width);

        if best.as_ref().map_or(true, |(k, _)| key < *k) {
            best = Some((key, lines));
        }
    }

    best.map(|(_, lines)| lines).unwrap_or_default()
}

// ============================================================================
// DRAWING
// ============================================================================

/// Draw `text` centered near the bottom of the frame.
pub fn draw_quote(frame: &mut RgbImage, text: &str, font: &FontVec, style: &TextStyle) {
    let lines = harmonic_wrap(text);
    if lines.is_empty() {
        return;
    }

    let (width, height) = frame.dimensions();
    let mut scale = PxScale::from((height as f32 * style.font_size / 100.0).max(8.0));

    // Shrink until the widest line fits
    let widest = |scale: PxScale| {
        lines
            .iter()
            .map(|l| text_size(scale, font, l).0)
            .max()
            .unwrap_or(0) as f32
    };
    let limit = width as f32 * MAX_LINE_WIDTH;
    let measured = widest(scale);
    if measured > limit {
        let factor = limit / measured;
        scale = PxScale::from(scale.y * factor);
    }

    let natural = font.as_scaled(scale);
    scale = capped_scale(scale, natural.height() + natural.line_gap(), width);

    let scaled = font.as_scaled(scale);
    let line_height = (scaled.height() + scaled.line_gap()).ceil() as i32;
    let stroke = (height as f32 * style.stroke_width / 100.0)
        .max(MIN_STROKE_PX)
        .round() as i32;

    let block_height = line_height * lines.len() as i32;
    let bottom = height as i32 - (height as f32 * BOTTOM_MARGIN) as i32;
    let top = bottom - block_height;

    if let Some(background) = style.background {
        let block_width = widest(scale) as i32;
        let pad = stroke * 2;
        let x = (width as i32 - block_width) / 2 - pad;
        let rect = Rect::at(x.max(0), (top - pad).max(0)).of_size(
            (block_width + pad * 2).max(1) as u32,
            (block_height + pad * 2).max(1) as u32,
        );
        draw_filled_rect_mut(frame, rect, background);
    }

    for (i, line) in lines.iter().enumerate() {
        let (line_width, _) = text_size(scale, font, line);
        let x = (width as i32 - line_width as i32) / 2;
        let y = top + line_height * i as i32;

        if style.background.is_none() {
            for dx in -stroke..=stroke {
                for dy in -stroke..=stroke {
                    if dx * dx + dy * dy <= stroke * stroke && (dx, dy) != (0, 0) {
                        draw_text_mut(frame, style.stroke_color, x + dx, y + dy, scale, font, line);
                    }
                }
            }
        }
        draw_text_mut(frame, style.color, x, y, scale, font, line);
    }
}

/// Scale down so each line is at most `frame_width * MAX_LINE_HEIGHT_RATIO`
/// tall; the block then stays under that bound times the line count.
fn capped_scale(scale: PxScale, line_height: f32, frame_width: u32) -> PxScale {
    let cap = frame_width as f32 * MAX_LINE_HEIGHT_RATIO;
    if line_height > cap && line_height > 0.0 {
        PxScale::from(scale.y * cap / line_height)
    } else {
        scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_height_capped_by_frame_width() {
        // 1000 px wide: 33 px per line at most
        let capped = capped_scale(PxScale::from(40.0), 48.0, 1000);
        assert!((capped.y - 27.5).abs() < 1e-3);

        let untouched = capped_scale(PxScale::from(20.0), 24.0, 1000);
        assert_eq!(untouched.y, 20.0);
    }

    #[test]
    fn test_short_text_is_one_line() {
        assert_eq!(harmonic_wrap("Do I have a plan?"), vec!["Do I have a plan?"]);
        assert!(harmonic_wrap("   ").is_empty());
    }

    #[test]
    fn test_harmonic_wrap_balances_lines() {
        let text = "You know what kind of plan never fails? No plan at all.";
        let lines = harmonic_wrap(text);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines.join(" "), text);
        let lengths: Vec<usize> = lines.iter().map(|l| l.chars().count()).collect();
        assert!(lengths[0].abs_diff(lengths[1]) <= 10, "{:?}", lines);
    }

    #[test]
    fn test_wrap_keeps_long_words_whole() {
        let lines = wrap_at("a supercalifragilisticexpialidocious word", 10);
        assert_eq!(lines, vec!["a", "supercalifragilisticexpialidocious", "word"]);
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("White").unwrap(), Rgb([255, 255, 255]));
        assert_eq!(parse_color("#ff8000").unwrap(), Rgb([255, 128, 0]));
        assert_eq!(parse_color("00ff00").unwrap(), Rgb([0, 255, 0]));
        assert!(matches!(
            parse_color("octarine"),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_style_from_options() {
        let mut options = GlobalOptions::default();
        options.font_color = Some("black".into());
        options.text_background = Some("yellow".into());

        let style = TextStyle::from_options(&options).unwrap();
        assert_eq!(style.color, Rgb([0, 0, 0]));
        assert_eq!(style.stroke_color, Rgb([255, 255, 255]));
        assert_eq!(style.background, Some(Rgb([255, 226, 0])));
    }

    #[test]
    fn test_unknown_named_font_is_invalid_but_default_exists() {
        let book = FontBook::bundled();
        assert!(book.get(None).is_ok());
        assert!(matches!(
            book.get(Some("comic-sans")),
            Err(AppError::InvalidRequest(_))
        ));
    }
}
