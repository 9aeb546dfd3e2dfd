// src/parser/bracket.rs
//
// One `[...]` payload: the anchor into the media plus per-bracket options
//
// Classification order:
//   1. H:M:S(.mmm) or M:S(.mmm)         -> Timestamp
//   2. "<ts> - <ts>"                    -> Range (gif only)
//   3. integers, "a-b" or "a,b,c"       -> IndexRange / Index
//   4. anything else                    -> Quote

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{AppError, AppResult};

/// Largest `--plus`/`--minus` shift
pub const MAX_SHIFT_MS: i64 = 3000;

/// Largest `--x-crop-offset`/`--y-crop-offset`
pub const MAX_CROP_OFFSET: i32 = 100;

/// Longest range a gif bracket may span
pub const MAX_RANGE_MS: u64 = 7000;

/// Typed anchor into a media item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BracketContent {
    Timestamp { seconds: u64, millis: u32 },
    Range { start_ms: u64, end_ms: u64 },
    /// Subtitle cue numbers as written in the file (1-based)
    Index(BTreeSet<usize>),
    IndexRange { start: usize, end: usize },
    Quote(String),
}

impl BracketContent {
    pub fn is_quote(&self) -> bool {
        matches!(self, BracketContent::Quote(_))
    }

    pub fn is_range(&self) -> bool {
        matches!(self, BracketContent::Range { .. })
    }
}

/// Chain merge policy; only the first bracket's policy is honored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergePolicy {
    #[default]
    Auto,
    NoMerge,
    Wild,
}

/// Per-bracket post-processing options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProc {
    pub remove_first: bool,
    pub remove_second: bool,
    /// Percent of the cropped box, -100..=100
    pub x_crop_offset: i32,
    pub y_crop_offset: i32,
    /// left, top, right, bottom in percent
    pub custom_crop: Option<[u32; 4]>,
    pub merge: MergePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub content: BracketContent,
    pub postproc: PostProc,
    /// Net `--plus`/`--minus` shift in milliseconds
    pub milli_offset: i64,
}

impl Bracket {
    pub fn quote(text: impl Into<String>) -> Self {
        Self {
            content: BracketContent::Quote(text.into()),
            postproc: PostProc::default(),
            milli_offset: 0,
        }
    }

    /// Parse the raw contents of one `[...]`.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let (payload, options) = split_options(raw);
        let payload = payload.trim();

        if payload.is_empty() {
            return Err(AppError::InvalidRequest("Empty bracket found".to_string()));
        }

        let content = classify(payload)?;
        let (postproc, milli_offset) = parse_options(options)?;

        Ok(Self {
            content,
            postproc,
            milli_offset,
        })
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

fn timestamp_regex() -> &'static Regex {
    static TIMESTAMP: OnceLock<Regex> = OnceLock::new();
    TIMESTAMP.get_or_init(|| {
        Regex::new(r"^(?:(\d{1,2}):)?(\d{1,2}):(\d{1,2})(?:\.(\d{1,3}))?$").unwrap()
    })
}

/// Options a bracket understands; anything else is quote text
const OPTION_NAMES: [&str; 9] = [
    "remove-first",
    "remove-second",
    "no-merge",
    "wild-merge",
    "plus",
    "minus",
    "x-crop-offset",
    "y-crop-offset",
    "custom-crop",
];

fn option_start_regex() -> &'static Regex {
    static OPTION_START: OnceLock<Regex> = OnceLock::new();
    OPTION_START.get_or_init(|| {
        Regex::new(&format!(r"(^|\s)--(?:{})(\s|$)", OPTION_NAMES.join("|"))).unwrap()
    })
}

/// Split `quote --plus 300` into payload and option text. Options start at
/// the first recognized option name, so "wait --what" stays a quote.
fn split_options(raw: &str) -> (&str, &str) {
    match option_start_regex().find(raw) {
        Some(m) => {
            let at = if raw[m.start()..].starts_with("--") {
                m.start()
            } else {
                m.start() + 1
            };
            (&raw[..at], &raw[at..])
        }
        None => (raw, ""),
    }
}

/// Parse `H:M:S(.mmm)` / `M:S(.mmm)` into (seconds, millis).
fn parse_timestamp(text: &str) -> Option<(u64, u32)> {
    let caps = timestamp_regex().captures(text.trim())?;

    let hours: u64 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let minutes: u64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: u64 = caps.get(3)?.as_str().parse().ok()?;

    if seconds >= 60 || (caps.get(1).is_some() && minutes >= 60) {
        return None;
    }

    // ".5" is half a second, not five milliseconds
    let millis = match caps.get(4) {
        Some(m) => format!("{:0<3}", m.as_str()).parse().ok()?,
        None => 0,
    };

    Some((hours * 3600 + minutes * 60 + seconds, millis))
}

fn classify(payload: &str) -> AppResult<BracketContent> {
    if let Some((seconds, millis)) = parse_timestamp(payload) {
        return Ok(BracketContent::Timestamp { seconds, millis });
    }

    if let Some((left, right)) = payload.split_once(" - ") {
        let right_is_digit = right.trim_start().starts_with(|c: char| c.is_ascii_digit());
        if left.contains(':') && right_is_digit {
            if let (Some(start), Some(end)) = (parse_timestamp(left), parse_timestamp(right)) {
                let start_ms = start.0 * 1000 + start.1 as u64;
                let end_ms = end.0 * 1000 + end.1 as u64;
                return range(start_ms, end_ms);
            }
        }
    }

    if let Some(content) = classify_index(payload)? {
        return Ok(content);
    }

    Ok(BracketContent::Quote(payload.to_string()))
}

fn range(start_ms: u64, end_ms: u64) -> AppResult<BracketContent> {
    if end_ms <= start_ms {
        return Err(AppError::InvalidRequest(
            "Range end must come after its start".to_string(),
        ));
    }
    if end_ms - start_ms > MAX_RANGE_MS {
        return Err(AppError::InvalidRequest(format!(
            "Ranges can't be longer than {} seconds",
            MAX_RANGE_MS / 1000
        )));
    }
    Ok(BracketContent::Range { start_ms, end_ms })
}

fn classify_index(payload: &str) -> AppResult<Option<BracketContent>> {
    let is_number = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    let dashed: Vec<&str> = payload.split('-').map(str::trim).collect();
    if dashed.len() == 2 && dashed.iter().all(|t| is_number(t)) {
        let start: usize = dashed[0].parse().map_err(|_| bad_index(payload))?;
        let end: usize = dashed[1].parse().map_err(|_| bad_index(payload))?;
        if start == 0 || end <= start {
            return Err(bad_index(payload));
        }
        return Ok(Some(BracketContent::IndexRange { start, end }));
    }

    let listed: Vec<&str> = payload.split(',').map(str::trim).collect();
    if listed.iter().all(|t| is_number(t)) {
        let mut values = BTreeSet::new();
        for token in listed {
            let value: usize = token.parse().map_err(|_| bad_index(payload))?;
            if value == 0 {
                return Err(bad_index(payload));
            }
            values.insert(value);
        }
        return Ok(Some(BracketContent::Index(values)));
    }

    Ok(None)
}

fn bad_index(payload: &str) -> AppError {
    AppError::InvalidRequest(format!("Invalid index bracket: {}", payload))
}

// ============================================================================
// OPTIONS
// ============================================================================

fn parse_options(text: &str) -> AppResult<(PostProc, i64)> {
    let mut postproc = PostProc::default();
    let mut plus = 0i64;
    let mut minus = 0i64;
    let mut no_merge = false;
    let mut wild_merge = false;

    let mut tokens = text.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        match token {
            "--remove-first" => postproc.remove_first = true,
            "--remove-second" => postproc.remove_second = true,
            "--no-merge" => no_merge = true,
            "--wild-merge" => wild_merge = true,
            "--plus" | "--minus" => {
                let value = take_value(token, tokens.next())?;
                let ms: i64 = parse_number(token, value)?;
                if !(0..=MAX_SHIFT_MS).contains(&ms) {
                    return Err(AppError::InvalidRequest(format!(
                        "{} must be between 0 and {} milliseconds",
                        token, MAX_SHIFT_MS
                    )));
                }
                if token == "--plus" {
                    plus = ms;
                } else {
                    minus = ms;
                }
            }
            "--x-crop-offset" | "--y-crop-offset" => {
                let value = take_value(token, tokens.next())?;
                let offset: i32 = parse_number(token, value)?;
                if offset.abs() > MAX_CROP_OFFSET {
                    return Err(AppError::InvalidRequest(format!(
                        "{} must be between -{} and {}",
                        token, MAX_CROP_OFFSET, MAX_CROP_OFFSET
                    )));
                }
                if token == "--x-crop-offset" {
                    postproc.x_crop_offset = offset;
                } else {
                    postproc.y_crop_offset = offset;
                }
            }
            "--custom-crop" => {
                let value = take_value(token, tokens.next())?;
                postproc.custom_crop = Some(parse_custom_crop(value)?);
            }
            other => {
                return Err(AppError::InvalidRequest(format!(
                    "Invalid bracket option: {}",
                    other
                )))
            }
        }
    }

    if postproc.remove_first && postproc.remove_second {
        return Err(AppError::InvalidRequest(
            "--remove-first and --remove-second can't be used together".to_string(),
        ));
    }

    postproc.merge = match (no_merge, wild_merge) {
        (true, true) => {
            return Err(AppError::InvalidRequest(
                "--no-merge and --wild-merge can't be used together".to_string(),
            ))
        }
        (true, false) => MergePolicy::NoMerge,
        (false, true) => MergePolicy::Wild,
        (false, false) => MergePolicy::Auto,
    };

    Ok((postproc, plus - minus))
}

fn take_value<'a>(option: &str, value: Option<&'a str>) -> AppResult<&'a str> {
    value.ok_or_else(|| AppError::InvalidRequest(format!("{} requires a value", option)))
}

fn parse_number<T: std::str::FromStr>(option: &str, value: &str) -> AppResult<T> {
    value.parse().map_err(|_| {
        AppError::InvalidRequest(format!("Invalid value for {}: {}", option, value))
    })
}

fn parse_custom_crop(value: &str) -> AppResult<[u32; 4]> {
    let cleaned = value.trim_matches(|c| c == '"' || c == '\'');
    let parts: Vec<&str> = cleaned.split(',').map(str::trim).collect();

    if parts.len() != 4 {
        return Err(AppError::InvalidRequest(format!(
            "--custom-crop expects four values (left,top,right,bottom), got: {}",
            value
        )));
    }

    let mut crop = [0u32; 4];
    for (slot, part) in crop.iter_mut().zip(parts) {
        let v: u32 = parse_number("--custom-crop", part)?;
        if v > 100 {
            return Err(AppError::InvalidRequest(
                "--custom-crop values must be between 0 and 100".to_string(),
            ));
        }
        *slot = v;
    }

    let [left, top, right, bottom] = crop;
    if left >= right || top >= bottom {
        return Err(AppError::InvalidRequest(
            "--custom-crop needs left < right and top < bottom".to_string(),
        ));
    }

    Ok(crop)
}

// ============================================================================
// SERIALIZATION
// ============================================================================

fn write_timestamp(f: &mut fmt::Formatter<'_>, total_ms: u64) -> fmt::Result {
    let seconds = total_ms / 1000;
    let millis = total_ms % 1000;
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);

    if h > 0 {
        write!(f, "{}:{:02}:{:02}", h, m, s)?;
    } else {
        write!(f, "{}:{:02}", m, s)?;
    }
    if millis > 0 {
        write!(f, ".{:03}", millis)?;
    }
    Ok(())
}

impl fmt::Display for BracketContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BracketContent::Timestamp { seconds, millis } => {
                write_timestamp(f, seconds * 1000 + *millis as u64)
            }
            BracketContent::Range { start_ms, end_ms } => {
                write_timestamp(f, *start_ms)?;
                write!(f, " - ")?;
                write_timestamp(f, *end_ms)
            }
            BracketContent::Index(values) => {
                let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", joined.join(","))
            }
            BracketContent::IndexRange { start, end } => write!(f, "{}-{}", start, end),
            BracketContent::Quote(text) => write!(f, "{}", text),
        }
    }
}

impl fmt::Display for Bracket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.content)?;

        let p = &self.postproc;
        if self.milli_offset > 0 {
            write!(f, " --plus {}", self.milli_offset)?;
        } else if self.milli_offset < 0 {
            write!(f, " --minus {}", -self.milli_offset)?;
        }
        if p.remove_first {
            write!(f, " --remove-first")?;
        }
        if p.remove_second {
            write!(f, " --remove-second")?;
        }
        if p.x_crop_offset != 0 {
            write!(f, " --x-crop-offset {}", p.x_crop_offset)?;
        }
        if p.y_crop_offset != 0 {
            write!(f, " --y-crop-offset {}", p.y_crop_offset)?;
        }
        if let Some([l, t, r, b]) = p.custom_crop {
            write!(f, " --custom-crop {},{},{},{}", l, t, r, b)?;
        }
        match p.merge {
            MergePolicy::NoMerge => write!(f, " --no-merge")?,
            MergePolicy::Wild => write!(f, " --wild-merge")?,
            MergePolicy::Auto => {}
        }

        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(bracket: &Bracket) -> Bracket {
        let text = bracket.to_string();
        Bracket::parse(&text[1..text.len() - 1]).unwrap()
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(
            Bracket::parse("00:42:10").unwrap().content,
            BracketContent::Timestamp { seconds: 2530, millis: 0 }
        );
        assert_eq!(
            Bracket::parse("1:05.5").unwrap().content,
            BracketContent::Timestamp { seconds: 65, millis: 500 }
        );
        assert_eq!(
            Bracket::parse("1:05.025").unwrap().content,
            BracketContent::Timestamp { seconds: 65, millis: 25 }
        );
    }

    #[test]
    fn test_invalid_seconds_fall_through_to_quote() {
        assert!(Bracket::parse("1:75").unwrap().content.is_quote());
    }

    #[test]
    fn test_range() {
        assert_eq!(
            Bracket::parse("20:34 - 20:39").unwrap().content,
            BracketContent::Range { start_ms: 1_234_000, end_ms: 1_239_000 }
        );
        assert!(Bracket::parse("20:34 - 20:50").is_err());
        assert!(Bracket::parse("20:39 - 20:34").is_err());
    }

    #[test]
    fn test_indexes() {
        assert_eq!(
            Bracket::parse("12-15").unwrap().content,
            BracketContent::IndexRange { start: 12, end: 15 }
        );
        let expected: BTreeSet<usize> = [3, 4, 9].into_iter().collect();
        assert_eq!(
            Bracket::parse("4,3,9").unwrap().content,
            BracketContent::Index(expected)
        );
        assert!(Bracket::parse("0").is_err());
    }

    #[test]
    fn test_quote_with_options() {
        let bracket = Bracket::parse("you are the one who --plus 300 --remove-second").unwrap();
        assert_eq!(
            bracket.content,
            BracketContent::Quote("you are the one who".to_string())
        );
        assert_eq!(bracket.milli_offset, 300);
        assert!(bracket.postproc.remove_second);
    }

    #[test]
    fn test_dashes_inside_quotes_are_kept() {
        let bracket = Bracket::parse("wait--what - no").unwrap();
        assert_eq!(bracket.content, BracketContent::Quote("wait--what - no".to_string()));
    }

    #[test]
    fn test_option_bounds() {
        assert!(Bracket::parse("1:00 --plus 3001").is_err());
        assert!(Bracket::parse("1:00 --x-crop-offset -101").is_err());
        assert!(Bracket::parse("1:00 --custom-crop 50,0,40,100").is_err());
        assert!(Bracket::parse("1:00 --custom-crop 0,0,100").is_err());
        assert!(Bracket::parse("1:00 --no-merge --wild-merge").is_err());
        assert!(Bracket::parse("1:00 --remove-first --remove-second").is_err());
        assert!(Bracket::parse("1:00 --plus").is_err());

        let err = Bracket::parse("1:00 --plus 100 --zoom 3").unwrap_err();
        assert!(err.to_string().contains("--zoom"));
    }

    #[test]
    fn test_unknown_double_dash_is_quote_text() {
        let bracket = Bracket::parse("I was going to --never mind").unwrap();
        assert_eq!(
            bracket.content,
            BracketContent::Quote("I was going to --never mind".to_string())
        );

        let bracket = Bracket::parse("so --plus-one then --minus 200").unwrap();
        assert_eq!(
            bracket.content,
            BracketContent::Quote("so --plus-one then".to_string())
        );
        assert_eq!(bracket.milli_offset, -200);
    }

    #[test]
    fn test_empty_bracket() {
        assert!(matches!(Bracket::parse("  "), Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn test_reserialization_is_stable() {
        let samples = [
            "1:02:03.250 --minus 200 --y-crop-offset -30",
            "20:34 - 20:39",
            "7,3",
            "10-12",
            "do I have a plan? --wild-merge --custom-crop 10,0,90,100",
            "hello --plus 3000 --remove-first --x-crop-offset 15 --no-merge",
        ];
        for sample in samples {
            let bracket = Bracket::parse(sample).unwrap();
            assert_eq!(reparse(&bracket), bracket, "{}", sample);
        }
    }
}
