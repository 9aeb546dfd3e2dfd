// src/parser/request.rs
//
// Full request line parsing
//
// request     = command SP media_query { SP bracket } { SP global_flag }
// media_query = printable chars up to the first "["
//
// `!parallel` takes 2-4 pipe-separated segments, each owning one bracket.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use super::bracket::Bracket;
use crate::domain::Command;
use crate::error::{AppError, AppResult};

const MIN_QUERY_CHARS: usize = 4;

/// Per-command constraints, keyed on the command variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRules {
    pub max_brackets: usize,
    pub exact_brackets: Option<usize>,
    pub allows_range: bool,
    pub segments: RangeInclusive<usize>,
}

pub fn rules_for(command: Command) -> CommandRules {
    match command {
        Command::Palette => CommandRules {
            max_brackets: 1,
            exact_brackets: Some(1),
            allows_range: false,
            segments: 1..=1,
        },
        Command::Gif => CommandRules {
            max_brackets: 4,
            exact_brackets: None,
            allows_range: true,
            segments: 1..=1,
        },
        Command::Parallel => CommandRules {
            max_brackets: 4,
            exact_brackets: None,
            allows_range: false,
            segments: 2..=4,
        },
        Command::Req
        | Command::Song
        | Command::Manga
        | Command::Comic
        | Command::Game
        | Command::Sports
        | Command::Yt
        | Command::Lyrics => CommandRules {
            max_brackets: 10,
            exact_brackets: None,
            allows_range: false,
            segments: 1..=1,
        },
    }
}

/// One media query and the brackets anchored into it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySegment {
    pub media_query: String,
    pub brackets: Vec<Bracket>,
}

/// Options applying to every frame of the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub font: Option<String>,
    /// Percent of the frame height
    pub font_size: f32,
    pub font_color: Option<String>,
    pub text_background: Option<String>,
    /// Percent of the frame height
    pub stroke_width: f32,
    /// White frame border in pixels
    pub border: Option<u32>,
    pub aspect_quotient: Option<f32>,
    pub contrast: i32,
    pub brightness: i32,
    pub sharpness: i32,
    /// Skip text drawing and post-ops
    pub raw: bool,
}

impl GlobalOptions {
    pub const DEFAULT_FONT_SIZE: f32 = 5.5;
    pub const DEFAULT_STROKE_WIDTH: f32 = 0.5;
    pub const DEFAULT_ASPECT_QUOTIENT: f32 = 1.78;
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            font: None,
            font_size: Self::DEFAULT_FONT_SIZE,
            font_color: None,
            text_background: None,
            stroke_width: Self::DEFAULT_STROKE_WIDTH,
            border: None,
            aspect_quotient: None,
            contrast: 0,
            brightness: 0,
            sharpness: 0,
            raw: false,
        }
    }
}

/// A numeric flag the requester typed explicitly, with its default
#[derive(Debug, Clone, PartialEq)]
pub struct ExplicitFlag {
    pub name: &'static str,
    pub value: f64,
    pub default: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRequest {
    pub command: Command,
    pub segments: Vec<QuerySegment>,
    pub options: GlobalOptions,
    /// Numeric flags given explicitly, in order of appearance
    #[serde(skip)]
    pub explicit_flags: Vec<(String, f64)>,
}

impl ParsedRequest {
    pub fn bracket_count(&self) -> usize {
        self.segments.iter().map(|s| s.brackets.len()).sum()
    }

    /// Explicit numeric flags paired with their defaults
    pub fn explicit_numeric_flags(&self) -> Vec<ExplicitFlag> {
        self.explicit_flags
            .iter()
            .filter_map(|(name, value)| {
                let (name, default) = match name.as_str() {
                    "--font-size" => ("--font-size", GlobalOptions::DEFAULT_FONT_SIZE as f64),
                    "--stroke-width" => {
                        ("--stroke-width", GlobalOptions::DEFAULT_STROKE_WIDTH as f64)
                    }
                    "--aspect-quotient" => (
                        "--aspect-quotient",
                        GlobalOptions::DEFAULT_ASPECT_QUOTIENT as f64,
                    ),
                    "--contrast" => ("--contrast", 0.0),
                    "--brightness" => ("--brightness", 0.0),
                    "--sharpness" => ("--sharpness", 0.0),
                    _ => return None,
                };
                Some(ExplicitFlag {
                    name,
                    value: *value,
                    default,
                })
            })
            .collect()
    }
}

/// Parse a full request line.
pub fn parse_request(line: &str) -> AppResult<ParsedRequest> {
    let line = line.trim();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    let command = match verb.strip_prefix('!').and_then(Command::parse) {
        Some(command) => command,
        None => {
            return Err(AppError::InvalidRequest(format!(
                "Unknown command: {}",
                verb
            )))
        }
    };

    let (segments, tail) = scan_segments(command, rest)?;
    let (options, explicit_flags) = parse_global_flags(tail)?;

    let request = ParsedRequest {
        command,
        segments,
        options,
        explicit_flags,
    };

    check_rules(&request)?;
    Ok(request)
}

/// Whether a line starts with a known command verb
pub fn is_command(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .and_then(|verb| verb.strip_prefix('!'))
        .and_then(Command::parse)
        .is_some()
}

/// Walk the text after the verb collecting (query, brackets) segments;
/// returns the trailing flag text.
fn scan_segments(command: Command, text: &str) -> AppResult<(Vec<QuerySegment>, &str)> {
    let mut segments = Vec::new();
    let mut query = String::new();
    let mut brackets: Vec<Bracket> = Vec::new();
    let mut rest = text;

    loop {
        let open = match rest.find('[') {
            Some(i) => i,
            None => break,
        };
        let between = &rest[..open];

        if brackets.is_empty() {
            query.push_str(between);
            if command == Command::Parallel {
                check_single_query(&query)?;
            }
        } else if let Some(next_query) = between.trim().strip_prefix('|') {
            if command != Command::Parallel {
                return Err(AppError::InvalidRequest(
                    "Pipe separators are only valid for !parallel".to_string(),
                ));
            }
            segments.push(QuerySegment {
                media_query: query.trim().to_string(),
                brackets: std::mem::take(&mut brackets),
            });
            check_single_query(next_query)?;
            query = next_query.to_string();
        } else if !between.trim().is_empty() {
            return Err(AppError::InvalidRequest(format!(
                "Unexpected text between brackets: {}",
                between.trim()
            )));
        }

        let close = match rest[open..].find(']') {
            Some(i) => open + i,
            None => {
                return Err(AppError::InvalidRequest(
                    "Unclosed bracket found".to_string(),
                ))
            }
        };

        let index = segments.iter().map(|s| s.brackets.len()).sum::<usize>() + brackets.len();
        let bracket = Bracket::parse(&rest[open + 1..close]).map_err(|e| e.at_bracket(index + 1))?;
        brackets.push(bracket);
        rest = &rest[close + 1..];
    }

    if brackets.is_empty() {
        return Err(AppError::InvalidRequest(
            "No brackets found in the request".to_string(),
        ));
    }

    segments.push(QuerySegment {
        media_query: query.trim().to_string(),
        brackets,
    });

    Ok((segments, rest))
}

/// A parallel query followed by `|` before any bracket has none of its own
fn check_single_query(query: &str) -> AppResult<()> {
    match query.split_once('|') {
        Some((orphan, _)) => Err(AppError::InvalidRequest(format!(
            "{} has no bracket",
            orphan.trim()
        ))),
        None => Ok(()),
    }
}

fn parse_global_flags(text: &str) -> AppResult<(GlobalOptions, Vec<(String, f64)>)> {
    let mut options = GlobalOptions::default();
    let mut explicit = Vec::new();
    let mut tokens = text.split_whitespace();

    while let Some(flag) = tokens.next() {
        let mut value = || {
            tokens
                .next()
                .ok_or_else(|| AppError::InvalidRequest(format!("{} requires a value", flag)))
        };

        match flag {
            "--raw" => options.raw = true,
            "--font" => options.font = Some(value()?.to_lowercase()),
            "--font-color" => options.font_color = Some(value()?.to_lowercase()),
            "--text-background" => options.text_background = Some(value()?.to_lowercase()),
            "--border" => {
                let v: u32 = parse_flag(flag, value()?)?;
                check_bounds(flag, v as f64, 0.0, 50.0)?;
                options.border = Some(v);
            }
            "--font-size" => {
                let v: f32 = parse_flag(flag, value()?)?;
                check_bounds(flag, v as f64, 2.0, 12.0)?;
                options.font_size = v;
                explicit.push((flag.to_string(), v as f64));
            }
            "--stroke-width" => {
                let v: f32 = parse_flag(flag, value()?)?;
                check_bounds(flag, v as f64, 0.0, 3.0)?;
                options.stroke_width = v;
                explicit.push((flag.to_string(), v as f64));
            }
            "--aspect-quotient" => {
                let v: f32 = parse_flag(flag, value()?)?;
                check_bounds(flag, v as f64, 1.0, 2.76)?;
                options.aspect_quotient = Some(v);
                explicit.push((flag.to_string(), v as f64));
            }
            "--contrast" | "--brightness" | "--sharpness" => {
                let v: i32 = parse_flag(flag, value()?)?;
                check_bounds(flag, v as f64, -100.0, 100.0)?;
                match flag {
                    "--contrast" => options.contrast = v,
                    "--brightness" => options.brightness = v,
                    _ => options.sharpness = v,
                }
                explicit.push((flag.to_string(), v as f64));
            }
            "-story" | "--story" => {
                return Err(AppError::InvalidRequest(
                    "Story mode is not available".to_string(),
                ))
            }
            other => {
                return Err(AppError::InvalidRequest(format!(
                    "Invalid flag: {}",
                    other
                )))
            }
        }
    }

    Ok((options, explicit))
}

fn parse_flag<T: std::str::FromStr>(flag: &str, value: &str) -> AppResult<T> {
    value
        .parse()
        .map_err(|_| AppError::InvalidRequest(format!("Invalid value for {}: {}", flag, value)))
}

fn check_bounds(flag: &str, value: f64, min: f64, max: f64) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::InvalidRequest(format!(
            "{} must be between {} and {}",
            flag, min, max
        )));
    }
    Ok(())
}

fn check_rules(request: &ParsedRequest) -> AppResult<()> {
    let rules = rules_for(request.command);
    let total = request.bracket_count();

    if !rules.segments.contains(&request.segments.len()) {
        return Err(AppError::InvalidRequest(format!(
            "{} expects between {} and {} media queries",
            request.command,
            rules.segments.start(),
            rules.segments.end()
        )));
    }

    for segment in &request.segments {
        if segment.media_query.chars().count() < MIN_QUERY_CHARS {
            return Err(AppError::InvalidRequest(format!(
                "Media query too short: '{}'",
                segment.media_query
            )));
        }
        if request.command == Command::Parallel && segment.brackets.len() != 1 {
            return Err(AppError::InvalidRequest(format!(
                "Each !parallel item needs exactly one bracket ({} has {})",
                segment.media_query,
                segment.brackets.len()
            )));
        }
    }

    if let Some(exact) = rules.exact_brackets {
        if total != exact {
            return Err(AppError::InvalidRequest(format!(
                "{} expects exactly {} bracket(s)",
                request.command, exact
            )));
        }
    }

    if total > rules.max_brackets {
        return Err(AppError::InvalidRequest(format!(
            "Too many brackets for {} ({} > {})",
            request.command, total, rules.max_brackets
        )));
    }

    if !rules.allows_range {
        let has_range = request
            .segments
            .iter()
            .flat_map(|s| s.brackets.iter())
            .any(|b| b.content.is_range());
        if has_range {
            return Err(AppError::InvalidRequest(format!(
                "Ranges are only valid for !gif, not {}",
                request.command
            )));
        }
    }

    Ok(())
}
