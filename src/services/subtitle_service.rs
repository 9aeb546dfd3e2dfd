// src/services/subtitle_service.rs
//
// Subtitle Index
//
// ARCHITECTURE:
// - Parses SRT files (subparse) and lyrics files into cue lists
// - Memoizes cue lists per (path, mtime)
// - Quote search, chain detection and dialogue split/merge
//
// CRITICAL RULES:
// - Parsed cues are never mutated; split/merge return derived cues
// - Ranking is deterministic: (score desc, position asc)
// - Chain detection returns Option; only user-visible misses are errors

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use subparse::{SrtFile, SubtitleFileInterface};
use tokio::process::Command;

use crate::config::Config;
use crate::domain::{normalize_text, validate_cue, MediaItem, MediaKind, SubtitleCue};
use crate::error::{AppError, AppResult};
use crate::infrastructure::fuzzy;
use crate::parser::MergePolicy;

/// Candidates whose aligned length differs this much or more are not accepted
const MAX_QUOTE_LENGTH_DIFF: usize = 5;

/// Chain windows tolerate this normalized length difference per pair
const MAX_CHAIN_LENGTH_DIFF: usize = 2;

/// Duration of each synthetic lyrics cue
const LYRICS_CUE_MS: u64 = 1000;

type CueList = Arc<Vec<SubtitleCue>>;

pub struct SubtitleService {
    languages: Vec<String>,
    quote_threshold: u32,
    ffmpeg_bin: String,
    extraction_timeout: Duration,
    memo: Mutex<HashMap<PathBuf, (SystemTime, CueList)>>,
}

impl SubtitleService {
    pub fn new(config: &Config) -> Self {
        Self {
            languages: config.subtitles.languages.clone(),
            quote_threshold: config.resolver.quote_threshold,
            ffmpeg_bin: config.rendering.ffmpeg_bin.clone(),
            extraction_timeout: Duration::from_secs(config.rendering.subtitle_timeout_secs),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Cue list of an item in its default language
    pub fn cues(&self, media: &MediaItem) -> AppResult<CueList> {
        let handle = subtitle_handle(media)?;
        self.load(media, &handle)
    }

    /// Cue list in the requested language, falling back to the default file
    pub fn cues_for_language(&self, media: &MediaItem, language: &str) -> AppResult<CueList> {
        let handle = subtitle_handle(media)?;
        if media.kind != MediaKind::Lyrics {
            let localized = language_path(&handle, language, &self.languages);
            if localized != handle && localized.is_file() {
                return self.load(media, &localized);
            }
        }
        self.load(media, &handle)
    }

    pub fn find_quote(
        &self,
        media: &MediaItem,
        language: &str,
        text: &str,
    ) -> AppResult<SubtitleCue> {
        let cues = self.cues_for_language(media, language)?;
        find_quote_in(&cues, text, self.quote_threshold)
    }

    pub fn find_chain(
        &self,
        media: &MediaItem,
        language: &str,
        quotes: &[String],
    ) -> AppResult<Vec<SubtitleCue>> {
        let cues = self.cues_for_language(media, language)?;
        find_chain_in(&cues, quotes, self.quote_threshold)
    }

    fn load(&self, media: &MediaItem, path: &Path) -> AppResult<CueList> {
        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|_| {
                AppError::SubtitlesNotFound(format!(
                    "Subtitles not found for {}",
                    media.pretty_title()
                ))
            })?;

        if let Some(cues) = self.memo.lock().ok().and_then(|memo| {
            memo.get(path)
                .filter(|(cached_mtime, _)| *cached_mtime == mtime)
                .map(|(_, cues)| Arc::clone(cues))
        }) {
            return Ok(cues);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::SubtitlesNotFound(format!(
                "Corrupted subtitles for {}: {}",
                media.pretty_title(),
                e
            ))
        })?;

        let cues = if media.kind == MediaKind::Lyrics {
            lyrics_cues(&content)
        } else {
            parse_srt(&content).map_err(|e| {
                AppError::SubtitlesNotFound(format!(
                    "Corrupted subtitles for {}: {}",
                    media.pretty_title(),
                    e
                ))
            })?
        };

        if cues.is_empty() {
            return Err(AppError::SubtitlesNotFound(format!(
                "Corrupted subtitles for {}: no cues found",
                media.pretty_title()
            )));
        }

        log::debug!("Parsed {} cues from {}", cues.len(), path.display());
        let cues = Arc::new(cues);
        if let Ok(mut memo) = self.memo.lock() {
            memo.insert(path.to_path_buf(), (mtime, Arc::clone(&cues)));
        }
        Ok(cues)
    }

    /// Extract the first embedded subtitle stream next to the video as
    /// `{stem}.{lang}.srt`.
    pub async fn extract_embedded(&self, media: &MediaItem) -> AppResult<PathBuf> {
        let video = Path::new(&media.resource);
        let language = self
            .languages
            .first()
            .map(String::as_str)
            .unwrap_or("en");
        let target = sibling_subtitle(video, Some(language));

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-v", "error", "-y", "-i"])
            .arg(video)
            .args(["-map", "0:s:0", "-f", "srt"])
            .arg(&target)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.extraction_timeout, cmd.output())
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "Subtitle extraction for {} exceeded {}s",
                    media.pretty_title(),
                    self.extraction_timeout.as_secs()
                ))
            })??;

        if !output.status.success() {
            return Err(AppError::SubtitlesNotFound(format!(
                "No embedded subtitles in {}: {}",
                media.pretty_title(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        log::info!("Extracted subtitles to {}", target.display());
        Ok(target)
    }
}

fn subtitle_handle(media: &MediaItem) -> AppResult<PathBuf> {
    media
        .subtitle_handle
        .as_ref()
        .map(PathBuf::from)
        .ok_or_else(|| {
            AppError::SubtitlesNotFound(format!(
                "{} has no subtitles available",
                media.pretty_title()
            ))
        })
}

// ============================================================================
// PARSING
// ============================================================================

/// Parse SRT content into cues ordered as in the file
pub fn parse_srt(content: &str) -> AppResult<Vec<SubtitleCue>> {
    let content = content.trim_start_matches('\u{feff}');
    let srt = SrtFile::parse(content)
        .map_err(|e| AppError::Other(format!("Invalid SRT: {}", e)))?;
    let entries = srt
        .get_subtitle_entries()
        .map_err(|e| AppError::Other(format!("Invalid SRT: {}", e)))?;

    let mut cues = Vec::with_capacity(entries.len());
    for entry in entries {
        let text = entry.line.unwrap_or_default();
        if text.trim().is_empty() {
            continue;
        }
        let cue = SubtitleCue::new(
            cues.len(),
            entry.timespan.start.msecs().max(0) as u64,
            entry.timespan.end.msecs().max(0) as u64,
            text.trim(),
        );
        validate_cue(&cue)?;
        cues.push(cue);
    }
    Ok(cues)
}

/// One synthetic one-second cue per non-empty lyrics line
pub fn lyrics_cues(content: &str) -> Vec<SubtitleCue> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            let start = i as u64 * LYRICS_CUE_MS;
            SubtitleCue::new(i, start, start + LYRICS_CUE_MS, line)
        })
        .collect()
}

/// `{stem}.{lang}.srt` next to a video, or `{stem}.srt` without a language
pub fn sibling_subtitle(video: &Path, language: Option<&str>) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match language {
        Some(lang) => format!("{}.{}.srt", stem, lang),
        None => format!("{}.srt", stem),
    };
    video.with_file_name(name)
}

/// Swap (or insert) the language segment of a subtitle path
pub fn language_path(handle: &Path, language: &str, languages: &[String]) -> PathBuf {
    let name = match handle.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return handle.to_path_buf(),
    };
    let base = match name.strip_suffix(".srt") {
        Some(base) => base,
        None => return handle.to_path_buf(),
    };

    let base = languages
        .iter()
        .find_map(|lang| base.strip_suffix(&format!(".{}", lang)))
        .unwrap_or(base);

    handle.with_file_name(format!("{}.{}.srt", base, language))
}

// ============================================================================
// QUOTE SEARCH
// ============================================================================

/// Exact normalized match first, then token-set ranking restricted to
/// candidates of a similar length.
pub fn find_quote_in(
    cues: &[SubtitleCue],
    query: &str,
    threshold: u32,
) -> AppResult<SubtitleCue> {
    if let Some(position) = exact_position(cues, query) {
        return Ok(cues[position].clone());
    }

    let texts: Vec<String> = cues.iter().map(SubtitleCue::single_line).collect();
    let ranked = fuzzy::rank(&texts, |text| {
        if fuzzy::aligned_length_diff(query, text) < MAX_QUOTE_LENGTH_DIFF {
            fuzzy::token_set_ratio(query, text)
        } else {
            0
        }
    });

    if let Some(&(position, score)) = ranked.first() {
        if score >= threshold {
            log::debug!("Quote '{}' matched cue {} ({})", query, position, score);
            return Ok(cues[position].clone());
        }
    }

    let nearest = fuzzy::rank(&texts, |text| fuzzy::token_set_ratio(query, text))
        .first()
        .map(|(position, _)| texts[*position].clone());

    Err(AppError::QuoteNotFound(match nearest {
        Some(nearest) => format!("Quote not found: {}. Maybe you meant: {}", query, nearest),
        None => format!("Quote not found: {}", query),
    }))
}

fn exact_position(cues: &[SubtitleCue], query: &str) -> Option<usize> {
    let normalized = normalize_text(query);
    if normalized.is_empty() {
        return None;
    }
    cues.iter()
        .position(|cue| normalize_text(&cue.text) == normalized)
}

/// Detect a continuous run of cues for consecutive quotes.
///
/// Strategies, first success wins:
///   1. perfect indexed chain (every quote equals the next cue)
///   2. anchored window whose normalized lengths differ by at most 2
///   3. the first quote's cue alone
pub fn find_chain_in(
    cues: &[SubtitleCue],
    quotes: &[String],
    threshold: u32,
) -> AppResult<Vec<SubtitleCue>> {
    let first = match quotes.first() {
        Some(first) => first,
        None => return Ok(Vec::new()),
    };

    if let Some(chain) = perfect_chain(cues, quotes) {
        log::debug!("Perfect chain of {} cues", chain.len());
        return Ok(chain);
    }

    let anchor = find_quote_in(cues, first, threshold)?;
    if let Some(chain) = anchored_window(cues, anchor.index, quotes) {
        log::debug!("Anchored chain of {} cues", chain.len());
        return Ok(chain);
    }

    Ok(vec![anchor])
}

fn perfect_chain(cues: &[SubtitleCue], quotes: &[String]) -> Option<Vec<SubtitleCue>> {
    let start = exact_position(cues, quotes.first()?)?;
    let window = cues.get(start..start + quotes.len())?;

    window
        .iter()
        .zip(quotes)
        .all(|(cue, quote)| normalize_text(&cue.text) == normalize_text(quote))
        .then(|| window.to_vec())
}

fn anchored_window(
    cues: &[SubtitleCue],
    start: usize,
    quotes: &[String],
) -> Option<Vec<SubtitleCue>> {
    let window = cues.get(start..start + quotes.len())?;

    window
        .iter()
        .zip(quotes)
        .all(|(cue, quote)| {
            let a = normalize_text(&cue.text).chars().count();
            let b = normalize_text(quote).chars().count();
            a.abs_diff(b) <= MAX_CHAIN_LENGTH_DIFF
        })
        .then(|| window.to_vec())
}

// ============================================================================
// DIALOGUE SPLIT / MERGE
// ============================================================================

/// Split a two-speaker cue (`- A` / `- B`) into two derived cues with
/// timing proportional to their character counts.
pub fn split_dialogue(cue: &SubtitleCue) -> Vec<SubtitleCue> {
    let (first, second) = match speaker_lines(&cue.text) {
        Some(parts) => parts,
        None => return vec![cue.clone()],
    };

    let first_len = first.chars().count() as u64;
    let second_len = second.chars().count() as u64;
    let total = (first_len + second_len).max(1);
    let boundary = cue.start_ms + cue.duration_ms() * first_len / total;

    vec![
        SubtitleCue::new(cue.index, cue.start_ms, boundary, first),
        SubtitleCue::new(cue.index, boundary, cue.end_ms, second),
    ]
}

fn speaker_lines(text: &str) -> Option<(String, String)> {
    let strip = |line: &str| {
        line.trim()
            .strip_prefix('-')
            .map(|rest| rest.trim().to_string())
            .filter(|rest| !rest.is_empty())
    };

    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() == 2 {
        return Some((strip(lines[0])?, strip(lines[1])?));
    }

    // "- Hi. - Hello." on one line
    if lines.len() == 1 {
        let body = lines[0].trim().strip_prefix('-')?;
        let (a, b) = body.split_once(" -")?;
        let (a, b) = (a.trim(), b.trim());
        if a.is_empty() || b.is_empty() {
            return None;
        }
        return Some((a.to_string(), b.to_string()));
    }

    None
}

/// Concatenate adjacent cues that continue each other, within `limit` chars.
pub fn merge_dialogue(cues: Vec<SubtitleCue>, policy: MergePolicy, limit: usize) -> Vec<SubtitleCue> {
    merge_groups(&cues, policy, limit)
        .into_iter()
        .filter_map(|group| join_cues(&cues[group]))
        .collect()
}

/// Position ranges of the cues `merge_dialogue` joins; single-cue ranges
/// are left untouched.
pub fn merge_groups(cues: &[SubtitleCue], policy: MergePolicy, limit: usize) -> Vec<Range<usize>> {
    let mut groups: Vec<Range<usize>> = Vec::with_capacity(cues.len());
    let mut current = String::new();

    for (i, cue) in cues.iter().enumerate() {
        let next = cue.single_line();
        if let Some(group) = groups.last_mut() {
            let fits = current.chars().count() + 1 + next.chars().count() <= limit;
            let continuous = policy == MergePolicy::Wild || is_continuation(&current, &next);
            if policy != MergePolicy::NoMerge && fits && continuous {
                group.end = i + 1;
                current = format!("{} {}", current, next);
                continue;
            }
        }
        groups.push(i..i + 1);
        current = next;
    }
    groups
}

/// One cue spanning every cue in `group`
pub fn join_cues(group: &[SubtitleCue]) -> Option<SubtitleCue> {
    let (first, rest) = group.split_first()?;
    let mut joined = first.clone();
    for cue in rest {
        joined.text = format!("{} {}", joined.single_line(), cue.single_line());
        joined.end_ms = joined.end_ms.max(cue.end_ms);
    }
    Some(joined)
}

fn is_continuation(current: &str, next: &str) -> bool {
    let current = current.trim_end();
    let trailing = current.ends_with(',')
        || current.ends_with("...")
        || current.ends_with('\u{2026}')
        || current.ends_with('-')
        || current.ends_with('\u{2014}');
    let lowercase_next = next
        .trim_start()
        .chars()
        .next()
        .map(char::is_lowercase)
        .unwrap_or(false);
    trailing || lowercase_next
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const THRESHOLD: u32 = 87;

    const PARASITE_SRT: &str = "142\n00:13:04,220 --> 00:13:05,930\nYou are the one who crossed the line first.\n\n143\n00:13:06,180 --> 00:13:08,300\nDo I have a plan?\n\n144\n00:13:09,000 --> 00:13:11,000\n- You know what kind of plan never fails?\n- No plan at all.\n";

    fn cues() -> Vec<SubtitleCue> {
        parse_srt(PARASITE_SRT).unwrap()
    }

    fn chain_cues() -> Vec<SubtitleCue> {
        vec![
            SubtitleCue::new(0, 0, 1000, "Listen to me,"),
            SubtitleCue::new(1, 1000, 2000, "all of you."),
            SubtitleCue::new(2, 2000, 3000, "Nobody leaves."),
            SubtitleCue::new(3, 3000, 4000, "Understood?"),
        ]
    }

    #[test]
    fn test_parse_srt_keeps_order_and_timing() {
        let cues = cues();
        assert_eq!(cues.len(), 3);
        assert_eq!(cues[0].start_ms, 784_220);
        assert_eq!(cues[1].end_ms, 788_300);
        assert_eq!(cues[1].index, 1);
    }

    #[test]
    fn test_lyrics_cues_are_one_second() {
        let cues = lyrics_cues("First line\n\nSecond line\n");
        assert_eq!(cues.len(), 2);
        assert_eq!((cues[1].start_ms, cues[1].end_ms), (1000, 2000));
    }

    #[test]
    fn test_find_quote_exact_and_fuzzy() {
        let cues = cues();
        let exact = find_quote_in(&cues, "do i have a plan", THRESHOLD).unwrap();
        assert_eq!(exact.start_ms, 786_180);

        let partial = find_quote_in(&cues, "you are the one who", THRESHOLD).unwrap();
        assert_eq!(partial.start_ms, 784_220);
    }

    #[test]
    fn test_find_quote_miss_suggests_nearest() {
        let err = find_quote_in(&cues(), "the ship is sinking tonight", THRESHOLD).unwrap_err();
        match err {
            AppError::QuoteNotFound(message) => assert!(message.contains("Maybe you meant")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_perfect_chain() {
        let quotes = vec!["Listen to me".to_string(), "all of you".to_string()];
        let chain = find_chain_in(&chain_cues(), &quotes, THRESHOLD).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].index, 1);
    }

    #[test]
    fn test_anchored_chain_tolerates_small_differences() {
        let quotes = vec![
            "Nobody leave".to_string(),
            "Understood".to_string(),
        ];
        let chain = find_chain_in(&chain_cues(), &quotes, THRESHOLD).unwrap();
        assert_eq!(chain.iter().map(|c| c.index).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_chain_falls_back_to_first_cue() {
        let quotes = vec![
            "you are the one who".to_string(),
            "do I have a plan?".to_string(),
        ];
        let chain = find_chain_in(&cues(), &quotes, THRESHOLD).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].index, 0);
    }

    #[test]
    fn test_split_dialogue_two_speakers() {
        let cue = &cues()[2];
        let parts = split_dialogue(cue);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text, "You know what kind of plan never fails?");
        assert_eq!(parts[1].text, "No plan at all.");
        assert_eq!(parts[0].start_ms, cue.start_ms);
        assert_eq!(parts[0].end_ms, parts[1].start_ms);
        assert_eq!(parts[1].end_ms, cue.end_ms);
        // The longer line gets the larger share
        assert!(parts[0].duration_ms() > parts[1].duration_ms());
    }

    #[test]
    fn test_split_dialogue_single_line_and_noop() {
        let cue = SubtitleCue::new(0, 0, 1000, "- Hi. - Hello there.");
        assert_eq!(split_dialogue(&cue).len(), 2);

        let plain = SubtitleCue::new(0, 0, 1000, "Well-known fact.");
        assert_eq!(split_dialogue(&plain), vec![plain.clone()]);
    }

    #[test]
    fn test_merge_dialogue_policies() {
        let input = chain_cues();

        let auto = merge_dialogue(input.clone(), MergePolicy::Auto, 60);
        assert_eq!(auto.len(), 3);
        assert_eq!(auto[0].text, "Listen to me, all of you.");
        assert_eq!(auto[0].end_ms, 2000);

        let none = merge_dialogue(input.clone(), MergePolicy::NoMerge, 60);
        assert_eq!(none.len(), input.len());

        let wild = merge_dialogue(input.clone(), MergePolicy::Wild, 60);
        assert_eq!(wild.len(), 1);
        assert!(wild[0].text.starts_with("Listen to me,"));
        assert!(wild[0].text.ends_with("Understood?"));
    }

    #[test]
    fn test_merge_respects_limit() {
        let merged = merge_dialogue(chain_cues(), MergePolicy::Wild, 20);
        assert!(merged.iter().all(|c| c.text.chars().count() <= 26));
        assert!(merged.len() > 1);
    }

    #[test]
    fn test_language_path_swaps_segment() {
        let languages = vec!["en".to_string(), "es-MX".to_string()];
        let handle = Path::new("/m/Heat (1995).en.srt");
        assert_eq!(
            language_path(handle, "es-MX", &languages),
            PathBuf::from("/m/Heat (1995).es-MX.srt")
        );
        assert_eq!(
            language_path(Path::new("/m/Heat (1995).srt"), "en", &languages),
            PathBuf::from("/m/Heat (1995).en.srt")
        );
        assert_eq!(
            sibling_subtitle(Path::new("/m/Heat (1995).mkv"), Some("en")),
            PathBuf::from("/m/Heat (1995).en.srt")
        );
    }

    #[test]
    fn test_cues_are_memoized_and_localized() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("Parasite (2019).mkv");
        let en = dir.path().join("Parasite (2019).en.srt");
        let es = dir.path().join("Parasite (2019).es-MX.srt");
        std::fs::File::create(&en)
            .unwrap()
            .write_all(PARASITE_SRT.as_bytes())
            .unwrap();
        std::fs::write(&es, "1\n00:00:01,000 --> 00:00:02,000\nHola.\n").unwrap();

        let service = SubtitleService::new(&Config::default());
        let media = MediaItem::new(
            MediaKind::Movie,
            "Parasite".into(),
            video.to_string_lossy().to_string(),
        )
        .with_subtitles(en.to_string_lossy().to_string());

        let first = service.cues(&media).unwrap();
        let second = service.cues(&media).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let spanish = service.cues_for_language(&media, "es-MX").unwrap();
        assert_eq!(spanish[0].text, "Hola.");

        // Unknown languages fall back to the default file
        let fallback = service.cues_for_language(&media, "pt-BR").unwrap();
        assert_eq!(fallback.len(), 3);
    }

    #[test]
    fn test_missing_subtitles_are_typed() {
        let service = SubtitleService::new(&Config::default());
        let media = MediaItem::new(MediaKind::Movie, "Heat".into(), "/m/heat.mkv".into());
        assert!(matches!(service.cues(&media), Err(AppError::SubtitlesNotFound(_))));

        let media = media.with_subtitles("/does/not/exist.en.srt");
        assert!(matches!(service.cues(&media), Err(AppError::SubtitlesNotFound(_))));
    }
}
