// src/services/resolver.rs
//
// Request Resolver
//
// Binds a parsed request to catalog items and subtitle cues.
//
// CRITICAL RULES:
// - Brackets resolve in textual order; output preserves it
// - Any timestamp/range/index bracket disables chain detection
// - Quote cues go through split, then merge as a batch
// - Errors carry the 1-based index of the offending bracket

use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::domain::{Command, MediaItem, SubtitleCue};
use crate::error::{AppError, AppResult};
use crate::parser::{Bracket, BracketContent, MergePolicy, ParsedRequest, PostProc};
use crate::services::catalog_service::CatalogService;
use crate::services::subtitle_service::{join_cues, merge_groups, split_dialogue, SubtitleService};

/// What a bracket points at inside its media item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedContent {
    Frame { millis: u64 },
    Range { start_ms: u64, end_ms: u64 },
    /// A cue (possibly derived) whose text is drawn on the frame
    Cue(SubtitleCue),
}

#[derive(Debug, Clone)]
pub struct ResolvedBracket {
    /// 1-based position of the source bracket in the request
    pub index: usize,
    pub media: Arc<MediaItem>,
    pub content: ResolvedContent,
    pub postproc: PostProc,
    pub milli_offset: i64,
}

impl ResolvedBracket {
    /// Frame position with the bracket offset applied
    pub fn timestamp_ms(&self) -> u64 {
        let base = match &self.content {
            ResolvedContent::Frame { millis } => *millis,
            ResolvedContent::Range { start_ms, .. } => *start_ms,
            ResolvedContent::Cue(cue) => cue.start_ms,
        };
        shift(base, self.milli_offset)
    }

    /// Span with the offset applied; single frames span nothing
    pub fn span_ms(&self) -> (u64, u64) {
        match &self.content {
            ResolvedContent::Frame { millis } => {
                let at = shift(*millis, self.milli_offset);
                (at, at)
            }
            ResolvedContent::Range { start_ms, end_ms } => (
                shift(*start_ms, self.milli_offset),
                shift(*end_ms, self.milli_offset),
            ),
            ResolvedContent::Cue(cue) => (
                shift(cue.start_ms, self.milli_offset),
                shift(cue.end_ms, self.milli_offset),
            ),
        }
    }

    pub fn text(&self) -> Option<String> {
        match &self.content {
            ResolvedContent::Cue(cue) => Some(cue.single_line()),
            _ => None,
        }
    }
}

fn shift(millis: u64, offset: i64) -> u64 {
    (millis as i64 + offset).max(0) as u64
}

/// Resolved brackets plus the distinct media they reference, in order
#[derive(Debug, Clone)]
pub struct Resolution {
    pub brackets: Vec<ResolvedBracket>,
}

impl Resolution {
    pub fn media(&self) -> Vec<Arc<MediaItem>> {
        let mut media: Vec<Arc<MediaItem>> = Vec::new();
        for bracket in &self.brackets {
            if !media.iter().any(|m| m.id == bracket.media.id) {
                media.push(Arc::clone(&bracket.media));
            }
        }
        media
    }
}

pub struct ResolverService {
    catalog: Arc<CatalogService>,
    subtitles: Arc<SubtitleService>,
    config: ResolverConfig,
}

impl ResolverService {
    pub fn new(
        catalog: Arc<CatalogService>,
        subtitles: Arc<SubtitleService>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            catalog,
            subtitles,
            config,
        }
    }

    /// Look up the media of every segment without resolving brackets
    pub fn find_media(&self, parsed: &ParsedRequest) -> AppResult<Vec<MediaItem>> {
        parsed
            .segments
            .iter()
            .map(|segment| {
                self.catalog
                    .fuzzy_find(parsed.command.media_kind(), &segment.media_query)
            })
            .collect()
    }

    pub fn resolve(&self, parsed: &ParsedRequest, language: &str) -> AppResult<Resolution> {
        let brackets = if parsed.command == Command::Parallel {
            self.resolve_parallel(parsed, language)?
        } else {
            self.resolve_single(parsed, language)?
        };

        if brackets.len() > self.config.max_brackets {
            return Err(AppError::InvalidRequest(format!(
                "Too many frames after splitting and merging ({} > {})",
                brackets.len(),
                self.config.max_brackets
            )));
        }

        Ok(Resolution { brackets })
    }

    /// Every pipe segment yields exactly one bracket, resolved on its own
    fn resolve_parallel(
        &self,
        parsed: &ParsedRequest,
        language: &str,
    ) -> AppResult<Vec<ResolvedBracket>> {
        let mut resolved = Vec::with_capacity(parsed.segments.len());
        for (i, segment) in parsed.segments.iter().enumerate() {
            let index = i + 1;
            let media = Arc::new(
                self.catalog
                    .fuzzy_find(parsed.command.media_kind(), &segment.media_query)
                    .map_err(|e| e.at_bracket(index))?,
            );
            let bracket = segment.brackets.first().ok_or_else(|| {
                AppError::InvalidRequest(format!("{} has no bracket", segment.media_query))
            })?;
            let mut items = self
                .resolve_isolated(&media, bracket, index, language)
                .map_err(|e| e.at_bracket(index))?;
            items.truncate(1);
            resolved.extend(items);
        }
        Ok(resolved)
    }

    fn resolve_single(
        &self,
        parsed: &ParsedRequest,
        language: &str,
    ) -> AppResult<Vec<ResolvedBracket>> {
        let segment = parsed
            .segments
            .first()
            .ok_or_else(|| AppError::InvalidRequest("No media query found".to_string()))?;
        let media = Arc::new(
            self.catalog
                .fuzzy_find(parsed.command.media_kind(), &segment.media_query)?,
        );
        let brackets = &segment.brackets;

        let all_quotes = brackets.iter().all(|b| b.content.is_quote());
        let mut resolved = if all_quotes && brackets.len() > 1 {
            self.resolve_quotes(&media, brackets, language)?
        } else {
            let mut resolved = Vec::new();
            for (i, bracket) in brackets.iter().enumerate() {
                resolved.extend(
                    self.resolve_isolated(&media, bracket, i + 1, language)
                        .map_err(|e| e.at_bracket(i + 1))?,
                );
            }
            resolved
        };

        // Gif quotes keep their whole cue span; the renderer clips it
        if parsed.command != Command::Gif {
            resolved = split_cues(resolved);
            let policy = brackets
                .first()
                .map(|b| b.postproc.merge)
                .unwrap_or_default();
            resolved = merge_runs(resolved, policy, self.config.merge_limit);
        }

        Ok(resolved)
    }

    /// Chain detection over a pure-quote request; falls back to resolving
    /// each quote when no full chain is found.
    fn resolve_quotes(
        &self,
        media: &Arc<MediaItem>,
        brackets: &[Bracket],
        language: &str,
    ) -> AppResult<Vec<ResolvedBracket>> {
        check_accepts_quotes(media).map_err(|e| e.at_bracket(1))?;
        let quotes: Vec<String> = brackets
            .iter()
            .filter_map(|b| match &b.content {
                BracketContent::Quote(text) => Some(text.clone()),
                _ => None,
            })
            .collect();

        let chain = self
            .subtitles
            .find_chain(media, language, &quotes)
            .map_err(|e| e.at_bracket(1))?;

        if chain.len() == brackets.len() {
            return Ok(brackets
                .iter()
                .zip(chain)
                .enumerate()
                .map(|(i, (bracket, cue))| cue_bracket(media, bracket, i + 1, cue))
                .collect());
        }

        let mut resolved = Vec::with_capacity(brackets.len());
        for (i, bracket) in brackets.iter().enumerate() {
            resolved.extend(
                self.resolve_isolated(media, bracket, i + 1, language)
                    .map_err(|e| e.at_bracket(i + 1))?,
            );
        }
        Ok(resolved)
    }

    /// One bracket without chain detection; index ranges yield several cues
    fn resolve_isolated(
        &self,
        media: &Arc<MediaItem>,
        bracket: &Bracket,
        index: usize,
        language: &str,
    ) -> AppResult<Vec<ResolvedBracket>> {
        let plain = |content: ResolvedContent| ResolvedBracket {
            index,
            media: Arc::clone(media),
            content,
            postproc: bracket.postproc.clone(),
            milli_offset: bracket.milli_offset,
        };

        match &bracket.content {
            BracketContent::Timestamp { seconds, millis } => {
                check_accepts_timestamps(media)?;
                Ok(vec![plain(ResolvedContent::Frame {
                    millis: seconds * 1000 + *millis as u64,
                })])
            }
            BracketContent::Range { start_ms, end_ms } => {
                check_accepts_timestamps(media)?;
                Ok(vec![plain(ResolvedContent::Range {
                    start_ms: *start_ms,
                    end_ms: *end_ms,
                })])
            }
            BracketContent::Quote(text) => {
                check_accepts_quotes(media)?;
                let cue = self.subtitles.find_quote(media, language, text)?;
                Ok(vec![cue_bracket(media, bracket, index, cue)])
            }
            BracketContent::Index(values) => {
                check_accepts_quotes(media)?;
                let cues = self.subtitles.cues_for_language(media, language)?;
                values
                    .iter()
                    .map(|n| cue_at(&cues, *n).map(|cue| cue_bracket(media, bracket, index, cue)))
                    .collect()
            }
            BracketContent::IndexRange { start, end } => {
                check_accepts_quotes(media)?;
                let cues = self.subtitles.cues_for_language(media, language)?;
                (*start..=*end)
                    .map(|n| cue_at(&cues, n).map(|cue| cue_bracket(media, bracket, index, cue)))
                    .collect()
            }
        }
    }
}

fn cue_bracket(
    media: &Arc<MediaItem>,
    bracket: &Bracket,
    index: usize,
    cue: SubtitleCue,
) -> ResolvedBracket {
    ResolvedBracket {
        index,
        media: Arc::clone(media),
        content: ResolvedContent::Cue(cue),
        postproc: bracket.postproc.clone(),
        milli_offset: bracket.milli_offset,
    }
}

/// Subtitle numbers are 1-based as written in the file
fn cue_at(cues: &[SubtitleCue], number: usize) -> AppResult<SubtitleCue> {
    number
        .checked_sub(1)
        .and_then(|position| cues.get(position))
        .cloned()
        .ok_or_else(|| {
            AppError::InvalidRequest(format!(
                "Subtitle index {} out of range (1-{})",
                number,
                cues.len()
            ))
        })
}

fn check_accepts_quotes(media: &MediaItem) -> AppResult<()> {
    if media.kind.accepts_quotes() {
        Ok(())
    } else {
        Err(AppError::InvalidRequest(format!(
            "{} items only accept timestamps",
            media.kind
        )))
    }
}

fn check_accepts_timestamps(media: &MediaItem) -> AppResult<()> {
    if media.kind.accepts_timestamps() {
        Ok(())
    } else {
        Err(AppError::InvalidRequest(format!(
            "{} items only accept quotes",
            media.kind
        )))
    }
}

/// Apply split_dialogue to every cue, honoring --remove-first/--remove-second
fn split_cues(brackets: Vec<ResolvedBracket>) -> Vec<ResolvedBracket> {
    let mut split = Vec::with_capacity(brackets.len());
    for bracket in brackets {
        let cue = match &bracket.content {
            ResolvedContent::Cue(cue) => cue.clone(),
            _ => {
                split.push(bracket);
                continue;
            }
        };

        let mut parts = split_dialogue(&cue);
        if parts.len() == 2 {
            if bracket.postproc.remove_first {
                parts.remove(0);
            } else if bracket.postproc.remove_second {
                parts.truncate(1);
            }
        }

        for part in parts {
            split.push(ResolvedBracket {
                content: ResolvedContent::Cue(part),
                ..bracket.clone()
            });
        }
    }
    split
}

/// Merge consecutive cue brackets; other brackets break the run
fn merge_runs(
    brackets: Vec<ResolvedBracket>,
    policy: MergePolicy,
    limit: usize,
) -> Vec<ResolvedBracket> {
    let mut merged: Vec<ResolvedBracket> = Vec::with_capacity(brackets.len());
    let mut run: Vec<ResolvedBracket> = Vec::new();

    for bracket in brackets {
        if matches!(bracket.content, ResolvedContent::Cue(_)) {
            run.push(bracket);
        } else {
            flush_run(&mut run, &mut merged, policy, limit);
            merged.push(bracket);
        }
    }
    flush_run(&mut run, &mut merged, policy, limit);
    merged
}

/// A merged cue takes the offset and options of its first source bracket;
/// cues left alone keep their own.
fn flush_run(
    run: &mut Vec<ResolvedBracket>,
    merged: &mut Vec<ResolvedBracket>,
    policy: MergePolicy,
    limit: usize,
) {
    let cues: Vec<SubtitleCue> = run
        .iter()
        .filter_map(|b| match &b.content {
            ResolvedContent::Cue(cue) => Some(cue.clone()),
            _ => None,
        })
        .collect();

    let mut sources = run.drain(..);
    for group in merge_groups(&cues, policy, limit) {
        let Some(mut head) = sources.next() else {
            break;
        };
        if group.len() > 1 {
            sources.by_ref().take(group.len() - 1).for_each(drop);
            if let Some(joined) = join_cues(&cues[group]) {
                head.content = ResolvedContent::Cue(joined);
            }
        }
        merged.push(head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::MediaKind;
    use crate::events::EventBus;
    use crate::parser::parse_request;
    use crate::repositories::test_support::test_pool;
    use crate::repositories::SqliteMediaRepository;

    const SRT: &str = "1\n00:13:04,220 --> 00:13:05,930\nYou are the one who crossed the line first.\n\n2\n00:13:06,180 --> 00:13:08,300\nDo I have a plan?\n\n3\n00:13:09,000 --> 00:13:11,000\n- You know what kind of plan never fails?\n- No plan at all.\n\n4\n00:13:12,000 --> 00:13:13,000\nListen to me,\n\n5\n00:13:13,500 --> 00:13:14,500\nall of you.\n";

    struct Fixture {
        resolver: ResolverService,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let srt = dir.path().join("Parasite (2019).en.srt");
        std::fs::write(&srt, SRT).unwrap();

        let config = Config::default();
        let catalog = Arc::new(CatalogService::new(
            Arc::new(SqliteMediaRepository::new(test_pool())),
            Arc::new(EventBus::new()),
            &config,
        ));
        catalog
            .register(
                &MediaItem::new(
                    MediaKind::Movie,
                    "Parasite".into(),
                    dir.path().join("Parasite (2019).mkv").to_string_lossy().to_string(),
                )
                .with_year(2019)
                .with_subtitles(srt.to_string_lossy().to_string()),
            )
            .unwrap();
        catalog
            .register(
                &MediaItem::new(MediaKind::Movie, "Stalker".into(), "/m/stalker.mkv".into())
                    .with_year(1979),
            )
            .unwrap();

        let subtitles = Arc::new(SubtitleService::new(&config));
        Fixture {
            resolver: ResolverService::new(catalog, subtitles, config.resolver.clone()),
            _dir: dir,
        }
    }

    fn resolve(fixture: &Fixture, line: &str) -> AppResult<Resolution> {
        fixture.resolver.resolve(&parse_request(line)?, "en")
    }

    #[test]
    fn test_quotes_resolve_in_order() {
        let fixture = fixture();
        let resolution =
            resolve(&fixture, "!req Parasite [you are the one who] [do I have a plan?]").unwrap();

        assert_eq!(resolution.brackets.len(), 2);
        assert_eq!(resolution.brackets[0].timestamp_ms(), 784_220);
        assert_eq!(resolution.brackets[1].timestamp_ms(), 786_180);
        assert_eq!(
            resolution.brackets[1].text().as_deref(),
            Some("Do I have a plan?")
        );
        assert_eq!(resolution.media().len(), 1);
    }

    #[test]
    fn test_each_quote_keeps_its_own_options() {
        let fixture = fixture();
        let resolution = resolve(
            &fixture,
            "!req Parasite [you are the one who --plus 500] \
             [do I have a plan? --minus 1000 --custom-crop 10,10,90,90]",
        )
        .unwrap();

        let stamps: Vec<u64> = resolution.brackets.iter().map(|b| b.timestamp_ms()).collect();
        assert_eq!(stamps, vec![784_720, 785_180]);
        assert_eq!(resolution.brackets[0].index, 1);
        assert_eq!(resolution.brackets[1].index, 2);
        assert!(resolution.brackets[0].postproc.custom_crop.is_none());
        assert_eq!(resolution.brackets[1].postproc.custom_crop, Some([10, 10, 90, 90]));
    }

    #[test]
    fn test_merged_quote_takes_first_bracket_offset() {
        let fixture = fixture();
        let resolution =
            resolve(&fixture, "!req Parasite [listen to me --plus 300] [all of you --minus 100]")
                .unwrap();

        assert_eq!(resolution.brackets.len(), 1);
        assert_eq!(resolution.brackets[0].index, 1);
        assert_eq!(resolution.brackets[0].timestamp_ms(), 732_300);
    }

    #[test]
    fn test_timestamp_offsets() {
        let fixture = fixture();
        let resolution = resolve(&fixture, "!req Stalker [20:34.500] [1:00 --minus 2000]").unwrap();
        assert_eq!(resolution.brackets[0].timestamp_ms(), 1_234_500);
        assert_eq!(resolution.brackets[1].timestamp_ms(), 58_000);
        assert!(resolution.brackets[0].text().is_none());
    }

    #[test]
    fn test_split_and_remove_flags() {
        let fixture = fixture();
        let both = resolve(&fixture, "!req Parasite [3]").unwrap();
        assert_eq!(both.brackets.len(), 2);

        let second = resolve(&fixture, "!req Parasite [3 --remove-first]").unwrap();
        assert_eq!(second.brackets.len(), 1);
        assert_eq!(second.brackets[0].text().as_deref(), Some("No plan at all."));
    }

    #[test]
    fn test_merge_policy_from_first_bracket() {
        let fixture = fixture();
        let merged = resolve(&fixture, "!req Parasite [listen to me] [all of you]").unwrap();
        assert_eq!(merged.brackets.len(), 1);
        assert_eq!(
            merged.brackets[0].text().as_deref(),
            Some("Listen to me, all of you.")
        );

        let unmerged =
            resolve(&fixture, "!req Parasite [listen to me --no-merge] [all of you]").unwrap();
        assert_eq!(unmerged.brackets.len(), 2);
    }

    #[test]
    fn test_quote_against_missing_subtitles_is_typed() {
        let fixture = fixture();
        let err = resolve(&fixture, "!req Stalker [the zone wants respect]").unwrap_err();
        assert!(matches!(err.root(), AppError::SubtitlesNotFound(_)));
        assert!(matches!(err, AppError::Bracket { index: 1, .. }));
    }

    #[test]
    fn test_gif_quote_keeps_cue_span() {
        let fixture = fixture();
        let resolution = resolve(&fixture, "!gif Parasite [do I have a plan?]").unwrap();
        assert_eq!(resolution.brackets[0].span_ms(), (786_180, 788_300));
    }

    #[test]
    fn test_index_out_of_range() {
        let fixture = fixture();
        let err = resolve(&fixture, "!req Parasite [99]").unwrap_err();
        assert!(matches!(err.root(), AppError::InvalidRequest(_)));
    }

    #[test]
    fn test_too_many_frames_after_split() {
        let fixture = fixture();
        let line = format!("!req Parasite {}", "[3] ".repeat(8));
        let err = resolve(&fixture, &line).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }
}
