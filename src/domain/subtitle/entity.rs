use serde::{Deserialize, Serialize};

/// One subtitle entry with millisecond timing
///
/// Cues parsed from a file are never mutated; splitting and merging
/// produce derived cues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleCue {
    /// Position in the source file (0-based)
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

impl SubtitleCue {
    pub fn new(index: usize, start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            index,
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Text joined into a single line
    pub fn single_line(&self) -> String {
        self.text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Lowercase, strip punctuation and collapse whitespace.
///
/// Used for exact quote matching and chain integrity checks.
pub fn normalize_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c.to_lowercase().next().unwrap_or(c)
            } else if c == '\'' || c == '\u{2019}' {
                '\0'
            } else {
                ' '
            }
        })
        .filter(|c| *c != '\0')
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_text("Do I have a plan?"), "do i have a plan");
        assert_eq!(normalize_text("  I'm a guy,\ndoing a JOB. "), "im a guy doing a job");
        assert_eq!(normalize_text("Wait... what?!"), "wait what");
    }

    #[test]
    fn test_single_line_joins_rows() {
        let cue = SubtitleCue::new(0, 0, 1000, "You are the one\nwho crossed the line first.");
        assert_eq!(cue.single_line(), "You are the one who crossed the line first.");
        assert_eq!(cue.duration_ms(), 1000);
    }
}
