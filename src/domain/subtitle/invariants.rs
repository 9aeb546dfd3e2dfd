use super::entity::SubtitleCue;
use crate::domain::{DomainError, DomainResult};

/// Validates cue timing
pub fn validate_cue(cue: &SubtitleCue) -> DomainResult<()> {
    if cue.end_ms < cue.start_ms {
        return Err(DomainError::InvariantViolation(format!(
            "Cue {} ends ({}ms) before it starts ({}ms)",
            cue.index, cue.end_ms, cue.start_ms
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverted_cue_fails() {
        assert!(validate_cue(&SubtitleCue::new(1, 2000, 1000, "x")).is_err());
        assert!(validate_cue(&SubtitleCue::new(1, 1000, 1000, "x")).is_ok());
    }
}
