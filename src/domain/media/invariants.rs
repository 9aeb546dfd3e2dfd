use super::entity::{MediaItem, MediaKind};
use crate::domain::{DomainError, DomainResult};

/// Validates all MediaItem invariants
pub fn validate_media_item(item: &MediaItem) -> DomainResult<()> {
    if item.title.trim().is_empty() {
        return Err(DomainError::InvariantViolation(
            "Media title cannot be empty".to_string(),
        ));
    }

    if item.resource.trim().is_empty() {
        return Err(DomainError::InvariantViolation(format!(
            "Media '{}' has no resource handle",
            item.title
        )));
    }

    if item.kind == MediaKind::Episode && (item.season.is_none() || item.episode.is_none()) {
        return Err(DomainError::InvariantViolation(format!(
            "Episode '{}' needs both season and episode numbers",
            item.title
        )));
    }

    // Lyrics have no video track; their cues come from the lyrics file
    if item.kind == MediaKind::Lyrics && item.subtitle_handle.is_none() {
        return Err(DomainError::InvariantViolation(format!(
            "Lyrics item '{}' needs a lyrics file",
            item.title
        )));
    }

    Ok(())
}

/// Critical MediaItem Invariants:
///
/// 1. Items are created by the library scan, never deleted
/// 2. A missing resource hides the item instead of removing it
/// 3. The resource handle is unique per kind
/// 4. Quote brackets need a subtitle handle (movies, episodes) or a lyrics file
