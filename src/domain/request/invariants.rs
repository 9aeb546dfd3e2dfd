use super::entity::Request;
use crate::domain::{DomainError, DomainResult};

/// Validates all Request invariants
pub fn validate_request(request: &Request) -> DomainResult<()> {
    if request.user_id.trim().is_empty() {
        return Err(DomainError::InvariantViolation(
            "Request must belong to a user".to_string(),
        ));
    }

    if request.comment.trim().is_empty() {
        return Err(DomainError::InvariantViolation(
            "Request comment cannot be empty".to_string(),
        ));
    }

    if request.iced_count > 0 && request.last_iced_at.is_none() {
        return Err(DomainError::InvalidStateTransition(
            "Iced request without an ice timestamp".to_string(),
        ));
    }

    Ok(())
}

/// Critical Request Invariants:
///
/// 1. Postable iff verified and not used
/// 2. `used` is terminal; a used request never publishes again
/// 3. Edits clear the verified flag
/// 4. Requests are never deleted; clones keep the original in history
