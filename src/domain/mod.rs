// src/domain/mod.rs
//
// Domain Root - The Single Source of Truth for Domain API
//
// This file MUST declare all domain modules and re-export their public API.
// All other modules import from `crate::domain::*`

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod badge;
pub mod media;
pub mod post;
pub mod request;
pub mod subtitle;
pub mod user;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Media Domain
pub use media::{
    parse_episode_designator, validate_media_item, MediaItem, MediaKind, MediaMetadata,
};

// Subtitle Domain
pub use subtitle::{normalize_text, validate_cue, SubtitleCue};

// Request Domain
pub use request::{validate_request, Command, LimitKind, Request, RequestState};

// Users, posts and badges
pub use badge::{Award, Badge, BadgeKind};
pub use post::{Post, PostMetrics};
pub use user::{Role, User};

// ============================================================================
// DOMAIN ERROR TYPES
// ============================================================================

use thiserror::Error;

/// Domain-level errors
/// These represent violations of business rules and invariants
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Entity not found: {0}")]
    NotFound(String),
}

/// Domain result type
pub type DomainResult<T> = Result<T, DomainError>;
