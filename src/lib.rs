// src/lib.rs
// Kinobot - frame requests from a film library, posted to social channels
//
// Architecture:
// - Domain-centric: entities and invariants live in `domain`
// - Event-driven: services coordinate through the event bus
// - Explicit: configuration is passed in, never read from globals
// - Seams are traits: frame sources, channels, emitters, operators

// ============================================================================
// FOUNDATION
// ============================================================================

pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod events;
pub mod infrastructure;
pub mod parser;
pub mod repositories;
pub mod services;

// ============================================================================
// APPLICATION LAYER
// ============================================================================

pub mod application;
pub mod integrations;

// ============================================================================
// PUBLIC API - Domain Entities
// ============================================================================

pub use domain::{
    parse_episode_designator, validate_media_item, validate_request, Award, Badge, BadgeKind,
    Command, LimitKind, MediaItem, MediaKind, MediaMetadata, Post, PostMetrics, Request,
    RequestState, Role, SubtitleCue, User,
};

// ============================================================================
// PUBLIC API - Error Types
// ============================================================================

pub use error::{AppError, AppResult};

// ============================================================================
// PUBLIC API - Configuration & Grammar
// ============================================================================

pub use config::Config;
pub use parser::{is_command, parse_request, Bracket, GlobalOptions, ParsedRequest};

// ============================================================================
// PUBLIC API - Events
// ============================================================================

pub use events::{
    create_event_bus, register_badge_handlers, BadgeAwarded, DomainEvent, EventBus,
    EventLogEntry, JobFailed, PostPublished, RequestEnqueued, RequestRejected, RequestVerified,
};

// ============================================================================
// PUBLIC API - Database
// ============================================================================

pub use db::{create_connection_pool, create_memory_pool, initialize_database, ConnectionPool};

// ============================================================================
// PUBLIC API - Services
// ============================================================================

pub use services::{
    BadgeService, CatalogService, Chamber, ChamberMode, ChamberSummary, HandledRequest,
    Operator, Publisher, Renderer, RequestHandler, RequestService, ResolverService, Scheduler,
    SubmitRequest, SubtitleService, Verdict,
};

// ============================================================================
// PUBLIC API - Application Layer
// ============================================================================

pub use application::{AppState, ErrorResponse, TerminalOperator};
