// src/services/mod.rs
//
// Services Module - Orchestration Layer
//
// Services own the business rules: they validate, call repositories,
// emit events and talk to integrations through their traits.

pub mod badge_service;
pub mod catalog_service;
pub mod chamber;
pub mod handler;
pub mod publisher;
pub mod render;
pub mod request_service;
pub mod resolver;
pub mod scheduler;
pub mod subtitle_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use badge_service::{BadgeContext, BadgeService, HandlerTelemetry};

pub use catalog_service::{CatalogService, LibraryRules, RescanReport};

pub use chamber::{Chamber, ChamberMode, ChamberSummary, Operator, Verdict};

pub use handler::{HandledRequest, RequestHandler};

pub use publisher::Publisher;

pub use render::{Artifact, FontBook, Renderer, TextStyle};

pub use request_service::{RequestService, SubmitRequest};

pub use resolver::{Resolution, ResolvedBracket, ResolvedContent, ResolverService};

pub use scheduler::{next_slot, ChannelSlot, Scheduler};

pub use subtitle_service::SubtitleService;
