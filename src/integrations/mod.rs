// src/integrations/mod.rs
//
// External Integrations Module
//
// Clients for the social channel, the diagnostics webhook and the metadata
// provider. Each one maps wire data to DTOs and never touches the database.

pub mod cache;
pub mod channel;
pub mod discord;
pub mod facebook;
pub mod tmdb;

pub use cache::ResponseCache;
pub use channel::{Channel, IncomingComment, PublishedPost};
pub use discord::{Emitter, WebhookEmitter};
pub use facebook::FacebookClient;
pub use tmdb::{MetadataProvider, MovieDetails, TmdbClient};

#[cfg(test)]
pub use discord::MockEmitter;
