// src/integrations/tmdb/mod.rs

pub mod client;

pub use client::{MetadataProvider, MovieDetails, TmdbClient};
