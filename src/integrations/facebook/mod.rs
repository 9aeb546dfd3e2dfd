// src/integrations/facebook/mod.rs

pub mod client;

pub use client::{parse_graph_time, parse_insights, parse_reactions, FacebookClient};
