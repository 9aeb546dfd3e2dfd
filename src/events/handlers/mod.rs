// src/events/handlers/mod.rs
//
// Event Handlers - INTERNAL MODULE
//
// Handlers use closure-based subscription via EventBus::subscribe.
// Only registration functions are exported.

pub mod badge_handler;

pub use badge_handler::register_badge_handlers;
