// src/integrations/discord/mod.rs

pub mod webhook;

#[cfg(test)]
pub use webhook::MockEmitter;
pub use webhook::{truncate_message, Emitter, WebhookEmitter};
