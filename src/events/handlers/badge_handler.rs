// src/events/handlers/badge_handler.rs
//
// Badge Event Handler
//
// Bridges moderation events to the badge engine.
//
// CRITICAL RULES:
// - Only consumes RequestRejected
// - Delegates all logic to BadgeService
// - Errors are logged, never propagated into the bus

use std::sync::Arc;

use crate::events::types::RequestRejected;
use crate::events::EventBus;
use crate::services::BadgeService;

/// Registers badge handlers with the event bus.
pub fn register_badge_handlers(bus: &EventBus, service: Arc<BadgeService>) {
    let rejected_service = Arc::clone(&service);
    bus.subscribe::<RequestRejected, _>(move |event| {
        handle_request_rejected(&rejected_service, event);
    });

    log::debug!("[BADGES] Handlers registered");
}

fn handle_request_rejected(service: &BadgeService, event: &RequestRejected) {
    match service.award_rejection(&event.user_id) {
        Ok(true) => log::info!(
            "[BADGES] Rejected badge awarded to {} (request {})",
            event.user_id,
            event.request_id
        ),
        Ok(false) => log::debug!("[BADGES] Rejection of {} already recorded", event.request_id),
        Err(e) => log::error!(
            "[BADGES] Failed to award rejection for request {}: {}",
            event.request_id,
            e
        ),
    }
}
