// src/events/types.rs
//
// All domain events in the system.
// Each event represents an immutable fact that has already occurred.
//
// CRITICAL RULES:
// - Events are facts, not commands
// - Events are immutable
// - Events carry only the data needed to react
// - No business logic in event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Badge, Command, MediaKind};

/// Trait that all domain events must implement
pub trait DomainEvent: std::fmt::Debug + Clone {
    /// Unique identifier for this event instance
    fn event_id(&self) -> Uuid;

    /// When this event occurred
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Human-readable event type name
    fn event_type(&self) -> &'static str;
}

macro_rules! domain_event {
    ($name:ident) => {
        impl DomainEvent for $name {
            fn event_id(&self) -> Uuid { self.event_id }
            fn occurred_at(&self) -> DateTime<Utc> { self.occurred_at }
            fn event_type(&self) -> &'static str { stringify!($name) }
        }
    };
}

// ============================================================================
// REQUEST LIFECYCLE EVENTS
// ============================================================================

/// Emitted when a request enters the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnqueued {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub request_id: Uuid,
    pub user_id: String,
    pub command: Command,
}

impl RequestEnqueued {
    pub fn new(request_id: Uuid, user_id: String, command: Command) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            request_id,
            user_id,
            command,
        }
    }
}

domain_event!(RequestEnqueued);

/// Emitted when an operator verifies a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVerified {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub request_id: Uuid,
    pub operator_id: String,
    pub tag: Option<String>,
}

impl RequestVerified {
    pub fn new(request_id: Uuid, operator_id: String, tag: Option<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            request_id,
            operator_id,
            tag,
        }
    }
}

domain_event!(RequestVerified);

/// Emitted when an operator rejects a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRejected {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub request_id: Uuid,
    /// Author of the rejected request
    pub user_id: String,
    pub operator_id: String,
}

impl RequestRejected {
    pub fn new(request_id: Uuid, user_id: String, operator_id: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            request_id,
            user_id,
            operator_id,
        }
    }
}

domain_event!(RequestRejected);

/// Emitted when a request is deferred
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestIced {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub request_id: Uuid,
    pub iced_count: u32,
}

impl RequestIced {
    pub fn new(request_id: Uuid, iced_count: u32) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            request_id,
            iced_count,
        }
    }
}

domain_event!(RequestIced);

/// Emitted when an operator edit produces a new queued copy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEdited {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub original_id: Uuid,
    pub edited_id: Uuid,
    pub appended: String,
}

impl RequestEdited {
    pub fn new(original_id: Uuid, edited_id: Uuid, appended: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            original_id,
            edited_id,
            appended,
        }
    }
}

domain_event!(RequestEdited);

// ============================================================================
// PUBLISHING EVENTS
// ============================================================================

/// Emitted after a post row is recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostPublished {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub post_id: String,
    pub request_id: Uuid,
    pub user_id: String,
    pub channel: String,
    pub uri: String,
}

impl PostPublished {
    pub fn new(
        post_id: String,
        request_id: Uuid,
        user_id: String,
        channel: String,
        uri: String,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            post_id,
            request_id,
            user_id,
            channel,
            uri,
        }
    }
}

domain_event!(PostPublished);

/// Emitted once per newly inserted award
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeAwarded {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub user_id: String,
    pub post_id: Option<String>,
    pub badge: Badge,
    pub reason: String,
}

impl BadgeAwarded {
    pub fn new(user_id: String, post_id: Option<String>, badge: Badge, reason: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            user_id,
            post_id,
            badge,
            reason,
        }
    }
}

domain_event!(BadgeAwarded);

// ============================================================================
// CATALOG EVENTS
// ============================================================================

/// Emitted when the library scan registers a new item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRegistered {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub media_id: i64,
    pub kind: MediaKind,
    pub title: String,
}

impl MediaRegistered {
    pub fn new(media_id: i64, kind: MediaKind, title: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            media_id,
            kind,
            title,
        }
    }
}

domain_event!(MediaRegistered);

/// Emitted when an item's resource disappears
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaHidden {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub media_id: i64,
    pub resource: String,
}

impl MediaHidden {
    pub fn new(media_id: i64, resource: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            media_id,
            resource,
        }
    }
}

domain_event!(MediaHidden);

/// Emitted when a library rescan completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryRescanned {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub registered: usize,
    pub updated: usize,
    pub hidden: usize,
}

impl LibraryRescanned {
    pub fn new(registered: usize, updated: usize, hidden: usize) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            registered,
            updated,
            hidden,
        }
    }
}

domain_event!(LibraryRescanned);

// ============================================================================
// SCHEDULER EVENTS
// ============================================================================

/// Emitted when a scheduled job ends in an error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailed {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub job: String,
    pub error_kind: String,
    pub message: String,
    /// Typed failures are counted, untyped ones alert
    pub typed: bool,
}

impl JobFailed {
    pub fn new(job: String, error_kind: String, message: String, typed: bool) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            job,
            error_kind,
            message,
            typed,
        }
    }
}

domain_event!(JobFailed);
