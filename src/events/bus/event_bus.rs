// src/events/bus/event_bus.rs
//
// In-process event bus.
//
// RULES:
// - Handlers run synchronously, in subscription order, on the emitting task
// - A panicking handler is logged and skipped; the rest still run
// - The emission log is bounded: the scheduler never exits, so the oldest
//   entries are dropped once LOG_CAPACITY is reached

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::events::types::DomainEvent;

/// Emissions remembered by `get_event_log`
const LOG_CAPACITY: usize = 512;

type ErasedHandler = Box<dyn Fn(&dyn Any) + Send + Sync>;

/// Services emit facts here; badge and alert handlers subscribe to them
/// without the emitter knowing.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<TypeId, Vec<ErasedHandler>>>>,
    log: Arc<RwLock<VecDeque<EventLogEntry>>>,
    capacity: usize,
}

#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub event_type: String,
    pub event_id: String,
    pub occurred_at: DateTime<Utc>,
    pub handler_count: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_log_capacity(LOG_CAPACITY)
    }

    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            log: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(LOG_CAPACITY)))),
            capacity: capacity.max(1),
        }
    }

    /// Register `handler` for every future `E`.
    ///
    /// ```ignore
    /// bus.subscribe::<RequestRejected, _>(|event| {
    ///     log::info!("{} rejected by {}", event.request_id, event.operator_id);
    /// });
    /// ```
    pub fn subscribe<E, F>(&self, handler: F)
    where
        E: DomainEvent + 'static,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let erased: ErasedHandler = Box::new(move |any: &dyn Any| match any.downcast_ref::<E>() {
            Some(event) => handler(event),
            None => log::error!("[EVENT] Handler for {} got a foreign event", std::any::type_name::<E>()),
        });

        match self.handlers.write() {
            Ok(mut map) => map.entry(TypeId::of::<E>()).or_default().push(erased),
            Err(_) => log::error!("[EVENT] Handler registry poisoned; subscription dropped"),
        }
    }

    /// Record `event` and run its handlers before returning.
    pub fn emit<E>(&self, event: E)
    where
        E: DomainEvent + 'static,
    {
        let Ok(map) = self.handlers.read() else {
            log::error!("[EVENT] Handler registry poisoned; {} dropped", event.event_type());
            return;
        };
        let handlers = map.get(&TypeId::of::<E>()).map(Vec::as_slice).unwrap_or_default();

        self.record(EventLogEntry {
            event_type: event.event_type().to_string(),
            event_id: event.event_id().to_string(),
            occurred_at: event.occurred_at(),
            handler_count: handlers.len(),
        });
        log::debug!(
            "[EVENT] {} ({}) -> {} handler(s)",
            event.event_type(),
            event.event_id(),
            handlers.len()
        );

        for (idx, handler) in handlers.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event as &dyn Any))) {
                log::error!(
                    "[EVENT] Handler #{} for {} panicked: {:?}",
                    idx,
                    event.event_type(),
                    panic
                );
            }
        }
    }

    fn record(&self, entry: EventLogEntry) {
        if let Ok(mut log) = self.log.write() {
            if log.len() >= self.capacity {
                log.pop_front();
            }
            log.push_back(entry);
        }
    }

    /// Recent emissions, oldest first
    pub fn get_event_log(&self) -> Vec<EventLogEntry> {
        self.log
            .read()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_event_log(&self) {
        if let Ok(mut log) = self.log.write() {
            log.clear();
        }
    }

    pub fn subscriber_count<E: 'static>(&self) -> usize {
        self.handlers
            .read()
            .map(|map| map.get(&TypeId::of::<E>()).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
