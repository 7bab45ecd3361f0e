//! Engine event sinks.
//!
//! Provides a bounded in-memory log and a tracing forwarder for lifecycle
//! events that are observable but never errors (degraded modules, throttle
//! overruns, failing subscribers).

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Kind of engine event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventKind {
    /// A module was added to the registry.
    ModuleRegistered,
    /// A module was removed on request.
    ModuleUnregistered,
    /// A module failed and will be skipped until reset.
    ModuleDegraded,
    /// A degraded module was re-enabled.
    ModuleReset,
    /// A module signalled permanent failure and was dropped.
    ModuleRemoved,
    /// The previous tick took longer than the throttle interval.
    ThrottleOverrun,
    /// A bus subscriber returned an error or panicked.
    SubscriberFailed,
}

impl fmt::Display for EngineEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ModuleRegistered => "module_registered",
            Self::ModuleUnregistered => "module_unregistered",
            Self::ModuleDegraded => "module_degraded",
            Self::ModuleReset => "module_reset",
            Self::ModuleRemoved => "module_removed",
            Self::ThrottleOverrun => "throttle_overrun",
            Self::SubscriberFailed => "subscriber_failed",
        };
        f.write_str(name)
    }
}

/// Engine event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// What happened.
    pub kind: EngineEventKind,
    /// Module alias, subscription id, or component name.
    pub subject: String,
    /// Additional context.
    pub detail: Option<String>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
}

impl EngineEvent {
    /// Build an event stamped with the current time.
    pub fn new(kind: EngineEventKind, subject: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            detail,
            created_at_ms: now_ms(),
        }
    }
}

/// Event sink abstraction.
pub trait EventSink: Send {
    /// Record an engine event.
    fn record(&mut self, event: EngineEvent);
}

/// Sink shared between the scheduler, throttle and bus.
pub type SharedEventSink = Arc<Mutex<Box<dyn EventSink>>>;

/// Wrap a sink for sharing.
pub fn shared_sink(sink: impl EventSink + 'static) -> SharedEventSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// Record into an optional shared sink.
pub(crate) fn record_event(
    sink: Option<&SharedEventSink>,
    kind: EngineEventKind,
    subject: &str,
    detail: Option<String>,
) {
    if let Some(sink) = sink {
        sink.lock().record(EngineEvent::new(kind, subject, detail));
    }
}

/// In-memory sink with a bounded buffer; the oldest events are dropped first.
pub struct InMemoryEventSink {
    events: VecDeque<EngineEvent>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.iter().cloned().collect()
    }

    /// Number of stored events of the given kind.
    #[must_use]
    pub fn count(&self, kind: EngineEventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&mut self, event: EngineEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// In-memory sink that can be inspected while shared with the engine.
#[derive(Clone)]
pub struct ObservableEventSink {
    inner: Arc<Mutex<InMemoryEventSink>>,
}

impl ObservableEventSink {
    /// Create an observable sink holding at most `max_events`.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryEventSink::new(max_events))),
        }
    }

    /// Snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.inner.lock().events()
    }

    /// Number of stored events of the given kind.
    #[must_use]
    pub fn count(&self, kind: EngineEventKind) -> usize {
        self.inner.lock().count(kind)
    }
}

impl EventSink for ObservableEventSink {
    fn record(&mut self, event: EngineEvent) {
        self.inner.lock().record(event);
    }
}

/// Sink that forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&mut self, event: EngineEvent) {
        match event.kind {
            EngineEventKind::ModuleDegraded
            | EngineEventKind::ModuleRemoved
            | EngineEventKind::SubscriberFailed => tracing::warn!(
                kind = %event.kind,
                subject = %event.subject,
                detail = event.detail.as_deref().unwrap_or(""),
                "engine event"
            ),
            _ => tracing::debug!(
                kind = %event.kind,
                subject = %event.subject,
                detail = event.detail.as_deref().unwrap_or(""),
                "engine event"
            ),
        }
    }
}
