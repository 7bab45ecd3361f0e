//! Tests for engine event sinks

use prometheus_relay::core::{
    shared_sink, EngineEvent, EngineEventKind, EventSink, InMemoryEventSink, ObservableEventSink,
    TracingEventSink,
};

#[test]
fn test_in_memory_event_sink() {
    let mut sink = InMemoryEventSink::new(10);

    let event = EngineEvent::new(
        EngineEventKind::ModuleDegraded,
        "dns",
        Some("lookup failed".to_string()),
    );

    sink.record(event);
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].kind, EngineEventKind::ModuleDegraded);
    assert_eq!(events[0].subject, "dns");
    assert_eq!(events[0].detail, Some("lookup failed".to_string()));
    assert!(events[0].created_at_ms > 0);
}

#[test]
fn test_event_sink_overflow() {
    let mut sink = InMemoryEventSink::new(2);

    sink.record(EngineEvent::new(EngineEventKind::ModuleRegistered, "a", None));
    sink.record(EngineEvent::new(EngineEventKind::ModuleRegistered, "b", None));
    sink.record(EngineEvent::new(EngineEventKind::ModuleRegistered, "c", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject, "b"); // First one popped
    assert_eq!(events[1].subject, "c");
}

#[test]
fn test_zero_capacity_sink_stores_nothing() {
    let mut sink = InMemoryEventSink::new(0);
    sink.record(EngineEvent::new(EngineEventKind::ThrottleOverrun, "throttle", None));
    assert!(sink.events().is_empty());
}

#[test]
fn test_observable_sink_shared() {
    let observed = ObservableEventSink::new(8);
    let shared = shared_sink(observed.clone());

    shared
        .lock()
        .record(EngineEvent::new(EngineEventKind::SubscriberFailed, "sub-1", None));
    shared
        .lock()
        .record(EngineEvent::new(EngineEventKind::ModuleReset, "bnc", None));

    assert_eq!(observed.count(EngineEventKind::SubscriberFailed), 1);
    assert_eq!(observed.count(EngineEventKind::ModuleReset), 1);
    assert_eq!(observed.events().len(), 2);
}

#[test]
fn test_tracing_sink_accepts_events() {
    let mut sink = TracingEventSink;
    sink.record(EngineEvent::new(EngineEventKind::ModuleRemoved, "x", Some("gone".into())));
}

#[test]
fn test_event_kind_names() {
    assert_eq!(EngineEventKind::ThrottleOverrun.to_string(), "throttle_overrun");
    let json = serde_json::to_string(&EngineEventKind::ModuleDegraded).unwrap();
    assert_eq!(json, "\"module_degraded\"");
}
