//! Tests for runtime views

use std::time::Duration;

use prometheus_relay::bus::MessageBus;
use prometheus_relay::core::{FixedThrottle, Module, ModuleError, ModuleState, Scheduler};
use prometheus_relay::process::{shared_process_control, ProcessManager};
use prometheus_relay::runtime::{health, snapshot, Engine, Health, ModuleSnapshot};

struct Fails;

impl Module for Fails {
    fn iterate(&mut self) -> Result<(), ModuleError> {
        Err(ModuleError::Failed("nope".to_string()))
    }
}

struct Quiet;

impl Module for Quiet {
    fn iterate(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }
}

fn engine() -> Engine {
    let scheduler = Scheduler::new(Box::new(FixedThrottle::new(Duration::ZERO)));
    Engine::new(
        scheduler,
        MessageBus::new(),
        shared_process_control(ProcessManager::new()),
    )
}

#[test]
fn test_empty_engine_is_healthy() {
    let engine = engine();
    assert_eq!(
        health(engine.scheduler()),
        Health {
            ok: true,
            degraded: vec![]
        }
    );
    assert!(snapshot(engine.scheduler()).is_empty());
}

#[test]
fn test_snapshot_reports_degraded() {
    let mut engine = engine();
    engine.register("quiet", Box::new(Quiet)).unwrap();
    engine.register("fails", Box::new(Fails)).unwrap();
    assert!(engine.register("quiet", Box::new(Quiet)).is_err());

    engine.tick();
    let snap = snapshot(engine.scheduler());
    assert_eq!(
        snap[0],
        ModuleSnapshot {
            alias: "quiet".to_string(),
            state: ModuleState::Active
        }
    );
    assert!(!snap[1].state.is_active());
    assert_eq!(health(engine.scheduler()).degraded, vec!["fails".to_string()]);

    engine.scheduler_mut().reset("fails").unwrap();
    assert!(health(engine.scheduler()).ok);
}

#[test]
fn test_health_serializes() {
    let json = serde_json::to_value(Health {
        ok: false,
        degraded: vec!["dns".to_string()],
    })
    .unwrap();
    assert_eq!(json["ok"], false);
    assert_eq!(json["degraded"][0], "dns");
}

#[test]
fn test_stop_handle_from_engine() {
    let mut engine = engine();
    engine.register("quiet", Box::new(Quiet)).unwrap();
    let stop = engine.stop_handle();
    stop.stop();
    engine.run_forever();
    assert!(stop.is_stopped());
}
